//! Clock and timer primitives shared by the browser build and native tests.
//!
//! In WASM, sleeping is backed by `setTimeout` through `gloo-timers`. Native
//! builds only run unit tests on a single-threaded executor, so a sleep there
//! yields once to let other joined futures make progress.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

/// Milliseconds since the Unix epoch (WASM-compatible)
pub fn now_ms() -> u64 {
    web_time::SystemTime::now()
        .duration_since(web_time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A future that resolves after a specified duration
pub struct Sleep {
    #[cfg(target_arch = "wasm32")]
    timer: gloo_timers::future::TimeoutFuture,
    #[cfg(not(target_arch = "wasm32"))]
    yielded: bool,
}

/// Sleep for the specified duration
pub fn sleep(duration: Duration) -> Sleep {
    #[cfg(target_arch = "wasm32")]
    {
        let millis = duration.as_millis().min(u32::MAX as u128) as u32;
        Sleep {
            timer: gloo_timers::future::TimeoutFuture::new(millis),
        }
    }
    #[cfg(not(target_arch = "wasm32"))]
    {
        let _ = duration;
        Sleep { yielded: false }
    }
}

impl Future for Sleep {
    type Output = ();

    #[cfg(target_arch = "wasm32")]
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.timer).poll(cx)
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_after_2020() {
        assert!(now_ms() > 1_577_836_800_000);
    }

    #[test]
    fn test_sleep_completes() {
        futures::executor::block_on(sleep(Duration::from_millis(10)));
    }
}
