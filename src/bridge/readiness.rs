// Profile readiness
//
// The profile is synthesized in the page, so the background only learns it
// when a page calls `saveProfile`. Session-info requests that arrive before
// that wait here, bounded by a timeout.

use std::cell::RefCell;
use std::time::Duration;

use futures::channel::oneshot;
use futures::future::{self, Either};

use crate::profile::Profile;
use crate::runtime;

#[derive(Debug, Default)]
pub struct ProfileReadiness {
    waiters: RefCell<Vec<oneshot::Sender<Profile>>>,
}

impl ProfileReadiness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake every pending waiter with `profile`. Returns how many were woken.
    pub fn notify(&self, profile: &Profile) -> usize {
        let waiters: Vec<_> = self.waiters.borrow_mut().drain(..).collect();
        waiters
            .into_iter()
            .filter(|tx| !tx.is_canceled())
            .filter_map(|tx| tx.send(profile.clone()).ok())
            .count()
    }

    pub fn pending(&self) -> usize {
        self.waiters.borrow().iter().filter(|tx| !tx.is_canceled()).count()
    }

    /// Next saved profile, or `None` after `timeout`.
    pub async fn wait(&self, timeout: Duration) -> Option<Profile> {
        let (tx, rx) = oneshot::channel();
        {
            let mut waiters = self.waiters.borrow_mut();
            waiters.retain(|tx| !tx.is_canceled());
            waiters.push(tx);
        }

        match future::select(rx, Box::pin(runtime::sleep(timeout))).await {
            Either::Left((Ok(profile), _)) => Some(profile),
            Either::Left((Err(_), _)) => None,
            Either::Right(((), rx)) => {
                drop(rx);
                self.waiters.borrow_mut().retain(|tx| !tx.is_canceled());
                log::debug!("No profile reported within {:?}", timeout);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::Seed;
    use futures::executor::block_on;

    #[test]
    fn test_notify_wakes_waiter() {
        let readiness = ProfileReadiness::new();
        let profile = crate::profile::synthesize(&Seed::from_bytes([9; 32])).unwrap();

        let (got, woken) = block_on(async {
            let wait = readiness.wait(Duration::from_secs(5));
            let notify = async { readiness.notify(&profile) };
            futures::join!(wait, notify)
        });
        assert_eq!(woken, 1);
        assert_eq!(got, Some(profile));
        assert_eq!(readiness.pending(), 0);
    }

    #[test]
    fn test_timeout_yields_none() {
        let readiness = ProfileReadiness::new();
        assert_eq!(block_on(readiness.wait(Duration::from_millis(1))), None);
    }

    #[test]
    fn test_timed_out_waiters_are_dropped() {
        let readiness = ProfileReadiness::new();
        for _ in 0..10 {
            assert_eq!(block_on(readiness.wait(Duration::from_millis(1))), None);
        }
        assert!(readiness.waiters.borrow().is_empty());
    }

    #[test]
    fn test_abandoned_waiters_pruned_on_next_wait() {
        use futures::FutureExt;

        let readiness = ProfileReadiness::new();
        for _ in 0..10 {
            assert!(readiness.wait(Duration::from_secs(5)).now_or_never().is_none());
        }
        assert_eq!(readiness.pending(), 0);
        assert!(readiness.wait(Duration::from_secs(5)).now_or_never().is_none());
        assert_eq!(readiness.waiters.borrow().len(), 1);
    }

    #[test]
    fn test_notify_without_waiters() {
        let readiness = ProfileReadiness::new();
        let profile = crate::profile::synthesize(&Seed::from_bytes([9; 32])).unwrap();
        assert_eq!(readiness.notify(&profile), 0);
    }
}
