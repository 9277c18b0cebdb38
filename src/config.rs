//! Engine configuration.
//!
//! Every field has a default, so a partial JS options object is enough:
//! ```javascript
//! install_identity(seed, { surfaces: { audio: false } });
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use wasm_bindgen::JsValue;

use crate::surface::Surface;

/// Top-level configuration shared by the page and background contexts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChameleonConfig {
    pub surfaces: SurfaceToggles,
    pub retry: RetryPolicy,
    /// How long a session-info request waits for a page to report its profile
    pub profile_wait_ms: u64,
    /// IP geolocation endpoint consumed by the VPN check
    pub ip_lookup_url: String,
    pub log_level: String,
}

impl Default for ChameleonConfig {
    fn default() -> Self {
        Self {
            surfaces: SurfaceToggles::default(),
            retry: RetryPolicy::default(),
            profile_wait_ms: 5_000,
            ip_lookup_url: "https://ipapi.co/json/".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl ChameleonConfig {
    /// Read options passed from JS. `undefined`, `null` or a malformed object
    /// yield the defaults.
    pub fn from_js(options: JsValue) -> Self {
        if options.is_undefined() || options.is_null() {
            return Self::default();
        }
        serde_wasm_bindgen::from_value(options).unwrap_or_else(|e| {
            log::warn!("Ignoring malformed options: {}", e);
            Self::default()
        })
    }

    pub fn profile_wait(&self) -> Duration {
        Duration::from_millis(self.profile_wait_ms)
    }

    pub fn log_level(&self) -> log::Level {
        self.log_level.parse().unwrap_or(log::Level::Info)
    }
}

/// Which surfaces to spoof. All enabled by default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceToggles {
    pub navigator: bool,
    pub screen: bool,
    pub timezone: bool,
    pub canvas: bool,
    pub webgl: bool,
    pub audio: bool,
}

impl Default for SurfaceToggles {
    fn default() -> Self {
        Self {
            navigator: true,
            screen: true,
            timezone: true,
            canvas: true,
            webgl: true,
            audio: true,
        }
    }
}

impl SurfaceToggles {
    pub fn is_enabled(&self, surface: Surface) -> bool {
        match surface {
            Surface::Navigator => self.navigator,
            Surface::Screen => self.screen,
            Surface::Timezone => self.timezone,
            Surface::Canvas => self.canvas,
            Surface::Webgl => self.webgl,
            Surface::Audio => self.audio,
        }
    }
}

/// Bounded retry schedule for readers that arrive mid-regeneration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_ms: 1_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), growing linearly.
    pub fn delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(attempt.max(1) as u64))
    }
}
