//! # Chameleon WASM
//!
//! Per-session browser identity synthesis and stealth API interception,
//! compiled to WebAssembly.
//!
//! ## Architecture
//!
//! ```text
//! background context                   page main world
//! ------------------                   ---------------
//! BackgroundSession                    install_identity(seed)
//!   ↓                                    ↓
//! SessionBridge ── seed ──────────────→ ProfileSynthesizer
//!   ↓         ←──── saveProfile ──────   ↓
//! SessionStore / NetworkProbe          JitterEngine + InterceptorRegistry
//!   ↓                                    ↓
//! CoherenceEvaluator                   StealthLayer (Proxy disguise)
//! ```
//!
//! One 256-bit seed per session determines the whole presented device. The
//! JS glue fetches the seed from the background, calls [`install_identity`]
//! before any page script runs, and reports the resulting profile back.

use std::cell::RefCell;
use std::rc::Rc;

use js_sys::{Object, Promise, Reflect};
use serde::Serialize;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::future_to_promise;

// Modules
pub mod bridge;
pub mod coherence;
pub mod config;
pub mod error;
pub mod interceptors;
pub mod jitter;
pub mod network;
pub mod platform;
pub mod profile;
pub mod runtime;
pub mod seed;
pub mod stealth;
pub mod surface;

pub use bridge::{
    ChromeSessionStore, MemoryStore, Request, Response, Session, SessionBridge, SessionEvent, SessionInfo,
    SessionStore, StoredSession,
};
pub use coherence::{Check, CheckStatus, CoherenceEvaluator, CoherenceReport, Grade};
pub use config::{ChameleonConfig, RetryPolicy, SurfaceToggles};
pub use error::{ChameleonError, ErrorCode, ErrorInfo, Result};
pub use interceptors::{InstallReport, InterceptorRegistry, SurfaceInterceptor};
pub use jitter::{JitterEngine, JitterHandle};
pub use network::{IpApiProbe, NetworkProbe, NetworkSignal};
pub use platform::TargetPlatform;
pub use profile::{Profile, ProfileSynthesizer};
pub use seed::{Seed, SeedManager};
pub use stealth::StealthLayer;
pub use surface::Surface;

thread_local! {
    /// Profile installed on this page, for the self check.
    static PAGE_PROFILE: RefCell<Option<Profile>> = const { RefCell::new(None) };
}

/// Initialize the module
///
/// Installs the console logger.
#[wasm_bindgen(start)]
pub fn init() {
    if console_log::init_with_level(log::Level::Info).is_err() {
        // Already initialized by an earlier instance in this realm.
        log::set_max_level(log::LevelFilter::Info);
    }
    log::info!("Chameleon WASM initialized");
}

/// Change the log level (`error`, `warn`, `info`, `debug`, `trace`).
#[wasm_bindgen]
pub fn set_log_level(level: &str) {
    let filter = level.parse::<log::LevelFilter>().unwrap_or(log::LevelFilter::Info);
    log::set_max_level(filter);
}

fn to_js<T: Serialize + ?Sized>(value: &T) -> std::result::Result<JsValue, JsValue> {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(|e| JsValue::from(ChameleonError::from(e)))
}

#[derive(Serialize)]
struct ErrorReply {
    error: ErrorInfo,
}

fn error_object(err: &ChameleonError) -> JsValue {
    to_js(&ErrorReply { error: err.into() }).unwrap_or_else(|_| JsValue::from_str(&err.to_string()))
}

/// Synthesize the profile for `seed_hex` and install every enabled surface.
///
/// Must run before page scripts. Never throws: failures come back as
/// `{error}` or inside the install report, and the page keeps working.
#[wasm_bindgen]
pub fn install_identity(seed_hex: &str, options: JsValue) -> JsValue {
    let config = ChameleonConfig::from_js(options);
    log::set_max_level(config.log_level().to_level_filter());

    let prepared = Seed::from_hex(seed_hex).and_then(|seed| {
        let profile = profile::synthesize(&seed)?;
        Ok((seed, profile))
    });
    let (seed, profile) = match prepared {
        Ok(pair) => pair,
        Err(e) => {
            log::warn!("⚠️ Identity not installed: {}", e);
            return error_object(&e);
        }
    };

    log::info!("🎭 Installing identity {}... ({})", seed.short(), profile.summary);
    let jitter = Rc::new(JitterHandle::new(JitterEngine::new(&seed, &profile)));
    let report = InterceptorRegistry::new().install_all(&profile, jitter, &config.surfaces);
    if !report.is_complete() {
        log::warn!("⚠️ {} surface(s) failed to install", report.failures.len());
    }
    PAGE_PROFILE.with(|p| *p.borrow_mut() = Some(profile.clone()));

    let result = Object::new();
    let fields = to_js(&profile).and_then(|profile| {
        Reflect::set(&result, &"profile".into(), &profile)?;
        let report = report.to_js().map_err(|e| JsValue::from(ChameleonError::from(e)))?;
        Reflect::set(&result, &"report".into(), &report)
    });
    match fields {
        Ok(_) => result.into(),
        Err(e) => error_object(&ChameleonError::Serialization(format!("{:?}", e))),
    }
}

/// Verify the installed identity as page script sees it.
#[wasm_bindgen]
pub fn check_identity_status() -> JsValue {
    match PAGE_PROFILE.with(|p| p.borrow().clone()) {
        Some(profile) => {
            let status = interceptors::identity_status(&profile);
            to_js(&status).unwrap_or(JsValue::NULL)
        }
        None => JsValue::NULL,
    }
}

/// Profile for a seed, without installing anything.
#[wasm_bindgen]
pub fn synthesize_profile(seed_hex: &str) -> std::result::Result<JsValue, JsValue> {
    let seed = Seed::from_hex(seed_hex)?;
    to_js(&profile::synthesize(&seed)?)
}

/// Human-readable dump of a seed's profile.
#[wasm_bindgen]
pub fn profile_details(seed_hex: &str) -> std::result::Result<String, JsValue> {
    let seed = Seed::from_hex(seed_hex)?;
    Ok(profile::synthesize(&seed)?.advanced_info_text(Some(&seed)))
}

/// Score a profile against a `checkVPN` reply (which may be `{error}`).
#[wasm_bindgen]
pub fn evaluate_coherence(profile: JsValue, network: JsValue) -> std::result::Result<JsValue, JsValue> {
    let profile: Profile = serde_wasm_bindgen::from_value(profile).map_err(ChameleonError::from)?;
    let signal = if network.is_undefined()
        || network.is_null()
        || !Reflect::get(&network, &"error".into())?.is_undefined()
    {
        Err(ChameleonError::NetworkFailure("no network signal".into()))
    } else {
        serde_wasm_bindgen::from_value::<NetworkSignal>(network).map_err(ChameleonError::from)
    };
    to_js(&CoherenceEvaluator::new().evaluate(&profile, &signal))
}

/// Classify a tab URL for the popup.
#[wasm_bindgen]
pub fn classify_platform(url: &str) -> JsValue {
    to_js(&platform::PlatformInfo::from(TargetPlatform::from_url(url))).unwrap_or(JsValue::NULL)
}

/// Session owner for the background service worker
#[wasm_bindgen]
pub struct BackgroundSession {
    bridge: Rc<SessionBridge<ChromeSessionStore, IpApiProbe>>,
}

#[wasm_bindgen]
impl BackgroundSession {
    #[wasm_bindgen(constructor)]
    pub fn new(options: JsValue) -> BackgroundSession {
        let config = ChameleonConfig::from_js(options);
        log::set_max_level(config.log_level().to_level_filter());
        if !ChromeSessionStore::is_available() {
            log::warn!("⚠️ chrome.storage.session unavailable, session will not persist");
        }
        let probe = IpApiProbe::new(config.ip_lookup_url.clone());
        Self {
            bridge: Rc::new(SessionBridge::new(ChromeSessionStore::new(), probe, config)),
        }
    }

    /// Adopt the stored session or start one. Resolves to the seed hex.
    pub fn restore(&self) -> Promise {
        let bridge = Rc::clone(&self.bridge);
        future_to_promise(async move {
            let session = bridge.restore().await?;
            Ok(JsValue::from_str(&session.seed.to_hex()))
        })
    }

    /// Answer one runtime message. Always resolves, errors included.
    pub fn handle_message(&self, message: JsValue) -> Promise {
        let bridge = Rc::clone(&self.bridge);
        future_to_promise(async move {
            let response = match serde_wasm_bindgen::from_value::<serde_json::Value>(message) {
                Ok(message) => bridge.handle_json(message).await,
                Err(e) => Response::error(&ChameleonError::from(e)),
            };
            to_js(&response)
        })
    }

    /// Call `callback(event)` for every session event, e.g. to reload tabs
    /// after a regeneration.
    pub fn on_event(&self, callback: js_sys::Function) {
        use futures::StreamExt;

        let mut events = self.bridge.subscribe();
        wasm_bindgen_futures::spawn_local(async move {
            while let Some(event) = events.next().await {
                let payload = match to_js(&event) {
                    Ok(payload) => payload,
                    Err(e) => {
                        log::warn!("⚠️ Dropping event: {:?}", e);
                        continue;
                    }
                };
                if let Err(e) = callback.call1(&JsValue::NULL, &payload) {
                    log::warn!("⚠️ Event listener threw: {:?}", e);
                }
            }
        });
    }
}
