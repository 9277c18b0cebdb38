//! Per-surface interceptors.
//!
//! Each [`SurfaceInterceptor`] rewrites one family of browser APIs so they
//! report the session [`Profile`]. Every override goes through the
//! [`StealthLayer`], which keeps it indistinguishable from the native slot.
//!
//! The registry installs surfaces independently: one failing surface is
//! reported as [`ChameleonError::InjectionFailure`] and the rest still
//! install. Installation is idempotent per page.

pub mod audio;
pub mod canvas;
pub mod navigator;
pub mod screen;
pub mod timezone;
pub mod webgl;

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use serde::Serialize;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use crate::config::SurfaceToggles;
use crate::error::{ChameleonError, ErrorInfo};
use crate::jitter::JitterHandle;
use crate::profile::Profile;
use crate::stealth::{self, Binding, GetterFn, StealthLayer};
use crate::surface::Surface;

thread_local! {
    static INSTALLED: RefCell<BTreeSet<Surface>> = const { RefCell::new(BTreeSet::new()) };
}

/// Everything an interceptor needs at install time.
pub struct InstallContext<'a> {
    pub profile: &'a Profile,
    pub jitter: Rc<JitterHandle>,
    pub stealth: &'a StealthLayer,
}

/// One spoofed surface.
pub trait SurfaceInterceptor {
    fn surface(&self) -> Surface;

    /// Install every override of this surface. Must run before page scripts.
    fn install(&self, cx: &InstallContext<'_>) -> Result<Vec<Binding>, JsValue>;
}

/// Outcome of one `install_all` pass.
#[derive(Debug, Default, Clone)]
pub struct InstallReport {
    pub installed: Vec<Surface>,
    pub already_installed: Vec<Surface>,
    pub skipped: Vec<Surface>,
    pub bindings: Vec<Binding>,
    pub failures: Vec<ChameleonError>,
    pub degraded: Vec<ChameleonError>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InstallReportWire<'a> {
    installed: &'a [Surface],
    already_installed: &'a [Surface],
    skipped: &'a [Surface],
    bindings: usize,
    failures: Vec<ErrorInfo>,
    degraded: Vec<ErrorInfo>,
}

impl InstallReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn to_js(&self) -> Result<JsValue, serde_wasm_bindgen::Error> {
        serde_wasm_bindgen::to_value(&InstallReportWire {
            installed: &self.installed,
            already_installed: &self.already_installed,
            skipped: &self.skipped,
            bindings: self.bindings.len(),
            failures: self.failures.iter().map(ErrorInfo::from).collect(),
            degraded: self.degraded.iter().map(ErrorInfo::from).collect(),
        })
    }
}

/// All interceptors, in installation order.
pub struct InterceptorRegistry {
    interceptors: Vec<Box<dyn SurfaceInterceptor>>,
}

impl InterceptorRegistry {
    pub fn new() -> Self {
        Self {
            interceptors: vec![
                Box::new(navigator::NavigatorInterceptor),
                Box::new(screen::ScreenInterceptor),
                Box::new(timezone::TimezoneInterceptor),
                Box::new(canvas::CanvasInterceptor),
                Box::new(webgl::WebglInterceptor),
                Box::new(audio::AudioInterceptor),
            ],
        }
    }

    pub fn surfaces(&self) -> Vec<Surface> {
        self.interceptors.iter().map(|i| i.surface()).collect()
    }

    /// Install every enabled surface not yet installed on this page.
    pub fn install_all(
        &self,
        profile: &Profile,
        jitter: Rc<JitterHandle>,
        toggles: &SurfaceToggles,
    ) -> InstallReport {
        let stealth = StealthLayer::new();
        let cx = InstallContext {
            profile,
            jitter,
            stealth: &stealth,
        };
        let mut report = InstallReport::default();

        for interceptor in &self.interceptors {
            let surface = interceptor.surface();
            if !toggles.is_enabled(surface) {
                report.skipped.push(surface);
                continue;
            }
            if INSTALLED.with(|s| s.borrow().contains(&surface)) {
                report.already_installed.push(surface);
                continue;
            }

            match interceptor.install(&cx) {
                Ok(bindings) => {
                    log::info!("🛡️ {} spoofed ({} bindings)", surface, bindings.len());
                    INSTALLED.with(|s| s.borrow_mut().insert(surface));
                    report.installed.push(surface);
                    report.bindings.extend(bindings);
                }
                Err(e) => {
                    let reason = e.as_string().unwrap_or_else(|| format!("{:?}", e));
                    log::warn!("⚠️ {} install failed: {}", surface, reason);
                    report
                        .failures
                        .push(ChameleonError::InjectionFailure { surface, reason });
                }
            }
        }

        report.degraded = stealth.diagnostics();
        report
    }
}

impl Default for InterceptorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Surfaces installed on this page so far.
pub fn installed_surfaces() -> Vec<Surface> {
    INSTALLED.with(|s| s.borrow().iter().copied().collect())
}

/// Getter that always yields `value`.
pub(crate) fn constant(value: JsValue) -> GetterFn {
    Box::new(move |_| Ok(value.clone()))
}

/// `argumentsList[index]`, or `undefined`.
pub(crate) fn arg(args: &JsValue, index: u32) -> JsValue {
    let args: &js_sys::Array = args.unchecked_ref();
    if index < args.length() {
        args.get(index)
    } else {
        JsValue::UNDEFINED
    }
}

/// Post-install self check, as seen from page script.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityStatus {
    pub navigator: bool,
    pub screen: bool,
    pub timezone: bool,
    pub webgl: bool,
    pub canvas: bool,
    pub audio: bool,
    pub anti_detection: bool,
    pub installed: Vec<Surface>,
}

/// Compare live API answers with `profile`.
pub fn identity_status(profile: &Profile) -> IdentityStatus {
    let read = |owner: &str, prop: &str| -> Option<JsValue> {
        let obj = stealth::global(owner).ok()?;
        js_sys::Reflect::get(&obj, &prop.into()).ok()
    };

    let navigator = read("navigator", "platform").and_then(|v| v.as_string())
        == Some(profile.navigator.platform.clone())
        && read("navigator", "hardwareConcurrency").and_then(|v| v.as_f64())
            == Some(profile.navigator.hardware_concurrency as f64);
    let screen = read("screen", "width").and_then(|v| v.as_f64()) == Some(profile.screen.width as f64)
        && read("screen", "availHeight").and_then(|v| v.as_f64())
            == Some(profile.screen.avail_height as f64);
    let now = js_sys::Date::new_0();
    let timezone = timezone::LocalClock::new(&profile.timezone)
        .map(|clock| clock.timezone_offset(now.get_time()) == now.get_timezone_offset())
        .unwrap_or(false);
    let webgl = webgl::live_unmasked_renderer().as_deref() == Some(profile.webgl.renderer.as_str());

    let is_overridden = |ctor: &str, method: &str| -> bool {
        stealth::prototype(ctor)
            .and_then(|p| js_sys::Reflect::get(&p, &method.into()))
            .map(|f| stealth::native_of(&f).is_some())
            .unwrap_or(false)
    };
    let canvas = is_overridden("HTMLCanvasElement", "toDataURL")
        && is_overridden("CanvasRenderingContext2D", "getImageData");
    let audio = is_overridden("AudioBuffer", "getChannelData");

    let anti_detection = stealth::prototype("Navigator")
        .ok()
        .and_then(|proto| stealth::installed_getter(&proto, "platform"))
        .and_then(|getter| {
            let native = stealth::native_of(&getter)?;
            Some(stealth::verify_disguise(&native, &getter).is_clean())
        })
        .unwrap_or(false);

    IdentityStatus {
        navigator,
        screen,
        timezone,
        webgl,
        canvas,
        audio,
        anti_detection,
        installed: installed_surfaces(),
    }
}
