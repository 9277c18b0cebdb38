//! Navigator metadata.
//!
//! Getters live on `Navigator.prototype`, so `navigator` itself keeps no own
//! properties. `languages` returns one frozen array, the same object on every
//! read, like Chrome.

use wasm_bindgen::prelude::*;

use super::{constant, InstallContext, SurfaceInterceptor};
use crate::stealth::{self, Binding};
use crate::surface::Surface;

pub struct NavigatorInterceptor;

impl SurfaceInterceptor for NavigatorInterceptor {
    fn surface(&self) -> Surface {
        Surface::Navigator
    }

    fn install(&self, cx: &InstallContext<'_>) -> Result<Vec<Binding>, JsValue> {
        let nav = &cx.profile.navigator;
        let proto = stealth::prototype("Navigator")?;

        let values = [
            ("userAgent", JsValue::from_str(&nav.user_agent)),
            ("appVersion", JsValue::from_str(&nav.app_version)),
            ("platform", JsValue::from_str(&nav.platform)),
            ("vendor", JsValue::from_str(&nav.vendor)),
            ("language", JsValue::from_str(&nav.language)),
            ("languages", stealth::frozen_string_array(&nav.languages)),
            ("hardwareConcurrency", JsValue::from_f64(nav.hardware_concurrency as f64)),
            ("deviceMemory", JsValue::from_f64(nav.device_memory as f64)),
        ];

        let mut bindings = Vec::with_capacity(values.len() + 1);
        for (name, value) in values {
            bindings.push(cx.stealth.override_getter(
                Surface::Navigator,
                "Navigator.prototype",
                &proto,
                name,
                constant(value),
            )?);
        }

        // Client Hints; absent outside secure contexts and Chromium.
        if let Ok(ua_data) = stealth::prototype("NavigatorUAData") {
            bindings.push(cx.stealth.override_getter(
                Surface::Navigator,
                "NavigatorUAData.prototype",
                &ua_data,
                "platform",
                constant(JsValue::from_str(&nav.ua_platform)),
            )?);
        }

        Ok(bindings)
    }
}
