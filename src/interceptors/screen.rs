//! Screen geometry.

use js_sys::Reflect;
use wasm_bindgen::prelude::*;

use super::{constant, InstallContext, SurfaceInterceptor};
use crate::stealth::{self, Binding};
use crate::surface::Surface;

pub struct ScreenInterceptor;

impl SurfaceInterceptor for ScreenInterceptor {
    fn surface(&self) -> Surface {
        Surface::Screen
    }

    fn install(&self, cx: &InstallContext<'_>) -> Result<Vec<Binding>, JsValue> {
        let s = &cx.profile.screen;
        let proto = stealth::prototype("Screen")?;

        let values = [
            ("width", s.width),
            ("height", s.height),
            ("availWidth", s.avail_width),
            ("availHeight", s.avail_height),
            ("colorDepth", s.color_depth),
            ("pixelDepth", s.pixel_depth),
        ];

        let mut bindings = Vec::with_capacity(values.len() + 1);
        for (name, value) in values {
            bindings.push(cx.stealth.override_getter(
                Surface::Screen,
                "Screen.prototype",
                &proto,
                name,
                constant(JsValue::from_f64(value as f64)),
            )?);
        }

        // Chrome keeps devicePixelRatio on the global object itself.
        let global = js_sys::global();
        let on_global = !Reflect::get_own_property_descriptor(&global, &"devicePixelRatio".into())?
            .is_undefined();
        let (owner, target) = if on_global {
            ("window", JsValue::from(global))
        } else {
            ("Window.prototype", stealth::prototype("Window")?)
        };
        bindings.push(cx.stealth.override_getter(
            Surface::Screen,
            owner,
            &target,
            "devicePixelRatio",
            constant(JsValue::from_f64(s.device_pixel_ratio)),
        )?);

        Ok(bindings)
    }
}
