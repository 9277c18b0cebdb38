//! WebGL vendor and renderer strings.
//!
//! The masked `VENDOR`/`RENDERER` pair reports what Chrome always reports.
//! The unmasked pair from `WEBGL_debug_renderer_info` reports the profile GPU.
//! The extension itself stays available.

use js_sys::{Array, Function, Reflect};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use super::{arg, InstallContext, SurfaceInterceptor};
use crate::stealth::{self, ApplyTrap, Binding};
use crate::surface::Surface;

pub const VENDOR: u32 = 0x1F00;
pub const RENDERER: u32 = 0x1F01;
pub const UNMASKED_VENDOR_WEBGL: u32 = 0x9245;
pub const UNMASKED_RENDERER_WEBGL: u32 = 0x9246;

const MASKED_VENDOR: &str = "WebKit";
const MASKED_RENDERER: &str = "WebKit WebGL";

/// Answer for `getParameter(pname)`, or `None` to defer to the driver.
pub fn spoofed_parameter(pname: u32, vendor: &str, renderer: &str) -> Option<String> {
    match pname {
        VENDOR => Some(MASKED_VENDOR.to_string()),
        RENDERER => Some(MASKED_RENDERER.to_string()),
        UNMASKED_VENDOR_WEBGL => Some(vendor.to_string()),
        UNMASKED_RENDERER_WEBGL => Some(renderer.to_string()),
        _ => None,
    }
}

pub struct WebglInterceptor;

impl SurfaceInterceptor for WebglInterceptor {
    fn surface(&self) -> Surface {
        Surface::Webgl
    }

    fn install(&self, cx: &InstallContext<'_>) -> Result<Vec<Binding>, JsValue> {
        let mut bindings = Vec::new();

        for ctor in ["WebGLRenderingContext", "WebGL2RenderingContext"] {
            // WebGL2 is missing on some engines; WebGL1 is required.
            let proto = match stealth::prototype(ctor) {
                Ok(proto) => proto,
                Err(e) if ctor == "WebGLRenderingContext" => return Err(e),
                Err(_) => continue,
            };

            let vendor = cx.profile.webgl.vendor.clone();
            let renderer = cx.profile.webgl.renderer.clone();
            let trap: ApplyTrap = Closure::wrap(Box::new(
                move |target: JsValue, this_arg: JsValue, args: JsValue| -> Result<JsValue, JsValue> {
                    let native: &Function = target.unchecked_ref();
                    let pname = arg(&args, 0).as_f64().map(|p| p as u32);
                    match pname.and_then(|p| spoofed_parameter(p, &vendor, &renderer)) {
                        Some(answer) => {
                            // Brand check with a harmless query.
                            Reflect::apply(native, &this_arg, &Array::of1(&JsValue::from(VENDOR)))?;
                            Ok(JsValue::from_str(&answer))
                        }
                        None => Reflect::apply(native, &this_arg, args.unchecked_ref()),
                    }
                },
            )
                as Box<dyn FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue>>);

            bindings.push(cx.stealth.override_method(
                Surface::Webgl,
                &format!("{}.prototype", ctor),
                &proto,
                "getParameter",
                trap,
            )?);
        }

        Ok(bindings)
    }
}

/// `UNMASKED_RENDERER_WEBGL` as a page script would read it.
pub fn live_unmasked_renderer() -> Option<String> {
    let document = web_sys::window()?.document()?;
    let canvas: web_sys::HtmlCanvasElement = document.create_element("canvas").ok()?.dyn_into().ok()?;
    let gl: web_sys::WebGlRenderingContext = canvas.get_context("webgl").ok()??.dyn_into().ok()?;
    gl.get_extension("WEBGL_debug_renderer_info").ok()??;
    gl.get_parameter(UNMASKED_RENDERER_WEBGL).ok()?.as_string()
}
