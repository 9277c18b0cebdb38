//! Canvas pixel reads.
//!
//! `getImageData` perturbs the `ImageData` copy it returns. `toDataURL` and
//! `toBlob` draw the page canvas onto a scratch canvas, perturb that and
//! serialize it, so the page's own bitmap is never written to. Each read
//! takes a fresh call ordinal.

use std::rc::Rc;

use js_sys::{Array, Function, Reflect, Uint8ClampedArray};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{CanvasRenderingContext2d, HtmlCanvasElement, ImageData};

use super::{InstallContext, SurfaceInterceptor};
use crate::jitter::JitterHandle;
use crate::stealth::{self, ApplyTrap, Binding};
use crate::surface::Surface;

pub struct CanvasInterceptor;

impl SurfaceInterceptor for CanvasInterceptor {
    fn surface(&self) -> Surface {
        Surface::Canvas
    }

    fn install(&self, cx: &InstallContext<'_>) -> Result<Vec<Binding>, JsValue> {
        let ctx_proto = stealth::prototype("CanvasRenderingContext2D")?;
        let canvas_proto = stealth::prototype("HTMLCanvasElement")?;
        // Captured before patching so internal reads neither recurse nor
        // consume ordinals.
        let native_get_image_data: Function =
            Reflect::get(&ctx_proto, &"getImageData".into())?.dyn_into()?;

        let mut bindings = Vec::with_capacity(3);

        let jitter = Rc::clone(&cx.jitter);
        let trap: ApplyTrap = Closure::wrap(Box::new(
            move |target: JsValue, this_arg: JsValue, args: JsValue| -> Result<JsValue, JsValue> {
                let image = Reflect::apply::<fn() -> JsValue>(target.unchecked_ref(), &this_arg, args.unchecked_ref())?;
                perturb_image_data(&jitter, &image)?;
                Ok(image)
            },
        ) as Box<dyn FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue>>);
        bindings.push(cx.stealth.override_method(
            Surface::Canvas,
            "CanvasRenderingContext2D.prototype",
            &ctx_proto,
            "getImageData",
            trap,
        )?);

        for method in ["toDataURL", "toBlob"] {
            let jitter = Rc::clone(&cx.jitter);
            let read = native_get_image_data.clone();
            let trap: ApplyTrap = Closure::wrap(Box::new(
                move |target: JsValue, this_arg: JsValue, args: JsValue| -> Result<JsValue, JsValue> {
                    match noisy_copy(&jitter, &read, &this_arg) {
                        Ok(Some(scratch)) => {
                            Reflect::apply::<fn() -> JsValue>(target.unchecked_ref(), &scratch, args.unchecked_ref())
                        }
                        // Empty, tainted or non-canvas receivers behave natively.
                        Ok(None) | Err(_) => {
                            Reflect::apply::<fn() -> JsValue>(target.unchecked_ref(), &this_arg, args.unchecked_ref())
                        }
                    }
                },
            )
                as Box<dyn FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue>>);
            bindings.push(cx.stealth.override_method(
                Surface::Canvas,
                "HTMLCanvasElement.prototype",
                &canvas_proto,
                method,
                trap,
            )?);
        }

        Ok(bindings)
    }
}

fn perturb_image_data(jitter: &JitterHandle, image: &JsValue) -> Result<(), JsValue> {
    let data: Uint8ClampedArray = Reflect::get(image, &"data".into())?.dyn_into()?;
    let mut buffer = vec![0u8; data.length() as usize];
    data.copy_to(&mut buffer);
    let ordinal = jitter.next_ordinal(Surface::Canvas);
    jitter.engine().perturb_pixels(ordinal, &mut buffer);
    data.copy_from(&buffer);
    Ok(())
}

/// Scratch canvas holding a perturbed copy of `source`, or `None` when there
/// is nothing to perturb.
fn noisy_copy(
    jitter: &JitterHandle,
    native_get_image_data: &Function,
    source: &JsValue,
) -> Result<Option<JsValue>, JsValue> {
    let source: &HtmlCanvasElement = source
        .dyn_ref()
        .ok_or_else(|| JsValue::from_str("receiver is not a canvas"))?;
    let (width, height) = (source.width(), source.height());
    if width == 0 || height == 0 {
        return Ok(None);
    }

    let document = web_sys::window()
        .and_then(|w| w.document())
        .ok_or_else(|| JsValue::from_str("no document"))?;
    let scratch: HtmlCanvasElement = document.create_element("canvas")?.dyn_into()?;
    scratch.set_width(width);
    scratch.set_height(height);
    let ctx: CanvasRenderingContext2d = scratch
        .get_context("2d")?
        .ok_or_else(|| JsValue::from_str("no 2d context"))?
        .dyn_into()?;
    ctx.draw_image_with_html_canvas_element(source, 0.0, 0.0)?;

    let image = Reflect::apply(
        native_get_image_data,
        &ctx,
        &Array::of4(
            &JsValue::from_f64(0.0),
            &JsValue::from_f64(0.0),
            &JsValue::from_f64(width as f64),
            &JsValue::from_f64(height as f64),
        ),
    )?;
    perturb_image_data(jitter, &image)?;
    ctx.put_image_data(image.unchecked_ref::<ImageData>(), 0.0, 0.0)?;
    Ok(Some(scratch.into()))
}
