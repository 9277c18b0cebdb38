//! Audio sample reads.
//!
//! `getChannelData` returns the buffer's live `Float32Array`, so noise is
//! written into it. A pristine copy is kept per channel array and every read
//! re-derives the noisy view from it; repeated reads never accumulate noise.
//! If the page wrote to the array since the last read, its contents become
//! the new pristine copy.

use std::rc::Rc;

use js_sys::{Array, Float32Array, Function, Reflect, WeakMap};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use super::{arg, InstallContext, SurfaceInterceptor};
use crate::jitter::JitterHandle;
use crate::stealth::{self, ApplyTrap, Binding};
use crate::surface::Surface;

pub struct AudioInterceptor;

impl SurfaceInterceptor for AudioInterceptor {
    fn surface(&self) -> Surface {
        Surface::Audio
    }

    fn install(&self, cx: &InstallContext<'_>) -> Result<Vec<Binding>, JsValue> {
        let buffer_proto = stealth::prototype("AudioBuffer")?;
        let native_get_channel_data: Function =
            Reflect::get(&buffer_proto, &"getChannelData".into())?.dyn_into()?;
        let snapshots = Snapshots(WeakMap::new());
        let mut bindings = Vec::with_capacity(3);

        let jitter = Rc::clone(&cx.jitter);
        let store = snapshots.clone();
        let trap: ApplyTrap = Closure::wrap(Box::new(
            move |target: JsValue, this_arg: JsValue, args: JsValue| -> Result<JsValue, JsValue> {
                let live: Float32Array =
                    Reflect::apply::<fn() -> JsValue>(target.unchecked_ref(), &this_arg, args.unchecked_ref())?.dyn_into()?;
                let pristine = store.pristine(&live);
                let mut noisy = pristine.clone();
                jitter
                    .engine()
                    .perturb_samples(jitter.next_ordinal(Surface::Audio), &mut noisy);
                live.copy_from(&noisy);
                store.remember(&live, &pristine, &noisy);
                Ok(live.into())
            },
        ) as Box<dyn FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue>>);
        bindings.push(cx.stealth.override_method(
            Surface::Audio,
            "AudioBuffer.prototype",
            &buffer_proto,
            "getChannelData",
            trap,
        )?);

        let jitter = Rc::clone(&cx.jitter);
        let store = snapshots;
        let trap: ApplyTrap = Closure::wrap(Box::new(
            move |target: JsValue, this_arg: JsValue, args: JsValue| -> Result<JsValue, JsValue> {
                Reflect::apply::<fn() -> JsValue>(target.unchecked_ref(), &this_arg, args.unchecked_ref())?;
                let dest: Float32Array = arg(&args, 0).dyn_into()?;
                let channel = arg(&args, 1);
                let offset = arg(&args, 2).as_f64().unwrap_or(0.0).max(0.0) as usize;

                let live: Float32Array = Reflect::apply(
                    &native_get_channel_data,
                    &this_arg,
                    &Array::of1(&channel),
                )?
                .dyn_into()?;
                let copied = copied_len(dest.length() as usize, live.length() as usize, offset);
                if copied == 0 {
                    return Ok(JsValue::UNDEFINED);
                }
                let written = dest.subarray(0, copied as u32);
                let mut samples = match store.known_pristine(&live) {
                    Some(pristine) => pristine[offset..offset + copied].to_vec(),
                    None => Snapshots::to_vec(&written),
                };
                jitter
                    .engine()
                    .perturb_samples(jitter.next_ordinal(Surface::Audio), &mut samples);
                written.copy_from(&samples);
                Ok(JsValue::UNDEFINED)
            },
        ) as Box<dyn FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue>>);
        bindings.push(cx.stealth.override_method(
            Surface::Audio,
            "AudioBuffer.prototype",
            &buffer_proto,
            "copyFromChannel",
            trap,
        )?);

        if let Ok(analyser_proto) = stealth::prototype("AnalyserNode") {
            let jitter = Rc::clone(&cx.jitter);
            let trap: ApplyTrap = Closure::wrap(Box::new(
                move |target: JsValue, this_arg: JsValue, args: JsValue| -> Result<JsValue, JsValue> {
                    Reflect::apply::<fn() -> JsValue>(target.unchecked_ref(), &this_arg, args.unchecked_ref())?;
                    if let Ok(bins) = arg(&args, 0).dyn_into::<Float32Array>() {
                        spectrum_noise(&jitter, &bins);
                    }
                    Ok(JsValue::UNDEFINED)
                },
            )
                as Box<dyn FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue>>);
            bindings.push(cx.stealth.override_method(
                Surface::Audio,
                "AnalyserNode.prototype",
                &analyser_proto,
                "getFloatFrequencyData",
                trap,
            )?);
        }

        Ok(bindings)
    }
}

/// Samples `copyFromChannel` writes: the rest of `dest` keeps its contents.
fn copied_len(dest_len: usize, channel_len: usize, offset: usize) -> usize {
    dest_len.min(channel_len.saturating_sub(offset))
}

fn spectrum_noise(jitter: &JitterHandle, bins: &Float32Array) {
    let mut values = vec![0f32; bins.length() as usize];
    bins.copy_to(&mut values);
    jitter
        .engine()
        .perturb_spectrum(jitter.next_ordinal(Surface::Audio), &mut values);
    bins.copy_from(&values);
}

/// live channel array -> `[pristine, last noisy view]`
#[derive(Clone)]
struct Snapshots(WeakMap);

impl Snapshots {
    fn to_vec(array: &Float32Array) -> Vec<f32> {
        let mut out = vec![0f32; array.length() as usize];
        array.copy_to(&mut out);
        out
    }

    /// Pristine samples if `live` still holds exactly what we last wrote.
    fn known_pristine(&self, live: &Float32Array) -> Option<Vec<f32>> {
        let entry: Array = self.0.get(live).dyn_into().ok()?;
        let last: Float32Array = entry.get(1).dyn_into().ok()?;
        if Self::to_vec(&last) != Self::to_vec(live) {
            return None;
        }
        let pristine: Float32Array = entry.get(0).dyn_into().ok()?;
        Some(Self::to_vec(&pristine))
    }

    fn pristine(&self, live: &Float32Array) -> Vec<f32> {
        self.known_pristine(live).unwrap_or_else(|| Self::to_vec(live))
    }

    fn remember(&self, live: &Float32Array, pristine: &[f32], noisy: &[f32]) {
        let entry = Array::of2(&Float32Array::from(pristine), &Float32Array::from(noisy));
        self.0.set(live, &entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_stops_at_channel_end() {
        assert_eq!(copied_len(128, 100, 0), 100);
        assert_eq!(copied_len(128, 100, 90), 10);
        assert_eq!(copied_len(16, 100, 10), 16);
    }

    #[test]
    fn test_copy_past_channel_end_writes_nothing() {
        assert_eq!(copied_len(16, 100, 100), 0);
        assert_eq!(copied_len(16, 100, 500), 0);
        assert_eq!(copied_len(0, 100, 0), 0);
    }
}
