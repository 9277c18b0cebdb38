//! Seeded per-call output noise.
//!
//! Every read of a noise-bearing surface gets its own call ordinal. The noise
//! for `(seed, surface, ordinal)` is a pure function of that triple, so two
//! reads in one page differ while a replay of the same triple is exact.
//!
//! Magnitudes are capped at what real hardware produces:
//! - canvas: at most ±2 on one color channel of a sparse subset of opaque pixels
//! - audio samples: below 1e-6 absolute amplitude
//! - analyser spectrum: below 0.1 dB on a sparse subset of bins

use std::cell::Cell;

use crate::profile::stream::derive_word;
use crate::profile::{AudioNoiseParams, CanvasNoiseParams, Profile};
use crate::seed::Seed;
use crate::surface::Surface;

pub const CANVAS_MAX_DELTA: u8 = 2;
pub const AUDIO_MAX_AMPLITUDE: f64 = 1.0e-6;
pub const SPECTRUM_MAX_DB: f32 = 0.1;

const CHANNEL_OFFSET: u32 = 0x10_0000;
const DELTA_OFFSET: u32 = 0x20_0000;
const ANCHOR_OFFSET: u32 = 0x30_0000;
const CYCLE_OFFSET: u32 = 0x40_0000;

/// Murmur-style avalanche mixer.
#[inline]
pub fn mix(seed: u32, index: u32) -> u32 {
    let mut h = seed ^ index;
    h = (h ^ (h >> 16)).wrapping_mul(0x45d9f3b);
    h = (h ^ (h >> 13)).wrapping_mul(0x45d9f3b);
    h ^ (h >> 16)
}

/// Noise generator for one session.
///
/// Every buffer read carries one anchor element, fixed per session and
/// content, whose delta walks through a cycle of variants by ordinal.
/// Neighbouring variants always produce different output, so reads `n` and
/// `n + 1` of the same content never match. The remaining noise is sparse and
/// keyed per call.
#[derive(Debug, Clone)]
pub struct JitterEngine {
    keys: [u32; 6],
    canvas: CanvasNoiseParams,
    audio: AudioNoiseParams,
}

impl JitterEngine {
    pub fn new(seed: &Seed, profile: &Profile) -> Self {
        let mut keys = [0u32; 6];
        for (slot, surface) in keys.iter_mut().zip(Surface::ALL) {
            *slot = derive_word(seed, &format!("jitter/{}", surface));
        }

        let mut canvas = profile.canvas_noise_params;
        canvas.max_delta = canvas.max_delta.clamp(1, CANVAS_MAX_DELTA);
        canvas.rate_shift = canvas.rate_shift.clamp(1, 12);

        let mut audio = profile.audio_noise_params;
        if !(audio.amplitude > 0.0 && audio.amplitude < AUDIO_MAX_AMPLITUDE) {
            audio.amplitude = AUDIO_MAX_AMPLITUDE / 2.0;
        }
        audio.byte_rate_shift = audio.byte_rate_shift.clamp(1, 12);

        Self { keys, canvas, audio }
    }

    fn session_key(&self, surface: Surface) -> u32 {
        let salt = match surface {
            Surface::Canvas => self.canvas.salt,
            Surface::Audio => self.audio.salt,
            _ => 0,
        };
        self.keys[surface as usize] ^ salt
    }

    fn call_key(&self, surface: Surface, ordinal: u32) -> u32 {
        mix(self.session_key(surface), ordinal.wrapping_mul(0x9E37_79B9))
    }

    /// Variant `0..len` for `ordinal`. Consecutive ordinals get consecutive
    /// variants (mod `len`) from a per-session starting point.
    fn variant(&self, surface: Surface, ordinal: u32, len: u32) -> u32 {
        let start = mix(self.session_key(surface), CYCLE_OFFSET) as u64;
        ((start + ordinal as u64) % len as u64) as u32
    }

    /// First eligible index at or after the session's anchor position.
    fn anchor(&self, surface: Surface, len: usize, eligible: impl Fn(usize) -> bool) -> Option<usize> {
        if len == 0 {
            return None;
        }
        let start = mix(self.session_key(surface), ANCHOR_OFFSET) as usize % len;
        (0..len).map(|i| (start + i) % len).find(|i| eligible(*i))
    }

    /// Perturb an RGBA buffer in place. Fully transparent pixels are never
    /// touched. The anchor pixel always changes, on a color channel that
    /// differs between neighbouring ordinals. Returns the number of pixels
    /// changed.
    pub fn perturb_pixels(&self, ordinal: u32, rgba: &mut [u8]) -> usize {
        let pixel_count = rgba.len() / 4;
        let Some(anchor) = self.anchor(Surface::Canvas, pixel_count, |px| rgba[px * 4 + 3] != 0) else {
            return 0;
        };
        let key = self.call_key(Surface::Canvas, ordinal);
        let mask = (1u32 << self.canvas.rate_shift) - 1;
        let mut changed = 1;

        for px in 0..pixel_count {
            if px == anchor || rgba[px * 4 + 3] == 0 || mix(key, px as u32) & mask != 0 {
                continue;
            }
            let channel = (mix(key, (px as u32).wrapping_add(CHANNEL_OFFSET)) % 3) as usize;
            let bits = mix(key, (px as u32).wrapping_add(DELTA_OFFSET));
            let magnitude = 1 + ((bits >> 1) % self.canvas.max_delta as u32) as i32;
            let delta = if bits & 1 == 1 { magnitude } else { -magnitude };
            shift_byte(rgba, px * 4 + channel, delta);
            changed += 1;
        }

        // (channel, sign, magnitude) with channel varying fastest.
        let v = self.variant(Surface::Canvas, ordinal, 6 * self.canvas.max_delta as u32);
        let channel = (v % 3) as usize;
        let rest = v / 3;
        let magnitude = 1 + (rest / 2) as i32;
        let delta = if rest % 2 == 0 { magnitude } else { -magnitude };
        shift_byte(rgba, anchor * 4 + channel, delta);

        log::trace!("canvas jitter #{}: {} px", ordinal, changed);
        changed
    }

    /// Add sub-amplitude noise to every time-domain sample. The anchor sample
    /// moves by the full amplitude with a sign that alternates by ordinal.
    pub fn perturb_samples(&self, ordinal: u32, samples: &mut [f32]) {
        let Some(anchor) = self.anchor(Surface::Audio, samples.len(), |_| true) else {
            return;
        };
        let key = self.call_key(Surface::Audio, ordinal);
        let amplitude = self.audio.amplitude;
        for (i, sample) in samples.iter_mut().enumerate() {
            let noise = if i == anchor {
                if self.variant(Surface::Audio, ordinal, 2) == 0 {
                    amplitude
                } else {
                    -amplitude
                }
            } else {
                let unit = mix(key, i as u32) as f64 / u32::MAX as f64;
                (unit * 2.0 - 1.0) * amplitude
            };
            *sample += noise as f32;
        }
        log::trace!("audio jitter #{}: {} samples", ordinal, samples.len());
    }

    /// Nudge a sparse subset of finite analyser bins (dB values), plus the
    /// first finite bin at the anchor position.
    pub fn perturb_spectrum(&self, ordinal: u32, bins: &mut [f32]) {
        let Some(anchor) = self.anchor(Surface::Audio, bins.len(), |i| bins[i].is_finite()) else {
            return;
        };
        let key = self.call_key(Surface::Audio, ordinal) ^ 0x5bd1_e995;
        let mask = (1u32 << self.audio.byte_rate_shift) - 1;
        for (i, bin) in bins.iter_mut().enumerate() {
            let bits = mix(key, i as u32);
            if i == anchor || !bin.is_finite() || bits & mask != 0 {
                continue;
            }
            let magnitude = ((bits >> 16) % 100 + 1) as f32 / 100.0 * SPECTRUM_MAX_DB * 0.99;
            *bin += if bits & 0x8000 != 0 { magnitude } else { -magnitude };
        }
        let magnitude = SPECTRUM_MAX_DB / 2.0;
        bins[anchor] += if self.variant(Surface::Audio, ordinal, 2) == 0 {
            magnitude
        } else {
            -magnitude
        };
    }

    /// Byte-domain noise: canvas bytes are RGBA pixels, audio bytes move by
    /// ±1 on a sparse subset and the anchor byte by 1 or 2, alternating by
    /// ordinal. Static surfaces pass through unchanged.
    pub fn perturb_bytes(&self, surface: Surface, ordinal: u32, bytes: &mut [u8]) {
        match surface {
            Surface::Canvas => {
                self.perturb_pixels(ordinal, bytes);
            }
            Surface::Audio => {
                let Some(anchor) = self.anchor(Surface::Audio, bytes.len(), |_| true) else {
                    return;
                };
                let key = self.call_key(Surface::Audio, ordinal);
                let mask = (1u32 << self.audio.byte_rate_shift) - 1;
                for i in 0..bytes.len() {
                    let bits = mix(key, i as u32);
                    if i != anchor && bits & mask == 0 {
                        shift_byte(bytes, i, if bits & 0x8000 != 0 { 1 } else { -1 });
                    }
                }
                let up = mix(self.session_key(Surface::Audio), DELTA_OFFSET) & 1 == 1;
                let magnitude = 1 + self.variant(Surface::Audio, ordinal, 2) as i32;
                shift_byte(bytes, anchor, if up { magnitude } else { -magnitude });
            }
            _ => {}
        }
    }

    /// Scalar form. Canvas numbers shift by a non-zero integer up to the
    /// canvas delta; audio numbers scale by less than the audio amplitude
    /// (zero moves by less than the amplitude). The sign alternates by
    /// ordinal.
    pub fn perturb_number(&self, surface: Surface, ordinal: u32, base: f64) -> f64 {
        match surface {
            Surface::Canvas => {
                let v = self.variant(Surface::Canvas, ordinal, 2 * self.canvas.max_delta as u32);
                let magnitude = (1 + v / 2) as f64;
                if v % 2 == 0 {
                    base + magnitude
                } else {
                    base - magnitude
                }
            }
            Surface::Audio => {
                let unit = self.call_key(surface, ordinal) as f64 / u32::MAX as f64;
                let magnitude = 0.25 + 0.74 * unit;
                let epsilon = if self.variant(Surface::Audio, ordinal, 2) == 0 {
                    magnitude
                } else {
                    -magnitude
                };
                if base == 0.0 {
                    epsilon * self.audio.amplitude
                } else {
                    base * (1.0 + epsilon * self.audio.amplitude)
                }
            }
            _ => base,
        }
    }
}

/// Move `bytes[idx]` by `delta`, reversing direction at the ends of the range
/// so the byte always changes.
fn shift_byte(bytes: &mut [u8], idx: usize, delta: i32) {
    let current = bytes[idx] as i32;
    let delta = if (0..=255).contains(&(current + delta)) { delta } else { -delta };
    bytes[idx] = (current + delta).clamp(0, 255) as u8;
}

/// Per-page view of the engine that hands out call ordinals.
pub struct JitterHandle {
    engine: JitterEngine,
    ordinals: [Cell<u32>; 6],
}

impl JitterHandle {
    pub fn new(engine: JitterEngine) -> Self {
        Self {
            engine,
            ordinals: Default::default(),
        }
    }

    pub fn engine(&self) -> &JitterEngine {
        &self.engine
    }

    /// Ordinal for the next read of `surface`, starting at 0.
    pub fn next_ordinal(&self, surface: Surface) -> u32 {
        let cell = &self.ordinals[surface as usize];
        let n = cell.get();
        cell.set(n.wrapping_add(1));
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::synthesize;

    fn engine(byte: u8) -> JitterEngine {
        let seed = Seed::from_bytes([byte; 32]);
        let profile = synthesize(&seed).unwrap();
        JitterEngine::new(&seed, &profile)
    }

    fn opaque_canvas(pixels: usize) -> Vec<u8> {
        (0..pixels).flat_map(|i| [(i % 200) as u8 + 20, 90, 160, 255]).collect()
    }

    #[test]
    fn test_mixer_determinism() {
        assert_eq!(mix(42, 0), mix(42, 0));
        assert_ne!(mix(42, 0), mix(42, 1));
    }

    #[test]
    fn test_pixels_reproducible_per_ordinal() {
        let e = engine(0xAA);
        let mut a = opaque_canvas(4096);
        let mut b = a.clone();
        e.perturb_pixels(7, &mut a);
        e.perturb_pixels(7, &mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn test_pixels_differ_between_ordinals() {
        let e = engine(0xAA);
        let base = opaque_canvas(4096);
        let mut a = base.clone();
        let mut b = base.clone();
        e.perturb_pixels(0, &mut a);
        e.perturb_pixels(1, &mut b);
        assert_ne!(a, b);
        assert_ne!(a, base);
    }

    #[test]
    fn test_pixel_delta_bounded_and_alpha_untouched() {
        let e = engine(0x33);
        let base = opaque_canvas(10_000);
        let mut out = base.clone();
        let changed = e.perturb_pixels(3, &mut out);
        assert!(changed > 0 && changed < 10_000 / 8);
        for (px, (x, y)) in base.chunks(4).zip(out.chunks(4)).enumerate() {
            assert_eq!(x[3], y[3], "alpha changed at {}", px);
            let moved: Vec<i32> = (0..3).map(|c| (x[c] as i32 - y[c] as i32).abs()).collect();
            assert!(moved.iter().all(|d| *d <= CANVAS_MAX_DELTA as i32));
            assert!(moved.iter().filter(|d| **d > 0).count() <= 1);
        }
    }

    #[test]
    fn test_transparent_pixels_skipped() {
        let e = engine(0x01);
        let mut clear = vec![0u8; 4 * 1024];
        assert_eq!(e.perturb_pixels(0, &mut clear), 0);
        assert!(clear.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_single_opaque_pixel_still_changes() {
        let e = engine(0x02);
        let mut img = vec![0u8; 4 * 64];
        img[40..44].copy_from_slice(&[255, 255, 255, 255]);
        let before = img.clone();
        assert_eq!(e.perturb_pixels(5, &mut img), 1);
        assert_ne!(img, before);
        assert_eq!(img[43], 255);
    }

    #[test]
    fn test_samples_bounded() {
        let e = engine(0x44);
        let base: Vec<f32> = (0..2048).map(|i| (i as f32 / 100.0).sin() * 0.5).collect();
        let mut a = base.clone();
        let mut b = base.clone();
        e.perturb_samples(0, &mut a);
        e.perturb_samples(1, &mut b);
        assert_ne!(a, b);
        for (x, y) in base.iter().zip(&a) {
            assert!(((x - y).abs() as f64) < AUDIO_MAX_AMPLITUDE * 1.1);
        }
    }

    #[test]
    fn test_spectrum_skips_silence() {
        let e = engine(0x45);
        let mut bins = vec![f32::NEG_INFINITY; 256];
        bins.extend(std::iter::repeat(-60.0).take(256));
        let before = bins.clone();
        e.perturb_spectrum(2, &mut bins);
        assert!(bins[..256].iter().all(|b| *b == f32::NEG_INFINITY));
        assert_ne!(bins[256..], before[256..]);
        for (x, y) in before[256..].iter().zip(&bins[256..]) {
            assert!((x - y).abs() < SPECTRUM_MAX_DB);
        }
    }

    #[test]
    fn test_static_surfaces_pass_through() {
        let e = engine(0x46);
        let mut bytes = vec![9u8; 64];
        e.perturb_bytes(Surface::Navigator, 3, &mut bytes);
        assert!(bytes.iter().all(|b| *b == 9));
        assert_eq!(e.perturb_number(Surface::Screen, 3, 1920.0), 1920.0);
    }

    #[test]
    fn test_number_noise() {
        let e = engine(0x47);
        let a = e.perturb_number(Surface::Canvas, 0, 100.0);
        assert!(a != 100.0 && (a - 100.0).abs() <= CANVAS_MAX_DELTA as f64);
        assert_eq!(a, e.perturb_number(Surface::Canvas, 0, 100.0));
        let s = e.perturb_number(Surface::Audio, 0, 35.7);
        assert!(s != 35.7 && ((s - 35.7) / 35.7).abs() < AUDIO_MAX_AMPLITUDE);
    }

    #[test]
    fn test_neighbouring_ordinals_never_match() {
        for byte in [0xAA, 0x01, 0x7F] {
            let e = engine(byte);
            let mut one_pixel = vec![0u8; 4 * 9];
            one_pixel[16..20].copy_from_slice(&[255, 0, 128, 255]);
            let bytes: Vec<u8> = (0..16u8).map(|i| i.wrapping_mul(37)).collect();
            let bins: Vec<f32> = (0..16).map(|i| -30.0 - i as f32).collect();
            let samples = vec![0.25f32, -0.5];

            let read = |n: u32| {
                let mut px = one_pixel.clone();
                e.perturb_pixels(n, &mut px);
                let mut audio = bytes.clone();
                e.perturb_bytes(Surface::Audio, n, &mut audio);
                let mut spectrum = bins.clone();
                e.perturb_spectrum(n, &mut spectrum);
                let mut pcm = samples.clone();
                e.perturb_samples(n, &mut pcm);
                (
                    px,
                    audio,
                    spectrum,
                    pcm,
                    e.perturb_number(Surface::Canvas, n, 100.0),
                    e.perturb_number(Surface::Audio, n, 0.0),
                )
            };

            let mut previous = read(0);
            for n in 1..2000 {
                let current = read(n);
                assert_ne!(previous.0, current.0, "pixels #{} seed {:#x}", n, byte);
                assert_ne!(previous.1, current.1, "audio bytes #{} seed {:#x}", n, byte);
                assert_ne!(previous.2, current.2, "spectrum #{} seed {:#x}", n, byte);
                assert_ne!(previous.3, current.3, "samples #{} seed {:#x}", n, byte);
                assert_ne!(previous.4, current.4, "canvas number #{} seed {:#x}", n, byte);
                assert_ne!(previous.5, current.5, "audio number #{} seed {:#x}", n, byte);
                previous = current;
            }
        }
    }

    #[test]
    fn test_saturated_bytes_still_alternate() {
        let e = engine(0x5C);
        for fill in [0u8, 255] {
            let mut a = vec![fill; 3];
            let mut b = vec![fill; 3];
            e.perturb_bytes(Surface::Audio, 10, &mut a);
            e.perturb_bytes(Surface::Audio, 11, &mut b);
            assert_ne!(a, b);
            assert_ne!(a, vec![fill; 3]);
        }
    }

    #[test]
    fn test_seeds_give_different_noise() {
        let base = opaque_canvas(4096);
        let mut a = base.clone();
        let mut b = base.clone();
        engine(0x10).perturb_pixels(0, &mut a);
        engine(0x11).perturb_pixels(0, &mut b);
        assert_ne!(a, b);
    }

    #[test]
    fn test_handle_ordinals_are_per_surface() {
        let handle = JitterHandle::new(engine(0x50));
        assert_eq!(handle.next_ordinal(Surface::Canvas), 0);
        assert_eq!(handle.next_ordinal(Surface::Canvas), 1);
        assert_eq!(handle.next_ordinal(Surface::Audio), 0);
    }
}
