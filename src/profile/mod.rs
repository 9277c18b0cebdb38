//! Deterministic profile synthesis.
//!
//! `synthesize(seed)` picks one archetype bucket from the corpus and derives
//! every hardware field from that bucket alone, so a profile never pairs a
//! dual-core budget laptop with a discrete gaming GPU. Locale fields come
//! from one locale row in the same way.

pub mod corpus;
pub mod stream;

use rand::distributions::WeightedIndex;
use rand::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{ChameleonError, Result};
use crate::seed::Seed;
use corpus::{Archetype, Corpus, Locale};
use stream::SeedStream;

/// Stream domain for profile field selection.
const PROFILE_DOMAIN: &str = "profile";

/// The complete spoofed identity of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Archetype id the hardware fields were drawn from
    pub archetype: String,
    pub navigator: NavigatorProfile,
    pub screen: ScreenProfile,
    pub timezone: TimezoneProfile,
    pub webgl: WebglProfile,
    pub canvas_noise_params: CanvasNoiseParams,
    pub audio_noise_params: AudioNoiseParams,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigatorProfile {
    pub user_agent: String,
    pub app_version: String,
    pub platform: String,
    /// Client Hints platform (`navigator.userAgentData.platform`)
    pub ua_platform: String,
    pub vendor: String,
    pub language: String,
    pub languages: Vec<String>,
    pub hardware_concurrency: u32,
    pub device_memory: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenProfile {
    pub width: u32,
    pub height: u32,
    pub avail_width: u32,
    pub avail_height: u32,
    pub color_depth: u32,
    pub pixel_depth: u32,
    pub device_pixel_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimezoneProfile {
    /// IANA zone name, e.g. `Europe/Berlin`
    pub name: String,
    /// Standard offset in minutes east of UTC. `getTimezoneOffset()` reports
    /// the negation.
    pub utc_offset_minutes: i32,
    /// Long display name used in `Date.prototype.toString`
    pub display_name: String,
    /// Same, while daylight saving time is in effect
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daylight_display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebglProfile {
    pub vendor: String,
    pub renderer: String,
}

/// Canvas jitter shape. Roughly one opaque pixel in `2^rate_shift` gets a
/// single-channel delta of at most `max_delta`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasNoiseParams {
    pub rate_shift: u8,
    pub max_delta: u8,
    pub salt: u32,
}

/// Audio jitter shape. Every time-domain sample moves by less than
/// `amplitude`; one frequency bin in `2^byte_rate_shift` is nudged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioNoiseParams {
    pub amplitude: f64,
    pub byte_rate_shift: u8,
    pub salt: u32,
}

impl Profile {
    /// City part of the timezone name, e.g. `Los Angeles`.
    pub fn city(&self) -> String {
        city_of(&self.timezone.name)
    }

    /// Ordered key/value rows for the detailed identity view.
    pub fn advanced_info(&self, seed: Option<&Seed>) -> Vec<(&'static str, String)> {
        vec![
            ("Session Seed", seed.map(Seed::to_hex).unwrap_or_else(|| "N/A".into())),
            ("Profile", self.summary.clone()),
            ("User Agent", self.navigator.user_agent.clone()),
            ("Platform", self.navigator.platform.clone()),
            ("Hardware Concurrency", self.navigator.hardware_concurrency.to_string()),
            ("Device Memory", format!("{} GB", self.navigator.device_memory)),
            (
                "Screen Resolution",
                format!("{}x{}", self.screen.width, self.screen.height),
            ),
            ("Timezone", self.timezone.name.clone()),
            ("Language", self.navigator.language.clone()),
            ("WebGL Vendor", self.webgl.vendor.clone()),
            ("WebGL Renderer", self.webgl.renderer.clone()),
        ]
    }

    /// `advanced_info` as `Key: value` lines.
    pub fn advanced_info_text(&self, seed: Option<&Seed>) -> String {
        self.advanced_info(seed)
            .into_iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn city_of(zone: &str) -> String {
    zone.rsplit('/').next().unwrap_or(zone).replace('_', " ")
}

/// Maps seeds to profiles over a fixed corpus.
pub struct ProfileSynthesizer<'c> {
    corpus: &'c Corpus,
    archetype_index: WeightedIndex<u32>,
    locale_index: WeightedIndex<u32>,
}

impl ProfileSynthesizer<'static> {
    /// Synthesizer over the embedded corpus.
    pub fn embedded() -> Result<Self> {
        Self::new(Corpus::embedded()?)
    }
}

impl<'c> ProfileSynthesizer<'c> {
    pub fn new(corpus: &'c Corpus) -> Result<Self> {
        let archetype_index = WeightedIndex::new(corpus.archetypes.iter().map(|a| a.weight))
            .map_err(|e| ChameleonError::CorpusUnavailable(format!("archetype weights: {}", e)))?;
        let locale_index = WeightedIndex::new(corpus.locales.iter().map(|l| l.weight))
            .map_err(|e| ChameleonError::CorpusUnavailable(format!("locale weights: {}", e)))?;
        Ok(Self {
            corpus,
            archetype_index,
            locale_index,
        })
    }

    /// Derive the profile for `seed`. Pure: equal seeds give equal profiles.
    pub fn synthesize(&self, seed: &Seed) -> Result<Profile> {
        let mut rng = SeedStream::new(seed, PROFILE_DOMAIN);

        // Draw order is part of the output format; append new draws at the end.
        let archetype = &self.corpus.archetypes[self.archetype_index.sample(&mut rng)];
        let version = *pick(&self.corpus.chrome_versions, &mut rng, "browser versions")?;
        let hardware_concurrency = *pick(&archetype.hardware_concurrency, &mut rng, &archetype.id)?;
        let device_memory = *pick(&archetype.device_memory, &mut rng, &archetype.id)?;
        let screen = *pick(&archetype.screens, &mut rng, &archetype.id)?;
        let gpu = pick(&archetype.gpus, &mut rng, &archetype.id)?;
        let locale = &self.corpus.locales[self.locale_index.sample(&mut rng)];

        let canvas_noise_params = CanvasNoiseParams {
            rate_shift: rng.gen_range(4..=6),
            max_delta: rng.gen_range(1..=2),
            salt: rng.next_u32(),
        };
        let audio_noise_params = AudioNoiseParams {
            amplitude: rng.gen_range(1.0e-7..1.0e-6),
            byte_rate_shift: rng.gen_range(3..=5),
            salt: rng.next_u32(),
        };

        let navigator = navigator_fields(archetype, locale, version, hardware_concurrency, device_memory);
        let screen = ScreenProfile {
            width: screen.width,
            height: screen.height,
            avail_width: screen.width,
            avail_height: screen.height.saturating_sub(archetype.taskbar),
            color_depth: archetype.color_depth,
            pixel_depth: archetype.color_depth,
            device_pixel_ratio: screen.device_pixel_ratio,
        };
        let timezone = TimezoneProfile {
            name: locale.timezone.name.clone(),
            utc_offset_minutes: locale.timezone.offset_minutes,
            display_name: locale.timezone.display.clone(),
            daylight_display_name: locale.timezone.daylight_display.clone(),
        };
        let summary = format!(
            "{} · {}x{} · {}",
            archetype.label,
            screen.width,
            screen.height,
            city_of(&timezone.name)
        );

        Ok(Profile {
            archetype: archetype.id.clone(),
            navigator,
            screen,
            timezone,
            webgl: WebglProfile {
                vendor: gpu.vendor.clone(),
                renderer: gpu.renderer.clone(),
            },
            canvas_noise_params,
            audio_noise_params,
            summary,
        })
    }
}

/// Synthesize against the embedded corpus.
pub fn synthesize(seed: &Seed) -> Result<Profile> {
    ProfileSynthesizer::embedded()?.synthesize(seed)
}

fn pick<'a, T, R: Rng>(items: &'a [T], rng: &mut R, what: &str) -> Result<&'a T> {
    items
        .choose(rng)
        .ok_or_else(|| ChameleonError::CorpusUnavailable(format!("{} has no entries", what)))
}

fn navigator_fields(
    archetype: &Archetype,
    locale: &Locale,
    version: u32,
    hardware_concurrency: u32,
    device_memory: u32,
) -> NavigatorProfile {
    let user_agent = archetype.user_agent.replace("{version}", &version.to_string());
    let app_version = user_agent
        .strip_prefix("Mozilla/")
        .unwrap_or(&user_agent)
        .to_string();
    NavigatorProfile {
        app_version,
        user_agent,
        platform: archetype.platform.clone(),
        ua_platform: archetype.ua_platform.clone(),
        vendor: archetype.vendor.clone(),
        language: locale.languages[0].clone(),
        languages: locale.languages.clone(),
        hardware_concurrency,
        device_memory,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn seed(byte: u8) -> Seed {
        Seed::from_bytes([byte; 32])
    }

    #[test]
    fn test_same_seed_same_profile() {
        let a = synthesize(&seed(0xAA)).unwrap();
        let b = synthesize(&seed(0xAA)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_fresh_synthesizer_agrees() {
        let corpus = Corpus::embedded().unwrap();
        let one = ProfileSynthesizer::new(corpus).unwrap();
        let two = ProfileSynthesizer::new(corpus).unwrap();
        assert_eq!(one.synthesize(&seed(0x42)).unwrap(), two.synthesize(&seed(0x42)).unwrap());
    }

    #[test]
    fn test_hardware_comes_from_one_bucket() {
        let corpus = Corpus::embedded().unwrap();
        let synth = ProfileSynthesizer::new(corpus).unwrap();
        let manager = crate::seed::SeedManager::new();
        for _ in 0..300 {
            let profile = synth.synthesize(&manager.generate().unwrap()).unwrap();
            let bucket = corpus.archetype(&profile.archetype).unwrap();
            assert!(bucket.hardware_concurrency.contains(&profile.navigator.hardware_concurrency));
            assert!(bucket.device_memory.contains(&profile.navigator.device_memory));
            assert!(bucket.gpus.iter().any(|g| g.renderer == profile.webgl.renderer));
            assert!(bucket
                .screens
                .iter()
                .any(|s| s.width == profile.screen.width && s.height == profile.screen.height));
            assert_eq!(profile.navigator.platform, bucket.platform);
        }
    }

    #[test]
    fn test_distinct_seeds_rarely_collide() {
        let manager = crate::seed::SeedManager::new();
        let synth = ProfileSynthesizer::embedded().unwrap();
        let mut seen = HashSet::new();
        for _ in 0..200 {
            let profile = synth.synthesize(&manager.generate().unwrap()).unwrap();
            seen.insert(serde_json::to_string(&profile).unwrap());
        }
        assert_eq!(seen.len(), 200);
    }

    #[test]
    fn test_derived_fields() {
        let profile = synthesize(&seed(0x11)).unwrap();
        assert!(profile.navigator.user_agent.starts_with("Mozilla/5.0 "));
        assert!(!profile.navigator.user_agent.contains("{version}"));
        assert_eq!(
            format!("Mozilla/{}", profile.navigator.app_version),
            profile.navigator.user_agent
        );
        assert_eq!(profile.navigator.language, profile.navigator.languages[0]);
        assert!(profile.screen.avail_height < profile.screen.height);
        assert_eq!(profile.screen.color_depth, profile.screen.pixel_depth);
        assert!(profile.summary.contains(&profile.city()));
        assert!((4..=6).contains(&profile.canvas_noise_params.rate_shift));
        assert!(profile.audio_noise_params.amplitude < 1.0e-6);
    }

    #[test]
    fn test_language_and_zone_share_a_row() {
        let corpus = Corpus::embedded().unwrap();
        let manager = crate::seed::SeedManager::new();
        for _ in 0..100 {
            let profile = synthesize(&manager.generate().unwrap()).unwrap();
            assert!(corpus.locales.iter().any(|l| {
                l.timezone.name == profile.timezone.name && l.languages == profile.navigator.languages
            }));
        }
    }

    #[test]
    fn test_camel_case_wire_shape() {
        let profile = synthesize(&seed(0x05)).unwrap();
        let json = serde_json::to_value(&profile).unwrap();
        assert!(json["navigator"]["hardwareConcurrency"].is_number());
        assert!(json["screen"]["availHeight"].is_number());
        assert!(json["timezone"]["utcOffsetMinutes"].is_number());
        assert!(json["canvasNoiseParams"]["salt"].is_number());
        let back: Profile = serde_json::from_value(json).unwrap();
        assert_eq!(back, profile);
    }

    #[test]
    fn test_advanced_info() {
        let s = seed(0x07);
        let profile = synthesize(&s).unwrap();
        let rows = profile.advanced_info(Some(&s));
        assert_eq!(rows[0], ("Session Seed", s.to_hex()));
        assert_eq!(rows.len(), 11);
        let text = profile.advanced_info_text(None);
        assert!(text.starts_with("Session Seed: N/A\n"));
        assert!(text.contains(&format!("Device Memory: {} GB", profile.navigator.device_memory)));
    }

    #[test]
    fn test_city_of() {
        assert_eq!(city_of("America/Los_Angeles"), "Los Angeles");
        assert_eq!(city_of("UTC"), "UTC");
    }
}
