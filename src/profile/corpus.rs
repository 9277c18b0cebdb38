//! Archetype corpus: the fixed set of real-world device bundles and locales
//! that profiles are drawn from.

use serde::Deserialize;
use std::sync::OnceLock;

use crate::error::{ChameleonError, Result};

const EMBEDDED_CORPUS: &str = include_str!("archetypes.json");

static CORPUS: OnceLock<std::result::Result<Corpus, String>> = OnceLock::new();

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Corpus {
    pub chrome_versions: Vec<u32>,
    pub archetypes: Vec<Archetype>,
    pub locales: Vec<Locale>,
}

/// A coherent device bundle. Every hardware field of a profile comes from
/// exactly one of these.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Archetype {
    pub id: String,
    pub label: String,
    pub weight: u32,
    pub platform: String,
    pub ua_platform: String,
    /// UA template; `{version}` is replaced by the Chrome major version
    pub user_agent: String,
    pub vendor: String,
    pub hardware_concurrency: Vec<u32>,
    pub device_memory: Vec<u32>,
    pub color_depth: u32,
    /// Pixels reserved by the OS taskbar / menu bar
    pub taskbar: u32,
    pub screens: Vec<ScreenMode>,
    pub gpus: Vec<Gpu>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenMode {
    pub width: u32,
    pub height: u32,
    pub device_pixel_ratio: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Gpu {
    pub vendor: String,
    pub renderer: String,
}

/// Language list and timezone that belong together.
#[derive(Debug, Clone, Deserialize)]
pub struct Locale {
    pub languages: Vec<String>,
    pub weight: u32,
    pub timezone: ZoneInfo,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneInfo {
    pub name: String,
    /// Standard offset in minutes east of UTC
    pub offset_minutes: i32,
    pub display: String,
    /// Display name while daylight saving time is in effect
    #[serde(default)]
    pub daylight_display: Option<String>,
}

impl Corpus {
    /// The corpus compiled into the binary, parsed once.
    pub fn embedded() -> Result<&'static Corpus> {
        CORPUS
            .get_or_init(|| Corpus::from_json(EMBEDDED_CORPUS).map_err(|e| e.to_string()))
            .as_ref()
            .map_err(|e| ChameleonError::CorpusUnavailable(e.clone()))
    }

    pub fn from_json(json: &str) -> Result<Corpus> {
        let corpus: Corpus = serde_json::from_str(json)
            .map_err(|e| ChameleonError::CorpusUnavailable(format!("parse failed: {}", e)))?;
        corpus.validate()?;
        Ok(corpus)
    }

    pub fn archetype(&self, id: &str) -> Option<&Archetype> {
        self.archetypes.iter().find(|a| a.id == id)
    }

    fn validate(&self) -> Result<()> {
        let invalid = |what: String| Err(ChameleonError::CorpusUnavailable(what));

        if self.chrome_versions.is_empty() {
            return invalid("no browser versions".into());
        }
        if self.archetypes.is_empty() {
            return invalid("no archetypes".into());
        }
        if self.locales.is_empty() {
            return invalid("no locales".into());
        }
        for a in &self.archetypes {
            if a.weight == 0
                || a.hardware_concurrency.is_empty()
                || a.device_memory.is_empty()
                || a.screens.is_empty()
                || a.gpus.is_empty()
            {
                return invalid(format!("archetype {} is incomplete", a.id));
            }
            if !a.user_agent.contains("{version}") {
                return invalid(format!("archetype {} has no version slot", a.id));
            }
        }
        for l in &self.locales {
            if l.weight == 0 || l.languages.is_empty() {
                return invalid(format!("locale {} is incomplete", l.timezone.name));
            }
            if l.timezone.name.parse::<chrono_tz::Tz>().is_err() {
                return invalid(format!("unknown zone {}", l.timezone.name));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_corpus_loads() {
        let corpus = Corpus::embedded().unwrap();
        assert!(corpus.archetypes.len() >= 5);
        assert!(corpus.archetype("win-gaming-desktop").is_some());
    }

    #[test]
    fn test_low_core_counts_never_ship_discrete_gpus() {
        let corpus = Corpus::embedded().unwrap();
        for a in &corpus.archetypes {
            let low_end = a.hardware_concurrency.iter().any(|hc| *hc <= 2);
            let discrete = a
                .gpus
                .iter()
                .any(|g| g.renderer.contains("GeForce") || g.renderer.contains("RX "));
            assert!(!(low_end && discrete), "{} mixes tiers", a.id);
        }
    }

    #[test]
    fn test_standard_offsets_agree_with_zone_data() {
        use chrono::TimeZone;
        use chrono_tz::OffsetComponents;

        let instant = chrono::DateTime::from_timestamp(1_705_289_400, 0).unwrap().naive_utc();
        for l in &Corpus::embedded().unwrap().locales {
            let tz: chrono_tz::Tz = l.timezone.name.parse().unwrap();
            let standard = tz.offset_from_utc_datetime(&instant).base_utc_offset();
            assert_eq!(standard.num_minutes(), l.timezone.offset_minutes as i64, "{}", l.timezone.name);
        }
    }

    #[test]
    fn test_rejects_unknown_zone() {
        let json = EMBEDDED_CORPUS.replace("Asia/Tokyo", "Mars/Olympus_Mons");
        assert!(matches!(
            Corpus::from_json(&json),
            Err(ChameleonError::CorpusUnavailable(msg)) if msg.contains("Mars/Olympus_Mons")
        ));
    }

    #[test]
    fn test_rejects_empty_corpus() {
        let err = Corpus::from_json(r#"{"chromeVersions":[1],"archetypes":[],"locales":[]}"#)
            .unwrap_err();
        assert!(matches!(err, ChameleonError::CorpusUnavailable(_)));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            Corpus::from_json("not json"),
            Err(ChameleonError::CorpusUnavailable(_))
        ));
    }
}
