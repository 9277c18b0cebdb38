//! Identity coherence scoring.
//!
//! Compares the session profile with what the network reveals about the
//! connection. Four checks of 25 points each; a missing or failed network
//! signal only costs the checks that depend on it.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::network::NetworkSignal;
use crate::profile::Profile;

const CHECK_WEIGHT: u8 = 25;
const PARTIAL_WEIGHT: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Success,
    Warning,
    Error,
    Checking,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    pub status: CheckStatus,
    pub score: u8,
    pub message: String,
}

impl Check {
    fn new(status: CheckStatus, score: u8, message: impl Into<String>) -> Self {
        Self {
            status,
            score,
            message: message.into(),
        }
    }

    /// Placeholder shown while the network probe is in flight.
    pub fn checking() -> Self {
        Self::new(CheckStatus::Checking, 0, "Checking...")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoherenceChecks {
    pub timezone: Check,
    pub language: Check,
    pub webgl: Check,
    pub vpn: Check,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    Good,
    Fair,
    Poor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoherenceReport {
    pub checks: CoherenceChecks,
    pub total_score: u8,
}

impl CoherenceReport {
    pub fn grade(&self) -> Grade {
        match self.total_score {
            80.. => Grade::Good,
            60.. => Grade::Fair,
            _ => Grade::Poor,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CoherenceEvaluator;

impl CoherenceEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Score `profile` against the outcome of a network probe.
    pub fn evaluate(&self, profile: &Profile, signal: &Result<NetworkSignal>) -> CoherenceReport {
        let signal = match signal {
            Ok(signal) => Some(signal),
            Err(e) => {
                log::debug!("Coherence without network signal: {}", e);
                None
            }
        };

        let checks = CoherenceChecks {
            timezone: timezone_check(profile, signal),
            language: language_check(profile),
            webgl: webgl_check(profile),
            vpn: vpn_check(signal),
        };
        let total_score = [&checks.timezone, &checks.language, &checks.webgl, &checks.vpn]
            .iter()
            .map(|c| c.score)
            .sum();

        CoherenceReport { checks, total_score }
    }
}

fn timezone_check(profile: &Profile, signal: Option<&NetworkSignal>) -> Check {
    let zone = &profile.timezone.name;
    if zone.is_empty() {
        return Check::new(CheckStatus::Error, 0, "No timezone data");
    }
    let Some(signal) = signal else {
        return Check::new(CheckStatus::Warning, PARTIAL_WEIGHT, "Unverified");
    };
    match signal.timezone.as_deref() {
        Some(observed) if observed == zone => Check::new(CheckStatus::Success, CHECK_WEIGHT, "Match"),
        observed => Check::new(
            CheckStatus::Warning,
            PARTIAL_WEIGHT,
            format!("Mismatch: {}", observed.unwrap_or("Unknown")),
        ),
    }
}

fn language_check(profile: &Profile) -> Check {
    match profile.navigator.language.split('-').next().filter(|p| !p.is_empty()) {
        Some(primary) => Check::new(CheckStatus::Success, CHECK_WEIGHT, primary.to_uppercase()),
        None => Check::new(CheckStatus::Error, 0, "No language data"),
    }
}

fn webgl_check(profile: &Profile) -> Check {
    if profile.webgl.vendor.is_empty() || profile.webgl.renderer.is_empty() {
        Check::new(CheckStatus::Error, 0, "No WebGL data")
    } else {
        Check::new(CheckStatus::Success, CHECK_WEIGHT, "Configured")
    }
}

fn vpn_check(signal: Option<&NetworkSignal>) -> Check {
    match signal {
        None => Check::new(CheckStatus::Error, 0, "Check failed"),
        Some(s) if s.is_vpn => Check::new(
            CheckStatus::Warning,
            CHECK_WEIGHT,
            format!("VPN: {}", s.org.as_deref().unwrap_or("Unknown")),
        ),
        Some(_) => Check::new(CheckStatus::Success, CHECK_WEIGHT, "Direct connection"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChameleonError;
    use crate::profile::synthesize;
    use crate::seed::Seed;

    fn profile() -> Profile {
        synthesize(&Seed::from_bytes([0x42; 32])).unwrap()
    }

    fn signal_for(profile: &Profile, org: &str) -> NetworkSignal {
        NetworkSignal {
            timezone: Some(profile.timezone.name.clone()),
            is_vpn: crate::network::detect_vpn(org),
            org: Some(org.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_full_score_direct() {
        let p = profile();
        let report = CoherenceEvaluator::new().evaluate(&p, &Ok(signal_for(&p, "Comcast Cable")));
        assert_eq!(report.total_score, 100);
        assert_eq!(report.grade(), Grade::Good);
        assert_eq!(report.checks.timezone.message, "Match");
    }

    #[test]
    fn test_vpn_is_flagged_not_penalized() {
        let p = profile();
        let report = CoherenceEvaluator::new().evaluate(&p, &Ok(signal_for(&p, "NordVPN")));
        assert_eq!(report.checks.vpn.status, CheckStatus::Warning);
        assert_eq!(report.checks.vpn.score, 25);
        assert_eq!(report.checks.vpn.message, "VPN: NordVPN");
        assert_eq!(report.total_score, 100);
    }

    #[test]
    fn test_timezone_mismatch() {
        let p = profile();
        let mut signal = signal_for(&p, "Comcast");
        signal.timezone = Some("Antarctica/Troll".into());
        let report = CoherenceEvaluator::new().evaluate(&p, &Ok(signal));
        assert_eq!(report.checks.timezone.score, 10);
        assert_eq!(report.checks.timezone.message, "Mismatch: Antarctica/Troll");
        assert_eq!(report.total_score, 85);
    }

    #[test]
    fn test_network_failure_is_isolated() {
        let p = profile();
        let report = CoherenceEvaluator::new()
            .evaluate(&p, &Err(ChameleonError::NetworkFailure("offline".into())));
        assert_eq!(report.checks.vpn.score, 0);
        assert_eq!(report.checks.vpn.status, CheckStatus::Error);
        assert_eq!(report.checks.language.score, 25);
        assert_eq!(report.checks.webgl.score, 25);
        assert_eq!(report.checks.timezone.message, "Unverified");
        assert_eq!(report.total_score, 60);
        assert_eq!(report.grade(), Grade::Fair);
    }

    #[test]
    fn test_language_message_is_primary_subtag() {
        let mut p = profile();
        p.navigator.language = "pt-BR".into();
        let report = CoherenceEvaluator::new().evaluate(&p, &Ok(NetworkSignal::default()));
        assert_eq!(report.checks.language.message, "PT");
    }

    #[test]
    fn test_empty_profile_fields_score_zero() {
        let mut p = profile();
        p.timezone.name.clear();
        p.navigator.language.clear();
        p.webgl.renderer.clear();
        let report = CoherenceEvaluator::new()
            .evaluate(&p, &Err(ChameleonError::NetworkFailure("offline".into())));
        assert_eq!(report.total_score, 0);
        assert_eq!(report.grade(), Grade::Poor);
    }

    #[test]
    fn test_score_bounds() {
        for b in 0..=255u8 {
            let p = synthesize(&Seed::from_bytes([b; 32])).unwrap();
            let ok = CoherenceEvaluator::new().evaluate(&p, &Ok(NetworkSignal::default()));
            assert!(ok.total_score <= 100);
            let failed = CoherenceEvaluator::new()
                .evaluate(&p, &Err(ChameleonError::NetworkFailure("x".into())));
            assert!(failed.total_score <= 75);
        }
    }

    #[test]
    fn test_wire_shape() {
        let p = profile();
        let report = CoherenceEvaluator::new().evaluate(&p, &Ok(signal_for(&p, "Comcast")));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["totalScore"], 100);
        assert_eq!(json["checks"]["vpn"]["status"], "success");
    }
}
