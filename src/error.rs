//! Error types for the Chameleon identity engine
//!
//! This module provides the error taxonomy with:
//! - One variant per failure mode of the engine
//! - Error classification (degradable vs hard failure)
//! - User-friendly messages
//! - Error codes for programmatic handling

use serde::{Deserialize, Serialize};
use thiserror::Error;
use wasm_bindgen::JsValue;

use crate::surface::Surface;

pub type Result<T> = std::result::Result<T, ChameleonError>;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // Identity errors (1xx)
    EntropyUnavailable = 100,
    CorpusUnavailable = 101,
    InvalidSeed = 102,

    // Interception errors (2xx)
    InjectionFailure = 200,
    StealthDegraded = 201,

    // Session errors (3xx)
    StorageUnavailable = 300,
    SessionBusy = 301,
    StaleProfile = 302,

    // Network errors (4xx)
    NetworkFailure = 400,

    // Protocol errors (5xx)
    UnknownAction = 500,
    Serialization = 501,
}

/// Main error type for the identity engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChameleonError {
    // ===== Identity Errors =====
    #[error("Entropy source unavailable: {0}")]
    EntropyUnavailable(String),

    #[error("Archetype corpus unavailable: {0}")]
    CorpusUnavailable(String),

    #[error("Invalid seed: {0}")]
    InvalidSeed(String),

    // ===== Interception Errors =====
    #[error("Injection failed for {surface}: {reason}")]
    InjectionFailure { surface: Surface, reason: String },

    #[error("Stealth degraded for {surface}: {reason}")]
    StealthDegraded { surface: Surface, reason: String },

    // ===== Session Errors =====
    #[error("Session storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Session is being regenerated, gave up after {attempts} attempts")]
    SessionBusy { attempts: u32 },

    #[error("Profile does not belong to the current session")]
    StaleProfile,

    // ===== Network Errors =====
    #[error("Network failure: {0}")]
    NetworkFailure(String),

    // ===== Protocol Errors =====
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ChameleonError {
    /// Get the error code for programmatic handling
    pub fn code(&self) -> ErrorCode {
        match self {
            ChameleonError::EntropyUnavailable(_) => ErrorCode::EntropyUnavailable,
            ChameleonError::CorpusUnavailable(_) => ErrorCode::CorpusUnavailable,
            ChameleonError::InvalidSeed(_) => ErrorCode::InvalidSeed,
            ChameleonError::InjectionFailure { .. } => ErrorCode::InjectionFailure,
            ChameleonError::StealthDegraded { .. } => ErrorCode::StealthDegraded,
            ChameleonError::StorageUnavailable(_) => ErrorCode::StorageUnavailable,
            ChameleonError::SessionBusy { .. } => ErrorCode::SessionBusy,
            ChameleonError::StaleProfile => ErrorCode::StaleProfile,
            ChameleonError::NetworkFailure(_) => ErrorCode::NetworkFailure,
            ChameleonError::UnknownAction(_) => ErrorCode::UnknownAction,
            ChameleonError::Serialization(_) => ErrorCode::Serialization,
        }
    }

    /// Whether the session can keep running in a degraded mode after this error.
    ///
    /// Entropy and storage failures fall back to a local, non-persisted seed.
    /// Injection and stealth failures leave the other surfaces installed.
    /// Network failures only zero the affected coherence check.
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            ChameleonError::EntropyUnavailable(_)
                | ChameleonError::StorageUnavailable(_)
                | ChameleonError::InjectionFailure { .. }
                | ChameleonError::StealthDegraded { .. }
                | ChameleonError::NetworkFailure(_)
        )
    }

    /// Whether retrying the same call later can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChameleonError::SessionBusy { .. } | ChameleonError::NetworkFailure(_)
        )
    }

    /// Get a user-friendly message for display
    pub fn user_message(&self) -> String {
        match self {
            ChameleonError::EntropyUnavailable(_) => {
                "Secure randomness is unavailable. Your identity will not survive a restart.".into()
            }
            ChameleonError::CorpusUnavailable(_) => {
                "Device profiles could not be loaded. Protection is disabled.".into()
            }
            ChameleonError::InvalidSeed(_) => "The session identity is corrupted.".into(),
            ChameleonError::InjectionFailure { surface, .. } => {
                format!("Protection for {} could not be applied on this page.", surface)
            }
            ChameleonError::StealthDegraded { surface, .. } => {
                format!("Protection for {} is active but may be detectable.", surface)
            }
            ChameleonError::StorageUnavailable(_) => {
                "Session storage is unavailable. Your identity will not survive a restart.".into()
            }
            ChameleonError::SessionBusy { .. } => {
                "Your identity is being regenerated. Please try again.".into()
            }
            ChameleonError::StaleProfile => {
                "This tab still uses a previous identity. Reload it.".into()
            }
            ChameleonError::NetworkFailure(_) => "Failed to check VPN status".into(),
            ChameleonError::UnknownAction(_) => "Unknown action".into(),
            ChameleonError::Serialization(_) => "Malformed message.".into(),
        }
    }
}

impl From<serde_json::Error> for ChameleonError {
    fn from(err: serde_json::Error) -> Self {
        ChameleonError::Serialization(err.to_string())
    }
}

impl From<serde_wasm_bindgen::Error> for ChameleonError {
    fn from(err: serde_wasm_bindgen::Error) -> Self {
        ChameleonError::Serialization(err.to_string())
    }
}

impl From<ChameleonError> for JsValue {
    fn from(err: ChameleonError) -> Self {
        JsValue::from_str(&err.to_string())
    }
}

/// Error information for JavaScript consumption
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub code: u32,
    pub message: String,
    pub user_message: String,
    pub is_degradable: bool,
    pub is_retryable: bool,
}

impl From<&ChameleonError> for ErrorInfo {
    fn from(err: &ChameleonError) -> Self {
        ErrorInfo {
            code: err.code() as u32,
            message: err.to_string(),
            user_message: err.user_message(),
            is_degradable: err.is_degradable(),
            is_retryable: err.is_retryable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degradable_errors() {
        assert!(ChameleonError::EntropyUnavailable("test".into()).is_degradable());
        assert!(ChameleonError::StorageUnavailable("test".into()).is_degradable());
        assert!(ChameleonError::NetworkFailure("test".into()).is_degradable());
        assert!(ChameleonError::InjectionFailure {
            surface: Surface::Canvas,
            reason: "test".into()
        }
        .is_degradable());

        // Hard failures
        assert!(!ChameleonError::CorpusUnavailable("test".into()).is_degradable());
        assert!(!ChameleonError::UnknownAction("nope".into()).is_degradable());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ChameleonError::StealthDegraded {
                surface: Surface::Webgl,
                reason: "no Proxy".into()
            }
            .code(),
            ErrorCode::StealthDegraded
        );
        assert_eq!(ChameleonError::StaleProfile.code(), ErrorCode::StaleProfile);
        assert_eq!(ChameleonError::UnknownAction("x".into()).code() as u32, 500);
    }

    #[test]
    fn test_surface_in_message() {
        let err = ChameleonError::InjectionFailure {
            surface: Surface::Audio,
            reason: "AudioBuffer missing".into(),
        };
        assert_eq!(err.to_string(), "Injection failed for audio: AudioBuffer missing");
        assert!(err.user_message().contains("audio"));
    }

    #[test]
    fn test_error_info() {
        let info = ErrorInfo::from(&ChameleonError::SessionBusy { attempts: 5 });
        assert_eq!(info.code, 301);
        assert!(info.is_retryable);
        assert!(!info.is_degradable);
        assert!(info.message.contains("5 attempts"));
    }
}
