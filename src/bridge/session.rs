// Session record
//
// `Session` is the in-memory value owned by the bridge. `StoredSession` is
// its layout in the session-scoped key-value store; every key is optional
// because a half-written or cleared store is a normal state.

use serde::{Deserialize, Serialize};

use crate::profile::Profile;
use crate::seed::Seed;

/// The live session.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub seed: Seed,
    pub start_time: u64,
    /// Profile reported by a page, if any page has loaded since the seed was drawn
    pub profile: Option<Profile>,
    pub last_updated: u64,
    /// `false` when the session only lives in memory (degraded mode)
    pub persisted: bool,
}

impl Session {
    pub fn new(seed: Seed, start_time: u64) -> Self {
        Self {
            seed,
            start_time,
            profile: None,
            last_updated: start_time,
            persisted: false,
        }
    }

    /// Adopt a stored record. `None` if it carries no seed.
    pub fn from_stored(stored: StoredSession) -> Option<Self> {
        let seed = stored.session_seed?;
        let start_time = stored.session_start_time.unwrap_or(0);
        Some(Self {
            seed,
            start_time,
            profile: stored.profile,
            last_updated: stored.timestamp.unwrap_or(start_time),
            persisted: true,
        })
    }

    pub fn to_stored(&self) -> StoredSession {
        StoredSession {
            session_seed: Some(self.seed.clone()),
            session_start_time: Some(self.start_time),
            profile: self.profile.clone(),
            timestamp: Some(self.last_updated),
        }
    }
}

/// Persisted layout: `sessionSeed`, `sessionStartTime`, `profile`, `timestamp`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoredSession {
    pub session_seed: Option<Seed>,
    pub session_start_time: Option<u64>,
    pub profile: Option<Profile>,
    pub timestamp: Option<u64>,
}

impl StoredSession {
    pub const KEYS: [&'static str; 4] = ["sessionSeed", "sessionStartTime", "profile", "timestamp"];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_layout() {
        let session = Session::new(Seed::from_bytes([7; 32]), 1_700_000_000_000);
        let json = serde_json::to_value(session.to_stored()).unwrap();
        assert_eq!(json["sessionSeed"], "07".repeat(32));
        assert_eq!(json["sessionStartTime"], 1_700_000_000_000u64);
        assert!(json["profile"].is_null());
        assert_eq!(json["timestamp"], 1_700_000_000_000u64);
    }

    #[test]
    fn test_empty_store_has_no_session() {
        let stored: StoredSession = serde_json::from_str("{}").unwrap();
        assert!(Session::from_stored(stored).is_none());
    }

    #[test]
    fn test_restore_marks_persisted() {
        let stored: StoredSession =
            serde_json::from_value(serde_json::json!({ "sessionSeed": "ab".repeat(32) })).unwrap();
        let session = Session::from_stored(stored).unwrap();
        assert!(session.persisted);
        assert_eq!(session.seed, Seed::from_bytes([0xAB; 32]));
        assert_eq!(session.profile, None);
    }
}
