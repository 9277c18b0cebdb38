// Message protocol between page, popup and background contexts
//
// Requests are JSON objects tagged by `action`. Replies are plain objects
// whose shape depends on the action; errors are `{error: <message>}` and
// never exceptions.

use serde::{Deserialize, Serialize};

use crate::coherence::CoherenceReport;
use crate::error::{ChameleonError, Result};
use crate::network::NetworkSignal;
use crate::profile::Profile;
use crate::seed::Seed;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
    GetSessionSeed,
    RegenerateIdentity,
    GetSessionInfo,
    #[serde(rename = "checkVPN")]
    CheckVpn,
    SaveProfile { profile: Box<Profile> },
    CheckCoherence,
}

impl Request {
    pub const ACTIONS: [&'static str; 6] = [
        "getSessionSeed",
        "regenerateIdentity",
        "getSessionInfo",
        "checkVPN",
        "saveProfile",
        "checkCoherence",
    ];

    /// Decode a raw message. An unrecognised `action` is
    /// [`ChameleonError::UnknownAction`]; a recognised one with a bad body is
    /// [`ChameleonError::Serialization`].
    pub fn parse(message: serde_json::Value) -> Result<Self> {
        let action = message
            .get("action")
            .and_then(|a| a.as_str())
            .unwrap_or_default()
            .to_string();
        if !Self::ACTIONS.contains(&action.as_str()) {
            return Err(ChameleonError::UnknownAction(action));
        }
        Ok(serde_json::from_value(message)?)
    }

    pub fn action(&self) -> &'static str {
        match self {
            Request::GetSessionSeed => "getSessionSeed",
            Request::RegenerateIdentity => "regenerateIdentity",
            Request::GetSessionInfo => "getSessionInfo",
            Request::CheckVpn => "checkVPN",
            Request::SaveProfile { .. } => "saveProfile",
            Request::CheckCoherence => "checkCoherence",
        }
    }
}

/// `getSessionInfo` reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub seed: Seed,
    pub profile: Option<Profile>,
    pub session_start_time: u64,
    pub timestamp: u64,
    pub persisted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Seed { seed: Seed },
    Regenerated { success: bool, message: String },
    SessionInfo(Box<SessionInfo>),
    Network(NetworkSignal),
    Saved { success: bool, timestamp: u64 },
    Coherence(Box<CoherenceReport>),
    Failed { success: bool, error: String },
    Error { error: String },
}

impl Response {
    pub fn regenerated() -> Self {
        Response::Regenerated {
            success: true,
            message: "Identity regenerated successfully".into(),
        }
    }

    /// `{error}` reply carrying the user-facing message.
    pub fn error(err: &ChameleonError) -> Self {
        Response::Error {
            error: err.user_message(),
        }
    }

    /// `{success: false, error}` reply for actions that acknowledge.
    pub fn failed(err: &ChameleonError) -> Self {
        Response::Failed {
            success: false,
            error: err.user_message(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error { .. } | Response::Failed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_known_actions() {
        assert_eq!(
            Request::parse(json!({ "action": "getSessionSeed" })).unwrap(),
            Request::GetSessionSeed
        );
        assert_eq!(Request::parse(json!({ "action": "checkVPN" })).unwrap(), Request::CheckVpn);
        assert_eq!(
            Request::parse(json!({ "action": "regenerateIdentity", "extra": 1 })).unwrap(),
            Request::RegenerateIdentity
        );
    }

    #[test]
    fn test_unknown_action() {
        let err = Request::parse(json!({ "action": "selfDestruct" })).unwrap_err();
        assert_eq!(err, ChameleonError::UnknownAction("selfDestruct".into()));
        let reply = serde_json::to_value(Response::error(&err)).unwrap();
        assert_eq!(reply, json!({ "error": "Unknown action" }));
    }

    #[test]
    fn test_missing_action_is_unknown() {
        assert!(matches!(
            Request::parse(json!({ "profile": {} })),
            Err(ChameleonError::UnknownAction(_))
        ));
    }

    #[test]
    fn test_save_profile_body() {
        let profile = crate::profile::synthesize(&Seed::from_bytes([1; 32])).unwrap();
        let message = json!({ "action": "saveProfile", "profile": profile });
        match Request::parse(message).unwrap() {
            Request::SaveProfile { profile: parsed } => assert_eq!(*parsed, profile),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            Request::parse(json!({ "action": "saveProfile", "profile": 3 })),
            Err(ChameleonError::Serialization(_))
        ));
    }

    #[test]
    fn test_reply_shapes() {
        assert_eq!(
            serde_json::to_value(Response::regenerated()).unwrap(),
            json!({ "success": true, "message": "Identity regenerated successfully" })
        );
        assert_eq!(
            serde_json::to_value(Response::Seed { seed: Seed::from_bytes([0xAA; 32]) }).unwrap(),
            json!({ "seed": "aa".repeat(32) })
        );
        let failed = Response::failed(&ChameleonError::StorageUnavailable("quota".into()));
        assert!(failed.is_error());
        assert_eq!(serde_json::to_value(failed).unwrap()["success"], false);
    }
}
