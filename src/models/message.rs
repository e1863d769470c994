use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::clock::Millis;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    AuthStateChange,
    SignIn,
    SignOut,
    SessionRefresh,
    SyncRequest,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::AuthStateChange => "AUTH_STATE_CHANGE",
            MessageType::SignIn => "SIGN_IN",
            MessageType::SignOut => "SIGN_OUT",
            MessageType::SessionRefresh => "SESSION_REFRESH",
            MessageType::SyncRequest => "SYNC_REQUEST",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cross-context hint. The payload is advisory only: receivers re-check
/// the boundary instead of trusting it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default)]
    pub payload: Value,
    pub timestamp: Millis,
    pub tab_id: String,
    /// Per-message nonce; empty when the sender did not set one.
    #[serde(default)]
    pub id: String,
}

impl SyncMessage {
    pub fn new(kind: MessageType, payload: Value, tab_id: &str, timestamp: Millis) -> Self {
        SyncMessage {
            kind,
            payload,
            timestamp,
            tab_id: tab_id.to_string(),
            id: uuid::Uuid::new_v4().to_string(),
        }
    }
}
