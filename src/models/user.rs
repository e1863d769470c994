use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The signed-in user as reported by the auth provider.
///
/// Only the fields this crate reads are typed; everything else the provider
/// sends is kept in `extra` and written back untouched.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_email: Option<String>,
    #[serde(default)]
    pub primary_email_verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        User {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.primary_email = Some(email.into());
        self
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Session {
    pub fn new(id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Session {
            id: id.into(),
            user_id: user_id.into(),
            ..Default::default()
        }
    }
}

/// Body of a `200` from the session or user endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct AuthPayload {
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub session: Option<Session>,
}

impl AuthPayload {
    /// Both halves present, i.e. the boundary considers the caller signed in.
    pub fn into_parts(self) -> Option<(User, Session)> {
        match (self.user, self.session) {
            (Some(user), Some(session)) => Some((user, session)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_fields_survive_a_round_trip() {
        let raw = json!({
            "id": "u1",
            "displayName": "Ada",
            "primaryEmail": "ada@example.com",
            "primaryEmailVerified": true,
            "clientMetadata": { "theme": "dark" }
        });
        let user: User = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(user.display_name.as_deref(), Some("Ada"));
        assert!(user.extra.contains_key("clientMetadata"));
        assert_eq!(serde_json::to_value(&user).unwrap(), raw);
    }

    #[test]
    fn test_payload_without_session_is_not_signed_in() {
        let payload: AuthPayload =
            serde_json::from_value(json!({ "user": { "id": "u1" }, "session": null })).unwrap();
        assert!(payload.into_parts().is_none());
    }
}
