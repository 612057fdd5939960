use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A signed-in user as reported by the identity service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    /// Stable user identifier assigned by the identity service
    pub uid: String,

    /// Federated provider the user signed in with (e.g. "google.com")
    pub provider_id: String,

    pub email: Option<String>,

    #[serde(default)]
    pub email_verified: bool,

    pub display_name: Option<String>,

    pub photo_url: Option<String>,

    /// Set by the service when the session is established
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_in_at: Option<DateTime<Utc>>,
}

impl Principal {
    pub fn new(uid: impl Into<String>, provider_id: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            provider_id: provider_id.into(),
            email: None,
            email_verified: false,
            display_name: None,
            photo_url: None,
            signed_in_at: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>, verified: bool) -> Self {
        self.email = Some(email.into());
        self.email_verified = verified;
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}
