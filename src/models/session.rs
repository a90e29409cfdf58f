use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One authenticated user, from sign-in to sign-out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: String,
    pub live: bool,
    pub signed_in_at: DateTime<Utc>,
}

impl Session {
    pub fn begin(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            live: true,
            signed_in_at: Utc::now(),
        }
    }

    pub fn end(&mut self) {
        self.live = false;
    }
}

/// Transitions emitted by the authentication collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn { user_id: String },
    SignedOut,
}
