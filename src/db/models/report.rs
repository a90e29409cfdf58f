use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A report a user can share location into. Only the open/closed lifecycle
/// is tracked here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: String,
    pub user_id: String,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Report {
    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }
}
