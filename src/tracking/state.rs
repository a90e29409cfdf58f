use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{PermissionScope, Session};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DisarmReason {
    PermissionDenied(PermissionScope),
    NoActiveReport,
    ArmingFailed,
    PermissionRevoked,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq, Default)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum TrackingStatus {
    #[default]
    Idle,
    AwaitingPermissions,
    AwaitingReport,
    #[serde(rename_all = "camelCase")]
    Armed { report_id: String },
    Disarmed { reason: DisarmReason },
}

impl TrackingStatus {
    pub fn is_armed(&self) -> bool {
        matches!(self, TrackingStatus::Armed { .. })
    }
}

#[derive(Debug, Clone, Default)]
pub struct TrackingState {
    pub status: TrackingStatus,
    pub session: Option<Session>,
    /// Report captured when the task was armed; every fix goes here until
    /// sign-out, even if the report closes in the meantime.
    pub report_id: Option<String>,
    pub armed_at: Option<DateTime<Utc>>,
    /// Bumped on every sign-in and sign-out so late work from an older
    /// session can recognise itself.
    pub generation: u64,
}

impl TrackingState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.session
            .as_ref()
            .filter(|session| session.live)
            .map(|session| session.user_id.as_str())
    }

    pub fn has_live_session(&self) -> bool {
        self.user_id().is_some()
    }

    pub fn begin_session(&mut self, user_id: &str) -> u64 {
        let generation = self.generation.wrapping_add(1);
        *self = Self {
            status: TrackingStatus::AwaitingPermissions,
            session: Some(Session::begin(user_id)),
            report_id: None,
            armed_at: None,
            generation,
        };
        generation
    }

    pub fn await_report(&mut self) {
        self.status = TrackingStatus::AwaitingReport;
    }

    pub fn arm(&mut self, report_id: String) {
        self.status = TrackingStatus::Armed {
            report_id: report_id.clone(),
        };
        self.report_id = Some(report_id);
        self.armed_at = Some(Utc::now());
    }

    /// Tracking stops for the rest of this session; the session itself stays.
    pub fn disarm(&mut self, reason: DisarmReason) {
        self.status = TrackingStatus::Disarmed { reason };
        self.report_id = None;
        self.armed_at = None;
    }

    pub fn sign_out(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.end();
        }
        *self = Self {
            generation: self.generation.wrapping_add(1),
            ..Self::default()
        };
    }
}
