use thiserror::Error;

use crate::models::PermissionScope;

/// Failures of the tracking path. None of these are fatal to the host:
/// every variant ends in "tracking does not proceed" plus a log line.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackingError {
    #[error("{scope} location permission denied")]
    PermissionDenied { scope: PermissionScope },

    #[error("no active report")]
    NoActiveReport,

    #[error("location upload failed: {0}")]
    UploadFailure(String),

    #[error("location provider error: {0}")]
    Provider(String),

    #[error("remote store error: {0}")]
    Store(String),

    #[error("report directory error: {0}")]
    ReportDirectory(String),
}

pub type TrackingResult<T> = Result<T, TrackingError>;

impl TrackingError {
    pub fn provider(err: impl std::fmt::Display) -> Self {
        TrackingError::Provider(err.to_string())
    }

    pub fn store(err: impl std::fmt::Display) -> Self {
        TrackingError::Store(err.to_string())
    }

    pub fn report_directory(err: impl std::fmt::Display) -> Self {
        TrackingError::ReportDirectory(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_names_scope() {
        let err = TrackingError::PermissionDenied {
            scope: PermissionScope::Background,
        };
        assert_eq!(err.to_string(), "background location permission denied");
    }

    #[test]
    fn helpers_wrap_display() {
        let err = TrackingError::store(anyhow::anyhow!("disk full"));
        assert_eq!(err, TrackingError::Store("disk full".into()));
    }

    #[test]
    fn provider_helper_keeps_message() {
        assert_eq!(
            TrackingError::provider("not allowed").to_string(),
            "location provider error: not allowed"
        );
        assert_eq!(TrackingError::NoActiveReport.to_string(), "no active report");
    }
}
