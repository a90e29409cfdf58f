use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TrackingResult;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

/// Source of truth for which report a user currently has open.
#[async_trait]
pub trait ReportDirectory: Send + Sync {
    async fn get_active_report_id(&self, user_id: &str) -> TrackingResult<Option<String>>;
}

#[derive(Clone)]
pub struct ActiveReportResolver {
    directory: Arc<dyn ReportDirectory>,
}

impl ActiveReportResolver {
    pub fn new(directory: Arc<dyn ReportDirectory>) -> Self {
        Self { directory }
    }

    /// Ask the directory fresh every time. An unreachable directory reads as
    /// "no active report".
    pub async fn resolve_active_report(&self, user_id: &str) -> Option<String> {
        if user_id.is_empty() {
            return None;
        }

        match self.directory.get_active_report_id(user_id).await {
            Ok(Some(report_id)) if !report_id.is_empty() => {
                log_debug!("user {user_id} has active report {report_id}");
                Some(report_id)
            }
            Ok(_) => None,
            Err(err) => {
                log_warn!("active report lookup failed for user {user_id}: {err}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrackingError;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FixedDirectory {
        reports: HashMap<String, String>,
        unreachable: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ReportDirectory for FixedDirectory {
        async fn get_active_report_id(&self, user_id: &str) -> TrackingResult<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.unreachable {
                return Err(TrackingError::ReportDirectory("timed out".into()));
            }
            Ok(self.reports.get(user_id).cloned())
        }
    }

    #[tokio::test]
    async fn resolves_open_report() {
        let directory = FixedDirectory {
            reports: HashMap::from([("u1".to_string(), "R1".to_string())]),
            ..FixedDirectory::default()
        };
        let resolver = ActiveReportResolver::new(Arc::new(directory));

        assert_eq!(resolver.resolve_active_report("u1").await, Some("R1".into()));
        assert_eq!(resolver.resolve_active_report("u2").await, None);
    }

    #[tokio::test]
    async fn empty_user_never_reaches_directory() {
        let directory = Arc::new(FixedDirectory::default());
        let resolver = ActiveReportResolver::new(directory.clone());

        assert_eq!(resolver.resolve_active_report("").await, None);
        assert_eq!(directory.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unreachable_directory_means_no_report() {
        let directory = FixedDirectory {
            reports: HashMap::from([("u1".to_string(), "R1".to_string())]),
            unreachable: true,
            ..FixedDirectory::default()
        };
        let resolver = ActiveReportResolver::new(Arc::new(directory));

        assert_eq!(resolver.resolve_active_report("u1").await, None);
    }

    #[tokio::test]
    async fn empty_report_id_is_ignored() {
        let directory = FixedDirectory {
            reports: HashMap::from([("u1".to_string(), String::new())]),
            ..FixedDirectory::default()
        };
        let resolver = ActiveReportResolver::new(Arc::new(directory));

        assert_eq!(resolver.resolve_active_report("u1").await, None);
    }
}
