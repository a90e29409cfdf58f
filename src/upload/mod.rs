use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{TrackingError, TrackingResult};
use crate::models::LocationSample;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

/// Shared key/value store holding the latest value per path.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Replace whatever is stored at `path`.
    async fn set(&self, path: &str, value: serde_json::Value) -> TrackingResult<()>;

    async fn get(&self, path: &str) -> TrackingResult<Option<serde_json::Value>>;
}

pub fn location_path(report_id: &str, user_id: &str) -> String {
    format!("reports/{report_id}/locations/{user_id}")
}

#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    Stored,
    Dropped(TrackingError),
}

impl UploadOutcome {
    pub fn is_stored(&self) -> bool {
        matches!(self, UploadOutcome::Stored)
    }
}

/// Writes fixes to the store. One write per call, never buffered or retried:
/// the next fix supersedes a lost one.
#[derive(Clone)]
pub struct LocationUploader {
    store: Arc<dyn RemoteStore>,
}

impl LocationUploader {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    pub async fn upload(
        &self,
        report_id: &str,
        user_id: &str,
        sample: &LocationSample,
    ) -> UploadOutcome {
        debug_assert!(!report_id.is_empty(), "upload called without a report id");
        debug_assert!(!user_id.is_empty(), "upload called without a user id");
        if report_id.is_empty() || user_id.is_empty() {
            return UploadOutcome::Dropped(TrackingError::UploadFailure(
                "missing report or user id".into(),
            ));
        }

        let path = location_path(report_id, user_id);
        let value = match serde_json::to_value(sample.payload()) {
            Ok(value) => value,
            Err(err) => {
                log_warn!("dropping fix for {path}: {err}");
                return UploadOutcome::Dropped(TrackingError::UploadFailure(err.to_string()));
            }
        };

        match self.store.set(&path, value).await {
            Ok(()) => {
                log_debug!(
                    "stored fix ({:.5}, {:.5}) at {path}",
                    sample.latitude,
                    sample.longitude
                );
                UploadOutcome::Stored
            }
            Err(err) => {
                log_warn!("dropping fix for {path}: {err}");
                UploadOutcome::Dropped(TrackingError::UploadFailure(err.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct MapStore {
        values: Mutex<HashMap<String, serde_json::Value>>,
        fail: bool,
    }

    #[async_trait]
    impl RemoteStore for MapStore {
        async fn set(&self, path: &str, value: serde_json::Value) -> TrackingResult<()> {
            if self.fail {
                return Err(TrackingError::Store("offline".into()));
            }
            self.values.lock().await.insert(path.to_string(), value);
            Ok(())
        }

        async fn get(&self, path: &str) -> TrackingResult<Option<serde_json::Value>> {
            Ok(self.values.lock().await.get(path).cloned())
        }
    }

    #[test]
    fn path_is_scoped_by_report_and_user() {
        assert_eq!(location_path("R1", "u1"), "reports/R1/locations/u1");
    }

    #[tokio::test]
    async fn later_fix_overwrites_earlier_one() {
        let store = Arc::new(MapStore::default());
        let uploader = LocationUploader::new(store.clone());

        let first = uploader
            .upload("R1", "u1", &LocationSample::new(1.0, 1.0, 10))
            .await;
        let second = uploader
            .upload("R1", "u1", &LocationSample::new(2.0, 2.0, 20))
            .await;

        assert!(first.is_stored());
        assert!(second.is_stored());
        let stored = store.get("reports/R1/locations/u1").await.unwrap();
        assert_eq!(
            stored,
            Some(serde_json::json!({"latitude": 2.0, "longitude": 2.0, "timestamp": 20}))
        );
        assert_eq!(store.values.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn store_failure_is_dropped_not_raised() {
        let store = Arc::new(MapStore {
            fail: true,
            ..MapStore::default()
        });
        let uploader = LocationUploader::new(store);

        let outcome = uploader
            .upload("R1", "u1", &LocationSample::new(1.0, 1.0, 10))
            .await;

        assert_eq!(
            outcome,
            UploadOutcome::Dropped(TrackingError::UploadFailure(
                "remote store error: offline".into()
            ))
        );
    }
}
