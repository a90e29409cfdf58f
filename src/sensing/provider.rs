use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::TrackingResult;
use crate::models::{LocationBatch, PermissionState};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum Accuracy {
    Lowest,
    Low,
    Balanced,
    #[default]
    High,
    Highest,
}

/// Persistent notice shown while the task runs in the background.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ForegroundServiceNotice {
    pub notification_title: String,
    pub notification_body: String,
}

impl Default for ForegroundServiceNotice {
    fn default() -> Self {
        Self {
            notification_title: "Sharing location".into(),
            notification_body: "Your location is being shared for an active report.".into(),
        }
    }
}

/// Options handed to the OS when the background task is registered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SamplerConfig {
    pub accuracy: Accuracy,
    /// Minimum time between deliveries.
    pub time_interval_ms: u64,
    /// Minimum movement between deliveries; zero means interval-only.
    pub distance_interval_m: f64,
    pub shows_background_indicator: bool,
    pub foreground_service: ForegroundServiceNotice,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            accuracy: Accuracy::High,
            time_interval_ms: 5000,
            distance_interval_m: 0.0,
            shows_background_indicator: true,
            foreground_service: ForegroundServiceNotice::default(),
        }
    }
}

/// The OS location services surface: permission prompts plus a named
/// background task. Registration state lives behind this object, so one
/// provider instance is the single source of truth for "is the task running".
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// May show a prompt.
    async fn request_foreground_permission(&self) -> TrackingResult<PermissionState>;

    /// May show a prompt. Only meaningful once foreground is granted.
    async fn request_background_permission(&self) -> TrackingResult<PermissionState>;

    /// Current background status without prompting.
    async fn background_permission_status(&self) -> TrackingResult<PermissionState>;

    async fn has_started_location_updates(&self, task_name: &str) -> TrackingResult<bool>;

    async fn start_location_updates(
        &self,
        task_name: &str,
        config: &SamplerConfig,
    ) -> TrackingResult<()>;

    /// Must succeed when the task was never started.
    async fn stop_location_updates(&self, task_name: &str) -> TrackingResult<()>;

    /// The task callback: every delivery for `task_name` is published here.
    fn location_updates(&self, task_name: &str) -> broadcast::Receiver<LocationBatch>;
}
