use std::sync::Arc;

use tokio::sync::broadcast;

use crate::error::TrackingResult;
use crate::models::LocationBatch;

use super::provider::{LocationProvider, SamplerConfig};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmOutcome {
    Registered,
    AlreadyRegistered,
}

/// The background location task under its fixed name.
#[derive(Clone)]
pub struct LocationSampler {
    provider: Arc<dyn LocationProvider>,
    task_name: String,
}

impl LocationSampler {
    pub fn new(provider: Arc<dyn LocationProvider>, task_name: impl Into<String>) -> Self {
        Self {
            provider,
            task_name: task_name.into(),
        }
    }

    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    pub async fn is_registered(&self) -> TrackingResult<bool> {
        self.provider
            .has_started_location_updates(&self.task_name)
            .await
    }

    /// Register the task unless it already is. A registration can outlive the
    /// process, so the OS answer is checked every time.
    pub async fn arm(&self, config: &SamplerConfig) -> TrackingResult<ArmOutcome> {
        if self.is_registered().await? {
            log_info!("location task '{}' already running", self.task_name);
            return Ok(ArmOutcome::AlreadyRegistered);
        }

        self.provider
            .start_location_updates(&self.task_name, config)
            .await?;

        log_info!(
            "location task '{}' started (interval {}ms, distance {}m)",
            self.task_name,
            config.time_interval_ms,
            config.distance_interval_m
        );
        Ok(ArmOutcome::Registered)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LocationBatch> {
        self.provider.location_updates(&self.task_name)
    }

    /// Unregister the task. Fine to call when nothing was armed.
    pub async fn disarm(&self) -> TrackingResult<()> {
        self.provider.stop_location_updates(&self.task_name).await?;
        log_debug!("location task '{}' stopped", self.task_name);
        Ok(())
    }

    pub(crate) fn provider(&self) -> &Arc<dyn LocationProvider> {
        &self.provider
    }
}
