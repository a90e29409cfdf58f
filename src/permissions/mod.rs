use std::sync::Arc;

use serde::Serialize;

use crate::error::TrackingError;
use crate::models::{PermissionScope, PermissionState};
use crate::sensing::LocationProvider;

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PermissionGrant {
    pub foreground_granted: bool,
    pub background_granted: bool,
}

impl PermissionGrant {
    pub fn is_complete(&self) -> bool {
        self.foreground_granted && self.background_granted
    }

    /// The first scope that was refused.
    pub fn denied_scope(&self) -> Option<PermissionScope> {
        if !self.foreground_granted {
            Some(PermissionScope::Foreground)
        } else if !self.background_granted {
            Some(PermissionScope::Background)
        } else {
            None
        }
    }

    pub fn denial(&self) -> Option<TrackingError> {
        self.denied_scope()
            .map(|scope| TrackingError::PermissionDenied { scope })
    }
}

/// Asks for foreground then background location access. Never retries.
#[derive(Clone)]
pub struct PermissionGate {
    provider: Arc<dyn LocationProvider>,
}

impl PermissionGate {
    pub fn new(provider: Arc<dyn LocationProvider>) -> Self {
        Self { provider }
    }

    pub async fn ensure_permissions(&self) -> PermissionGrant {
        let foreground = self.request(PermissionScope::Foreground).await;
        if !foreground.is_granted() {
            log_warn!("foreground location permission {:?}", foreground);
            return PermissionGrant {
                foreground_granted: false,
                background_granted: false,
            };
        }

        let background = self.request(PermissionScope::Background).await;
        if !background.is_granted() {
            log_warn!("background location permission {:?}", background);
        } else {
            log_info!("location permissions granted");
        }

        PermissionGrant {
            foreground_granted: true,
            background_granted: background.is_granted(),
        }
    }

    async fn request(&self, scope: PermissionScope) -> PermissionState {
        let result = match scope {
            PermissionScope::Foreground => self.provider.request_foreground_permission().await,
            PermissionScope::Background => self.provider.request_background_permission().await,
        };

        result.unwrap_or_else(|err| {
            log_warn!("{scope} permission request failed: {err}");
            PermissionState::Denied
        })
    }
}
