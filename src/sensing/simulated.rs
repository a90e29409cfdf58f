use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::{TrackingError, TrackingResult};
use crate::models::{LocationBatch, LocationSample, PermissionState};

use super::provider::{LocationProvider, SamplerConfig};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

pub(crate) const DELIVERY_BUFFER: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SimulationSettings {
    pub origin_latitude: f64,
    pub origin_longitude: f64,
    /// Maximum random offset applied to each coordinate, in degrees.
    pub jitter_degrees: f64,
    /// Emit fixes on a timer while the task is registered.
    pub auto_emit: bool,
    /// Scripted answers to the permission prompts.
    pub foreground_permission: PermissionState,
    pub background_permission: PermissionState,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            origin_latitude: 37.7749,
            origin_longitude: -122.4194,
            jitter_degrees: 0.0005,
            auto_emit: true,
            foreground_permission: PermissionState::Granted,
            background_permission: PermissionState::Granted,
        }
    }
}

struct Registration {
    config: SamplerConfig,
    emitter: Option<CancellationToken>,
}

struct SimState {
    foreground: PermissionState,
    background: PermissionState,
    fail_start: bool,
    registrations: HashMap<String, Registration>,
    channels: HashMap<String, broadcast::Sender<LocationBatch>>,
}

/// In-process stand-in for the OS location services. Answers permission
/// prompts from a script, tracks task registrations and lets callers push
/// deliveries by hand; optionally emits jittered fixes on a timer.
pub struct SimulatedLocationProvider {
    settings: SimulationSettings,
    state: Mutex<SimState>,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    foreground_prompts: AtomicUsize,
    background_prompts: AtomicUsize,
}

impl SimulatedLocationProvider {
    pub fn new(
        settings: SimulationSettings,
        foreground: PermissionState,
        background: PermissionState,
    ) -> Self {
        Self {
            settings,
            state: Mutex::new(SimState {
                foreground,
                background,
                fail_start: false,
                registrations: HashMap::new(),
                channels: HashMap::new(),
            }),
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            foreground_prompts: AtomicUsize::new(0),
            background_prompts: AtomicUsize::new(0),
        }
    }

    pub fn from_settings(settings: SimulationSettings) -> Self {
        let (foreground, background) =
            (settings.foreground_permission, settings.background_permission);
        Self::new(settings, foreground, background)
    }

    /// Both scopes granted, no automatic fixes.
    pub fn granting() -> Self {
        Self::with_permissions(PermissionState::Granted, PermissionState::Granted)
    }

    pub fn with_permissions(foreground: PermissionState, background: PermissionState) -> Self {
        let settings = SimulationSettings {
            auto_emit: false,
            ..SimulationSettings::default()
        };
        Self::new(settings, foreground, background)
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn sender_for(state: &mut SimState, task_name: &str) -> broadcast::Sender<LocationBatch> {
        state
            .channels
            .entry(task_name.to_string())
            .or_insert_with(|| broadcast::channel(DELIVERY_BUFFER).0)
            .clone()
    }

    pub fn set_foreground_permission(&self, status: PermissionState) {
        self.state().foreground = status;
    }

    /// Also models the user revoking access in system settings.
    pub fn set_background_permission(&self, status: PermissionState) {
        self.state().background = status;
    }

    pub fn fail_next_starts(&self, fail: bool) {
        self.state().fail_start = fail;
    }

    /// Push a batch to whoever listens on `task_name`, registered or not, the
    /// way an in-flight OS callback can still land after unregistering.
    /// Returns the number of listeners reached.
    pub fn deliver(&self, task_name: &str, batch: LocationBatch) -> usize {
        let sender = Self::sender_for(&mut self.state(), task_name);
        sender.send(batch).unwrap_or(0)
    }

    pub fn registered_config(&self, task_name: &str) -> Option<SamplerConfig> {
        self.state()
            .registrations
            .get(task_name)
            .map(|registration| registration.config.clone())
    }

    pub fn registration_count(&self) -> usize {
        self.state().registrations.len()
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn foreground_prompts(&self) -> usize {
        self.foreground_prompts.load(Ordering::SeqCst)
    }

    pub fn background_prompts(&self) -> usize {
        self.background_prompts.load(Ordering::SeqCst)
    }

    fn spawn_emitter(
        &self,
        sender: broadcast::Sender<LocationBatch>,
        interval_ms: u64,
    ) -> CancellationToken {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let settings = self.settings.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; the OS waits a full interval.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let sample = jittered_fix(&settings);
                        let _ = sender.send(vec![sample]);
                    }
                    _ = cancelled.cancelled() => {
                        log_debug!("simulated emitter shutting down");
                        break;
                    }
                }
            }
        });

        token
    }
}

/// Larger offsets stop looking like one device wandering around the origin.
const MAX_JITTER_DEGREES: f64 = 1.0;

fn jittered_fix(settings: &SimulationSettings) -> LocationSample {
    let jitter = if settings.jitter_degrees.is_finite() {
        settings.jitter_degrees.abs().min(MAX_JITTER_DEGREES)
    } else {
        0.0
    };
    if jitter == 0.0 {
        return LocationSample::now(settings.origin_latitude, settings.origin_longitude);
    }
    let mut rng = rand::thread_rng();
    let latitude = settings.origin_latitude + rng.gen_range(-jitter..=jitter);
    let longitude = settings.origin_longitude + rng.gen_range(-jitter..=jitter);
    LocationSample::now(latitude, longitude)
}

#[async_trait]
impl LocationProvider for SimulatedLocationProvider {
    async fn request_foreground_permission(&self) -> TrackingResult<PermissionState> {
        self.foreground_prompts.fetch_add(1, Ordering::SeqCst);
        Ok(self.state().foreground)
    }

    async fn request_background_permission(&self) -> TrackingResult<PermissionState> {
        self.background_prompts.fetch_add(1, Ordering::SeqCst);
        Ok(self.state().background)
    }

    async fn background_permission_status(&self) -> TrackingResult<PermissionState> {
        Ok(self.state().background)
    }

    async fn has_started_location_updates(&self, task_name: &str) -> TrackingResult<bool> {
        Ok(self.state().registrations.contains_key(task_name))
    }

    async fn start_location_updates(
        &self,
        task_name: &str,
        config: &SamplerConfig,
    ) -> TrackingResult<()> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);

        let sender = {
            let mut state = self.state();
            if state.fail_start {
                return Err(TrackingError::provider("background execution not allowed"));
            }
            if !state.background.is_granted() {
                return Err(TrackingError::provider(
                    "background location permission missing",
                ));
            }
            Self::sender_for(&mut state, task_name)
        };

        let emitter = self
            .settings
            .auto_emit
            .then(|| self.spawn_emitter(sender, config.time_interval_ms));

        let previous = self.state().registrations.insert(
            task_name.to_string(),
            Registration {
                config: config.clone(),
                emitter,
            },
        );

        // The OS replaces a registration started under the same name.
        if let Some(token) = previous.and_then(|registration| registration.emitter) {
            token.cancel();
        }

        log_info!("simulated task '{}' registered", task_name);
        Ok(())
    }

    async fn stop_location_updates(&self, task_name: &str) -> TrackingResult<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);

        let removed = self.state().registrations.remove(task_name);
        if let Some(registration) = removed {
            if let Some(token) = registration.emitter {
                token.cancel();
            }
            log_info!("simulated task '{}' unregistered", task_name);
        }
        Ok(())
    }

    fn location_updates(&self, task_name: &str) -> broadcast::Receiver<LocationBatch> {
        Self::sender_for(&mut self.state(), task_name).subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_requires_background_permission() {
        let provider =
            SimulatedLocationProvider::with_permissions(PermissionState::Granted, PermissionState::Denied);
        let result = provider
            .start_location_updates("task", &SamplerConfig::default())
            .await;

        assert!(matches!(result, Err(TrackingError::Provider(_))));
        assert_eq!(provider.registration_count(), 0);
    }

    #[tokio::test]
    async fn deliver_reaches_subscribers() {
        let provider = SimulatedLocationProvider::granting();
        let mut updates = provider.location_updates("task");

        let reached = provider.deliver("task", vec![LocationSample::new(1.0, 2.0, 3)]);

        assert_eq!(reached, 1);
        let batch = updates.recv().await.unwrap();
        assert_eq!(batch, vec![LocationSample::new(1.0, 2.0, 3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_emitter_follows_interval() {
        let settings = SimulationSettings {
            jitter_degrees: 0.0,
            ..SimulationSettings::default()
        };
        let provider = SimulatedLocationProvider::new(
            settings.clone(),
            PermissionState::Granted,
            PermissionState::Granted,
        );
        let mut updates = provider.location_updates("task");
        let config = SamplerConfig {
            time_interval_ms: 5000,
            ..SamplerConfig::default()
        };

        provider.start_location_updates("task", &config).await.unwrap();
        let batch = updates.recv().await.unwrap();

        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].latitude, settings.origin_latitude);
        assert_eq!(batch[0].longitude, settings.origin_longitude);

        provider.stop_location_updates("task").await.unwrap();
        assert_eq!(provider.registration_count(), 0);
    }

    #[test]
    fn absurd_jitter_is_clamped() {
        for jitter_degrees in [1e308, f64::INFINITY, f64::NAN, -5.0] {
            let settings = SimulationSettings {
                jitter_degrees,
                ..SimulationSettings::default()
            };
            let fix = jittered_fix(&settings);

            assert!((fix.latitude - settings.origin_latitude).abs() <= MAX_JITTER_DEGREES + 1e-9);
            assert!((fix.longitude - settings.origin_longitude).abs() <= MAX_JITTER_DEGREES + 1e-9);
        }
    }
}
