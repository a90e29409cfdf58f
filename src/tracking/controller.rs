use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::{
    sync::{broadcast, mpsc, watch, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    error::TrackingError,
    models::{AuthEvent, LocationBatch},
    permissions::PermissionGate,
    reports::{ActiveReportResolver, ReportDirectory},
    sensing::{
        forwarding_loop, ArmOutcome, ForwardingExit, ForwardingOptions, ForwardingTarget,
        LocationProvider, LocationSampler, SamplerConfig,
    },
    settings::TrackingSettings,
    upload::{LocationUploader, RemoteStore},
};

use super::{DisarmReason, TrackingState, TrackingStatus};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackingSnapshot {
    pub status: TrackingStatus,
    pub user_id: Option<String>,
    pub report_id: Option<String>,
    pub armed_at: Option<DateTime<Utc>>,
}

impl From<&TrackingState> for TrackingSnapshot {
    fn from(state: &TrackingState) -> Self {
        Self {
            status: state.status.clone(),
            user_id: state.user_id().map(str::to_string),
            report_id: state.report_id.clone(),
            armed_at: state.armed_at,
        }
    }
}

struct Forwarder {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Drives tracking from authentication events: permissions, then the active
/// report, then one idempotent arm. Sign-out is the only teardown path.
#[derive(Clone)]
pub struct TrackingSupervisor {
    state: Arc<Mutex<TrackingState>>,
    /// Serialises sign-in/sign-out so arming chains never interleave.
    transitions: Arc<Mutex<()>>,
    forwarder: Arc<Mutex<Option<Forwarder>>>,
    gate: PermissionGate,
    resolver: ActiveReportResolver,
    sampler: LocationSampler,
    uploader: LocationUploader,
    sampler_config: SamplerConfig,
    forwarding: ForwardingOptions,
    updates: Arc<watch::Sender<TrackingSnapshot>>,
}

impl TrackingSupervisor {
    pub fn new(
        provider: Arc<dyn LocationProvider>,
        directory: Arc<dyn ReportDirectory>,
        store: Arc<dyn RemoteStore>,
        settings: &TrackingSettings,
    ) -> Self {
        let state = TrackingState::new();
        let (updates, _) = watch::channel(TrackingSnapshot::from(&state));

        Self {
            state: Arc::new(Mutex::new(state)),
            transitions: Arc::new(Mutex::new(())),
            forwarder: Arc::new(Mutex::new(None)),
            gate: PermissionGate::new(provider.clone()),
            resolver: ActiveReportResolver::new(directory),
            sampler: LocationSampler::new(provider, settings.task_name.clone()),
            uploader: LocationUploader::new(store),
            sampler_config: settings.sampler.clone(),
            forwarding: settings.forwarding_options(),
            updates: Arc::new(updates),
        }
    }

    pub async fn state(&self) -> TrackingStatus {
        self.state.lock().await.status.clone()
    }

    pub async fn snapshot(&self) -> TrackingSnapshot {
        TrackingSnapshot::from(&*self.state.lock().await)
    }

    /// Every transition is published here.
    pub fn subscribe(&self) -> watch::Receiver<TrackingSnapshot> {
        self.updates.subscribe()
    }

    pub fn sampler(&self) -> &LocationSampler {
        &self.sampler
    }

    pub async fn handle(&self, event: AuthEvent) -> TrackingStatus {
        match event {
            AuthEvent::SignedIn { user_id } => self.sign_in(&user_id).await,
            AuthEvent::SignedOut => self.sign_out().await,
        }
    }

    /// Consume auth events until the channel closes or `shutdown` fires. The
    /// OS registration is left in place on shutdown; only sign-out removes it.
    pub async fn run(&self, mut auth_events: mpsc::Receiver<AuthEvent>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    log_info!("tracking supervisor shutting down");
                    break;
                }
                event = auth_events.recv() => match event {
                    Some(event) => {
                        self.handle(event).await;
                    }
                    None => {
                        log_info!("auth event stream closed");
                        break;
                    }
                },
            }
        }

        self.stop_forwarder().await;
    }

    pub async fn sign_in(&self, user_id: &str) -> TrackingStatus {
        let _transition = self.transitions.lock().await;

        let replacing = self.state.lock().await.has_live_session();
        if replacing {
            log_info!("new sign-in replaces the current session");
            self.teardown().await;
        }

        let generation = self
            .update(|state| state.begin_session(user_id))
            .await;
        log_info!("user {user_id} signed in; checking location permissions");

        let grant = self.gate.ensure_permissions().await;
        if let Some(scope) = grant.denied_scope() {
            log_warn!(
                "{}; location sharing stays off for this session",
                TrackingError::PermissionDenied { scope }
            );
            return self
                .finish(|state| state.disarm(DisarmReason::PermissionDenied(scope)))
                .await;
        }

        self.update(|state| state.await_report()).await;

        let Some(report_id) = self.resolver.resolve_active_report(user_id).await else {
            log_info!(
                "user {user_id}: {}; skipping location updates",
                TrackingError::NoActiveReport
            );
            return self
                .finish(|state| state.disarm(DisarmReason::NoActiveReport))
                .await;
        };

        // Subscribe before arming so the first delivery cannot slip past.
        let updates = self.sampler.subscribe();
        match self.sampler.arm(&self.sampler_config).await {
            Ok(ArmOutcome::Registered) => {}
            Ok(ArmOutcome::AlreadyRegistered) => {
                log_info!(
                    "reusing existing location task '{}' for report {report_id}",
                    self.sampler.task_name()
                );
            }
            Err(err) => {
                log_error!("failed to start location updates: {err}");
                return self
                    .finish(|state| state.disarm(DisarmReason::ArmingFailed))
                    .await;
            }
        }

        let target = ForwardingTarget {
            report_id: report_id.clone(),
            user_id: user_id.to_string(),
            uploader: self.uploader.clone(),
            provider: self.sampler.provider().clone(),
        };
        self.spawn_forwarder(updates, target, generation).await;

        self.finish(|state| state.arm(report_id)).await
    }

    pub async fn sign_out(&self) -> TrackingStatus {
        let _transition = self.transitions.lock().await;
        self.teardown().await;
        log_info!("signed out; location tracking cleared");
        self.snapshot().await.status
    }

    /// Stop forwarding, then unregister unconditionally: the OS, not local
    /// state, knows whether a task is running.
    async fn teardown(&self) {
        self.stop_forwarder().await;

        if let Err(err) = self.sampler.disarm().await {
            log_error!("failed to stop location updates: {err}");
        }

        self.update(|state| state.sign_out()).await;
    }

    async fn spawn_forwarder(
        &self,
        updates: broadcast::Receiver<LocationBatch>,
        target: ForwardingTarget,
        generation: u64,
    ) {
        let mut forwarder_guard = self.forwarder.lock().await;
        if let Some(previous) = forwarder_guard.take() {
            previous.cancel_token.cancel();
            previous.handle.abort();
        }

        let cancel_token = CancellationToken::new();
        let supervisor = self.clone();
        let options = self.forwarding;
        let token = cancel_token.clone();

        let handle = tokio::spawn(async move {
            let exit = forwarding_loop(updates, target, options, token).await;
            if exit == ForwardingExit::PermissionRevoked {
                // Detached: sign-out joins this task while holding the
                // transition lock.
                tokio::spawn(async move { supervisor.on_permission_revoked(generation).await });
            }
        });

        *forwarder_guard = Some(Forwarder {
            cancel_token,
            handle,
        });
    }

    async fn stop_forwarder(&self) {
        let forwarder = self.forwarder.lock().await.take();
        if let Some(forwarder) = forwarder {
            forwarder.cancel_token.cancel();
            if let Err(err) = forwarder.handle.await {
                if !err.is_cancelled() {
                    log_error!("forwarding task failed to join: {err}");
                }
            }
        }
    }

    async fn on_permission_revoked(&self, generation: u64) {
        let _transition = self.transitions.lock().await;
        {
            let state = self.state.lock().await;
            if state.generation != generation || !state.status.is_armed() {
                return;
            }
        }

        self.forwarder.lock().await.take();
        if let Err(err) = self.sampler.disarm().await {
            log_error!("failed to stop location updates after revocation: {err}");
        }
        self.finish(|state| state.disarm(DisarmReason::PermissionRevoked))
            .await;
    }

    async fn update<T>(&self, apply: impl FnOnce(&mut TrackingState) -> T) -> T {
        let mut state = self.state.lock().await;
        let result = apply(&mut state);
        self.updates.send_replace(TrackingSnapshot::from(&*state));
        result
    }

    async fn finish(&self, apply: impl FnOnce(&mut TrackingState)) -> TrackingStatus {
        self.update(|state| {
            apply(state);
            state.status.clone()
        })
        .await
    }
}
