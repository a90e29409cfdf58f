use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{Duration, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::models::{LocationBatch, PermissionState};
use crate::upload::LocationUploader;

use super::provider::LocationProvider;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Why the forwarding loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardingExit {
    Cancelled,
    PermissionRevoked,
    ChannelClosed,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardingOptions {
    /// Re-read the background permission this often while forwarding.
    pub permission_recheck: Option<Duration>,
    /// Warn once when no delivery arrives for this long.
    pub silence_warning: Option<Duration>,
}

/// Everything a forwarding loop needs, captured when the task is armed.
pub struct ForwardingTarget {
    pub report_id: String,
    pub user_id: String,
    pub uploader: LocationUploader,
    pub provider: Arc<dyn LocationProvider>,
}

/// Tracks one silent stretch at a time: the warning fires once, and only a
/// new delivery re-arms it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SilenceWatch {
    window: Option<Duration>,
    last_delivery: Instant,
    armed: bool,
}

impl SilenceWatch {
    pub(crate) fn new(window: Option<Duration>, now: Instant) -> Self {
        Self {
            window,
            last_delivery: now,
            armed: window.is_some(),
        }
    }

    /// `None` while disarmed, or when the window reaches past what the
    /// clock can represent.
    pub(crate) fn deadline(&self) -> Option<Instant> {
        if !self.armed {
            return None;
        }
        self.window
            .and_then(|window| self.last_delivery.checked_add(window))
    }

    pub(crate) fn delivered(&mut self, now: Instant) {
        self.last_delivery = now;
        self.armed = self.window.is_some();
    }

    pub(crate) fn elapsed(&mut self) {
        self.armed = false;
    }

    fn window_secs(&self) -> u64 {
        self.window.map(|window| window.as_secs()).unwrap_or_default()
    }
}

fn recheck_ticker(period: Duration) -> Option<Interval> {
    let Some(start) = Instant::now().checked_add(period) else {
        log_warn!(
            "permission recheck period of {}s is out of range; recheck disabled",
            period.as_secs()
        );
        return None;
    };
    let mut ticker = tokio::time::interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(ticker)
}

/// Drain OS deliveries into the uploader, in order, until cancelled.
pub async fn forwarding_loop(
    mut updates: broadcast::Receiver<LocationBatch>,
    target: ForwardingTarget,
    options: ForwardingOptions,
    cancel_token: CancellationToken,
) -> ForwardingExit {
    let mut recheck = options.permission_recheck.and_then(recheck_ticker);
    let mut silence = SilenceWatch::new(options.silence_warning, Instant::now());
    let mut forwarded: u64 = 0;

    log_info!(
        "forwarding fixes for user {} to report {}",
        target.user_id,
        target.report_id
    );

    loop {
        let silence_deadline = silence.deadline();

        tokio::select! {
            biased;

            _ = cancel_token.cancelled() => {
                log_info!("forwarding loop shutting down after {forwarded} fixes");
                return ForwardingExit::Cancelled;
            }
            received = updates.recv() => match received {
                Ok(batch) => {
                    silence.delivered(Instant::now());
                    for sample in &batch {
                        if cancel_token.is_cancelled() {
                            log_debug!("discarding remainder of batch after cancellation");
                            return ForwardingExit::Cancelled;
                        }
                        if target
                            .uploader
                            .upload(&target.report_id, &target.user_id, sample)
                            .await
                            .is_stored()
                        {
                            forwarded += 1;
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    log_warn!("forwarding loop lagged; {skipped} deliveries skipped");
                }
                Err(RecvError::Closed) => {
                    log_warn!("location delivery channel closed");
                    return ForwardingExit::ChannelClosed;
                }
            },
            _ = next_tick(&mut recheck), if recheck.is_some() => {
                if permission_revoked(target.provider.as_ref()).await {
                    log_warn!(
                        "background location permission revoked while forwarding for user {}",
                        target.user_id
                    );
                    return ForwardingExit::PermissionRevoked;
                }
            }
            _ = sleep_until_deadline(silence_deadline), if silence_deadline.is_some() => {
                log_warn!(
                    "no location delivered for {}s; the OS may have stopped the task",
                    silence.window_secs()
                );
                silence.elapsed();
            }
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn permission_revoked(provider: &dyn LocationProvider) -> bool {
    match provider.background_permission_status().await {
        Ok(PermissionState::Granted) => false,
        Ok(_) => true,
        Err(err) => {
            log_warn!("could not re-read background permission: {err}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrackingResult;
    use crate::models::LocationSample;
    use crate::sensing::SimulatedLocationProvider;
    use crate::upload::RemoteStore;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingStore {
        writes: Mutex<Vec<(String, serde_json::Value)>>,
    }

    #[async_trait]
    impl RemoteStore for RecordingStore {
        async fn set(&self, path: &str, value: serde_json::Value) -> TrackingResult<()> {
            self.writes.lock().await.push((path.to_string(), value));
            Ok(())
        }

        async fn get(&self, _path: &str) -> TrackingResult<Option<serde_json::Value>> {
            Ok(None)
        }
    }

    fn target(
        store: Arc<RecordingStore>,
        provider: Arc<SimulatedLocationProvider>,
    ) -> ForwardingTarget {
        ForwardingTarget {
            report_id: "R1".into(),
            user_id: "u1".into(),
            uploader: LocationUploader::new(store),
            provider,
        }
    }

    #[tokio::test]
    async fn forwards_batches_in_delivery_order() {
        let store = Arc::new(RecordingStore::default());
        let provider = Arc::new(SimulatedLocationProvider::granting());
        let updates = provider.location_updates("task");
        let token = CancellationToken::new();

        let handle = tokio::spawn(forwarding_loop(
            updates,
            target(store.clone(), provider.clone()),
            ForwardingOptions::default(),
            token.clone(),
        ));

        provider.deliver(
            "task",
            vec![LocationSample::new(1.0, 1.0, 1), LocationSample::new(2.0, 2.0, 2)],
        );
        provider.deliver("task", vec![LocationSample::new(3.0, 3.0, 3)]);

        while store.writes.lock().await.len() < 3 {
            tokio::task::yield_now().await;
        }
        token.cancel();
        assert_eq!(handle.await.unwrap(), ForwardingExit::Cancelled);

        let timestamps: Vec<i64> = store
            .writes
            .lock()
            .await
            .iter()
            .map(|(_, value)| value["timestamp"].as_i64().unwrap())
            .collect();
        assert_eq!(timestamps, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn revoked_permission_ends_the_loop() {
        let store = Arc::new(RecordingStore::default());
        let provider = Arc::new(SimulatedLocationProvider::granting());
        let updates = provider.location_updates("task");
        provider.set_background_permission(PermissionState::Denied);

        let exit = forwarding_loop(
            updates,
            target(store, provider),
            ForwardingOptions {
                permission_recheck: Some(Duration::from_secs(30)),
                silence_warning: None,
            },
            CancellationToken::new(),
        )
        .await;

        assert_eq!(exit, ForwardingExit::PermissionRevoked);
    }

    async fn wait_for_writes(store: &RecordingStore, count: usize) {
        while store.writes.lock().await.len() < count {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn silence_watch_fires_once_per_stretch() {
        let window = Duration::from_secs(10);
        let start = Instant::now();
        let mut watch = SilenceWatch::new(Some(window), start);
        assert_eq!(watch.deadline(), Some(start + window));

        watch.elapsed();
        assert_eq!(watch.deadline(), None);

        let later = start + Duration::from_secs(30);
        watch.delivered(later);
        assert_eq!(watch.deadline(), Some(later + window));

        assert_eq!(SilenceWatch::new(None, start).deadline(), None);
        assert_eq!(
            SilenceWatch::new(Some(Duration::from_secs(u64::MAX)), start).deadline(),
            None
        );
    }

    #[tokio::test]
    async fn out_of_range_windows_keep_forwarding() {
        let store = Arc::new(RecordingStore::default());
        let provider = Arc::new(SimulatedLocationProvider::granting());
        let updates = provider.location_updates("task");
        let token = CancellationToken::new();

        let handle = tokio::spawn(forwarding_loop(
            updates,
            target(store.clone(), provider.clone()),
            ForwardingOptions {
                permission_recheck: Some(Duration::from_secs(u64::MAX)),
                silence_warning: Some(Duration::from_secs(u64::MAX)),
            },
            token.clone(),
        ));

        provider.deliver("task", vec![LocationSample::new(37.0, -122.0, 1000)]);
        wait_for_writes(&store, 1).await;
        assert!(!handle.is_finished());

        token.cancel();
        assert_eq!(handle.await.unwrap(), ForwardingExit::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_stretch_only_warns() {
        let store = Arc::new(RecordingStore::default());
        let provider = Arc::new(SimulatedLocationProvider::granting());
        let updates = provider.location_updates("task");
        let token = CancellationToken::new();

        let handle = tokio::spawn(forwarding_loop(
            updates,
            target(store.clone(), provider.clone()),
            ForwardingOptions {
                permission_recheck: None,
                silence_warning: Some(Duration::from_secs(10)),
            },
            token.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert!(!handle.is_finished());

        provider.deliver("task", vec![LocationSample::new(1.0, 1.0, 1)]);
        wait_for_writes(&store, 1).await;

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert!(!handle.is_finished());

        token.cancel();
        assert_eq!(handle.await.unwrap(), ForwardingExit::Cancelled);
    }

    #[tokio::test]
    async fn lagged_receiver_keeps_forwarding() {
        use crate::sensing::simulated::DELIVERY_BUFFER;

        let store = Arc::new(RecordingStore::default());
        let provider = Arc::new(SimulatedLocationProvider::granting());
        let updates = provider.location_updates("task");
        let token = CancellationToken::new();

        let overflow = 5;
        for timestamp in 0..(DELIVERY_BUFFER + overflow) as i64 {
            provider.deliver("task", vec![LocationSample::new(1.0, 1.0, timestamp)]);
        }

        let handle = tokio::spawn(forwarding_loop(
            updates,
            target(store.clone(), provider.clone()),
            ForwardingOptions::default(),
            token.clone(),
        ));

        wait_for_writes(&store, DELIVERY_BUFFER).await;
        provider.deliver("task", vec![LocationSample::new(2.0, 2.0, 999)]);
        wait_for_writes(&store, DELIVERY_BUFFER + 1).await;
        assert!(!handle.is_finished());

        token.cancel();
        assert_eq!(handle.await.unwrap(), ForwardingExit::Cancelled);

        let timestamps: Vec<i64> = store
            .writes
            .lock()
            .await
            .iter()
            .map(|(_, value)| value["timestamp"].as_i64().unwrap())
            .collect();
        assert_eq!(timestamps.len(), DELIVERY_BUFFER + 1);
        assert_eq!(timestamps[0], overflow as i64);
        assert_eq!(timestamps.last(), Some(&999));
    }
}
