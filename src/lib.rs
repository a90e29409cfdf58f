pub mod db;
pub mod error;
pub mod models;
pub mod permissions;
pub mod reports;
pub mod sensing;
pub mod settings;
pub mod tracking;
pub mod upload;
pub mod utils;

use std::sync::Arc;

use anyhow::{Context, Result};
use db::Database;
use log::{info, warn};
use sensing::SimulatedLocationProvider;
use settings::SettingsStore;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracking::{
    commands::{execute, ConsoleCommand, HELP},
    TrackingSupervisor,
};

pub use error::{TrackingError, TrackingResult};
pub use models::{AuthEvent, LocationSample};

const AUTH_EVENT_BUFFER: usize = 16;

pub struct AppState {
    pub db: Database,
    pub supervisor: TrackingSupervisor,
    pub settings: SettingsStore,
    /// Stand-in for the OS; the console drives its permission answers.
    pub provider: Arc<SimulatedLocationProvider>,
    pub(crate) auth_events: mpsc::Sender<AuthEvent>,
}

pub fn run() -> Result<()> {
    utils::logging::init_logging();

    info!("livetrack starting up...");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(serve())
}

async fn serve() -> Result<()> {
    let settings = SettingsStore::from_env()?;
    let tracking = settings.tracking();
    info!(
        "settings loaded from {} (task '{}')",
        settings.path().display(),
        tracking.task_name
    );

    let database = Database::new(tracking.database_path.clone())?;
    let provider = Arc::new(SimulatedLocationProvider::from_settings(
        tracking.simulation.clone(),
    ));

    let supervisor = TrackingSupervisor::new(
        provider.clone(),
        Arc::new(database.clone()),
        Arc::new(database.clone()),
        &tracking,
    );

    let (auth_tx, auth_rx) = mpsc::channel(AUTH_EVENT_BUFFER);
    let shutdown = CancellationToken::new();

    let supervisor_task = {
        let supervisor = supervisor.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { supervisor.run(auth_rx, shutdown).await })
    };

    let watcher_task = {
        let mut snapshots = supervisor.subscribe();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    changed = snapshots.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let snapshot = snapshots.borrow_and_update().clone();
                        info!("tracking state: {:?}", snapshot.status);
                    }
                }
            }
        })
    };

    let state = AppState {
        db: database,
        supervisor,
        settings,
        provider,
        auth_events: auth_tx,
    };

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        match line.parse::<ConsoleCommand>() {
            Ok(ConsoleCommand::Quit) => break,
            Ok(command) => match execute(command, &state).await {
                Ok(output) => println!("{output}"),
                Err(err) => println!("error: {err}"),
            },
            Err(err) => println!("error: {err}"),
        }
    }

    shutdown.cancel();
    if let Err(err) = supervisor_task.await {
        warn!("supervisor task ended abnormally: {err}");
    }
    let _ = watcher_task.await;

    info!("livetrack stopped");
    Ok(())
}
