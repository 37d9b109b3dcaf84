//! Static config synchronization.
//!
//! Scans the configured config directory on start and then every
//! `refresh_delay`. The first completed pass flips the control plane to
//! ready, both on the HTTP `/ready` endpoint and on the gRPC health service.

use crate::observability::HealthState;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tonic_health::server::HealthReporter;
use tonic_health::ServingStatus;
use tracing::{debug, info, warn};

/// gRPC health service name reported for the discovery endpoints.
pub const DISCOVERY_SERVICE: &str = "controlplane.v1.Discovery";

const CONFIG_EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

/// Counters published by `/debug/syncz`.
#[derive(Debug, Default)]
pub struct SyncStatus {
    syncs: AtomicU64,
    resources: AtomicUsize,
}

/// Point-in-time copy of [`SyncStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncSnapshot {
    pub syncs: u64,
    pub resources: usize,
}

impl SyncStatus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, resources: usize) {
        self.resources.store(resources, Ordering::SeqCst);
        self.syncs.fetch_add(1, Ordering::SeqCst);
    }

    #[must_use]
    pub fn snapshot(&self) -> SyncSnapshot {
        SyncSnapshot {
            syncs: self.syncs.load(Ordering::SeqCst),
            resources: self.resources.load(Ordering::SeqCst),
        }
    }
}

/// Count config files (`.yaml`, `.yml`, `.json`) directly inside `dir`.
pub async fn scan_config_dir(dir: &Path) -> std::io::Result<usize> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut count = 0;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_config = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| CONFIG_EXTENSIONS.contains(&ext));
        if is_config && entry.file_type().await?.is_file() {
            count += 1;
        }
    }

    Ok(count)
}

async fn sync_once(config_dir: Option<&Path>, status: &SyncStatus) {
    let resources = match config_dir {
        None => 0,
        Some(dir) => match scan_config_dir(dir).await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, dir = %dir.display(), "Config sync: failed to scan config dir");
                status.snapshot().resources
            }
        },
    };
    status.record(resources);
}

/// Config sync task: initial sync, readiness flip, periodic rescans.
///
/// Runs until `cancel_token` is cancelled, then marks the control plane
/// not ready.
pub async fn run_config_sync(
    config_dir: Option<PathBuf>,
    refresh_delay: Duration,
    status: Arc<SyncStatus>,
    health_state: Arc<HealthState>,
    mut health_reporter: HealthReporter,
    cancel_token: CancellationToken,
) {
    tokio::select! {
        () = cancel_token.cancelled() => {
            info!("Config sync: Cancelled before initial sync completed");
            return;
        }
        () = sync_once(config_dir.as_deref(), &status) => {}
    }

    health_state.set_ready();
    health_reporter
        .set_service_status(DISCOVERY_SERVICE, ServingStatus::Serving)
        .await;
    info!(
        resources = status.snapshot().resources,
        "Config sync: Initial sync complete, control plane ready"
    );

    let mut ticker = tokio::time::interval(refresh_delay);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick completes immediately; the initial sync already ran.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("Config sync: Shutting down");
                break;
            }
            _ = ticker.tick() => {
                sync_once(config_dir.as_deref(), &status).await;
                debug!(syncs = status.snapshot().syncs, "Config sync: Rescan complete");
            }
        }
    }

    health_state.set_not_ready();
    health_reporter
        .set_service_status(DISCOVERY_SERVICE, ServingStatus::NotServing)
        .await;
}
