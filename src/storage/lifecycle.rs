//! Background tasks: retention sweeping, periodic checkpointing and
//! archiving.
//!
//! Each task is a tokio loop driven by a ticker, cooperating with a
//! shared cancellation token. Failures of a pass are logged and the loop
//! keeps running; only shutdown stops it.

use crate::storage::archive::archive_checkpoints;
use crate::storage::checkpoint::FileFormat;
use crate::storage::store::MemoryStore;
use crate::storage::{last_checkpoint, set_last_checkpoint, unix_now};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

fn format_ts(ts: i64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp(ts, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}

/// Periodically release buffers older than the retention horizon. Runs
/// every half retention period.
pub fn spawn_retention(
    store: Arc<MemoryStore>,
    token: CancellationToken,
    retention: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let tick = retention / 2;
        if tick.is_zero() {
            return;
        }

        let mut ticker = tokio::time::interval(tick);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => {
                    let cutoff = unix_now() - retention.as_secs() as i64;
                    tracing::info!("start freeing buffers (older than {})", format_ts(cutoff));
                    let store = Arc::clone(&store);
                    match tokio::task::spawn_blocking(move || store.free(&[], cutoff)).await {
                        Ok(Ok(freed)) => tracing::info!("done: {} buffers freed", freed),
                        Ok(Err(err)) => tracing::warn!("freeing up buffers failed: {}", err),
                        Err(err) => tracing::error!("retention task failed: {}", err),
                    }
                }
            }
        }
    })
}

/// Periodically checkpoint the window since the last successful pass.
pub fn spawn_checkpointing(
    store: Arc<MemoryStore>,
    token: CancellationToken,
    interval: Duration,
    root_dir: PathBuf,
    format: FileFormat,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if interval.is_zero() {
            return;
        }

        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => {
                    let from = last_checkpoint();
                    let now = unix_now();
                    tracing::info!("start checkpointing (starting at {})", format_ts(from));
                    let store = Arc::clone(&store);
                    let dir = root_dir.clone();
                    let result = tokio::task::spawn_blocking(move || {
                        store.to_checkpoint(&dir, format, from, now)
                    })
                    .await;
                    match result {
                        Ok(Ok(files)) => {
                            tracing::info!("done: {} checkpoint files created", files);
                            set_last_checkpoint(now);
                        },
                        Ok(Err(err)) => tracing::warn!("checkpointing failed: {}", err),
                        Err(err) => tracing::error!("checkpoint task failed: {}", err),
                    }
                }
            }
        }
    })
}

/// Periodically pack checkpoint files older than the archive horizon.
pub fn spawn_archiving(
    token: CancellationToken,
    interval: Duration,
    checkpoints_dir: PathBuf,
    archive_dir: PathBuf,
    retention: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if interval.is_zero() {
            return;
        }

        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => {
                    let cutoff = unix_now() - retention.as_secs() as i64;
                    tracing::info!(
                        "start archiving checkpoints (older than {})",
                        format_ts(cutoff)
                    );
                    let cdir = checkpoints_dir.clone();
                    let adir = archive_dir.clone();
                    let result = tokio::task::spawn_blocking(move || {
                        archive_checkpoints(&cdir, &adir, cutoff, false)
                    })
                    .await;
                    match result {
                        Ok(Ok(files)) => {
                            tracing::info!("done: {} files zipped and moved to the archive", files)
                        },
                        Ok(Err(err)) => tracing::warn!("archiving failed: {}", err),
                        Err(err) => tracing::error!("archive task failed: {}", err),
                    }
                }
            }
        }
    })
}

/// One last checkpoint covering everything since the previous one. Runs
/// on the shutdown path, after the background tasks have stopped and
/// before the process exits.
pub fn final_checkpoint(store: &MemoryStore, root_dir: &Path, format: FileFormat) {
    let from = last_checkpoint();
    let now = unix_now();
    tracing::info!("writing final checkpoint to {:?}", root_dir);
    match store.to_checkpoint(root_dir, format, from, now) {
        Ok(files) => tracing::info!("done ({} files written)", files),
        Err(err) => tracing::warn!("writing final checkpoint failed: {}", err),
    }
}
