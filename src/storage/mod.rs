//! The storage engine: the hierarchical level tree, per-metric buffer
//! chains, the selector engine, statistics, and the checkpoint /
//! restore / archive lifecycle.

pub mod archive;
pub mod buffer;
pub mod checkpoint;
pub mod debug;
pub mod level;
pub mod lifecycle;
pub mod resample;
pub mod selector;
pub mod stats;
pub mod store;

pub use archive::archive_checkpoints;
pub use buffer::BUFFER_CAP;
pub use checkpoint::{CheckpointFile, CheckpointMetrics, FileFormat};
pub use level::Level;
pub use selector::{path_selector, Selector, SelectorElement};
pub use stats::Stats;
pub use store::MemoryStore;

use crate::core::{MetricConfig, Result, StoreError};
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// The one store of the process. Tests construct their own
/// [`MemoryStore`] values; the daemon goes through this.
static INSTANCE: OnceCell<Arc<MemoryStore>> = OnceCell::new();

/// Start timestamp of the most recent successful checkpoint. Read by
/// the free endpoint so that data is never released before it has been
/// persisted at least once.
static LAST_CHECKPOINT: AtomicI64 = AtomicI64::new(0);

/// Install the process-wide store. May only be called once.
pub fn init(metrics: HashMap<String, MetricConfig>) -> Result<()> {
    let store = Arc::new(MemoryStore::new(metrics)?);
    INSTANCE
        .set(store)
        .map_err(|_| StoreError::config("memory store already initialized"))
}

/// The process-wide store. Panics if [`init`] has not run.
pub fn get() -> Arc<MemoryStore> {
    Arc::clone(INSTANCE.get().expect("memory store not initialized"))
}

pub fn last_checkpoint() -> i64 {
    LAST_CHECKPOINT.load(Ordering::Relaxed)
}

pub fn set_last_checkpoint(ts: i64) {
    LAST_CHECKPOINT.store(ts, Ordering::Relaxed);
}

/// Current unix time in seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
