//! Gridstore - in-memory time-series store for cluster telemetry.
//!
//! Gridstore ingests metric samples streamed from many compute nodes,
//! organizes them in a hierarchical namespace (cluster, host, device
//! subcomponent), serves low-latency range queries with on-the-fly
//! aggregation across sub-levels, and periodically persists sliding
//! windows to disk checkpoints that are reloaded at startup and later
//! compacted into long-term archives.
//!
//! # Architecture
//!
//! - `core`: sample value, metric schema, errors, configuration
//! - `storage`: the level tree, buffer chains, selector engine,
//!   statistics, checkpoint/restore/archive and the background tasks
//! - `ingest`: line-protocol decoding into batched writes
//! - `api`: HTTP query/write façade
//! - `cli`: command-line interface
//!
//! # Example
//!
//! ```
//! use gridstore_lib::core::{AggregationStrategy, Metric, MetricConfig};
//! use gridstore_lib::storage::{path_selector, MemoryStore};
//! use std::collections::HashMap;
//!
//! let mut metrics = HashMap::new();
//! metrics.insert(
//!     "load_one".to_string(),
//!     MetricConfig::new(60, AggregationStrategy::None),
//! );
//! let store = MemoryStore::new(metrics).unwrap();
//!
//! store
//!     .write(&["emmy", "host1"], 60, &[Metric::new("load_one", 0.7)])
//!     .unwrap();
//! let (data, from, to, _) = store
//!     .read(&path_selector(&["emmy", "host1"]), "load_one", 60, 120, 0)
//!     .unwrap();
//! assert_eq!((data.len(), from, to), (1, 60, 120));
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod api;
pub mod cli;
pub mod core;
pub mod ingest;
pub mod storage;
