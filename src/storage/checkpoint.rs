//! Checkpointing and restoring.
//!
//! A checkpoint pass serializes the unsaved window of every host subtree
//! into one file per (cluster, host) under
//! `<root>/<cluster>/<host>/<from>.<ext>`. Only a host at a time is
//! locked, so checkpointing runs in parallel to live writes and reads.
//! Restoring walks the same layout at startup, before any other access.

use crate::core::{Float, Result, StoreError};
use crate::storage::buffer::{Buffer, BufferChain};
use crate::storage::level::Level;
use crate::storage::store::MemoryStore;
use crossbeam::channel;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// On-disk encoding of checkpoint files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    /// Self-describing JSON; NaN encodes as `null`.
    #[default]
    Json,
    /// Compact record-oriented binary encoding of the same schema.
    Bincode,
}

impl FileFormat {
    pub fn extension(self) -> &'static str {
        match self {
            FileFormat::Json => "json",
            FileFormat::Bincode => "bin",
        }
    }

    pub fn from_extension(ext: &str) -> Option<FileFormat> {
        match ext {
            "json" => Some(FileFormat::Json),
            "bin" => Some(FileFormat::Bincode),
            _ => None,
        }
    }
}

/// One metric's samples within a checkpoint window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetrics {
    pub frequency: i64,
    pub start: i64,
    pub data: Vec<Float>,
}

/// The serialized form of one host subtree for one window `[from, to)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointFile {
    pub from: i64,
    #[serde(default)]
    pub to: i64,
    #[serde(default)]
    pub metrics: HashMap<String, CheckpointMetrics>,
    #[serde(default)]
    pub children: HashMap<String, CheckpointFile>,
}

/// Worker pool size for checkpoint, restore and archive passes.
pub(crate) fn num_workers() -> usize {
    (num_cpus::get() / 2 + 1).min(10)
}

impl MemoryStore {
    /// Write one checkpoint file per (cluster, host) covering
    /// `[from, to)`. Subtrees whose overlapping buffers are all already
    /// archived are skipped. Returns the number of files written; a
    /// failing host never stops the others.
    pub fn to_checkpoint(
        &self,
        dir: &Path,
        format: FileFormat,
        from: i64,
        to: i64,
    ) -> Result<usize> {
        // Snapshot the (cluster, host) pairs so no lock is held while
        // the workers run.
        let mut work: Vec<(Arc<Level>, PathBuf, [String; 2])> = Vec::new();
        {
            let root = self.root.inner.read();
            for (cluster, l1) in &root.children {
                let l1_inner = l1.inner.read();
                for (host, l2) in &l1_inner.children {
                    work.push((
                        Arc::clone(l2),
                        dir.join(cluster).join(host),
                        [cluster.clone(), host.clone()],
                    ));
                }
            }
        }

        let files = AtomicUsize::new(0);
        let errors = AtomicUsize::new(0);

        std::thread::scope(|s| {
            let (tx, rx) = channel::bounded::<(Arc<Level>, PathBuf, [String; 2])>(num_workers() * 2);
            for _ in 0..num_workers() {
                let rx = rx.clone();
                let files = &files;
                let errors = &errors;
                s.spawn(move || {
                    for (level, dir, selector) in rx.iter() {
                        match self.level_to_checkpoint(&level, &dir, format, from, to) {
                            Ok(()) => {
                                files.fetch_add(1, Ordering::Relaxed);
                            },
                            Err(StoreError::NoNewData) => {},
                            Err(err) => {
                                tracing::warn!(
                                    "error while checkpointing {:?}: {}",
                                    selector,
                                    err
                                );
                                errors.fetch_add(1, Ordering::Relaxed);
                            },
                        }
                    }
                });
            }
            drop(rx);

            for item in work {
                if tx.send(item).is_err() {
                    break;
                }
            }
        });

        let files = files.load(Ordering::Relaxed);
        let errors = errors.load(Ordering::Relaxed);
        if errors > 0 {
            return Err(StoreError::PartialCheckpoint { errors, files });
        }
        Ok(files)
    }

    fn level_to_checkpoint(
        &self,
        level: &Arc<Level>,
        dir: &Path,
        format: FileFormat,
        from: i64,
        to: i64,
    ) -> Result<()> {
        let cf = self
            .to_checkpoint_file(level, from, to)?
            .ok_or(StoreError::NoNewData)?;

        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{from}.{}", format.extension()));
        let file = File::create(&path)?;
        let mut writer = BufWriter::new(file);
        match format {
            FileFormat::Json => serde_json::to_writer(&mut writer, &cf)?,
            FileFormat::Bincode => bincode::serialize_into(&mut writer, &cf)?,
        }
        writer.flush()?;

        // Only after the data is safely on disk do the contributing
        // buffers become immutable.
        mark_archived(level, from, to);
        Ok(())
    }

    fn to_checkpoint_file(
        &self,
        level: &Level,
        from: i64,
        to: i64,
    ) -> Result<Option<CheckpointFile>> {
        let mut metrics = HashMap::new();
        let children_refs: Vec<(String, Arc<Level>)>;
        {
            let inner = level.inner.read();
            for (name, config) in &self.metrics {
                let Some(chain) = inner.metrics[config.offset].as_ref() else {
                    continue;
                };
                if !chain.any_unarchived(from, to) {
                    continue;
                }

                let frequency = chain.frequency();
                let mut data = vec![Float::default(); ((to - from) / frequency + 1) as usize];
                let (len, start, _) = chain.read(from, to, &mut data);
                data.truncate(len);

                metrics.insert(
                    name.clone(),
                    CheckpointMetrics {
                        frequency,
                        start,
                        data,
                    },
                );
            }
            children_refs = inner
                .children
                .iter()
                .map(|(name, child)| (name.clone(), Arc::clone(child)))
                .collect();
        }

        let mut children = HashMap::new();
        for (name, child) in children_refs {
            if let Some(child_cf) = self.to_checkpoint_file(&child, from, to)? {
                children.insert(name, child_cf);
            }
        }

        if metrics.is_empty() && children.is_empty() {
            return Ok(None);
        }

        Ok(Some(CheckpointFile {
            from,
            to,
            metrics,
            children,
        }))
    }

    /// Load all checkpoints that can contain samples newer than `from`.
    /// Must run before the first read or write. Returns the number of
    /// files loaded.
    pub fn from_checkpoint(&self, dir: &Path, from: i64) -> Result<usize> {
        if !dir.exists() {
            std::fs::create_dir_all(dir)?;
            return Ok(0);
        }

        let mut hosts: Vec<(String, String)> = Vec::new();
        for cluster_entry in std::fs::read_dir(dir)? {
            let cluster_entry = cluster_entry?;
            if !cluster_entry.file_type()?.is_dir() {
                return Err(StoreError::decode(
                    "expected only directories at the first level of the checkpoint directory",
                ));
            }
            let cluster = cluster_entry.file_name().to_string_lossy().into_owned();

            for host_entry in std::fs::read_dir(cluster_entry.path())? {
                let host_entry = host_entry?;
                if !host_entry.file_type()?.is_dir() {
                    return Err(StoreError::decode(
                        "expected only directories at the second level of the checkpoint directory",
                    ));
                }
                hosts.push((
                    cluster.clone(),
                    host_entry.file_name().to_string_lossy().into_owned(),
                ));
            }
        }

        let loaded = AtomicUsize::new(0);
        let first_error: Mutex<Option<StoreError>> = Mutex::new(None);

        std::thread::scope(|s| {
            let (tx, rx) = channel::bounded::<(String, String)>(num_workers());
            for _ in 0..num_workers() {
                let rx = rx.clone();
                let loaded = &loaded;
                let first_error = &first_error;
                s.spawn(move || {
                    for (cluster, host) in rx.iter() {
                        let level = self
                            .root
                            .find_level_or_create(&[&cluster, &host], self.num_metrics());
                        match self.level_from_checkpoint(
                            &level,
                            &dir.join(&cluster).join(&host),
                            from,
                        ) {
                            Ok(n) => {
                                loaded.fetch_add(n, Ordering::Relaxed);
                            },
                            Err(err) => {
                                tracing::error!(
                                    "error while loading checkpoints for {}/{}: {}",
                                    cluster,
                                    host,
                                    err
                                );
                                let mut guard = first_error.lock();
                                if guard.is_none() {
                                    *guard = Some(err);
                                }
                            },
                        }
                    }
                });
            }
            drop(rx);

            for host in hosts {
                if tx.send(host).is_err() {
                    break;
                }
            }
        });

        if let Some(err) = first_error.into_inner() {
            return Err(err);
        }
        Ok(loaded.load(Ordering::Relaxed))
    }

    fn level_from_checkpoint(&self, level: &Arc<Level>, dir: &Path, from: i64) -> Result<usize> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };

        let mut files: Vec<(String, i64)> = Vec::new();
        let mut loaded = 0;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();

            if entry.file_type()?.is_dir() {
                let child = level.find_level_or_create(&[&name], self.num_metrics());
                loaded += self.level_from_checkpoint(&child, &entry.path(), from)?;
                continue;
            }

            let (stem, ext) = name
                .rsplit_once('.')
                .ok_or_else(|| StoreError::decode(format!("unexpected file: {name}")))?;
            if FileFormat::from_extension(ext).is_none() {
                return Err(StoreError::decode(format!("unexpected file: {name}")));
            }
            let ts: i64 = stem
                .parse()
                .map_err(|_| StoreError::decode(format!("non-numeric checkpoint file: {name}")))?;
            files.push((name, ts));
        }

        for name in select_restore_files(files, from) {
            let path = dir.join(&name);
            let format = path
                .extension()
                .and_then(|e| e.to_str())
                .and_then(FileFormat::from_extension)
                .expect("only known extensions are collected");

            let file = File::open(&path)?;
            let cf: CheckpointFile = match format {
                FileFormat::Json => serde_json::from_reader(BufReader::new(file))?,
                FileFormat::Bincode => bincode::deserialize_from(BufReader::new(file))?,
            };

            // The file preceding the wanted window may end before it.
            if cf.to != 0 && cf.to < from {
                continue;
            }

            self.load_checkpoint_file(level, cf)?;
            loaded += 1;
        }

        Ok(loaded)
    }

    fn load_checkpoint_file(&self, level: &Arc<Level>, cf: CheckpointFile) -> Result<()> {
        {
            let mut inner = level.inner.write();
            for (name, metric) in cf.metrics {
                let Some(config) = self.metrics.get(&name) else {
                    continue;
                };

                let buffer = Buffer::frozen(metric.start, metric.frequency, metric.data);
                match &mut inner.metrics[config.offset] {
                    Some(chain) => chain.append_frozen(buffer)?,
                    slot => *slot = Some(BufferChain::from_frozen(buffer)),
                }
            }
        }

        for (name, child_cf) in cf.children {
            let child = level.find_level_or_create(&[&name], self.num_metrics());
            self.load_checkpoint_file(&child, child_cf)?;
        }
        Ok(())
    }
}

fn mark_archived(level: &Arc<Level>, from: i64, to: i64) {
    let children: Vec<Arc<Level>>;
    {
        let mut inner = level.inner.write();
        for chain in inner.metrics.iter_mut().flatten() {
            chain.mark_archived(from, to);
        }
        children = inner.children.values().cloned().collect();
    }

    for child in children {
        mark_archived(&child, from, to);
    }
}

/// Files worth loading for a restore from `from`: every stamp at or
/// after it, plus the single most recent older file, whose window may
/// extend into the wanted range.
pub(crate) fn select_restore_files(mut files: Vec<(String, i64)>, from: i64) -> Vec<String> {
    files.sort_by_key(|(_, ts)| *ts);

    let mut newest_older = None;
    let mut selected = Vec::new();
    for (name, ts) in files {
        if ts >= from {
            selected.push(name);
        } else {
            newest_older = Some(name);
        }
    }

    if let Some(name) = newest_older {
        selected.insert(0, name);
    }
    selected
}

/// Files safe to archive at `cutoff`: a checkpoint stamped t covers up
/// to its successor's stamp, so a file is only old once its successor
/// is older than the cutoff. The newest file always stays.
pub(crate) fn select_archive_files(mut files: Vec<(String, i64)>, cutoff: i64) -> Vec<String> {
    files.sort_by_key(|(_, ts)| *ts);

    let mut selected = Vec::new();
    for i in 0..files.len().saturating_sub(1) {
        if files[i + 1].1 < cutoff {
            selected.push(files[i].0.clone());
        }
    }
    selected
}
