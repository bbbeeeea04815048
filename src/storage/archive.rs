//! Long-term archiving of old checkpoint files.
//!
//! Checkpoint files whose whole window lies before a cutoff are packed
//! per (cluster, host) into `<archive>/<cluster>/<host>/<cutoff>.tar.gz`
//! with their names and bytes preserved, then deleted from the
//! checkpoint directory. Alternatively they are just deleted.

use crate::core::{Result, StoreError};
use crate::storage::checkpoint::{num_workers, select_archive_files, FileFormat};
use crossbeam::channel;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Archive (or, with `delete_only`, just remove) all checkpoint files
/// strictly older than `cutoff`. Returns the number of files handled;
/// per-host errors are counted and never stop the other hosts.
pub fn archive_checkpoints(
    checkpoints_dir: &Path,
    archive_dir: &Path,
    cutoff: i64,
    delete_only: bool,
) -> Result<usize> {
    let mut hosts: Vec<(PathBuf, PathBuf)> = Vec::new();
    for cluster_entry in std::fs::read_dir(checkpoints_dir)? {
        let cluster_entry = cluster_entry?;
        for host_entry in std::fs::read_dir(cluster_entry.path())? {
            let host_entry = host_entry?;
            let cluster = cluster_entry.file_name();
            let host = host_entry.file_name();
            hosts.push((
                host_entry.path(),
                archive_dir.join(&cluster).join(&host),
            ));
        }
    }

    let files = AtomicUsize::new(0);
    let errors = AtomicUsize::new(0);

    std::thread::scope(|s| {
        let (tx, rx) = channel::bounded::<(PathBuf, PathBuf)>(num_workers());
        for _ in 0..num_workers() {
            let rx = rx.clone();
            let files = &files;
            let errors = &errors;
            s.spawn(move || {
                for (host_dir, host_archive_dir) in rx.iter() {
                    match archive_host(&host_dir, &host_archive_dir, cutoff, delete_only) {
                        Ok(n) => {
                            files.fetch_add(n, Ordering::Relaxed);
                        },
                        Err(err) => {
                            tracing::warn!(
                                "error while archiving {}: {}",
                                host_dir.display(),
                                err
                            );
                            errors.fetch_add(1, Ordering::Relaxed);
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

    let files = files.load(Ordering::Relaxed);
    let errors = errors.load(Ordering::Relaxed);
    if errors > 0 {
        return Err(StoreError::PartialArchive { errors, files });
    }
    Ok(files)
}

fn archive_host(dir: &Path, archive_dir: &Path, cutoff: i64, delete_only: bool) -> Result<usize> {
    let mut files: Vec<(String, i64)> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
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

    let selected = select_archive_files(files, cutoff);
    if selected.is_empty() {
        return Ok(0);
    }

    if delete_only {
        for name in &selected {
            std::fs::remove_file(dir.join(name))?;
        }
        return Ok(selected.len());
    }

    std::fs::create_dir_all(archive_dir)?;
    let out = File::create(archive_dir.join(format!("{cutoff}.tar.gz")))?;
    let encoder = GzEncoder::new(BufWriter::new(out), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for name in &selected {
        builder.append_path_with_name(dir.join(name), name)?;
    }

    let mut writer = builder.into_inner()?.finish()?;
    writer.flush()?;

    // Only delete the originals once the archive is on disk.
    for name in &selected {
        std::fs::remove_file(dir.join(name))?;
    }

    Ok(selected.len())
}
