//! Directory scan and content hashing.
//!
//! The walk emits entries with zero hashes; hashing happens afterwards in
//! one batch so the worker pool sees every file at once. Files are
//! memory-mapped with sequential-access advice and hashed with XXH3-64.
//! Unreadable files keep hash 0 and the transfer continues.

use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;
use twox_hash::XxHash3_64;

use crate::transfer::error::TransferError;
use crate::transfer::glob;

/// Hashing workers are capped regardless of core count.
const MAX_HASH_WORKERS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Relative to the transfer base, forward slashes on every platform.
    pub path: String,
    pub size: u64,
    pub mtime: u64,
    pub hash: u64,
    pub is_dir: bool,
}

/// Walks `base` and returns entries in a stable order: each directory's
/// children sorted by name, directories emitted before their contents.
/// Symlinks are not followed.
pub fn scan_directory(base: &Path, excludes: &[String]) -> Result<Vec<FileEntry>, TransferError> {
    let mut entries = Vec::new();
    walk(base, base, excludes, &mut entries)?;
    hash_entries(base, &mut entries);
    Ok(entries)
}

fn walk(
    base: &Path,
    dir: &Path,
    excludes: &[String],
    out: &mut Vec<FileEntry>,
) -> Result<(), TransferError> {
    let mut children: Vec<_> = match fs::read_dir(dir) {
        Ok(iter) => iter.filter_map(|entry| entry.ok()).collect(),
        Err(err) => {
            // Unreadable directories are skipped, not fatal, except the base.
            if dir == base {
                return Err(err.into());
            }
            debug!(dir = %dir.display(), error = %err, "skipping unreadable directory");
            return Ok(());
        }
    };
    children.sort_by_key(|entry| entry.file_name());

    for child in children {
        let file_type = match child.file_type() {
            Ok(file_type) => file_type,
            Err(_) => continue,
        };
        if file_type.is_symlink() {
            continue;
        }
        let path = child.path();
        let relative = relative_path(base, &path);
        if glob::excluded(excludes, &relative) {
            continue;
        }

        if file_type.is_dir() {
            out.push(FileEntry {
                path: relative,
                size: 0,
                mtime: mtime_of(&path),
                hash: 0,
                is_dir: true,
            });
            walk(base, &path, excludes, out)?;
        } else {
            let (size, mtime) = match child.metadata() {
                Ok(meta) => (meta.len(), unix_secs(&meta)),
                Err(_) => continue,
            };
            out.push(FileEntry {
                path: relative,
                size,
                mtime,
                hash: 0,
                is_dir: false,
            });
        }
    }
    Ok(())
}

/// Batch-hashes every non-directory entry on a bounded worker pool.
fn hash_entries(base: &Path, entries: &mut [FileEntry]) {
    let workers = MAX_HASH_WORKERS.min(entries.len().max(1));
    let pool = match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
        Ok(pool) => pool,
        Err(err) => {
            debug!(error = %err, "hash pool unavailable, hashing sequentially");
            for entry in entries.iter_mut().filter(|entry| !entry.is_dir) {
                entry.hash = hash_file(&base.join(&entry.path)).unwrap_or(0);
            }
            return;
        }
    };

    pool.install(|| {
        entries
            .par_iter_mut()
            .filter(|entry| !entry.is_dir)
            .for_each(|entry| {
                entry.hash = hash_file(&base.join(&entry.path)).unwrap_or(0);
            });
    });
}

/// XXH3-64 of a file's contents via a sequential-advised mapping.
pub fn hash_file(path: &Path) -> std::io::Result<u64> {
    let file = fs::File::open(path)?;
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(XxHash3_64::oneshot(&[]));
    }
    let mmap = unsafe { memmap2::Mmap::map(&file)? };
    #[cfg(unix)]
    let _ = mmap.advise(memmap2::Advice::Sequential);
    Ok(XxHash3_64::oneshot(&mmap))
}

pub fn hash_bytes(data: &[u8]) -> u64 {
    XxHash3_64::oneshot(data)
}

fn relative_path(base: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(base).unwrap_or(path);
    let mut out = String::new();
    for component in relative.components() {
        if !out.is_empty() {
            out.push('/');
        }
        out.push_str(&component.as_os_str().to_string_lossy());
    }
    out
}

fn mtime_of(path: &Path) -> u64 {
    fs::metadata(path).map(|meta| unix_secs(&meta)).unwrap_or(0)
}

fn unix_secs(meta: &fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}
