//! Stateful transfer lifecycle.
//!
//! A session owns the scanned file list, a cursor into it, the zstd
//! contexts, and at most one live file mapping. It checkpoints itself to
//! `<state_dir>/<id>.state` between frames so an interrupted transfer can
//! resume where it left off.

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write as _};
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use tracing::debug;

use crate::transfer::error::TransferError;
use crate::transfer::scan::{self, FileEntry};
use crate::transfer::wire::{Cursor, Direction, TransferFlags};

pub const ZSTD_LEVEL: i32 = 3;
/// Files under this size are grouped into BATCH_DATA messages.
pub const SMALL_FILE_LIMIT: u64 = 16 * 1024;
/// Streaming chunk size for large files.
pub const CHUNK_SIZE: u32 = 256 * 1024;
/// Cap on files per batch so the u16 count never saturates.
pub const MAX_BATCH_FILES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active,
    Streaming,
    Completed,
    Aborted,
    Suspended,
}

struct MappedFile {
    index: u32,
    mmap: Mmap,
}

pub struct TransferSession {
    pub id: u32,
    pub direction: Direction,
    pub flags: TransferFlags,
    pub base_path: PathBuf,
    pub excludes: Vec<String>,
    pub files: Vec<FileEntry>,
    pub total_bytes: u64,
    pub cursor_file: u32,
    pub cursor_offset: u64,
    pub bytes_transferred: u64,
    pub state: SessionState,
    /// Outstanding sync files awaiting SYNC_ACK; None until a sync starts.
    pub sync_pending: Option<u32>,
    compressor: zstd::bulk::Compressor<'static>,
    decompressor: zstd::bulk::Decompressor<'static>,
    current: Option<MappedFile>,
}

impl TransferSession {
    pub fn new(
        id: u32,
        direction: Direction,
        flags: TransferFlags,
        base_path: PathBuf,
        excludes: Vec<String>,
    ) -> Result<Self, TransferError> {
        Ok(Self {
            id,
            direction,
            flags,
            base_path,
            excludes,
            files: Vec::new(),
            total_bytes: 0,
            cursor_file: 0,
            cursor_offset: 0,
            bytes_transferred: 0,
            state: SessionState::Idle,
            sync_pending: None,
            compressor: new_compressor()?,
            decompressor: new_decompressor()?,
            current: None,
        })
    }

    /// Synchronous scan + hash of the base directory.
    pub fn build_file_list(&mut self) -> Result<(), TransferError> {
        self.files = scan::scan_directory(&self.base_path, &self.excludes)?;
        self.total_bytes = self
            .files
            .iter()
            .filter(|entry| !entry.is_dir)
            .map(|entry| entry.size)
            .sum();
        self.state = SessionState::Active;
        Ok(())
    }

    /// Installs a client-provided manifest (upload direction). Excluded
    /// paths are dropped here as well so the peer cannot bypass them.
    pub fn install_manifest(&mut self, entries: Vec<FileEntry>, total_bytes: u64) {
        self.files = entries
            .into_iter()
            .filter(|entry| !crate::transfer::glob::excluded(&self.excludes, &entry.path))
            .collect();
        self.total_bytes = total_bytes;
        self.state = SessionState::Active;
    }

    pub fn entry(&self, file_index: u32) -> Result<&FileEntry, TransferError> {
        self.files
            .get(file_index as usize)
            .ok_or(TransferError::BadFileIndex(file_index))
    }

    fn absolute_path(&self, file_index: u32) -> Result<PathBuf, TransferError> {
        Ok(self.base_path.join(&self.entry(file_index)?.path))
    }

    /// Serves a slice of a file, mapping it on first access. The mapping
    /// stays live until another file is requested or the file is closed.
    pub fn read_file_chunk(
        &mut self,
        file_index: u32,
        offset: u64,
        max_size: u32,
    ) -> Result<&[u8], TransferError> {
        let len = self.entry(file_index)?.size;
        if offset > len {
            return Err(TransferError::BadOffset { offset, len });
        }

        let needs_remap = self
            .current
            .as_ref()
            .map(|mapped| mapped.index != file_index)
            .unwrap_or(true);
        if needs_remap {
            let path = self.absolute_path(file_index)?;
            let file = File::open(path)?;
            let mmap = unsafe { Mmap::map(&file)? };
            #[cfg(unix)]
            let _ = mmap.advise(memmap2::Advice::Sequential);
            self.current = Some(MappedFile {
                index: file_index,
                mmap,
            });
        }

        let mmap = &self.current.as_ref().expect("mapped above").mmap;
        let start = offset as usize;
        let end = (offset + max_size as u64).min(len) as usize;
        Ok(&mmap[start..end])
    }

    pub fn close_current_file(&mut self) {
        self.current = None;
    }

    /// Writes an uploaded chunk at its offset, creating parents on the
    /// first chunk of a file.
    pub fn write_file_chunk(
        &mut self,
        file_index: u32,
        offset: u64,
        data: &[u8],
    ) -> Result<(), TransferError> {
        let entry = self.entry(file_index)?.clone();
        let path = self.base_path.join(&entry.path);
        if entry.is_dir {
            fs::create_dir_all(&path)?;
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().write(true).create(true).open(&path)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;

        self.cursor_file = file_index;
        self.cursor_offset = offset + data.len() as u64;
        self.bytes_transferred += data.len() as u64;
        self.state = SessionState::Streaming;
        Ok(())
    }

    pub fn compress(&mut self, data: &[u8]) -> Result<Vec<u8>, TransferError> {
        self.compressor
            .compress(data)
            .map_err(|err| TransferError::Compression(err.to_string()))
    }

    pub fn decompress(
        &mut self,
        data: &[u8],
        expected_size: usize,
    ) -> Result<Vec<u8>, TransferError> {
        let out = self
            .decompressor
            .decompress(data, expected_size)
            .map_err(|err| TransferError::Compression(err.to_string()))?;
        if out.len() != expected_size {
            return Err(TransferError::Compression(format!(
                "expected {expected_size} bytes, got {}",
                out.len()
            )));
        }
        Ok(out)
    }

    // ---- resume state ----------------------------------------------------

    fn state_path(state_dir: &Path, id: u32) -> PathBuf {
        state_dir.join(format!("{id}.state"))
    }

    /// Binary checkpoint; written between frames, never mid-chunk.
    pub fn save_state(&self, state_dir: &Path) -> Result<(), TransferError> {
        fs::create_dir_all(state_dir)?;
        let mut buf = Vec::with_capacity(64 + self.files.len() * 64);
        buf.extend_from_slice(&self.id.to_le_bytes());
        buf.push(self.direction.as_u8());
        buf.push(self.flags.as_u8());
        buf.extend_from_slice(&self.cursor_file.to_le_bytes());
        buf.extend_from_slice(&self.cursor_offset.to_le_bytes());
        buf.extend_from_slice(&self.bytes_transferred.to_le_bytes());

        let base = self.base_path.to_string_lossy();
        buf.extend_from_slice(&(base.len() as u16).to_le_bytes());
        buf.extend_from_slice(base.as_bytes());

        buf.extend_from_slice(&(self.files.len() as u32).to_le_bytes());
        for entry in &self.files {
            buf.extend_from_slice(&(entry.path.len() as u16).to_le_bytes());
            buf.extend_from_slice(entry.path.as_bytes());
            buf.extend_from_slice(&entry.size.to_le_bytes());
            buf.extend_from_slice(&entry.mtime.to_le_bytes());
            buf.extend_from_slice(&entry.hash.to_le_bytes());
            buf.push(entry.is_dir as u8);
        }

        fs::write(Self::state_path(state_dir, self.id), buf)?;
        Ok(())
    }

    /// Restores a suspended session. The id embedded in the state file
    /// must match the requested id.
    pub fn load_state(state_dir: &Path, id: u32) -> Result<Self, TransferError> {
        let raw = fs::read(Self::state_path(state_dir, id))?;
        let mut cursor = Cursor::new(&raw);

        let stored_id = cursor.read_u32()?;
        if stored_id != id {
            return Err(TransferError::InvalidState("state file id mismatch"));
        }
        let direction = Direction::from_u8(cursor.read_u8()?)?;
        let flags = TransferFlags::from_u8(cursor.read_u8()?);
        let cursor_file = cursor.read_u32()?;
        let cursor_offset = cursor.read_u64()?;
        let bytes_transferred = cursor.read_u64()?;
        let base_path = PathBuf::from(cursor.read_str_u16()?);

        let count = cursor.read_u32()? as usize;
        let mut files = Vec::with_capacity(count.min(1 << 20));
        for _ in 0..count {
            files.push(FileEntry {
                path: cursor.read_str_u16()?,
                size: cursor.read_u64()?,
                mtime: cursor.read_u64()?,
                hash: cursor.read_u64()?,
                is_dir: cursor.read_u8()? != 0,
            });
        }

        let total_bytes = files
            .iter()
            .filter(|entry| !entry.is_dir)
            .map(|entry| entry.size)
            .sum();

        Ok(Self {
            id,
            direction,
            flags,
            base_path,
            excludes: Vec::new(),
            files,
            total_bytes,
            cursor_file,
            cursor_offset,
            bytes_transferred,
            state: SessionState::Suspended,
            sync_pending: None,
            compressor: new_compressor()?,
            decompressor: new_decompressor()?,
            current: None,
        })
    }

    pub fn remove_state(&self, state_dir: &Path) {
        let path = Self::state_path(state_dir, self.id);
        if let Err(err) = fs::remove_file(&path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                debug!(path = %path.display(), error = %err, "failed to remove state file");
            }
        }
    }
}

fn new_compressor() -> Result<zstd::bulk::Compressor<'static>, TransferError> {
    zstd::bulk::Compressor::new(ZSTD_LEVEL)
        .map_err(|err| TransferError::Compression(err.to_string()))
}

fn new_decompressor() -> Result<zstd::bulk::Decompressor<'static>, TransferError> {
    zstd::bulk::Decompressor::new().map_err(|err| TransferError::Compression(err.to_string()))
}
