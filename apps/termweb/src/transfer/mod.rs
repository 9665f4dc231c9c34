//! File transfer engine.
//!
//! [`TransferManager`] owns every live [`TransferSession`], decodes client
//! frames, and produces the server frames to send back. One WebSocket owns
//! a session; frames within it are handled strictly in order, and resume
//! state is checkpointed only between frames.

pub mod delta;
pub mod error;
pub mod glob;
pub mod scan;
pub mod session;
pub mod wire;

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use tracing::{debug, warn};

pub use error::TransferError;
pub use scan::FileEntry;
pub use session::{SessionState, TransferSession};
pub use wire::{ClientFrame, Direction, ServerFrame, TransferFlags};

use session::{CHUNK_SIZE, MAX_BATCH_FILES, SMALL_FILE_LIMIT};
use wire::DryRunAction;

pub struct TransferManager {
    state_dir: PathBuf,
    next_id: u32,
    sessions: HashMap<u32, TransferSession>,
}

impl TransferManager {
    pub fn new(state_dir: PathBuf) -> Self {
        Self {
            state_dir,
            next_id: 1,
            sessions: HashMap::new(),
        }
    }

    /// Decodes and dispatches one client frame. Malformed input and
    /// per-frame failures come back as TRANSFER_ERROR; the session stays
    /// alive so the client can retry.
    pub fn handle_frame(&mut self, bytes: &[u8]) -> Vec<ServerFrame> {
        let frame = match wire::decode_client_frame(bytes) {
            Ok(frame) => frame,
            Err(err) => {
                return vec![ServerFrame::TransferError {
                    transfer_id: 0,
                    message: err.to_string(),
                }];
            }
        };
        let transfer_id = frame_transfer_id(&frame);
        match self.dispatch(frame) {
            Ok(frames) => frames,
            Err(err) => {
                warn!(transfer_id, error = %err, "transfer frame failed");
                vec![ServerFrame::TransferError {
                    transfer_id,
                    message: err.to_string(),
                }]
            }
        }
    }

    /// True when a download session still has chunks to push.
    pub fn has_pending(&self, transfer_id: u32) -> bool {
        self.sessions
            .get(&transfer_id)
            .map(|session| {
                session.direction == Direction::Download
                    && session.state == SessionState::Streaming
            })
            .unwrap_or(false)
    }

    pub fn session_ids(&self) -> Vec<u32> {
        self.sessions.keys().copied().collect()
    }

    fn dispatch(&mut self, frame: ClientFrame) -> Result<Vec<ServerFrame>, TransferError> {
        match frame {
            ClientFrame::TransferInit {
                direction,
                flags,
                base_path,
                excludes,
            } => {
                let id = self.next_id;
                self.next_id += 1;
                let mut session = TransferSession::new(
                    id,
                    direction,
                    flags,
                    PathBuf::from(base_path),
                    excludes,
                )?;
                if direction == Direction::Download {
                    session.build_file_list()?;
                }
                self.sessions.insert(id, session);
                Ok(vec![ServerFrame::TransferReady {
                    transfer_id: id,
                    resume_file: 0,
                    resume_offset: 0,
                }])
            }
            ClientFrame::FileListRequest { transfer_id } => {
                let session = self.session_mut(transfer_id)?;
                if session.files.is_empty() && session.direction == Direction::Download {
                    session.build_file_list()?;
                }
                let list = ServerFrame::FileList {
                    transfer_id,
                    total_bytes: session.total_bytes,
                    entries: session.files.clone(),
                };
                if session.direction == Direction::Download {
                    if session.flags.dry_run {
                        let entries = session
                            .files
                            .iter()
                            .filter(|entry| !entry.is_dir)
                            .map(|entry| (DryRunAction::Send, entry.path.clone()))
                            .collect();
                        return Ok(vec![
                            list,
                            ServerFrame::DryRunReport {
                                transfer_id,
                                entries,
                            },
                        ]);
                    }
                    session.state = SessionState::Streaming;
                    session.cursor_file = 0;
                    session.cursor_offset = 0;
                }
                Ok(vec![list])
            }
            ClientFrame::FileManifest {
                transfer_id,
                total_bytes,
                entries,
            } => {
                let session = self.session_mut(transfer_id)?;
                if session.direction != Direction::Upload {
                    return Err(TransferError::InvalidState(
                        "manifest on a download session",
                    ));
                }
                session.install_manifest(entries, total_bytes);
                Ok(Vec::new())
            }
            ClientFrame::FileData {
                transfer_id,
                file_index,
                offset,
                uncompressed_len,
                payload,
            } => {
                let state_dir = self.state_dir.clone();
                let session = self.session_mut(transfer_id)?;
                let data = session.decompress(&payload, uncompressed_len as usize)?;
                if session.flags.dry_run {
                    // Nothing touches the disk; the cursor still advances so
                    // the report covers the whole manifest.
                    session.entry(file_index)?;
                    session.cursor_file = file_index;
                    session.cursor_offset = offset + data.len() as u64;
                    session.bytes_transferred += data.len() as u64;
                } else {
                    session.write_file_chunk(file_index, offset, &data)?;
                }
                if let Err(err) = session.save_state(&state_dir) {
                    debug!(transfer_id, error = %err, "checkpoint write failed");
                }
                let mut frames = vec![ServerFrame::FileAck {
                    transfer_id,
                    file_index,
                    offset: offset + data.len() as u64,
                }];
                if session.bytes_transferred >= session.total_bytes {
                    frames.extend(self.finish_upload(transfer_id)?);
                }
                Ok(frames)
            }
            ClientFrame::TransferResume { transfer_id } => {
                let mut session = TransferSession::load_state(&self.state_dir, transfer_id)?;
                let ready = ServerFrame::TransferReady {
                    transfer_id,
                    resume_file: session.cursor_file,
                    resume_offset: session.cursor_offset,
                };
                // Downloads pick the pump back up at the restored cursor;
                // uploads stay suspended until the next FILE_DATA.
                if session.direction == Direction::Download {
                    session.state = SessionState::Streaming;
                }
                self.sessions.insert(transfer_id, session);
                Ok(vec![ready])
            }
            ClientFrame::TransferCancel { transfer_id } => {
                if let Some(mut session) = self.sessions.remove(&transfer_id) {
                    session.close_current_file();
                    session.state = SessionState::Aborted;
                    if let Err(err) = session.save_state(&self.state_dir) {
                        debug!(transfer_id, error = %err, "final checkpoint failed");
                    }
                }
                Ok(Vec::new())
            }
            ClientFrame::SyncRequest { transfer_id } => {
                let session = self.session_mut(transfer_id)?;
                if session.files.is_empty() {
                    session.build_file_list()?;
                }
                session.sync_pending = Some(
                    session
                        .files
                        .iter()
                        .filter(|entry| !entry.is_dir)
                        .count() as u32,
                );
                Ok(vec![ServerFrame::SyncFileList {
                    transfer_id,
                    total_bytes: session.total_bytes,
                    entries: session.files.clone(),
                }])
            }
            ClientFrame::BlockChecksums {
                transfer_id,
                file_index,
                block_size,
                checksums,
            } => {
                let session = self.session_mut(transfer_id)?;
                let size = session.entry(file_index)?.size;
                let data = session
                    .read_file_chunk(file_index, 0, size.min(u32::MAX as u64) as u32)?
                    .to_vec();
                session.close_current_file();
                let commands = delta::compute_delta(&data, &checksums, block_size);
                let payload = session.compress(&commands)?;
                Ok(vec![ServerFrame::DeltaData {
                    transfer_id,
                    file_index,
                    uncompressed_len: commands.len() as u32,
                    payload,
                }])
            }
            ClientFrame::SyncAck { transfer_id, .. } => {
                let session = self.session_mut(transfer_id)?;
                let remaining = match session.sync_pending {
                    Some(count) => count.saturating_sub(1),
                    None => return Err(TransferError::InvalidState("ack outside a sync")),
                };
                session.sync_pending = Some(remaining);
                if remaining == 0 {
                    session.sync_pending = None;
                    return Ok(vec![ServerFrame::SyncComplete { transfer_id }]);
                }
                Ok(Vec::new())
            }
        }
    }

    /// Produces the next outgoing download frame for a streaming session:
    /// a BATCH_DATA covering a run of small files, one large-file chunk,
    /// or the final TRANSFER_COMPLETE.
    pub fn next_outgoing(&mut self, transfer_id: u32) -> Option<ServerFrame> {
        let state_dir = self.state_dir.clone();
        let session = self.sessions.get_mut(&transfer_id)?;
        if session.direction != Direction::Download || session.state != SessionState::Streaming {
            return None;
        }

        loop {
            let index = session.cursor_file as usize;
            let Some(entry) = session.files.get(index).cloned() else {
                session.state = SessionState::Completed;
                session.close_current_file();
                session.remove_state(&state_dir);
                return Some(ServerFrame::TransferComplete { transfer_id });
            };

            if entry.is_dir {
                session.cursor_file += 1;
                continue;
            }

            let frame = if entry.size < SMALL_FILE_LIMIT && session.cursor_offset == 0 {
                batch_frame(session, transfer_id)
            } else {
                chunk_frame(session, transfer_id, &entry)
            };
            match frame {
                Ok(frame) => {
                    if let Err(err) = session.save_state(&state_dir) {
                        debug!(transfer_id, error = %err, "checkpoint write failed");
                    }
                    return Some(frame);
                }
                Err(err) => {
                    // Skip the entry and keep streaming; the client sees a
                    // frame-level error for the path.
                    warn!(transfer_id, path = %entry.path, error = %err, "skipping unreadable file");
                    session.cursor_file += 1;
                    session.cursor_offset = 0;
                    return Some(ServerFrame::TransferError {
                        transfer_id,
                        message: format!("{}: {err}", entry.path),
                    });
                }
            }
        }
    }

    fn finish_upload(&mut self, transfer_id: u32) -> Result<Vec<ServerFrame>, TransferError> {
        let state_dir = self.state_dir.clone();
        let session = self.session_mut(transfer_id)?;
        session.state = SessionState::Completed;
        session.close_current_file();

        let mut frames = Vec::new();
        if session.flags.delete_extra {
            let extras = extra_files(session)?;
            if session.flags.dry_run {
                frames.push(ServerFrame::DryRunReport {
                    transfer_id,
                    entries: extras
                        .into_iter()
                        .map(|path| (DryRunAction::Delete, path))
                        .collect(),
                });
            } else {
                for path in extras {
                    let absolute = session.base_path.join(&path);
                    if let Err(err) = fs::remove_file(&absolute) {
                        warn!(path = %absolute.display(), error = %err, "failed to delete extra file");
                    }
                }
            }
        }
        session.remove_state(&state_dir);
        frames.push(ServerFrame::TransferComplete { transfer_id });
        Ok(frames)
    }

    /// Detaches a session from a closing socket: checkpoint to disk,
    /// release the mapping, drop the in-memory record. TRANSFER_RESUME
    /// restores it.
    pub fn suspend(&mut self, transfer_id: u32) {
        if let Some(mut session) = self.sessions.remove(&transfer_id) {
            session.close_current_file();
            session.state = SessionState::Suspended;
            if let Err(err) = session.save_state(&self.state_dir) {
                debug!(transfer_id, error = %err, "suspend checkpoint failed");
            }
        }
    }

    fn session_mut(&mut self, transfer_id: u32) -> Result<&mut TransferSession, TransferError> {
        self.sessions
            .get_mut(&transfer_id)
            .ok_or(TransferError::UnknownTransfer(transfer_id))
    }
}

fn frame_transfer_id(frame: &ClientFrame) -> u32 {
    match frame {
        ClientFrame::TransferInit { .. } => 0,
        ClientFrame::FileListRequest { transfer_id }
        | ClientFrame::FileData { transfer_id, .. }
        | ClientFrame::TransferResume { transfer_id }
        | ClientFrame::TransferCancel { transfer_id }
        | ClientFrame::SyncRequest { transfer_id }
        | ClientFrame::BlockChecksums { transfer_id, .. }
        | ClientFrame::SyncAck { transfer_id, .. }
        | ClientFrame::FileManifest { transfer_id, .. } => *transfer_id,
    }
}

/// Packs a run of consecutive small files into one compressed payload:
/// `[file_count:u16]` then `[file_index:u32][size:u32][bytes]` per file.
fn batch_frame(
    session: &mut TransferSession,
    transfer_id: u32,
) -> Result<ServerFrame, TransferError> {
    let mut payload = Vec::new();
    let mut count: u16 = 0;
    payload.extend_from_slice(&0u16.to_le_bytes());

    while (count as usize) < MAX_BATCH_FILES {
        let index = session.cursor_file as usize;
        let Some(entry) = session.files.get(index).cloned() else {
            break;
        };
        if entry.is_dir {
            session.cursor_file += 1;
            continue;
        }
        if entry.size >= SMALL_FILE_LIMIT {
            break;
        }
        let bytes = session
            .read_file_chunk(session.cursor_file, 0, entry.size as u32)?
            .to_vec();
        payload.extend_from_slice(&(index as u32).to_le_bytes());
        payload.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        payload.extend_from_slice(&bytes);
        session.bytes_transferred += bytes.len() as u64;
        session.cursor_file += 1;
        count += 1;
    }
    session.close_current_file();
    payload[..2].copy_from_slice(&count.to_le_bytes());

    let compressed = session.compress(&payload)?;
    Ok(ServerFrame::BatchData {
        transfer_id,
        uncompressed_len: payload.len() as u32,
        payload: compressed,
    })
}

/// One 256 KiB chunk of a large file; advances the cursor and releases
/// the mapping once the file is fully sent.
fn chunk_frame(
    session: &mut TransferSession,
    transfer_id: u32,
    entry: &FileEntry,
) -> Result<ServerFrame, TransferError> {
    let offset = session.cursor_offset;
    let file_index = session.cursor_file;
    let chunk = session
        .read_file_chunk(file_index, offset, CHUNK_SIZE)?
        .to_vec();
    let compressed = session.compress(&chunk)?;

    session.cursor_offset += chunk.len() as u64;
    session.bytes_transferred += chunk.len() as u64;
    if session.cursor_offset >= entry.size {
        session.cursor_file += 1;
        session.cursor_offset = 0;
        session.close_current_file();
    }

    Ok(ServerFrame::FileRequest {
        transfer_id,
        file_index,
        offset,
        uncompressed_len: chunk.len() as u32,
        payload: compressed,
    })
}

/// Files on disk that the client's manifest does not mention.
fn extra_files(session: &TransferSession) -> Result<Vec<String>, TransferError> {
    let manifest: std::collections::HashSet<&str> = session
        .files
        .iter()
        .map(|entry| entry.path.as_str())
        .collect();
    let on_disk = scan::scan_directory(&session.base_path, &session.excludes)?;
    Ok(on_disk
        .into_iter()
        .filter(|entry| !entry.is_dir && !manifest.contains(entry.path.as_str()))
        .map(|entry| entry.path)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn init_download(manager: &mut TransferManager, base: &TempDir) -> u32 {
        init_download_flags(manager, base, TransferFlags::default())
    }

    fn init_download_flags(
        manager: &mut TransferManager,
        base: &TempDir,
        flags: TransferFlags,
    ) -> u32 {
        let frames = manager.handle_frame(&wire::encode_client_frame(&ClientFrame::TransferInit {
            direction: Direction::Download,
            flags,
            base_path: base.path().to_string_lossy().into_owned(),
            excludes: Vec::new(),
        }));
        match frames.as_slice() {
            [ServerFrame::TransferReady { transfer_id, .. }] => *transfer_id,
            other => panic!("unexpected init reply: {other:?}"),
        }
    }

    fn drain(manager: &mut TransferManager, id: u32) -> Vec<ServerFrame> {
        let mut frames = Vec::new();
        while let Some(frame) = manager.next_outgoing(id) {
            let done = matches!(frame, ServerFrame::TransferComplete { .. });
            frames.push(frame);
            if done {
                break;
            }
        }
        frames
    }

    #[test]
    fn download_streams_batches_and_chunks() {
        let base = TempDir::new().unwrap();
        std::fs::write(base.path().join("small-a.txt"), b"aaaa").unwrap();
        std::fs::write(base.path().join("small-b.txt"), b"bbbb").unwrap();
        std::fs::write(base.path().join("zz-large.bin"), vec![7u8; 300 * 1024]).unwrap();

        let state = TempDir::new().unwrap();
        let mut manager = TransferManager::new(state.path().to_path_buf());
        let id = init_download(&mut manager, &base);

        let frames = manager.handle_frame(&wire::encode_client_frame(
            &ClientFrame::FileListRequest { transfer_id: id },
        ));
        let entries = match &frames[0] {
            ServerFrame::FileList { entries, .. } => entries.clone(),
            other => panic!("expected file list, got {other:?}"),
        };
        assert_eq!(entries.len(), 3);

        let outgoing = drain(&mut manager, id);
        // One batch for the two small files, two chunks for the 300 KiB
        // file, then completion.
        assert!(matches!(outgoing[0], ServerFrame::BatchData { .. }));
        assert!(matches!(
            outgoing[1],
            ServerFrame::FileRequest {
                offset: 0,
                ..
            }
        ));
        assert!(matches!(
            outgoing[2],
            ServerFrame::FileRequest {
                offset: 262_144,
                ..
            }
        ));
        assert!(matches!(outgoing[3], ServerFrame::TransferComplete { .. }));
        assert_eq!(outgoing.len(), 4);
        assert!(manager.next_outgoing(id).is_none());
    }

    #[test]
    fn batch_payload_reconstructs_small_files() {
        let base = TempDir::new().unwrap();
        std::fs::write(base.path().join("x"), b"xx").unwrap();
        std::fs::write(base.path().join("y"), b"yyy").unwrap();

        let state = TempDir::new().unwrap();
        let mut manager = TransferManager::new(state.path().to_path_buf());
        let id = init_download(&mut manager, &base);
        manager.handle_frame(&wire::encode_client_frame(&ClientFrame::FileListRequest {
            transfer_id: id,
        }));

        let frame = manager.next_outgoing(id).unwrap();
        let (uncompressed_len, payload) = match frame {
            ServerFrame::BatchData {
                uncompressed_len,
                payload,
                ..
            } => (uncompressed_len, payload),
            other => panic!("expected batch, got {other:?}"),
        };
        let raw = zstd::bulk::decompress(&payload, uncompressed_len as usize).unwrap();
        let count = u16::from_le_bytes(raw[..2].try_into().unwrap());
        assert_eq!(count, 2);
        // First record: index 0, size 2, "xx".
        assert_eq!(u32::from_le_bytes(raw[2..6].try_into().unwrap()), 0);
        assert_eq!(u32::from_le_bytes(raw[6..10].try_into().unwrap()), 2);
        assert_eq!(&raw[10..12], b"xx");
    }

    #[test]
    fn upload_writes_acks_and_completes() {
        let base = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();
        let mut manager = TransferManager::new(state.path().to_path_buf());

        let frames = manager.handle_frame(&wire::encode_client_frame(&ClientFrame::TransferInit {
            direction: Direction::Upload,
            flags: TransferFlags::default(),
            base_path: base.path().to_string_lossy().into_owned(),
            excludes: Vec::new(),
        }));
        let id = match frames.as_slice() {
            [ServerFrame::TransferReady { transfer_id, .. }] => *transfer_id,
            other => panic!("unexpected: {other:?}"),
        };

        manager.handle_frame(&wire::encode_client_frame(&ClientFrame::FileManifest {
            transfer_id: id,
            total_bytes: 6,
            entries: vec![FileEntry {
                path: "up.txt".into(),
                size: 6,
                mtime: 0,
                hash: 0,
                is_dir: false,
            }],
        }));

        let payload = zstd::bulk::compress(b"abcdef", session::ZSTD_LEVEL).unwrap();
        let frames = manager.handle_frame(&wire::encode_client_frame(&ClientFrame::FileData {
            transfer_id: id,
            file_index: 0,
            offset: 0,
            uncompressed_len: 6,
            payload,
        }));
        assert!(matches!(
            frames[0],
            ServerFrame::FileAck {
                file_index: 0,
                offset: 6,
                ..
            }
        ));
        assert!(matches!(frames[1], ServerFrame::TransferComplete { .. }));
        assert_eq!(std::fs::read(base.path().join("up.txt")).unwrap(), b"abcdef");
    }

    #[test]
    fn resume_restores_cursor_and_rejects_unknown_id() {
        let base = TempDir::new().unwrap();
        std::fs::write(base.path().join("file.bin"), vec![1u8; 400 * 1024]).unwrap();
        let state = TempDir::new().unwrap();

        let (id, state_dir) = {
            let mut manager = TransferManager::new(state.path().to_path_buf());
            let id = init_download(&mut manager, &base);
            manager.handle_frame(&wire::encode_client_frame(&ClientFrame::FileListRequest {
                transfer_id: id,
            }));
            // One chunk out, then the process "dies".
            manager.next_outgoing(id).unwrap();
            (id, state.path().to_path_buf())
        };

        let mut manager = TransferManager::new(state_dir);
        let frames = manager.handle_frame(&wire::encode_client_frame(
            &ClientFrame::TransferResume { transfer_id: id },
        ));
        match frames.as_slice() {
            [ServerFrame::TransferReady {
                resume_offset,
                ..
            }] => assert_eq!(*resume_offset, 262_144),
            other => panic!("unexpected resume reply: {other:?}"),
        }

        let frames = manager.handle_frame(&wire::encode_client_frame(
            &ClientFrame::TransferResume { transfer_id: 999 },
        ));
        assert!(matches!(frames[0], ServerFrame::TransferError { .. }));
    }

    #[test]
    fn resumed_download_streams_from_the_saved_offset() {
        let base = TempDir::new().unwrap();
        std::fs::write(base.path().join("file.bin"), vec![1u8; 400 * 1024]).unwrap();
        let state = TempDir::new().unwrap();

        let id = {
            let mut manager = TransferManager::new(state.path().to_path_buf());
            let id = init_download(&mut manager, &base);
            manager.handle_frame(&wire::encode_client_frame(&ClientFrame::FileListRequest {
                transfer_id: id,
            }));
            // One chunk goes out before the socket dies.
            manager.next_outgoing(id).unwrap();
            id
        };

        let mut manager = TransferManager::new(state.path().to_path_buf());
        manager.handle_frame(&wire::encode_client_frame(&ClientFrame::TransferResume {
            transfer_id: id,
        }));
        assert!(manager.has_pending(id), "restored download must keep streaming");

        let frames = drain(&mut manager, id);
        match &frames[0] {
            ServerFrame::FileRequest {
                offset,
                uncompressed_len,
                ..
            } => {
                assert_eq!(*offset, 262_144, "first chunk starts at the resumed offset");
                assert_eq!(*uncompressed_len, 400 * 1024 - 262_144);
            }
            other => panic!("expected a chunk at the resumed offset, got {other:?}"),
        }
        assert!(matches!(
            frames.last(),
            Some(ServerFrame::TransferComplete { .. })
        ));
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn cancel_drops_the_session() {
        let base = TempDir::new().unwrap();
        std::fs::write(base.path().join("f"), b"data").unwrap();
        let state = TempDir::new().unwrap();
        let mut manager = TransferManager::new(state.path().to_path_buf());
        let id = init_download(&mut manager, &base);

        manager.handle_frame(&wire::encode_client_frame(&ClientFrame::TransferCancel {
            transfer_id: id,
        }));
        assert!(manager.session_ids().is_empty());
        let frames = manager.handle_frame(&wire::encode_client_frame(
            &ClientFrame::FileListRequest { transfer_id: id },
        ));
        assert!(matches!(frames[0], ServerFrame::TransferError { .. }));
    }

    #[test]
    fn sync_delta_round_trips() {
        let base = TempDir::new().unwrap();
        let server_bytes: Vec<u8> = (0u32..50_000).map(|v| (v % 251) as u8).collect();
        std::fs::write(base.path().join("doc.bin"), &server_bytes).unwrap();
        let state = TempDir::new().unwrap();
        let mut manager = TransferManager::new(state.path().to_path_buf());
        let id = init_download(&mut manager, &base);

        let frames = manager.handle_frame(&wire::encode_client_frame(&ClientFrame::SyncRequest {
            transfer_id: id,
        }));
        assert!(matches!(frames[0], ServerFrame::SyncFileList { .. }));

        // Client's stale copy differs in the middle.
        let mut client_bytes = server_bytes.clone();
        client_bytes[25_000] ^= 0xFF;
        let block_size = delta::block_size_for(client_bytes.len() as u64);
        let checksums = delta::compute_checksums(&client_bytes, block_size);

        let frames = manager.handle_frame(&wire::encode_client_frame(
            &ClientFrame::BlockChecksums {
                transfer_id: id,
                file_index: 0,
                block_size,
                checksums,
            },
        ));
        let (uncompressed_len, payload) = match &frames[0] {
            ServerFrame::DeltaData {
                uncompressed_len,
                payload,
                ..
            } => (*uncompressed_len, payload.clone()),
            other => panic!("expected delta, got {other:?}"),
        };
        let commands = zstd::bulk::decompress(&payload, uncompressed_len as usize).unwrap();
        let rebuilt = delta::apply_delta(&commands, &client_bytes).unwrap();
        assert_eq!(rebuilt, server_bytes);

        let frames = manager.handle_frame(&wire::encode_client_frame(&ClientFrame::SyncAck {
            transfer_id: id,
            file_index: 0,
        }));
        assert!(matches!(frames[0], ServerFrame::SyncComplete { .. }));
    }

    #[test]
    fn dry_run_reports_instead_of_streaming() {
        let base = TempDir::new().unwrap();
        std::fs::write(base.path().join("a"), b"1").unwrap();
        let state = TempDir::new().unwrap();
        let mut manager = TransferManager::new(state.path().to_path_buf());
        let id = init_download_flags(
            &mut manager,
            &base,
            TransferFlags {
                delete_extra: false,
                dry_run: true,
            },
        );

        let frames = manager.handle_frame(&wire::encode_client_frame(
            &ClientFrame::FileListRequest { transfer_id: id },
        ));
        assert!(matches!(frames[0], ServerFrame::FileList { .. }));
        match &frames[1] {
            ServerFrame::DryRunReport { entries, .. } => {
                assert_eq!(entries, &[(DryRunAction::Send, "a".to_string())]);
            }
            other => panic!("expected dry run report, got {other:?}"),
        }
        assert!(manager.next_outgoing(id).is_none());
    }

    #[test]
    fn delete_extra_removes_unlisted_files() {
        let base = TempDir::new().unwrap();
        std::fs::write(base.path().join("stale.txt"), b"old").unwrap();
        let state = TempDir::new().unwrap();
        let mut manager = TransferManager::new(state.path().to_path_buf());

        let frames = manager.handle_frame(&wire::encode_client_frame(&ClientFrame::TransferInit {
            direction: Direction::Upload,
            flags: TransferFlags {
                delete_extra: true,
                dry_run: false,
            },
            base_path: base.path().to_string_lossy().into_owned(),
            excludes: Vec::new(),
        }));
        let id = match frames.as_slice() {
            [ServerFrame::TransferReady { transfer_id, .. }] => *transfer_id,
            other => panic!("unexpected: {other:?}"),
        };
        manager.handle_frame(&wire::encode_client_frame(&ClientFrame::FileManifest {
            transfer_id: id,
            total_bytes: 3,
            entries: vec![FileEntry {
                path: "fresh.txt".into(),
                size: 3,
                mtime: 0,
                hash: 0,
                is_dir: false,
            }],
        }));
        let payload = zstd::bulk::compress(b"new", session::ZSTD_LEVEL).unwrap();
        manager.handle_frame(&wire::encode_client_frame(&ClientFrame::FileData {
            transfer_id: id,
            file_index: 0,
            offset: 0,
            uncompressed_len: 3,
            payload,
        }));

        assert!(base.path().join("fresh.txt").exists());
        assert!(!base.path().join("stale.txt").exists());
    }

    #[test]
    fn malformed_frame_keeps_session_alive() {
        let base = TempDir::new().unwrap();
        std::fs::write(base.path().join("f"), b"data").unwrap();
        let state = TempDir::new().unwrap();
        let mut manager = TransferManager::new(state.path().to_path_buf());
        let id = init_download(&mut manager, &base);

        let frames = manager.handle_frame(&[0xFF, 0x00]);
        assert!(matches!(frames[0], ServerFrame::TransferError { .. }));

        // The session still answers.
        let frames = manager.handle_frame(&wire::encode_client_frame(
            &ClientFrame::FileListRequest { transfer_id: id },
        ));
        assert!(matches!(frames[0], ServerFrame::FileList { .. }));
    }
}
