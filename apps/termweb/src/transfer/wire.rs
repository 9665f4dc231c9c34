//! Binary framing for the transfer and sync protocols.
//!
//! Every frame is one WebSocket binary message: an opcode byte followed
//! by little-endian fields. Client opcodes live in 0x20–0x2F, server
//! opcodes in 0x30–0x3F. Lengths are explicit; decoding is strict and
//! never panics on truncated input.

use crate::transfer::delta::BlockChecksum;
use crate::transfer::scan::FileEntry;

pub const CLIENT_TRANSFER_INIT: u8 = 0x20;
pub const CLIENT_FILE_LIST_REQUEST: u8 = 0x21;
pub const CLIENT_FILE_DATA: u8 = 0x22;
pub const CLIENT_TRANSFER_RESUME: u8 = 0x23;
pub const CLIENT_TRANSFER_CANCEL: u8 = 0x24;
pub const CLIENT_SYNC_REQUEST: u8 = 0x25;
pub const CLIENT_BLOCK_CHECKSUMS: u8 = 0x26;
pub const CLIENT_SYNC_ACK: u8 = 0x27;
pub const CLIENT_FILE_MANIFEST: u8 = 0x28;

pub const SERVER_TRANSFER_READY: u8 = 0x30;
pub const SERVER_FILE_LIST: u8 = 0x31;
pub const SERVER_FILE_REQUEST: u8 = 0x32;
pub const SERVER_FILE_ACK: u8 = 0x33;
pub const SERVER_TRANSFER_COMPLETE: u8 = 0x34;
pub const SERVER_TRANSFER_ERROR: u8 = 0x35;
pub const SERVER_DRY_RUN_REPORT: u8 = 0x36;
pub const SERVER_BATCH_DATA: u8 = 0x37;
pub const SERVER_SYNC_FILE_LIST: u8 = 0x38;
pub const SERVER_DELTA_DATA: u8 = 0x39;
pub const SERVER_SYNC_COMPLETE: u8 = 0x3A;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
    #[error("unknown opcode: {0:#04x}")]
    UnknownOpcode(u8),
    #[error("unexpected end of frame")]
    UnexpectedEof,
    #[error("invalid frame data: {0}")]
    InvalidData(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

impl Direction {
    pub fn as_u8(self) -> u8 {
        match self {
            Direction::Upload => 0,
            Direction::Download => 1,
        }
    }

    pub fn from_u8(value: u8) -> Result<Self, WireError> {
        match value {
            0 => Ok(Direction::Upload),
            1 => Ok(Direction::Download),
            _ => Err(WireError::InvalidData("direction")),
        }
    }
}

pub const FLAG_DELETE_EXTRA: u8 = 0x01;
pub const FLAG_DRY_RUN: u8 = 0x02;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferFlags {
    pub delete_extra: bool,
    pub dry_run: bool,
}

impl TransferFlags {
    pub fn as_u8(self) -> u8 {
        let mut bits = 0;
        if self.delete_extra {
            bits |= FLAG_DELETE_EXTRA;
        }
        if self.dry_run {
            bits |= FLAG_DRY_RUN;
        }
        bits
    }

    pub fn from_u8(bits: u8) -> Self {
        Self {
            delete_extra: bits & FLAG_DELETE_EXTRA != 0,
            dry_run: bits & FLAG_DRY_RUN != 0,
        }
    }
}

/// What would change, per entry of a dry-run report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DryRunAction {
    Send,
    Delete,
}

impl DryRunAction {
    fn as_u8(self) -> u8 {
        match self {
            DryRunAction::Send => 0,
            DryRunAction::Delete => 1,
        }
    }

    fn from_u8(value: u8) -> Result<Self, WireError> {
        match value {
            0 => Ok(DryRunAction::Send),
            1 => Ok(DryRunAction::Delete),
            _ => Err(WireError::InvalidData("dry run action")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    TransferInit {
        direction: Direction,
        flags: TransferFlags,
        base_path: String,
        excludes: Vec<String>,
    },
    FileListRequest {
        transfer_id: u32,
    },
    FileData {
        transfer_id: u32,
        file_index: u32,
        offset: u64,
        uncompressed_len: u32,
        payload: Vec<u8>,
    },
    TransferResume {
        transfer_id: u32,
    },
    TransferCancel {
        transfer_id: u32,
    },
    SyncRequest {
        transfer_id: u32,
    },
    BlockChecksums {
        transfer_id: u32,
        file_index: u32,
        block_size: u32,
        checksums: Vec<BlockChecksum>,
    },
    SyncAck {
        transfer_id: u32,
        file_index: u32,
    },
    /// Upload direction only: the client announces the files it is about
    /// to send, in FILE_LIST entry layout.
    FileManifest {
        transfer_id: u32,
        total_bytes: u64,
        entries: Vec<FileEntry>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    TransferReady {
        transfer_id: u32,
        resume_file: u32,
        resume_offset: u64,
    },
    FileList {
        transfer_id: u32,
        total_bytes: u64,
        entries: Vec<FileEntry>,
    },
    FileRequest {
        transfer_id: u32,
        file_index: u32,
        offset: u64,
        uncompressed_len: u32,
        payload: Vec<u8>,
    },
    FileAck {
        transfer_id: u32,
        file_index: u32,
        offset: u64,
    },
    TransferComplete {
        transfer_id: u32,
    },
    TransferError {
        transfer_id: u32,
        message: String,
    },
    DryRunReport {
        transfer_id: u32,
        entries: Vec<(DryRunAction, String)>,
    },
    BatchData {
        transfer_id: u32,
        uncompressed_len: u32,
        payload: Vec<u8>,
    },
    SyncFileList {
        transfer_id: u32,
        total_bytes: u64,
        entries: Vec<FileEntry>,
    },
    DeltaData {
        transfer_id: u32,
        file_index: u32,
        uncompressed_len: u32,
        payload: Vec<u8>,
    },
    SyncComplete {
        transfer_id: u32,
    },
}

pub fn encode_client_frame(frame: &ClientFrame) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    match frame {
        ClientFrame::TransferInit {
            direction,
            flags,
            base_path,
            excludes,
        } => {
            buf.push(CLIENT_TRANSFER_INIT);
            buf.push(direction.as_u8());
            buf.push(flags.as_u8());
            buf.push(excludes.len() as u8);
            write_str_u16(&mut buf, base_path);
            for exclude in excludes {
                write_str_u8(&mut buf, exclude);
            }
        }
        ClientFrame::FileListRequest { transfer_id } => {
            buf.push(CLIENT_FILE_LIST_REQUEST);
            write_u32(&mut buf, *transfer_id);
        }
        ClientFrame::FileData {
            transfer_id,
            file_index,
            offset,
            uncompressed_len,
            payload,
        } => {
            buf.push(CLIENT_FILE_DATA);
            write_u32(&mut buf, *transfer_id);
            write_u32(&mut buf, *file_index);
            write_u64(&mut buf, *offset);
            write_u32(&mut buf, *uncompressed_len);
            buf.extend_from_slice(payload);
        }
        ClientFrame::TransferResume { transfer_id } => {
            buf.push(CLIENT_TRANSFER_RESUME);
            write_u32(&mut buf, *transfer_id);
        }
        ClientFrame::TransferCancel { transfer_id } => {
            buf.push(CLIENT_TRANSFER_CANCEL);
            write_u32(&mut buf, *transfer_id);
        }
        ClientFrame::SyncRequest { transfer_id } => {
            buf.push(CLIENT_SYNC_REQUEST);
            write_u32(&mut buf, *transfer_id);
        }
        ClientFrame::BlockChecksums {
            transfer_id,
            file_index,
            block_size,
            checksums,
        } => {
            buf.push(CLIENT_BLOCK_CHECKSUMS);
            write_u32(&mut buf, *transfer_id);
            write_u32(&mut buf, *file_index);
            write_u32(&mut buf, *block_size);
            write_u32(&mut buf, checksums.len() as u32);
            for checksum in checksums {
                write_u32(&mut buf, checksum.rolling);
                write_u64(&mut buf, checksum.strong);
            }
        }
        ClientFrame::SyncAck {
            transfer_id,
            file_index,
        } => {
            buf.push(CLIENT_SYNC_ACK);
            write_u32(&mut buf, *transfer_id);
            write_u32(&mut buf, *file_index);
        }
        ClientFrame::FileManifest {
            transfer_id,
            total_bytes,
            entries,
        } => {
            buf.push(CLIENT_FILE_MANIFEST);
            write_u32(&mut buf, *transfer_id);
            write_u32(&mut buf, entries.len() as u32);
            write_u64(&mut buf, *total_bytes);
            for entry in entries {
                write_entry(&mut buf, entry);
            }
        }
    }
    buf
}

pub fn decode_client_frame(bytes: &[u8]) -> Result<ClientFrame, WireError> {
    let mut cursor = Cursor::new(bytes);
    let opcode = cursor.read_u8()?;
    match opcode {
        CLIENT_TRANSFER_INIT => {
            let direction = Direction::from_u8(cursor.read_u8()?)?;
            let flags = TransferFlags::from_u8(cursor.read_u8()?);
            let exclude_count = cursor.read_u8()? as usize;
            let base_path = cursor.read_str_u16()?;
            let mut excludes = Vec::with_capacity(exclude_count);
            for _ in 0..exclude_count {
                excludes.push(cursor.read_str_u8()?);
            }
            Ok(ClientFrame::TransferInit {
                direction,
                flags,
                base_path,
                excludes,
            })
        }
        CLIENT_FILE_LIST_REQUEST => Ok(ClientFrame::FileListRequest {
            transfer_id: cursor.read_u32()?,
        }),
        CLIENT_FILE_DATA => Ok(ClientFrame::FileData {
            transfer_id: cursor.read_u32()?,
            file_index: cursor.read_u32()?,
            offset: cursor.read_u64()?,
            uncompressed_len: cursor.read_u32()?,
            payload: cursor.read_rest(),
        }),
        CLIENT_TRANSFER_RESUME => Ok(ClientFrame::TransferResume {
            transfer_id: cursor.read_u32()?,
        }),
        CLIENT_TRANSFER_CANCEL => Ok(ClientFrame::TransferCancel {
            transfer_id: cursor.read_u32()?,
        }),
        CLIENT_SYNC_REQUEST => Ok(ClientFrame::SyncRequest {
            transfer_id: cursor.read_u32()?,
        }),
        CLIENT_BLOCK_CHECKSUMS => {
            let transfer_id = cursor.read_u32()?;
            let file_index = cursor.read_u32()?;
            let block_size = cursor.read_u32()?;
            let count = cursor.read_u32()? as usize;
            let mut checksums = Vec::with_capacity(count.min(1 << 20));
            for _ in 0..count {
                checksums.push(BlockChecksum {
                    rolling: cursor.read_u32()?,
                    strong: cursor.read_u64()?,
                });
            }
            Ok(ClientFrame::BlockChecksums {
                transfer_id,
                file_index,
                block_size,
                checksums,
            })
        }
        CLIENT_SYNC_ACK => Ok(ClientFrame::SyncAck {
            transfer_id: cursor.read_u32()?,
            file_index: cursor.read_u32()?,
        }),
        CLIENT_FILE_MANIFEST => {
            let transfer_id = cursor.read_u32()?;
            let count = cursor.read_u32()? as usize;
            let total_bytes = cursor.read_u64()?;
            let mut entries = Vec::with_capacity(count.min(1 << 20));
            for _ in 0..count {
                entries.push(read_entry(&mut cursor)?);
            }
            Ok(ClientFrame::FileManifest {
                transfer_id,
                total_bytes,
                entries,
            })
        }
        other => Err(WireError::UnknownOpcode(other)),
    }
}

pub fn encode_server_frame(frame: &ServerFrame) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    match frame {
        ServerFrame::TransferReady {
            transfer_id,
            resume_file,
            resume_offset,
        } => {
            buf.push(SERVER_TRANSFER_READY);
            write_u32(&mut buf, *transfer_id);
            write_u32(&mut buf, *resume_file);
            write_u64(&mut buf, *resume_offset);
        }
        ServerFrame::FileList {
            transfer_id,
            total_bytes,
            entries,
        }
        | ServerFrame::SyncFileList {
            transfer_id,
            total_bytes,
            entries,
        } => {
            buf.push(match frame {
                ServerFrame::FileList { .. } => SERVER_FILE_LIST,
                _ => SERVER_SYNC_FILE_LIST,
            });
            write_u32(&mut buf, *transfer_id);
            write_u32(&mut buf, entries.len() as u32);
            write_u64(&mut buf, *total_bytes);
            for entry in entries {
                write_entry(&mut buf, entry);
            }
        }
        ServerFrame::FileRequest {
            transfer_id,
            file_index,
            offset,
            uncompressed_len,
            payload,
        } => {
            buf.push(SERVER_FILE_REQUEST);
            write_u32(&mut buf, *transfer_id);
            write_u32(&mut buf, *file_index);
            write_u64(&mut buf, *offset);
            write_u32(&mut buf, *uncompressed_len);
            buf.extend_from_slice(payload);
        }
        ServerFrame::FileAck {
            transfer_id,
            file_index,
            offset,
        } => {
            buf.push(SERVER_FILE_ACK);
            write_u32(&mut buf, *transfer_id);
            write_u32(&mut buf, *file_index);
            write_u64(&mut buf, *offset);
        }
        ServerFrame::TransferComplete { transfer_id } => {
            buf.push(SERVER_TRANSFER_COMPLETE);
            write_u32(&mut buf, *transfer_id);
        }
        ServerFrame::TransferError {
            transfer_id,
            message,
        } => {
            buf.push(SERVER_TRANSFER_ERROR);
            write_u32(&mut buf, *transfer_id);
            write_str_u16(&mut buf, message);
        }
        ServerFrame::DryRunReport {
            transfer_id,
            entries,
        } => {
            buf.push(SERVER_DRY_RUN_REPORT);
            write_u32(&mut buf, *transfer_id);
            write_u32(&mut buf, entries.len() as u32);
            for (action, path) in entries {
                buf.push(action.as_u8());
                write_str_u16(&mut buf, path);
            }
        }
        ServerFrame::BatchData {
            transfer_id,
            uncompressed_len,
            payload,
        } => {
            buf.push(SERVER_BATCH_DATA);
            write_u32(&mut buf, *transfer_id);
            write_u32(&mut buf, *uncompressed_len);
            buf.extend_from_slice(payload);
        }
        ServerFrame::DeltaData {
            transfer_id,
            file_index,
            uncompressed_len,
            payload,
        } => {
            buf.push(SERVER_DELTA_DATA);
            write_u32(&mut buf, *transfer_id);
            write_u32(&mut buf, *file_index);
            write_u32(&mut buf, *uncompressed_len);
            buf.extend_from_slice(payload);
        }
        ServerFrame::SyncComplete { transfer_id } => {
            buf.push(SERVER_SYNC_COMPLETE);
            write_u32(&mut buf, *transfer_id);
        }
    }
    buf
}

pub fn decode_server_frame(bytes: &[u8]) -> Result<ServerFrame, WireError> {
    let mut cursor = Cursor::new(bytes);
    let opcode = cursor.read_u8()?;
    match opcode {
        SERVER_TRANSFER_READY => Ok(ServerFrame::TransferReady {
            transfer_id: cursor.read_u32()?,
            resume_file: cursor.read_u32()?,
            resume_offset: cursor.read_u64()?,
        }),
        SERVER_FILE_LIST | SERVER_SYNC_FILE_LIST => {
            let transfer_id = cursor.read_u32()?;
            let count = cursor.read_u32()? as usize;
            let total_bytes = cursor.read_u64()?;
            let mut entries = Vec::with_capacity(count.min(1 << 20));
            for _ in 0..count {
                entries.push(read_entry(&mut cursor)?);
            }
            if opcode == SERVER_FILE_LIST {
                Ok(ServerFrame::FileList {
                    transfer_id,
                    total_bytes,
                    entries,
                })
            } else {
                Ok(ServerFrame::SyncFileList {
                    transfer_id,
                    total_bytes,
                    entries,
                })
            }
        }
        SERVER_FILE_REQUEST => Ok(ServerFrame::FileRequest {
            transfer_id: cursor.read_u32()?,
            file_index: cursor.read_u32()?,
            offset: cursor.read_u64()?,
            uncompressed_len: cursor.read_u32()?,
            payload: cursor.read_rest(),
        }),
        SERVER_FILE_ACK => Ok(ServerFrame::FileAck {
            transfer_id: cursor.read_u32()?,
            file_index: cursor.read_u32()?,
            offset: cursor.read_u64()?,
        }),
        SERVER_TRANSFER_COMPLETE => Ok(ServerFrame::TransferComplete {
            transfer_id: cursor.read_u32()?,
        }),
        SERVER_TRANSFER_ERROR => Ok(ServerFrame::TransferError {
            transfer_id: cursor.read_u32()?,
            message: cursor.read_str_u16()?,
        }),
        SERVER_DRY_RUN_REPORT => {
            let transfer_id = cursor.read_u32()?;
            let count = cursor.read_u32()? as usize;
            let mut entries = Vec::with_capacity(count.min(1 << 20));
            for _ in 0..count {
                let action = DryRunAction::from_u8(cursor.read_u8()?)?;
                entries.push((action, cursor.read_str_u16()?));
            }
            Ok(ServerFrame::DryRunReport {
                transfer_id,
                entries,
            })
        }
        SERVER_BATCH_DATA => Ok(ServerFrame::BatchData {
            transfer_id: cursor.read_u32()?,
            uncompressed_len: cursor.read_u32()?,
            payload: cursor.read_rest(),
        }),
        SERVER_DELTA_DATA => Ok(ServerFrame::DeltaData {
            transfer_id: cursor.read_u32()?,
            file_index: cursor.read_u32()?,
            uncompressed_len: cursor.read_u32()?,
            payload: cursor.read_rest(),
        }),
        SERVER_SYNC_COMPLETE => Ok(ServerFrame::SyncComplete {
            transfer_id: cursor.read_u32()?,
        }),
        other => Err(WireError::UnknownOpcode(other)),
    }
}

fn write_entry(buf: &mut Vec<u8>, entry: &FileEntry) {
    write_str_u16(buf, &entry.path);
    write_u64(buf, entry.size);
    write_u64(buf, entry.mtime);
    write_u64(buf, entry.hash);
    buf.push(entry.is_dir as u8);
}

fn read_entry(cursor: &mut Cursor<'_>) -> Result<FileEntry, WireError> {
    Ok(FileEntry {
        path: cursor.read_str_u16()?,
        size: cursor.read_u64()?,
        mtime: cursor.read_u64()?,
        hash: cursor.read_u64()?,
        is_dir: cursor.read_u8()? != 0,
    })
}

fn write_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn write_u64(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn write_str_u8(buf: &mut Vec<u8>, value: &str) {
    buf.push(value.len().min(u8::MAX as usize) as u8);
    buf.extend_from_slice(&value.as_bytes()[..value.len().min(u8::MAX as usize)]);
}

fn write_str_u16(buf: &mut Vec<u8>, value: &str) {
    let len = value.len().min(u16::MAX as usize);
    buf.extend_from_slice(&(len as u16).to_le_bytes());
    buf.extend_from_slice(&value.as_bytes()[..len]);
}

pub(crate) struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        if self.pos + len > self.bytes.len() {
            return Err(WireError::UnexpectedEof);
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16, WireError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().expect("sized")))
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, WireError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().expect("sized")))
    }

    pub(crate) fn read_u64(&mut self) -> Result<u64, WireError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().expect("sized")))
    }

    pub(crate) fn read_str_u8(&mut self) -> Result<String, WireError> {
        let len = self.read_u8()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidData("utf-8"))
    }

    pub(crate) fn read_str_u16(&mut self) -> Result<String, WireError> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidData("utf-8"))
    }

    pub(crate) fn read_rest(&mut self) -> Vec<u8> {
        let rest = self.bytes[self.pos..].to_vec();
        self.pos = self.bytes.len();
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, size: u64, is_dir: bool) -> FileEntry {
        FileEntry {
            path: path.to_string(),
            size,
            mtime: 1_700_000_000,
            hash: 0xDEAD_BEEF_CAFE_F00D,
            is_dir,
        }
    }

    #[test]
    fn client_frames_round_trip() {
        let frames = vec![
            ClientFrame::TransferInit {
                direction: Direction::Download,
                flags: TransferFlags {
                    delete_extra: true,
                    dry_run: false,
                },
                base_path: "/srv/data".into(),
                excludes: vec!["*.tmp".into(), "node_modules/*".into()],
            },
            ClientFrame::FileListRequest { transfer_id: 7 },
            ClientFrame::FileData {
                transfer_id: 7,
                file_index: 3,
                offset: 1 << 20,
                uncompressed_len: 4_096,
                payload: vec![1, 2, 3, 4],
            },
            ClientFrame::TransferResume { transfer_id: 7 },
            ClientFrame::TransferCancel { transfer_id: 7 },
            ClientFrame::SyncRequest { transfer_id: 9 },
            ClientFrame::BlockChecksums {
                transfer_id: 9,
                file_index: 0,
                block_size: 512,
                checksums: vec![
                    BlockChecksum {
                        rolling: 0x1234_5678,
                        strong: 0x9ABC_DEF0_1122_3344,
                    },
                    BlockChecksum {
                        rolling: 1,
                        strong: 2,
                    },
                ],
            },
            ClientFrame::SyncAck {
                transfer_id: 9,
                file_index: 0,
            },
            ClientFrame::FileManifest {
                transfer_id: 4,
                total_bytes: 10,
                entries: vec![entry("up/a.txt", 10, false)],
            },
        ];
        for frame in frames {
            let encoded = encode_client_frame(&frame);
            assert_eq!(decode_client_frame(&encoded).unwrap(), frame);
        }
    }

    #[test]
    fn server_frames_round_trip() {
        let frames = vec![
            ServerFrame::TransferReady {
                transfer_id: 1,
                resume_file: 2,
                resume_offset: 3,
            },
            ServerFrame::FileList {
                transfer_id: 1,
                total_bytes: 42,
                entries: vec![entry("dir", 0, true), entry("dir/file", 42, false)],
            },
            ServerFrame::FileRequest {
                transfer_id: 1,
                file_index: 1,
                offset: 0,
                uncompressed_len: 42,
                payload: vec![9; 12],
            },
            ServerFrame::FileAck {
                transfer_id: 1,
                file_index: 1,
                offset: 42,
            },
            ServerFrame::TransferComplete { transfer_id: 1 },
            ServerFrame::TransferError {
                transfer_id: 1,
                message: "bad frame".into(),
            },
            ServerFrame::DryRunReport {
                transfer_id: 1,
                entries: vec![
                    (DryRunAction::Send, "a".to_string()),
                    (DryRunAction::Delete, "b".to_string()),
                ],
            },
            ServerFrame::BatchData {
                transfer_id: 1,
                uncompressed_len: 100,
                payload: vec![0; 10],
            },
            ServerFrame::SyncFileList {
                transfer_id: 2,
                total_bytes: 0,
                entries: vec![],
            },
            ServerFrame::DeltaData {
                transfer_id: 2,
                file_index: 0,
                uncompressed_len: 77,
                payload: vec![5; 7],
            },
            ServerFrame::SyncComplete { transfer_id: 2 },
        ];
        for frame in frames {
            let encoded = encode_server_frame(&frame);
            assert_eq!(decode_server_frame(&encoded).unwrap(), frame);
        }
    }

    #[test]
    fn opcode_spaces_are_respected() {
        assert_eq!(
            encode_client_frame(&ClientFrame::FileListRequest { transfer_id: 0 })[0] & 0xF0,
            0x20
        );
        assert_eq!(
            encode_server_frame(&ServerFrame::TransferComplete { transfer_id: 0 })[0] & 0xF0,
            0x30
        );
    }

    #[test]
    fn truncated_frames_error_cleanly() {
        let encoded = encode_client_frame(&ClientFrame::BlockChecksums {
            transfer_id: 1,
            file_index: 2,
            block_size: 512,
            checksums: vec![BlockChecksum {
                rolling: 3,
                strong: 4,
            }],
        });
        for cut in 1..encoded.len() {
            let result = decode_client_frame(&encoded[..cut]);
            assert!(result.is_err(), "cut at {cut} decoded");
        }
    }

    #[test]
    fn unknown_opcode_is_reported() {
        assert_eq!(
            decode_client_frame(&[0x2F, 0, 0, 0, 0]),
            Err(WireError::UnknownOpcode(0x2F))
        );
        assert_eq!(
            decode_server_frame(&[0x3F]),
            Err(WireError::UnknownOpcode(0x3F))
        );
    }
}
