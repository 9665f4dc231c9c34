//! Rolling-checksum delta engine.
//!
//! A peer holding a stale copy of a file sends per-block checksums; we
//! walk the current bytes one position at a time and emit COPY commands
//! for blocks the peer already has, LITERAL commands for everything else.
//! Rolling hits are confirmed with the strong hash before a COPY is
//! trusted.

use std::collections::HashMap;

use crate::transfer::error::TransferError;
use crate::transfer::scan::hash_bytes;

pub const MIN_BLOCK_SIZE: u32 = 512;
pub const MAX_BLOCK_SIZE: u32 = 65_536;

const CMD_COPY: u8 = 0x00;
const CMD_LITERAL: u8 = 0x01;

/// One block of the peer's stale copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockChecksum {
    pub rolling: u32,
    pub strong: u64,
}

/// `clamp(floor(sqrt(len)), 512, 65536)`.
pub fn block_size_for(len: u64) -> u32 {
    let root = (len as f64).sqrt() as u64;
    (root as u32).clamp(MIN_BLOCK_SIZE, MAX_BLOCK_SIZE)
}

/// Adler-style checksum with 16-bit lanes; combined hash is `(b<<16)|a`.
#[derive(Debug, Clone, Copy)]
pub struct RollingChecksum {
    a: u16,
    b: u16,
}

impl RollingChecksum {
    pub fn new(window: &[u8]) -> Self {
        let mut a: u16 = 0;
        let mut b: u16 = 0;
        for &byte in window {
            a = a.wrapping_add(byte as u16);
            b = b.wrapping_add(a);
        }
        Self { a, b }
    }

    /// O(1) slide: drop `old` from the front, append `new`, for a window
    /// of `len` bytes.
    pub fn roll(&mut self, old: u8, new: u8, len: usize) {
        self.a = self.a.wrapping_sub(old as u16).wrapping_add(new as u16);
        self.b = self
            .b
            .wrapping_sub((len as u16).wrapping_mul(old as u16))
            .wrapping_add(self.a);
    }

    pub fn value(&self) -> u32 {
        ((self.b as u32) << 16) | self.a as u32
    }
}

/// Checksums for every whole block of `data`; a short tail is not
/// summed, it always travels as literal.
pub fn compute_checksums(data: &[u8], block_size: u32) -> Vec<BlockChecksum> {
    let block = block_size as usize;
    data.chunks_exact(block)
        .map(|chunk| BlockChecksum {
            rolling: RollingChecksum::new(chunk).value(),
            strong: hash_bytes(chunk),
        })
        .collect()
}

/// Produces the COPY/LITERAL command stream that turns the peer's stale
/// copy into `data`. Offsets in COPY commands address the peer's copy.
pub fn compute_delta(data: &[u8], checksums: &[BlockChecksum], block_size: u32) -> Vec<u8> {
    let block = block_size as usize;
    let mut commands = Vec::new();

    if block == 0 || checksums.is_empty() || data.len() < block {
        push_literal(&mut commands, data);
        return commands;
    }

    // rolling -> every (peer block index, strong) that shares it.
    let mut index: HashMap<u32, Vec<(usize, u64)>> = HashMap::new();
    for (block_index, checksum) in checksums.iter().enumerate() {
        index
            .entry(checksum.rolling)
            .or_default()
            .push((block_index, checksum.strong));
    }

    let mut literal_start = 0usize;
    let mut pos = 0usize;
    let mut rolling = RollingChecksum::new(&data[..block]);

    while pos + block <= data.len() {
        let matched = index.get(&rolling.value()).and_then(|candidates| {
            let strong = hash_bytes(&data[pos..pos + block]);
            candidates
                .iter()
                .find(|(_, candidate)| *candidate == strong)
                .map(|(block_index, _)| *block_index)
        });

        if let Some(block_index) = matched {
            push_literal(&mut commands, &data[literal_start..pos]);
            push_copy(&mut commands, block_index as u64 * block as u64, block_size);
            pos += block;
            literal_start = pos;
            if pos + block <= data.len() {
                rolling = RollingChecksum::new(&data[pos..pos + block]);
            }
        } else {
            if pos + block < data.len() {
                rolling.roll(data[pos], data[pos + block], block);
            }
            pos += 1;
        }
    }

    push_literal(&mut commands, &data[literal_start..]);
    commands
}

fn push_copy(commands: &mut Vec<u8>, offset: u64, len: u32) {
    commands.push(CMD_COPY);
    commands.extend_from_slice(&offset.to_le_bytes());
    commands.extend_from_slice(&len.to_le_bytes());
}

fn push_literal(commands: &mut Vec<u8>, bytes: &[u8]) {
    if bytes.is_empty() {
        return;
    }
    commands.push(CMD_LITERAL);
    commands.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    commands.extend_from_slice(bytes);
}

/// Replays a command stream against the stale copy, reproducing the
/// sender's bytes exactly.
pub fn apply_delta(commands: &[u8], basis: &[u8]) -> Result<Vec<u8>, TransferError> {
    let mut out = Vec::new();
    let mut pos = 0usize;

    while pos < commands.len() {
        let opcode = commands[pos];
        pos += 1;
        match opcode {
            CMD_COPY => {
                if pos + 12 > commands.len() {
                    return Err(TransferError::BadDelta("truncated copy"));
                }
                let offset =
                    u64::from_le_bytes(commands[pos..pos + 8].try_into().expect("sized")) as usize;
                let len =
                    u32::from_le_bytes(commands[pos + 8..pos + 12].try_into().expect("sized"))
                        as usize;
                pos += 12;
                let end = offset
                    .checked_add(len)
                    .ok_or(TransferError::BadDelta("copy overflow"))?;
                if end > basis.len() {
                    return Err(TransferError::BadDelta("copy out of range"));
                }
                out.extend_from_slice(&basis[offset..end]);
            }
            CMD_LITERAL => {
                if pos + 4 > commands.len() {
                    return Err(TransferError::BadDelta("truncated literal"));
                }
                let len =
                    u32::from_le_bytes(commands[pos..pos + 4].try_into().expect("sized")) as usize;
                pos += 4;
                if pos + len > commands.len() {
                    return Err(TransferError::BadDelta("literal past end"));
                }
                out.extend_from_slice(&commands[pos..pos + len]);
                pos += len;
            }
            _ => return Err(TransferError::BadDelta("unknown command")),
        }
    }
    Ok(out)
}
