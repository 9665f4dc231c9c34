//! Slice-encoder capability.
//!
//! The bitstream assembly, keyframe cadence, and color pipeline are
//! portable; producing coded slice data is not. A platform binding
//! (VA-API, NVENC, VideoToolbox) implements [`SliceEncoder`] against its
//! hardware session; [`LoopbackEncoder`] is the in-tree implementation
//! used by tests and as a stand-in where no hardware is wired up.

use crate::video::convert::Nv12Frame;
use crate::video::error::VideoError;

pub const NAL_IDR: u8 = 0x65;
pub const NAL_NON_IDR: u8 = 0x41;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendConfig {
    pub width: u32,
    pub height: u32,
    pub bitrate: u32,
    pub fps: u32,
}

/// Produces one coded slice NAL unit (header byte included, no start
/// code) per frame. Implementations own their surfaces; the caller
/// guarantees frames arrive at the configured size and never reorders.
pub trait SliceEncoder: Send {
    /// (Re)creates surfaces and the encode context for a new geometry or
    /// rate. Called at init and after every resize; failures leave the
    /// encoder unusable until the next attempt.
    fn configure(&mut self, config: &BackendConfig) -> Result<(), VideoError>;

    /// Encodes one frame. `frame_num` is the slice header frame number,
    /// already reset to 0 for IDR frames.
    fn encode(
        &mut self,
        frame: &Nv12Frame,
        keyframe: bool,
        frame_num: u32,
    ) -> Result<Vec<u8>, VideoError>;
}

/// Deterministic stand-in: emits a syntactically framed NAL whose payload
/// is a digest of the input planes, so pipeline tests can assert on
/// ordering, keyframe placement, and geometry without hardware.
#[derive(Debug, Default)]
pub struct LoopbackEncoder {
    config: Option<BackendConfig>,
}

impl LoopbackEncoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SliceEncoder for LoopbackEncoder {
    fn configure(&mut self, config: &BackendConfig) -> Result<(), VideoError> {
        if config.width == 0 || config.height == 0 {
            return Err(VideoError::SurfaceAllocation("zero-sized surface".into()));
        }
        self.config = Some(*config);
        Ok(())
    }

    fn encode(
        &mut self,
        frame: &Nv12Frame,
        keyframe: bool,
        frame_num: u32,
    ) -> Result<Vec<u8>, VideoError> {
        let config = self
            .config
            .ok_or_else(|| VideoError::Context("encode before configure".into()))?;
        if frame.width != config.width || frame.height != config.height {
            return Err(VideoError::Context(format!(
                "frame {}x{} does not match surface {}x{}",
                frame.width, frame.height, config.width, config.height
            )));
        }

        let digest = fnv1a(&frame.y) ^ fnv1a(&frame.uv);
        let mut nal = Vec::with_capacity(16);
        nal.push(if keyframe { NAL_IDR } else { NAL_NON_IDR });
        let mut payload = Vec::with_capacity(12);
        payload.extend_from_slice(&frame_num.to_be_bytes());
        payload.extend_from_slice(&digest.to_be_bytes());
        nal.extend_from_slice(&crate::video::bitstream::rbsp_to_ebsp(&payload));
        Ok(nal)
    }
}

fn fnv1a(data: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100_0000_01b3);
    }
    hash
}
