//! Per-frame encode pipeline.
//!
//! Owns the geometry, the keyframe cadence, the cached parameter sets,
//! and the slice-encoder backend. Output is Annex-B: every NAL unit is
//! prefixed with `00 00 00 01`, and keyframes carry SPS then PPS before
//! the IDR slice. The frame number resets to 0 on every keyframe so the
//! sequence never presents a frame_num gap to the decoder.

use tracing::debug;

use crate::video::backend::{BackendConfig, SliceEncoder};
use crate::video::bitstream;
use crate::video::convert::{self, Nv12Frame, PixelLayout};
use crate::video::error::VideoError;

pub const START_CODE: [u8; 4] = [0, 0, 0, 1];
pub const DEFAULT_KEYFRAME_INTERVAL: u64 = 600;
/// frame_num is modulo 2^(log2_max_frame_num_minus4 + 4).
const MAX_FRAME_NUM: u32 = 16;

#[derive(Debug, Clone, Copy)]
pub struct EncoderConfig {
    pub bitrate: u32,
    pub fps: u32,
    pub keyframe_interval: u64,
    pub pixel_budget: u64,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        let tier = &crate::video::quality::TIERS[crate::video::quality::DEFAULT_TIER];
        Self {
            bitrate: tier.bitrate,
            fps: tier.fps,
            keyframe_interval: DEFAULT_KEYFRAME_INTERVAL,
            pixel_budget: tier.max_pixels,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub data: Vec<u8>,
    pub keyframe: bool,
}

pub struct Encoder {
    backend: Box<dyn SliceEncoder>,
    config: EncoderConfig,
    src_width: u32,
    src_height: u32,
    coded_width: u32,
    coded_height: u32,
    display_width: u32,
    display_height: u32,
    frame_count: u64,
    frame_num: u32,
    force_keyframe: bool,
    sps: Vec<u8>,
    pps: Vec<u8>,
    /// Previous frame's surface; swapped with the new source after every
    /// encode so the next P-frame references it.
    reference: Option<Nv12Frame>,
}

impl Encoder {
    pub fn new(
        backend: Box<dyn SliceEncoder>,
        src_width: u32,
        src_height: u32,
        config: EncoderConfig,
    ) -> Result<Self, VideoError> {
        let mut encoder = Self {
            backend,
            config,
            src_width: 0,
            src_height: 0,
            coded_width: 0,
            coded_height: 0,
            display_width: 0,
            display_height: 0,
            frame_count: 0,
            frame_num: 0,
            force_keyframe: true,
            sps: Vec::new(),
            pps: Vec::new(),
            reference: None,
        };
        encoder.resize(src_width, src_height)?;
        Ok(encoder)
    }

    pub fn coded_size(&self) -> (u32, u32) {
        (self.coded_width, self.coded_height)
    }

    /// Pre-alignment output size; what the SPS cropping window preserves.
    pub fn display_size(&self) -> (u32, u32) {
        (self.display_width, self.display_height)
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn sps(&self) -> &[u8] {
        &self.sps
    }

    pub fn pps(&self) -> &[u8] {
        &self.pps
    }

    /// Forces the next frame to be an IDR keyframe.
    pub fn request_keyframe(&mut self) {
        self.force_keyframe = true;
    }

    /// Applies a tier's rate without touching geometry.
    pub fn set_rate(&mut self, bitrate: u32, fps: u32) -> Result<(), VideoError> {
        self.config.bitrate = bitrate;
        self.config.fps = fps;
        self.backend.configure(&self.backend_config())
    }

    /// The supervisor splits a tier's pixel budget across encoders and
    /// hands each its slice; shrinking it may resize the surfaces.
    pub fn set_pixel_budget(&mut self, pixel_budget: u64) -> Result<(), VideoError> {
        if pixel_budget == self.config.pixel_budget {
            return Ok(());
        }
        self.config.pixel_budget = pixel_budget;
        let (src_width, src_height) = (self.src_width, self.src_height);
        self.resize(src_width, src_height)
    }

    pub fn pixel_budget(&self) -> u64 {
        self.config.pixel_budget
    }

    /// Tears down the old geometry before allocating the new one and
    /// regenerates SPS/PPS. A failed reconfigure leaves the encoder
    /// unusable until the next resize attempt.
    fn resize(&mut self, src_width: u32, src_height: u32) -> Result<(), VideoError> {
        if src_width > convert::MAX_AXIS * 4 || src_height > convert::MAX_AXIS * 4 {
            return Err(VideoError::DimensionsTooLarge {
                width: src_width,
                height: src_height,
            });
        }
        let ((coded_width, coded_height), (display_width, display_height)) =
            convert::fit_dimensions(src_width, src_height, self.config.pixel_budget);

        // Old surfaces go first so the allocator never holds both sets.
        self.reference = None;
        self.sps.clear();
        self.pps.clear();

        self.src_width = src_width;
        self.src_height = src_height;
        self.coded_width = coded_width;
        self.coded_height = coded_height;
        self.display_width = display_width;
        self.display_height = display_height;

        self.backend.configure(&self.backend_config())?;
        self.sps = bitstream::build_sps(coded_width, coded_height, display_width, display_height);
        self.pps = bitstream::build_pps();
        self.force_keyframe = true;
        debug!(coded_width, coded_height, "encoder resized");
        Ok(())
    }

    fn backend_config(&self) -> BackendConfig {
        BackendConfig {
            width: self.coded_width,
            height: self.coded_height,
            bitrate: self.config.bitrate,
            fps: self.config.fps,
        }
    }

    /// Encodes one source framebuffer. A source-dimension change resizes
    /// first, which forces a keyframe.
    pub fn encode_frame(
        &mut self,
        src: &[u8],
        src_width: u32,
        src_height: u32,
        layout: PixelLayout,
        force_keyframe: bool,
    ) -> Result<EncodedFrame, VideoError> {
        if src_width != self.src_width || src_height != self.src_height {
            self.resize(src_width, src_height)?;
        }
        if force_keyframe {
            self.force_keyframe = true;
        }

        let frame = convert::convert_to_nv12(
            src,
            src_width,
            src_height,
            layout,
            self.coded_width,
            self.coded_height,
            self.display_width,
            self.display_height,
        )?;

        let keyframe =
            self.force_keyframe || self.frame_count % self.config.keyframe_interval == 0;
        if keyframe {
            self.frame_num = 0;
        }

        let slice = self.backend.encode(&frame, keyframe, self.frame_num)?;

        let mut data = Vec::with_capacity(slice.len() + self.sps.len() + self.pps.len() + 12);
        if keyframe {
            data.extend_from_slice(&START_CODE);
            data.extend_from_slice(&self.sps);
            data.extend_from_slice(&START_CODE);
            data.extend_from_slice(&self.pps);
        }
        data.extend_from_slice(&START_CODE);
        data.extend_from_slice(&slice);

        self.force_keyframe = false;
        self.frame_count += 1;
        self.frame_num = (self.frame_num + 1) % MAX_FRAME_NUM;
        // The encoded surface becomes the reference for the next P-frame.
        self.reference = Some(frame);

        Ok(EncodedFrame { data, keyframe })
    }
}
