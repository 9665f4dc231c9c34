pub mod backend;
pub mod bitstream;
pub mod convert;
pub mod encoder;
pub mod error;
pub mod quality;

pub use backend::{LoopbackEncoder, SliceEncoder};
pub use convert::{Nv12Frame, PixelLayout};
pub use encoder::{EncodedFrame, Encoder, EncoderConfig};
pub use error::VideoError;
pub use quality::{QualityController, QualityTier, TIERS};
