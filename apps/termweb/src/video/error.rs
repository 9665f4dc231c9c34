use thiserror::Error;

#[derive(Debug, Error)]
pub enum VideoError {
    #[error("encode surface allocation failed: {0}")]
    SurfaceAllocation(String),
    #[error("encoder context failed: {0}")]
    Context(String),
    #[error("frame dimensions {width}x{height} exceed the hardware cap")]
    DimensionsTooLarge { width: u32, height: u32 },
    #[error("source buffer is {actual} bytes, expected {expected}")]
    SourceSizeMismatch { expected: usize, actual: usize },
}
