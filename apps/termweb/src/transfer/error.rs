use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("unknown transfer {0}")]
    UnknownTransfer(u32),
    #[error("file index {0} out of range")]
    BadFileIndex(u32),
    #[error("chunk offset {offset} out of range for file of {len} bytes")]
    BadOffset { offset: u64, len: u64 },
    #[error("invalid transfer state: {0}")]
    InvalidState(&'static str),
    #[error("compression failed: {0}")]
    Compression(String),
    #[error("malformed delta commands: {0}")]
    BadDelta(&'static str),
    #[error("wire: {0}")]
    Wire(#[from] crate::transfer::wire::WireError),
}
