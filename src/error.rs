use std::path::PathBuf;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed stack header: {0}")]
    MalformedHeader(String),
    #[error("unsupported element type {descr:?}: only fixed-width integer types are supported")]
    UnsupportedElementType { descr: String },
    #[error("source stack not found: {}", path.display())]
    SourceNotFound { path: PathBuf },
    #[error("truncated stream: expected {expected} bytes, got {actual}")]
    TruncatedStream { expected: usize, actual: usize },
    #[error("frame range [{start}, {stop}) exceeds array length {len}")]
    RangeOutOfBounds { start: u64, stop: u64, len: u64 },
    #[error("cannot resize axis 0 from {from} to {to}: the sink never shrinks")]
    InvalidResize { from: u64, to: u64 },
    #[error("could not create sink: {0}")]
    SinkCreate(String),
    #[error("copied {copied} frames but the source declared {expected}")]
    FrameCountMismatch { expected: u64, copied: u64 },
    #[error("invalid store key {0:?}")]
    InvalidStoreKey(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

impl Error {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedHeader(message.into())
    }

    pub fn sink_create(message: impl Into<String>) -> Self {
        Self::SinkCreate(message.into())
    }
}
