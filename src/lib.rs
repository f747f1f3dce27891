//! Re-encode raw `.npy` frame stacks into a chunked, randomly
//! addressable array store, optionally pacing the copy to emulate a
//! live acquisition feed whose source file is still being written.

pub mod chunk_key_encoding;
pub mod element;
mod error;
pub mod header;
pub mod metadata;
pub mod pacing;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod storage;

pub use error::{Error, Result};
pub use header::HeaderDescriptor;
pub use pacing::PacedScheduler;
pub use pipeline::{CopyMode, CopyPipeline, CopyReport, PipelineOptions};
pub use sink::{ChunkedSink, SinkOptions};
pub use source::{FrameSource, RawStackSource};
