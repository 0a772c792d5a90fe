//! Resumable chunked upload engine.
//!
//! Files are split into byte-range chunks that are posted one at a time to
//! an HTTP endpoint through a [`ChunkTransport`]. Large files first ask the
//! endpoint how many bytes it already holds and resume from there. A
//! single-owner [`UploadQueue`] schedules files under a concurrency bound,
//! retries transient chunk failures, aggregates progress and speed, and
//! publishes lifecycle events to registered listeners.
//!
//! Network work runs on spawned tokio tasks which report back through a
//! channel; every state transition happens inside the queue, so the queue
//! must be created and driven from within a tokio runtime.

mod chunk;
mod dispatch;
pub mod events;
mod file;
mod ledger;
#[cfg(test)]
mod mock;
pub mod options;
pub mod progress;
mod queue;
pub mod source;
pub mod transport;
mod types;
pub mod validation;

pub use dispatch::ProgressSink;
pub use events::{EventBus, EventKind, ListenerId, QueueEvent};
pub use ledger::ProgressLedger;
pub use options::{UploadOptions, UploadSettings};
pub use queue::{Command, QueueHandle, UploadQueue};
pub use source::{FileSource, LocalFile, MemoryFile};
pub use transport::{ChunkRequest, ChunkTransport, EndpointResponse, OffsetRequest, TransportError};
pub use types::{ChunkInfo, FileId, FileInfo, FileSnapshot, QueueStats};
pub use validation::OffsetDecision;

pub use chunkferry_protocol::{ChunkStatus, ChunkVerdict, FileState};

/// Default chunk size used by the uploader CLI: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a regular file: {0}")]
    NotAFile(String),

    #[error("unknown event: {0}")]
    UnknownEvent(String),

    #[error("file not in queue: {0}")]
    FileNotFound(FileId),

    #[error("upload queue is closed")]
    QueueClosed,
}
