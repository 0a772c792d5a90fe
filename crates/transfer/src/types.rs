use std::fmt;

use chunkferry_protocol::FileState;
use serde::Serialize;

/// Identifier of a file inside one [`UploadQueue`](crate::UploadQueue).
///
/// Ids are assigned in insertion order and never reused by the same queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct FileId(pub u64);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Immutable description of a queued file, handed to hooks and validators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub id: FileId,
    pub name: String,
    /// Directory portion of the source's relative path, as sent on the wire.
    pub relative_path: Option<String>,
    pub size: u64,
    pub fingerprint: String,
}

/// Byte range of one chunk, handed to the query hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkInfo {
    pub index: usize,
    pub start_byte: u64,
    /// Exclusive.
    pub end_byte: u64,
    pub is_first: bool,
    pub is_last: bool,
}

impl ChunkInfo {
    pub fn len(&self) -> u64 {
        self.end_byte - self.start_byte
    }

    pub fn is_empty(&self) -> bool {
        self.start_byte == self.end_byte
    }
}

/// Point-in-time view of a file, carried by queue events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSnapshot {
    pub id: FileId,
    pub name: String,
    pub relative_path: Option<String>,
    pub fingerprint: String,
    pub size: u64,
    pub completed_bytes: u64,
    /// Byte position the current attempt resumed from.
    pub offset: u64,
    /// Fraction in `[0, 1]`.
    pub progress: f64,
    /// Bytes per second.
    pub current_speed: f64,
    /// Bytes per second, smoothed.
    pub average_speed: f64,
    /// Seconds; infinite while no speed is known.
    pub time_remaining: f64,
    pub state: FileState,
}

/// Aggregate view of the whole queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub total_bytes: u64,
    pub completed_bytes: u64,
    pub progress: f64,
    pub file_count: usize,
    pub completed_files: usize,
    pub active_files: usize,
    pub average_speed: f64,
    pub time_remaining: f64,
    pub paused: bool,
}
