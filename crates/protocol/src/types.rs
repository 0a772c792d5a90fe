use serde::{Deserialize, Serialize};

/// Classification of one chunk response by a chunk validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkVerdict {
    /// The endpoint stored the chunk.
    Success,
    /// Permanent failure; the chunk must not be retried.
    Error,
    /// Transient or ambiguous failure; the chunk may be retried.
    Retry,
}

/// Observable state of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Pending,
    Uploading,
    Success,
    Error,
    Retry,
}

impl From<ChunkVerdict> for ChunkStatus {
    fn from(verdict: ChunkVerdict) -> Self {
        match verdict {
            ChunkVerdict::Success => ChunkStatus::Success,
            ChunkVerdict::Error => ChunkStatus::Error,
            ChunkVerdict::Retry => ChunkStatus::Retry,
        }
    }
}

/// Observable state of a file in the queue.
///
/// Exactly one holds at a time. `Error` implies the file is also paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    /// Added but never started (or reset by removal of its progress).
    Idle,
    Uploading,
    /// Paused by the user or by a queue-wide pause.
    Paused,
    /// Skipped by the scheduler to free a concurrency slot.
    QueuePaused,
    Complete,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_serialization() {
        assert_eq!(
            serde_json::to_string(&ChunkVerdict::Retry).unwrap(),
            "\"retry\""
        );
        let parsed: ChunkVerdict = serde_json::from_str("\"success\"").unwrap();
        assert_eq!(parsed, ChunkVerdict::Success);
    }

    #[test]
    fn status_from_verdict() {
        assert_eq!(ChunkStatus::from(ChunkVerdict::Error), ChunkStatus::Error);
        assert_eq!(ChunkStatus::from(ChunkVerdict::Retry), ChunkStatus::Retry);
    }

    #[test]
    fn file_state_serialization() {
        assert_eq!(
            serde_json::to_string(&FileState::QueuePaused).unwrap(),
            "\"queue_paused\""
        );
    }
}
