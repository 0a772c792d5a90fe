//! Wire protocol shared by the chunkferry client and the reference endpoint.
//!
//! Chunks and offset queries travel as multipart form posts whose field
//! names live in [`fields`]. The endpoint answers with a small JSON document
//! described by [`reply::EndpointReply`].

pub mod fields;
pub mod reply;
pub mod types;

// Re-export primary types for convenience.
pub use reply::EndpointReply;
pub use types::{ChunkStatus, ChunkVerdict, FileState};
