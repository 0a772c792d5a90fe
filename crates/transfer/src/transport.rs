//! Seam between the upload engine and the network.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

use crate::dispatch::ProgressSink;

/// Boxed future returned by [`ChunkTransport`] methods.
pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<EndpointResponse, TransportError>> + Send + 'a>>;

/// One chunk post: form fields plus the chunk bytes as a file part.
#[derive(Debug, Clone)]
pub struct ChunkRequest {
    pub target: String,
    /// Text fields, in send order.
    pub fields: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    /// Name of the form field carrying the payload.
    pub file_parameter: String,
    /// File name attached to the payload part.
    pub file_name: String,
    pub payload: Bytes,
}

/// Offset query: form fields only.
#[derive(Debug, Clone)]
pub struct OffsetRequest {
    pub target: String,
    pub fields: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

/// Raw endpoint answer. Interpretation is left to the validators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointResponse {
    pub status: u16,
    pub body: String,
}

impl EndpointResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Failure to obtain any response from the endpoint.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("cannot read source: {0}")]
    Source(String),
}

impl TransportError {
    /// Whether sending the same request again could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Network(_) | TransportError::Timeout)
    }
}

/// Sends chunk posts and offset queries to an endpoint.
///
/// Uses boxed futures so the trait stays object-safe for
/// `Arc<dyn ChunkTransport>`.
pub trait ChunkTransport: Send + Sync {
    /// Posts one chunk. Implementations should call `progress.report`
    /// as payload bytes leave the process.
    fn send_chunk(&self, request: ChunkRequest, progress: ProgressSink) -> TransportFuture<'_>;

    /// Asks the endpoint how many bytes of a file it already holds.
    fn query_offset(&self, request: OffsetRequest) -> TransportFuture<'_>;
}
