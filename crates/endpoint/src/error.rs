use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chunkferry_protocol::EndpointReply;

/// Errors raised while handling an upload request.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("missing form field: {0}")]
    MissingField(&'static str),

    #[error("invalid value for {name}: {value:?}")]
    InvalidField { name: &'static str, value: String },

    #[error("The file needs to be uploaded from the beginning.")]
    NeedsRestart,

    #[error("malformed request body: {0}")]
    Multipart(String),

    #[error("storage error: {0}")]
    Io(#[from] std::io::Error),
}

impl EndpointError {
    /// Request problems are answered with `200` and `success: false` so the
    /// client treats them as permanent. Body and storage failures get an
    /// error status and may be retried.
    pub fn status(&self) -> StatusCode {
        match self {
            EndpointError::Multipart(_) => StatusCode::BAD_REQUEST,
            EndpointError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::OK,
        }
    }
}

impl From<axum::extract::multipart::MultipartError> for EndpointError {
    fn from(e: axum::extract::multipart::MultipartError) -> Self {
        EndpointError::Multipart(e.body_text())
    }
}

impl IntoResponse for EndpointError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(EndpointReply::failed(self.to_string()))).into_response()
    }
}
