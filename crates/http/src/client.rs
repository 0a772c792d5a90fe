//! `reqwest` implementation of [`ChunkTransport`].

use std::time::Duration;

use chunkferry_transfer::{
    ChunkRequest, ChunkTransport, EndpointResponse, OffsetRequest, ProgressSink, TransportError,
    transport::TransportFuture,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};
use tracing::{debug, trace};

use crate::body::progress_stream;

/// Default size of the body pieces progress is reported for: 64 KiB.
pub const DEFAULT_PROGRESS_STEP: usize = 64 * 1024;

/// Errors from building the transport.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Configures an [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransportBuilder {
    timeout: Option<Duration>,
    with_credentials: bool,
    progress_step: usize,
    user_agent: String,
}

impl Default for HttpTransportBuilder {
    fn default() -> Self {
        Self {
            timeout: None,
            with_credentials: false,
            progress_step: DEFAULT_PROGRESS_STEP,
            user_agent: format!("chunkferry/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpTransportBuilder {
    /// Per-request timeout. Unlimited by default.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Keeps cookies set by the endpoint and sends them back.
    pub fn with_credentials(mut self, enabled: bool) -> Self {
        self.with_credentials = enabled;
        self
    }

    /// Granularity of upload progress reports, in bytes.
    pub fn progress_step(mut self, bytes: usize) -> Self {
        self.progress_step = bytes.max(1);
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    pub fn build(self) -> Result<HttpTransport, Error> {
        let mut builder = reqwest::Client::builder()
            .user_agent(self.user_agent)
            .cookie_store(self.with_credentials);
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        Ok(HttpTransport {
            http: builder.build()?,
            progress_step: self.progress_step,
        })
    }
}

/// Posts chunks and offset queries as multipart forms.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    progress_step: usize,
}

impl HttpTransport {
    /// A transport with default settings.
    pub fn new() -> Result<Self, Error> {
        Self::builder().build()
    }

    pub fn builder() -> HttpTransportBuilder {
        HttpTransportBuilder::default()
    }

    async fn post(
        &self,
        target: &str,
        headers: &[(String, String)],
        form: Form,
    ) -> Result<EndpointResponse, TransportError> {
        let headers = header_map(headers)?;
        let resp = self
            .http
            .post(target)
            .headers(headers)
            .multipart(form)
            .send()
            .await
            .map_err(map_error)?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(map_error)?;
        trace!(url = target, status, "endpoint replied");
        Ok(EndpointResponse::new(status, body))
    }

    async fn send(&self, request: ChunkRequest, progress: ProgressSink) -> Result<EndpointResponse, TransportError> {
        let len = request.payload.len() as u64;
        debug!(url = %request.target, file = %request.file_name, bytes = len, "posting chunk");
        let stream = progress_stream(request.payload, self.progress_step, progress);
        let part = Part::stream_with_length(reqwest::Body::wrap_stream(stream), len)
            .file_name(request.file_name)
            .mime_str("application/octet-stream")
            .map_err(map_error)?;
        let form = text_form(request.fields).part(request.file_parameter, part);
        self.post(&request.target, &request.headers, form).await
    }

    async fn offset(&self, request: OffsetRequest) -> Result<EndpointResponse, TransportError> {
        debug!(url = %request.target, "querying offset");
        let form = text_form(request.fields);
        self.post(&request.target, &request.headers, form).await
    }
}

impl ChunkTransport for HttpTransport {
    fn send_chunk(&self, request: ChunkRequest, progress: ProgressSink) -> TransportFuture<'_> {
        Box::pin(self.send(request, progress))
    }

    fn query_offset(&self, request: OffsetRequest) -> TransportFuture<'_> {
        Box::pin(self.offset(request))
    }
}

fn text_form(fields: Vec<(String, String)>) -> Form {
    fields
        .into_iter()
        .fold(Form::new(), |form, (name, value)| form.text(name, value))
}

fn header_map(headers: &[(String, String)]) -> Result<HeaderMap, TransportError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| TransportError::InvalidRequest(format!("header name {name:?}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| TransportError::InvalidRequest(format!("value of header {name}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

fn map_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_builder() {
        TransportError::InvalidRequest(e.to_string())
    } else {
        TransportError::Network(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offset_request(target: &str, headers: Vec<(String, String)>) -> OffsetRequest {
        OffsetRequest {
            target: target.into(),
            fields: vec![("getOffset".into(), "1".into())],
            headers,
        }
    }

    #[test]
    fn builds_with_defaults() {
        let transport = HttpTransport::new().unwrap();
        assert_eq!(transport.progress_step, DEFAULT_PROGRESS_STEP);
        let transport = HttpTransport::builder()
            .progress_step(0)
            .timeout(Duration::from_secs(5))
            .with_credentials(true)
            .build()
            .unwrap();
        assert_eq!(transport.progress_step, 1);
    }

    #[test]
    fn header_map_rejects_invalid_names() {
        let ok = header_map(&[("X-Token".into(), "abc".into())]).unwrap();
        assert_eq!(ok.get("x-token").unwrap(), "abc");
        let err = header_map(&[("bad header".into(), "abc".into())]).unwrap_err();
        assert!(matches!(err, TransportError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn relative_target_is_not_retryable() {
        let transport = HttpTransport::new().unwrap();
        let err = transport
            .query_offset(offset_request("/", Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::InvalidRequest(_)), "{err:?}");
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn refused_connection_is_retryable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = HttpTransport::new().unwrap();
        let err = transport
            .query_offset(offset_request(&format!("http://{addr}/upload"), Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Network(_)), "{err:?}");
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn bad_header_fails_before_sending() {
        let transport = HttpTransport::new().unwrap();
        let err = transport
            .query_offset(offset_request(
                "http://127.0.0.1:9/upload",
                vec![("bad header".into(), "x".into())],
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::InvalidRequest(_)));
    }
}
