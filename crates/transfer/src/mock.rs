//! Scripted transport for engine tests.

use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use crate::dispatch::ProgressSink;
use crate::transport::{
    ChunkRequest, ChunkTransport, EndpointResponse, OffsetRequest, TransportError, TransportFuture,
};

pub(crate) const OK_BODY: &str = r#"{"success":true}"#;

pub(crate) enum Outcome {
    Respond(EndpointResponse),
    Fail(TransportError),
    Hang,
}

/// How the mock answers one request.
pub(crate) struct MockReply {
    steps: Vec<u64>,
    step_delay: Duration,
    outcome: Outcome,
}

impl MockReply {
    pub(crate) fn ok() -> Self {
        Self::status(200, OK_BODY)
    }

    pub(crate) fn status(status: u16, body: &str) -> Self {
        Self {
            steps: Vec::new(),
            step_delay: Duration::ZERO,
            outcome: Outcome::Respond(EndpointResponse::new(status, body)),
        }
    }

    pub(crate) fn fail(error: TransportError) -> Self {
        Self {
            steps: Vec::new(),
            step_delay: Duration::ZERO,
            outcome: Outcome::Fail(error),
        }
    }

    pub(crate) fn hang() -> Self {
        Self {
            steps: Vec::new(),
            step_delay: Duration::ZERO,
            outcome: Outcome::Hang,
        }
    }

    /// Reports each `loaded` value in turn, sleeping `delay` before each.
    pub(crate) fn with_progress(mut self, steps: Vec<u64>, delay: Duration) -> Self {
        self.steps = steps;
        self.step_delay = delay;
        self
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedChunk {
    pub(crate) fields: Vec<(String, String)>,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) file_parameter: String,
    pub(crate) file_name: String,
    pub(crate) payload: Bytes,
    pub(crate) at: Instant,
}

impl RecordedChunk {
    pub(crate) fn field(&self, name: &str) -> Option<&str> {
        field(&self.fields, name)
    }
}

pub(crate) fn field<'a>(fields: &'a [(String, String)], name: &str) -> Option<&'a str> {
    fields.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
}

type ChunkScript = Box<dyn Fn(&ChunkRequest, usize) -> MockReply + Send + Sync>;
type OffsetScript = Box<dyn Fn(&OffsetRequest, usize) -> MockReply + Send + Sync>;

/// Records every request and answers from a script.
pub(crate) struct MockTransport {
    chunk_script: ChunkScript,
    offset_script: OffsetScript,
    pub(crate) chunks: Mutex<Vec<RecordedChunk>>,
    pub(crate) offsets: Mutex<Vec<OffsetRequest>>,
}

impl MockTransport {
    /// Stores every chunk; offset queries report nothing stored.
    pub(crate) fn accepting() -> Self {
        Self::with_chunks(|_, _| MockReply::ok())
    }

    pub(crate) fn with_chunks(script: impl Fn(&ChunkRequest, usize) -> MockReply + Send + Sync + 'static) -> Self {
        Self {
            chunk_script: Box::new(script),
            offset_script: Box::new(|_, _| MockReply::ok()),
            chunks: Mutex::new(Vec::new()),
            offsets: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_offsets(
        mut self,
        script: impl Fn(&OffsetRequest, usize) -> MockReply + Send + Sync + 'static,
    ) -> Self {
        self.offset_script = Box::new(script);
        self
    }

    pub(crate) fn recorded_chunks(&self) -> Vec<RecordedChunk> {
        self.chunks.lock().unwrap().clone()
    }

    pub(crate) fn recorded_offsets(&self) -> Vec<OffsetRequest> {
        self.offsets.lock().unwrap().clone()
    }
}

async fn play(reply: MockReply, total: u64, sink: Option<ProgressSink>) -> Result<EndpointResponse, TransportError> {
    for loaded in reply.steps {
        if !reply.step_delay.is_zero() {
            tokio::time::sleep(reply.step_delay).await;
        }
        if let Some(sink) = &sink {
            sink.report(loaded, total);
        }
    }
    match reply.outcome {
        Outcome::Respond(response) => Ok(response),
        Outcome::Fail(error) => Err(error),
        Outcome::Hang => std::future::pending().await,
    }
}

impl ChunkTransport for MockTransport {
    fn send_chunk(&self, request: ChunkRequest, progress: ProgressSink) -> TransportFuture<'_> {
        let reply = {
            let mut chunks = self.chunks.lock().unwrap();
            let reply = (self.chunk_script)(&request, chunks.len());
            chunks.push(RecordedChunk {
                fields: request.fields.clone(),
                headers: request.headers.clone(),
                file_parameter: request.file_parameter.clone(),
                file_name: request.file_name.clone(),
                payload: request.payload.clone(),
                at: Instant::now(),
            });
            reply
        };
        let total = request.payload.len() as u64;
        Box::pin(play(reply, total, Some(progress)))
    }

    fn query_offset(&self, request: OffsetRequest) -> TransportFuture<'_> {
        let reply = {
            let mut offsets = self.offsets.lock().unwrap();
            let reply = (self.offset_script)(&request, offsets.len());
            offsets.push(request);
            reply
        };
        Box::pin(play(reply, 0, None))
    }
}
