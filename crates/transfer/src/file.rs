use std::sync::Arc;

use chunkferry_protocol::{ChunkStatus, FileState, fields};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::chunk::{ChunkCtx, ChunkEvent, ChunkTransfer};
use crate::dispatch::{Dispatcher, InFlight, Ticket};
use crate::ledger::{ByteCounters, ProgressLedger};
use crate::options::{UploadOptions, merge_fields};
use crate::progress::{self, SpeedMeter};
use crate::source::FileSource;
use crate::transport::{EndpointResponse, OffsetRequest, TransportError};
use crate::types::{FileId, FileInfo, FileSnapshot};
use crate::validation::{OffsetDecision, relative_directory};

/// Queue-owned state a file works against.
pub(crate) struct FileCtx<'a> {
    pub(crate) dispatcher: &'a mut Dispatcher,
    pub(crate) ledger: &'a mut ProgressLedger,
    pub(crate) options: &'a UploadOptions,
}

/// What the queue has to do after a file handled a signal.
#[derive(Debug, PartialEq)]
pub(crate) enum FileOutcome {
    Nothing,
    /// A throttled progress report was taken.
    Progress,
    Retry,
    /// The last chunk was stored. `report` is the final progress report,
    /// taken before speeds were zeroed.
    Succeeded { reply: String, report: FileSnapshot },
    Failed(String),
}

/// Result of pausing a file that was not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Paused {
    pub(crate) was_uploading: bool,
    pub(crate) skip_in_queue: bool,
}

/// Upload state of one queued file.
pub(crate) struct FileTransfer {
    info: FileInfo,
    source: Option<Arc<dyn FileSource>>,
    offset: u64,
    chunks: Vec<Option<ChunkTransfer>>,
    uploading_chunk: Option<usize>,
    offset_query: Option<InFlight>,
    completed_chunks: usize,
    completed_bytes: u64,
    uploading: bool,
    paused: bool,
    queue_paused: bool,
    complete: bool,
    error: bool,
    speed: SpeedMeter,
}

impl FileTransfer {
    pub(crate) fn new(id: FileId, source: Arc<dyn FileSource>, fingerprint: String) -> Self {
        let info = FileInfo {
            id,
            name: source.name().to_string(),
            relative_path: relative_directory(source.relative_path(), source.name()),
            size: source.size(),
            fingerprint,
        };
        Self {
            info,
            source: Some(source),
            offset: 0,
            chunks: Vec::new(),
            uploading_chunk: None,
            offset_query: None,
            completed_chunks: 0,
            completed_bytes: 0,
            uploading: false,
            paused: false,
            queue_paused: false,
            complete: false,
            error: false,
            speed: SpeedMeter::new(),
        }
    }

    pub(crate) fn id(&self) -> FileId {
        self.info.id
    }

    pub(crate) fn info(&self) -> &FileInfo {
        &self.info
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.complete
    }

    pub(crate) fn is_uploading(&self) -> bool {
        self.uploading
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused
    }

    pub(crate) fn is_queue_paused(&self) -> bool {
        self.queue_paused
    }

    pub(crate) fn completed_bytes(&self) -> u64 {
        self.completed_bytes
    }

    pub(crate) fn state(&self) -> FileState {
        if self.complete {
            FileState::Complete
        } else if self.error {
            FileState::Error
        } else if self.uploading {
            FileState::Uploading
        } else if self.queue_paused {
            FileState::QueuePaused
        } else if self.paused {
            FileState::Paused
        } else {
            FileState::Idle
        }
    }

    pub(crate) fn progress(&self) -> f64 {
        if self.error {
            return 0.0;
        }
        if self.complete || (self.info.size == 0 && self.completed_bytes == 0) {
            return 1.0;
        }
        if self.info.size == 0 {
            return 0.0;
        }
        (self.completed_bytes as f64 / self.info.size as f64).min(1.0)
    }

    pub(crate) fn time_remaining(&self) -> f64 {
        if self.paused || self.error || self.complete {
            return 0.0;
        }
        progress::seconds_remaining(
            self.info.size.saturating_sub(self.completed_bytes),
            self.speed.average(),
        )
    }

    pub(crate) fn snapshot(&self) -> FileSnapshot {
        FileSnapshot {
            id: self.info.id,
            name: self.info.name.clone(),
            relative_path: self.info.relative_path.clone(),
            fingerprint: self.info.fingerprint.clone(),
            size: self.info.size,
            completed_bytes: self.completed_bytes,
            offset: self.offset,
            progress: self.progress(),
            current_speed: self.speed.current(),
            average_speed: self.speed.average(),
            time_remaining: self.time_remaining(),
            state: self.state(),
        }
    }

    /// Status of each planned chunk, in index order. Finished chunks are
    /// already released and report success.
    pub(crate) fn chunk_statuses(&self, options: &UploadOptions) -> Vec<ChunkStatus> {
        self.chunks
            .iter()
            .map(|chunk| match chunk {
                Some(chunk) => chunk.status(options),
                None => ChunkStatus::Success,
            })
            .collect()
    }

    /// Starts (or restarts) the upload. No-op when complete or already
    /// uploading.
    pub(crate) fn start(&mut self, ctx: &mut FileCtx<'_>) {
        if self.complete || self.uploading {
            return;
        }
        self.reset(ctx.dispatcher);
        self.uploading = true;
        ctx.ledger.transfer_started();

        if ctx.options.settings.resumes(self.info.size) {
            self.query_offset(ctx);
        } else {
            info!(file = %self.info.id, name = %self.info.name, size = self.info.size, "upload started");
            self.offset = 0;
            ByteCounters::new(&mut self.completed_bytes, &mut *ctx.ledger).rebase(0);
            self.prepare_chunks(ctx.options);
            self.upload_next_chunk(ctx);
        }
    }

    fn query_offset(&mut self, ctx: &mut FileCtx<'_>) {
        let mut form = vec![
            (fields::GET_OFFSET.to_string(), fields::flag(true)),
            (fields::TOTAL_SIZE.to_string(), self.info.size.to_string()),
            (fields::FILENAME.to_string(), self.info.name.clone()),
        ];
        if let Some(dir) = &self.info.relative_path {
            form.push((fields::RELATIVE_PATH.to_string(), dir.clone()));
        }
        merge_fields(&mut form, ctx.options.query_fields(&self.info, None));

        let request = OffsetRequest {
            target: ctx.options.settings.target.clone(),
            fields: form,
            headers: ctx.options.headers(),
        };
        debug!(file = %self.info.id, name = %self.info.name, "querying resume offset");
        self.offset_query = Some(ctx.dispatcher.query_offset(self.info.id, request));
    }

    /// Handles the endpoint's answer to the offset query.
    pub(crate) fn offset_reply(
        &mut self,
        ticket: Ticket,
        result: Result<EndpointResponse, TransportError>,
        ctx: &mut FileCtx<'_>,
    ) -> FileOutcome {
        if self.offset_query.as_ref().is_none_or(|op| op.ticket != ticket) {
            return FileOutcome::Nothing;
        }
        self.offset_query = None;
        ctx.dispatcher.settle(ticket);

        let (decision, message) = match &result {
            Ok(response) => (
                ctx.options.validate_offset(&self.info, response.status, &response.body),
                response.body.clone(),
            ),
            Err(e) => (ctx.options.validate_offset(&self.info, 0, ""), e.to_string()),
        };

        match decision {
            OffsetDecision::Accept { offset } => {
                let offset = offset.unwrap_or(0).min(self.info.size);
                info!(file = %self.info.id, name = %self.info.name, offset, size = self.info.size, "upload started");
                self.offset = offset;
                ByteCounters::new(&mut self.completed_bytes, &mut *ctx.ledger).rebase(offset);
                self.prepare_chunks(ctx.options);
                self.upload_next_chunk(ctx);
                FileOutcome::Nothing
            }
            OffsetDecision::Reject => {
                warn!(file = %self.info.id, name = %self.info.name, reply = %message, "offset query rejected");
                self.reset(ctx.dispatcher);
                self.error = true;
                self.paused = true;
                FileOutcome::Failed(message)
            }
        }
    }

    fn prepare_chunks(&mut self, options: &UploadOptions) {
        self.chunks = ChunkTransfer::plan(self.offset, self.info.size, options.settings.chunk_size())
            .into_iter()
            .map(Some)
            .collect();
        self.completed_chunks = 0;
    }

    /// Sends the first pending chunk, if any and not paused.
    fn upload_next_chunk(&mut self, ctx: &mut FileCtx<'_>) {
        if self.paused {
            return;
        }
        let Some(source) = self.source.as_ref() else {
            return;
        };
        let next = self
            .chunks
            .iter()
            .position(|chunk| matches!(chunk, Some(c) if c.status(ctx.options) == ChunkStatus::Pending));
        let Some(index) = next else {
            return;
        };
        if let Some(chunk) = self.chunks[index].as_mut() {
            let mut chunk_ctx = ChunkCtx {
                dispatcher: &mut *ctx.dispatcher,
                options: ctx.options,
                file: &self.info,
                source,
                counters: ByteCounters::new(&mut self.completed_bytes, &mut *ctx.ledger),
            };
            chunk.send(&mut chunk_ctx);
            self.uploading_chunk = Some(index);
        }
    }

    pub(crate) fn chunk_progress(
        &mut self,
        index: usize,
        ticket: Ticket,
        loaded: u64,
        total: u64,
        ctx: &mut FileCtx<'_>,
    ) -> FileOutcome {
        let Some(Some(chunk)) = self.chunks.get_mut(index) else {
            return FileOutcome::Nothing;
        };
        let mut counters = ByteCounters::new(&mut self.completed_bytes, &mut *ctx.ledger);
        if !chunk.progress(ticket, loaded, total, &mut counters) {
            return FileOutcome::Nothing;
        }

        let now = Instant::now();
        if !self.speed.report_due(now, ctx.options.settings.progress_interval()) {
            return FileOutcome::Nothing;
        }
        self.report_progress(now, ctx);
        FileOutcome::Progress
    }

    pub(crate) fn chunk_done(
        &mut self,
        index: usize,
        ticket: Ticket,
        result: Result<EndpointResponse, TransportError>,
        ctx: &mut FileCtx<'_>,
    ) -> FileOutcome {
        let Some(source) = self.source.as_ref() else {
            return FileOutcome::Nothing;
        };
        let Some(Some(chunk)) = self.chunks.get_mut(index) else {
            return FileOutcome::Nothing;
        };
        let mut chunk_ctx = ChunkCtx {
            dispatcher: &mut *ctx.dispatcher,
            options: ctx.options,
            file: &self.info,
            source,
            counters: ByteCounters::new(&mut self.completed_bytes, &mut *ctx.ledger),
        };
        match chunk.complete(ticket, result, &mut chunk_ctx) {
            ChunkEvent::Stale => FileOutcome::Nothing,
            ChunkEvent::Retry => {
                self.uploading_chunk = Some(index);
                FileOutcome::Retry
            }
            ChunkEvent::Error(message) => {
                self.fail(ctx);
                FileOutcome::Failed(message)
            }
            ChunkEvent::Success(message) => {
                self.chunks[index] = None;
                self.uploading_chunk = None;
                self.completed_chunks += 1;
                self.error = false;
                self.paused = false;
                if self.completed_chunks < self.chunks.len() {
                    self.upload_next_chunk(ctx);
                    return FileOutcome::Nothing;
                }
                self.report_progress(Instant::now(), ctx);
                let report = self.snapshot();
                self.uploading = false;
                self.complete = true;
                self.speed.stop();
                self.chunks.clear();
                self.source = None;
                info!(file = %self.info.id, name = %self.info.name, size = self.info.size, "upload complete");
                FileOutcome::Succeeded {
                    reply: message,
                    report,
                }
            }
        }
    }

    pub(crate) fn retry_due(&mut self, index: usize, ticket: Ticket, ctx: &mut FileCtx<'_>) {
        let Some(source) = self.source.as_ref() else {
            return;
        };
        let Some(Some(chunk)) = self.chunks.get_mut(index) else {
            return;
        };
        let mut chunk_ctx = ChunkCtx {
            dispatcher: &mut *ctx.dispatcher,
            options: ctx.options,
            file: &self.info,
            source,
            counters: ByteCounters::new(&mut self.completed_bytes, &mut *ctx.ledger),
        };
        if chunk.retry_due(ticket, &mut chunk_ctx) {
            self.uploading_chunk = Some(index);
        }
    }

    /// Permanent chunk failure: drop this file's progress and stop.
    fn fail(&mut self, ctx: &mut FileCtx<'_>) {
        ByteCounters::new(&mut self.completed_bytes, &mut *ctx.ledger).withdraw_all();
        self.reset(ctx.dispatcher);
        self.error = true;
        self.paused = true;
    }

    fn report_progress(&mut self, now: Instant, ctx: &mut FileCtx<'_>) {
        self.speed.sample(
            self.completed_bytes,
            now,
            ctx.options.settings.smoothing_factor(),
        );
        ctx.ledger.publish_speed(self.speed.average());
    }

    /// Pauses the file, keeping the bytes already stored. Returns `None`
    /// for complete files.
    pub(crate) fn pause(&mut self, skip_in_queue: bool, ctx: &mut FileCtx<'_>) -> Option<Paused> {
        if self.complete {
            return None;
        }
        let was_uploading = self.uploading;
        if was_uploading {
            self.abort(ctx);
        }
        self.reset(ctx.dispatcher);
        self.queue_paused = skip_in_queue;
        self.paused = true;
        debug!(file = %self.info.id, skip_in_queue, "file paused");
        Some(Paused {
            was_uploading,
            skip_in_queue,
        })
    }

    /// Aborts the chunk in flight, taking back its partial bytes.
    pub(crate) fn abort(&mut self, ctx: &mut FileCtx<'_>) {
        if let Some(index) = self.uploading_chunk.take() {
            if let Some(Some(chunk)) = self.chunks.get_mut(index) {
                let mut counters = ByteCounters::new(&mut self.completed_bytes, &mut *ctx.ledger);
                chunk.abort(ctx.dispatcher, &mut counters);
            }
        }
        if let Some(op) = self.offset_query.take() {
            ctx.dispatcher.cancel(op);
        }
    }

    /// Removes the file's whole byte contribution from the queue.
    pub(crate) fn withdraw(&mut self, ledger: &mut ProgressLedger) {
        ByteCounters::new(&mut self.completed_bytes, ledger).withdraw_all();
    }

    /// Cancels all background work and clears transient state. Stored
    /// bytes (`completed_bytes`) are kept.
    pub(crate) fn reset(&mut self, dispatcher: &mut Dispatcher) {
        for chunk in self.chunks.iter_mut().flatten() {
            chunk.cancel(dispatcher);
        }
        if let Some(op) = self.offset_query.take() {
            dispatcher.cancel(op);
        }
        self.chunks.clear();
        self.uploading_chunk = None;
        self.completed_chunks = 0;
        self.offset = 0;
        self.paused = false;
        self.queue_paused = false;
        self.uploading = false;
        self.error = false;
        self.speed.stop();
    }
}
