use std::sync::Arc;

use chunkferry_protocol::{ChunkStatus, ChunkVerdict, fields};
use tracing::{debug, trace, warn};

use crate::dispatch::{Dispatcher, InFlight, Ticket};
use crate::ledger::ByteCounters;
use crate::options::{UploadOptions, merge_fields};
use crate::source::FileSource;
use crate::transport::{ChunkRequest, EndpointResponse, TransportError};
use crate::types::{ChunkInfo, FileInfo};

/// What a finished request means for the owning file.
#[derive(Debug, PartialEq)]
pub(crate) enum ChunkEvent {
    /// The signal belonged to an earlier request.
    Stale,
    Success(String),
    Error(String),
    /// A retry was scheduled or sent.
    Retry,
}

/// Everything a chunk needs from its file while sending or settling.
pub(crate) struct ChunkCtx<'a> {
    pub(crate) dispatcher: &'a mut Dispatcher,
    pub(crate) options: &'a UploadOptions,
    pub(crate) file: &'a FileInfo,
    pub(crate) source: &'a Arc<dyn FileSource>,
    pub(crate) counters: ByteCounters<'a>,
}

#[derive(Debug)]
enum LastOutcome {
    Response(EndpointResponse),
    Failed(TransportError),
}

/// One byte range of a file and its request lifecycle.
#[derive(Debug)]
pub(crate) struct ChunkTransfer {
    index: usize,
    start_byte: u64,
    end_byte: u64,
    file_size: u64,
    loaded: u64,
    total: u64,
    retries: u32,
    pending_retry: bool,
    request: Option<InFlight>,
    retry_timer: Option<InFlight>,
    last: Option<LastOutcome>,
}

impl ChunkTransfer {
    /// Chunk `index` of the range `[offset, file_size)`.
    pub(crate) fn new(index: usize, offset: u64, file_size: u64, chunk_size: Option<u64>) -> Self {
        let (start_byte, end_byte) = match chunk_size {
            Some(size) => {
                let start = (offset + index as u64 * size).min(file_size);
                (start, (start + size).min(file_size))
            }
            None => (0, file_size),
        };
        Self {
            index,
            start_byte,
            end_byte,
            file_size,
            loaded: 0,
            total: 0,
            retries: 0,
            pending_retry: false,
            request: None,
            retry_timer: None,
            last: None,
        }
    }

    /// Splits `[offset, file_size)` into chunks; always at least one.
    pub(crate) fn plan(offset: u64, file_size: u64, chunk_size: Option<u64>) -> Vec<ChunkTransfer> {
        let count = match chunk_size {
            Some(size) => file_size.saturating_sub(offset).div_ceil(size).max(1),
            None => 1,
        };
        (0..count as usize)
            .map(|index| ChunkTransfer::new(index, offset, file_size, chunk_size))
            .collect()
    }

    pub(crate) fn info(&self) -> ChunkInfo {
        ChunkInfo {
            index: self.index,
            start_byte: self.start_byte,
            end_byte: self.end_byte,
            is_first: self.start_byte == 0,
            is_last: self.end_byte == self.file_size,
        }
    }

    fn len(&self) -> u64 {
        self.end_byte - self.start_byte
    }

    pub(crate) fn status(&self, options: &UploadOptions) -> ChunkStatus {
        if self.pending_retry || self.request.is_some() {
            return ChunkStatus::Uploading;
        }
        match &self.last {
            None => ChunkStatus::Pending,
            Some(LastOutcome::Response(response)) => {
                options.validate_chunk(response.status, &response.body).into()
            }
            Some(LastOutcome::Failed(e)) if e.is_retryable() => ChunkStatus::Retry,
            Some(LastOutcome::Failed(_)) => ChunkStatus::Error,
        }
    }

    fn form_fields(&self, ctx: &ChunkCtx<'_>) -> Vec<(String, String)> {
        let info = self.info();
        let mut form = vec![
            (fields::TOTAL_SIZE.to_string(), self.file_size.to_string()),
            (fields::IS_FIRST_CHUNK.to_string(), fields::flag(info.is_first)),
            (fields::IS_LAST_CHUNK.to_string(), fields::flag(info.is_last)),
        ];
        if let Some(dir) = &ctx.file.relative_path {
            form.push((fields::RELATIVE_PATH.to_string(), dir.clone()));
        }
        form.push((fields::FILENAME.to_string(), ctx.file.name.clone()));
        merge_fields(&mut form, ctx.options.query_fields(ctx.file, Some(&info)));
        form
    }

    /// Dispatches the request for this range.
    pub(crate) fn send(&mut self, ctx: &mut ChunkCtx<'_>) {
        self.loaded = 0;
        self.total = 0;
        self.pending_retry = false;
        self.last = None;

        let request = ChunkRequest {
            target: ctx.options.settings.target.clone(),
            fields: self.form_fields(ctx),
            headers: ctx.options.headers(),
            file_parameter: ctx.options.settings.file_parameter_name.clone(),
            file_name: ctx.file.name.clone(),
            payload: Default::default(),
        };
        debug!(
            file = %ctx.file.id,
            chunk = self.index,
            start = self.start_byte,
            end = self.end_byte,
            "sending chunk"
        );
        let op = ctx.dispatcher.send_chunk(
            ctx.file.id,
            self.index,
            Arc::clone(ctx.source),
            self.start_byte..self.end_byte,
            request,
        );
        self.request = Some(op);
    }

    fn owns_request(&self, ticket: Ticket) -> bool {
        self.request.as_ref().is_some_and(|op| op.ticket == ticket)
    }

    /// Credits newly sent bytes. Returns `false` for stale reports.
    pub(crate) fn progress(&mut self, ticket: Ticket, loaded: u64, total: u64, counters: &mut ByteCounters<'_>) -> bool {
        if !self.owns_request(ticket) {
            return false;
        }
        let loaded = loaded.min(self.len());
        if loaded > self.loaded {
            counters.credit(loaded - self.loaded);
            self.loaded = loaded;
        }
        self.total = total.min(self.len());
        true
    }

    /// Settles the in-flight request and classifies its outcome.
    pub(crate) fn complete(
        &mut self,
        ticket: Ticket,
        result: Result<EndpointResponse, TransportError>,
        ctx: &mut ChunkCtx<'_>,
    ) -> ChunkEvent {
        if !self.owns_request(ticket) {
            return ChunkEvent::Stale;
        }
        self.request = None;
        ctx.dispatcher.settle(ticket);

        let (verdict, message) = match &result {
            Ok(response) => (
                ctx.options.validate_chunk(response.status, &response.body),
                response.body.clone(),
            ),
            Err(e) if e.is_retryable() => (ChunkVerdict::Retry, e.to_string()),
            Err(e) => (ChunkVerdict::Error, e.to_string()),
        };
        self.last = Some(match result {
            Ok(response) => LastOutcome::Response(response),
            Err(e) => LastOutcome::Failed(e),
        });

        match verdict {
            ChunkVerdict::Success => {
                self.retries = 0;
                // The whole range is on the endpoint now, reported or not.
                let remaining = self.len() - self.loaded;
                ctx.counters.credit(remaining);
                self.loaded = self.len();
                trace!(file = %ctx.file.id, chunk = self.index, "chunk stored");
                ChunkEvent::Success(message)
            }
            ChunkVerdict::Error => {
                self.retries = 0;
                self.abort(ctx.dispatcher, &mut ctx.counters);
                warn!(file = %ctx.file.id, chunk = self.index, reply = %message, "chunk rejected");
                ChunkEvent::Error(message)
            }
            ChunkVerdict::Retry => {
                self.abort(ctx.dispatcher, &mut ctx.counters);
                if self.retries >= ctx.options.settings.max_chunk_retries {
                    self.retries = 0;
                    warn!(file = %ctx.file.id, chunk = self.index, reply = %message, "chunk retries exhausted");
                    return ChunkEvent::Error(message);
                }
                self.retries += 1;
                match ctx.options.settings.retry_interval() {
                    Some(base) => {
                        let delay = base * self.retries;
                        debug!(
                            file = %ctx.file.id,
                            chunk = self.index,
                            attempt = self.retries,
                            delay_ms = delay.as_millis() as u64,
                            "retrying chunk"
                        );
                        self.pending_retry = true;
                        self.retry_timer = Some(ctx.dispatcher.schedule_retry(ctx.file.id, self.index, delay));
                    }
                    None => {
                        debug!(file = %ctx.file.id, chunk = self.index, attempt = self.retries, "retrying chunk");
                        self.send(ctx);
                    }
                }
                ChunkEvent::Retry
            }
        }
    }

    /// Sends again once the retry delay elapsed. Returns `false` for stale
    /// timers.
    pub(crate) fn retry_due(&mut self, ticket: Ticket, ctx: &mut ChunkCtx<'_>) -> bool {
        if self.retry_timer.as_ref().is_none_or(|op| op.ticket != ticket) {
            return false;
        }
        self.retry_timer = None;
        ctx.dispatcher.settle(ticket);
        self.send(ctx);
        true
    }

    /// Cancels the request and any pending retry, and takes back the bytes
    /// credited for the partial transfer.
    pub(crate) fn abort(&mut self, dispatcher: &mut Dispatcher, counters: &mut ByteCounters<'_>) {
        self.cancel(dispatcher);
        counters.debit(self.loaded);
        self.loaded = 0;
        trace!(chunk = self.index, "chunk aborted");
    }

    /// Cancels background work without touching the counters.
    pub(crate) fn cancel(&mut self, dispatcher: &mut Dispatcher) {
        if let Some(op) = self.request.take() {
            dispatcher.cancel(op);
        }
        if let Some(op) = self.retry_timer.take() {
            dispatcher.cancel(op);
        }
        self.pending_retry = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges(offset: u64, size: u64, chunk: Option<u64>) -> Vec<(u64, u64, bool, bool)> {
        ChunkTransfer::plan(offset, size, chunk)
            .iter()
            .map(|c| {
                let info = c.info();
                (info.start_byte, info.end_byte, info.is_first, info.is_last)
            })
            .collect()
    }

    #[test]
    fn plan_splits_into_fixed_ranges() {
        assert_eq!(
            ranges(0, 30_000, Some(12_500)),
            vec![
                (0, 12_500, true, false),
                (12_500, 25_000, false, false),
                (25_000, 30_000, false, true),
            ]
        );
    }

    #[test]
    fn plan_starts_at_offset() {
        assert_eq!(
            ranges(12_500, 30_000, Some(12_500)),
            vec![(12_500, 25_000, false, false), (25_000, 30_000, false, true)]
        );
    }

    #[test]
    fn plan_without_chunking_is_one_range() {
        assert_eq!(ranges(0, 30_000, None), vec![(0, 30_000, true, true)]);
    }

    #[test]
    fn plan_always_has_one_chunk() {
        assert_eq!(ranges(0, 0, Some(1000)), vec![(0, 0, true, true)]);
        // Everything already stored: an empty last chunk still finalizes.
        assert_eq!(ranges(5000, 5000, Some(1000)), vec![(5000, 5000, false, true)]);
    }

    #[test]
    fn exact_multiple_has_no_empty_tail() {
        assert_eq!(ranges(0, 2000, Some(1000)).len(), 2);
    }

    #[test]
    fn fresh_chunk_is_pending() {
        let chunk = ChunkTransfer::new(0, 0, 10, Some(5));
        assert_eq!(chunk.status(&UploadOptions::default()), ChunkStatus::Pending);
    }
}
