//! Background work issued by the queue and the signals it reports back.
//!
//! Every request, offset query and retry timer runs as its own tokio task
//! tagged with a ticket. Completions come back through one channel owned by
//! the queue. Cancelling an operation aborts its task and forgets its
//! ticket, so a signal that was already queued is recognised as stale and
//! dropped by whoever receives it.

use std::collections::HashSet;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::trace;

use crate::source::FileSource;
use crate::transport::{
    ChunkRequest, ChunkTransport, EndpointResponse, OffsetRequest, TransportError,
};
use crate::types::FileId;

pub(crate) type Ticket = u64;

/// Reports from background tasks to the queue.
#[derive(Debug)]
pub(crate) enum Signal {
    ChunkProgress {
        file: FileId,
        chunk: usize,
        ticket: Ticket,
        loaded: u64,
        total: u64,
    },
    ChunkDone {
        file: FileId,
        chunk: usize,
        ticket: Ticket,
        result: Result<EndpointResponse, TransportError>,
    },
    RetryDue {
        file: FileId,
        chunk: usize,
        ticket: Ticket,
    },
    OffsetReply {
        file: FileId,
        ticket: Ticket,
        result: Result<EndpointResponse, TransportError>,
    },
}

/// Upload progress callback handed to [`ChunkTransport::send_chunk`].
///
/// `loaded` is the number of payload bytes sent so far and `total` the
/// payload length. Reports after the request finished are ignored.
#[derive(Clone)]
pub struct ProgressSink(SinkTarget);

#[derive(Clone)]
enum SinkTarget {
    Queue {
        tx: mpsc::UnboundedSender<Signal>,
        file: FileId,
        chunk: usize,
        ticket: Ticket,
    },
    Callback(Arc<dyn Fn(u64, u64) + Send + Sync>),
}

impl ProgressSink {
    /// A sink that forwards reports to `f`, for driving a transport
    /// outside of a queue.
    pub fn from_fn(f: impl Fn(u64, u64) + Send + Sync + 'static) -> Self {
        Self(SinkTarget::Callback(Arc::new(f)))
    }

    /// A sink that drops every report.
    pub fn discard() -> Self {
        Self::from_fn(|_, _| {})
    }

    pub fn report(&self, loaded: u64, total: u64) {
        match &self.0 {
            SinkTarget::Queue {
                tx,
                file,
                chunk,
                ticket,
            } => {
                let _ = tx.send(Signal::ChunkProgress {
                    file: *file,
                    chunk: *chunk,
                    ticket: *ticket,
                    loaded,
                    total,
                });
            }
            SinkTarget::Callback(f) => f(loaded, total),
        }
    }
}

impl fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            SinkTarget::Queue { file, chunk, .. } => f
                .debug_struct("ProgressSink")
                .field("file", file)
                .field("chunk", chunk)
                .finish(),
            SinkTarget::Callback(_) => f.write_str("ProgressSink(callback)"),
        }
    }
}

/// A running background operation.
#[derive(Debug)]
pub(crate) struct InFlight {
    pub(crate) ticket: Ticket,
    handle: AbortHandle,
}

/// Spawns background operations and tracks which are still outstanding.
pub(crate) struct Dispatcher {
    transport: Arc<dyn ChunkTransport>,
    tx: mpsc::UnboundedSender<Signal>,
    next_ticket: Ticket,
    outstanding: HashSet<Ticket>,
}

impl Dispatcher {
    pub(crate) fn new(transport: Arc<dyn ChunkTransport>, tx: mpsc::UnboundedSender<Signal>) -> Self {
        Self {
            transport,
            tx,
            next_ticket: 1,
            outstanding: HashSet::new(),
        }
    }

    fn issue(&mut self) -> Ticket {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.outstanding.insert(ticket);
        ticket
    }

    /// Reads `range` from `source` and posts it. The payload of `request`
    /// is replaced by the bytes read.
    pub(crate) fn send_chunk(
        &mut self,
        file: FileId,
        chunk: usize,
        source: Arc<dyn FileSource>,
        range: Range<u64>,
        mut request: ChunkRequest,
    ) -> InFlight {
        let ticket = self.issue();
        let transport = Arc::clone(&self.transport);
        let tx = self.tx.clone();
        let sink = ProgressSink(SinkTarget::Queue {
            tx: tx.clone(),
            file,
            chunk,
            ticket,
        });
        let handle = tokio::spawn(async move {
            let result = match source.read_range(range.start, range.end).await {
                Ok(payload) => {
                    request.payload = payload;
                    transport.send_chunk(request, sink).await
                }
                Err(e) => Err(TransportError::Source(e.to_string())),
            };
            let _ = tx.send(Signal::ChunkDone {
                file,
                chunk,
                ticket,
                result,
            });
        });
        trace!(file = %file, chunk, ticket, "chunk request dispatched");
        InFlight {
            ticket,
            handle: handle.abort_handle(),
        }
    }

    pub(crate) fn query_offset(&mut self, file: FileId, request: OffsetRequest) -> InFlight {
        let ticket = self.issue();
        let transport = Arc::clone(&self.transport);
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            let result = transport.query_offset(request).await;
            let _ = tx.send(Signal::OffsetReply {
                file,
                ticket,
                result,
            });
        });
        trace!(file = %file, ticket, "offset query dispatched");
        InFlight {
            ticket,
            handle: handle.abort_handle(),
        }
    }

    pub(crate) fn schedule_retry(&mut self, file: FileId, chunk: usize, delay: Duration) -> InFlight {
        let ticket = self.issue();
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Signal::RetryDue {
                file,
                chunk,
                ticket,
            });
        });
        trace!(file = %file, chunk, ticket, delay_ms = delay.as_millis() as u64, "retry scheduled");
        InFlight {
            ticket,
            handle: handle.abort_handle(),
        }
    }

    /// Marks an operation as finished after its signal was consumed.
    pub(crate) fn settle(&mut self, ticket: Ticket) {
        self.outstanding.remove(&ticket);
    }

    /// Aborts an operation. Any signal it already queued becomes stale.
    pub(crate) fn cancel(&mut self, op: InFlight) {
        op.handle.abort();
        self.outstanding.remove(&op.ticket);
        trace!(ticket = op.ticket, "operation cancelled");
    }

    /// Returns `true` when no operation can produce a live signal.
    pub(crate) fn is_idle(&self) -> bool {
        self.outstanding.is_empty()
    }
}
