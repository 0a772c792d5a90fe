//! Streaming request body that reports upload progress.

use bytes::Bytes;
use chunkferry_transfer::ProgressSink;
use futures_util::Stream;
use futures_util::stream;

/// Splits `payload` into `step`-sized pieces and reports the running total
/// to `sink` as each piece is pulled by the HTTP client.
pub(crate) fn progress_stream(
    payload: Bytes,
    step: usize,
    sink: ProgressSink,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + Sync + 'static {
    let step = step.max(1);
    let total = payload.len() as u64;
    stream::unfold((payload, 0usize), move |(payload, sent)| {
        let sink = sink.clone();
        async move {
            if sent >= payload.len() {
                return None;
            }
            let end = (sent + step).min(payload.len());
            let piece = payload.slice(sent..end);
            sink.report(end as u64, total);
            Some((Ok(piece), (payload, end)))
        }
    })
}
