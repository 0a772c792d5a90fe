//! chunkferry command-line uploader.

mod config;
mod scanner;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Context;
use chunkferry_http::HttpTransport;
use chunkferry_transfer::{EventKind, FileSource, QueueEvent, UploadOptions, UploadQueue};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::SettingsArgs;

#[derive(Debug, Parser)]
#[command(name = "chunkferry-upload", version, about = "Upload files in resumable chunks")]
struct Args {
    /// Files or directories to upload.
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// JSON settings file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Per-request timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,

    #[command(flatten)]
    settings: SettingsArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    info!(version = env!("CARGO_PKG_VERSION"), "starting chunkferry uploader");

    let mut settings = config::load(args.config.as_deref())?;
    args.settings.apply(&mut settings);

    let mut transport = HttpTransport::builder().with_credentials(settings.with_credentials);
    if let Some(secs) = args.timeout {
        transport = transport.timeout(Duration::from_secs(secs));
    }
    let transport = Arc::new(transport.build().context("cannot build HTTP client")?);

    let sources = scanner::scan_paths(&args.paths).context("cannot scan input paths")?;
    if sources.is_empty() {
        warn!("nothing to upload");
        return Ok(());
    }
    for file in &sources {
        debug!(path = %file.path().display(), size = file.size(), "found file");
    }

    let mut queue = UploadQueue::new(UploadOptions::new(settings), transport);
    let failures = Arc::new(AtomicUsize::new(0));
    log_events(&mut queue, Arc::clone(&failures));

    let ids = queue.add_files(sources.into_iter().map(|file| Arc::new(file) as Arc<dyn FileSource>));
    info!(files = ids.len(), bytes = queue.ledger().total_bytes(), "files queued");

    let shutdown = CancellationToken::new();
    let handle = queue.handle();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, pausing uploads");
            if let Err(e) = handle.pause() {
                debug!(error = %e, "queue already finished");
            }
            on_signal.cancel();
        }
    });

    queue.start();
    queue.run().await;

    let stats = queue.stats();
    if shutdown.is_cancelled() {
        info!(
            completed = stats.completed_files,
            files = stats.file_count,
            "upload interrupted; run again to resume"
        );
        return Ok(());
    }
    let failed = failures.load(Ordering::Relaxed);
    if failed > 0 {
        anyhow::bail!("{failed} file(s) failed to upload");
    }
    info!(files = stats.completed_files, bytes = stats.total_bytes, "all uploads finished");
    Ok(())
}

fn log_events(queue: &mut UploadQueue, failures: Arc<AtomicUsize>) {
    queue.on(EventKind::FileProgress, |event| {
        if let QueueEvent::FileProgress(file) = event {
            debug!(
                file = %file.name,
                progress = format_args!("{:.1}%", file.progress * 100.0),
                speed = file.average_speed as u64,
                eta = file.time_remaining,
                "file progress"
            );
        }
        true
    });
    queue.on(EventKind::FileRetry, |event| {
        if let Some(file) = event.file() {
            warn!(file = %file.name, "retrying chunk");
        }
        true
    });
    queue.on(EventKind::FileSuccess, |event| {
        if let QueueEvent::FileSuccess { file, reply } = event {
            info!(file = %file.name, bytes = file.size, reply = %reply, "uploaded");
        }
        true
    });
    queue.on(EventKind::FileError, move |event| {
        if let QueueEvent::FileError { file, reply } = event {
            failures.fetch_add(1, Ordering::Relaxed);
            error!(file = %file.name, reply = %reply, "upload failed");
        }
        true
    });
    queue.on(EventKind::Complete, |_| {
        info!("queue drained");
        true
    });
}
