//! chunkferry reference endpoint.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use chunkferry_endpoint::{AppState, DEFAULT_BODY_LIMIT, UploadStore, router, serve};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "chunkferry-endpoint", version, about = "Receive chunked uploads into a directory")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    /// Directory uploads are stored under.
    #[arg(long, default_value = "uploads")]
    dir: PathBuf,

    /// Form field carrying the chunk bytes.
    #[arg(long, default_value = "file")]
    file_parameter: String,

    /// Largest accepted request body, in bytes.
    #[arg(long, default_value_t = DEFAULT_BODY_LIMIT)]
    body_limit: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting chunkferry endpoint");

    let store = UploadStore::open(&args.dir)
        .await
        .with_context(|| format!("cannot open upload directory {}", args.dir.display()))?;
    tracing::info!(dir = %store.root().display(), "storing uploads");
    let state = AppState::new(store).with_file_parameter(args.file_parameter);
    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("cannot listen on {}", args.listen))?;

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received Ctrl+C, shutting down");
        }
        on_signal.cancel();
    });

    serve(listener, router(state, args.body_limit), shutdown).await?;
    Ok(())
}
