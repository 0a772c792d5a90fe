//! HTTP round trips between the upload queue and the reference endpoint.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chunkferry_endpoint::{AppState, DEFAULT_BODY_LIMIT, UPLOAD_ROUTE, UploadStore, router, serve};
use chunkferry_http::HttpTransport;
use chunkferry_protocol::EndpointReply;
use chunkferry_transfer::{
    EventKind, FileSource, FileState, MemoryFile, QueueEvent, UploadOptions, UploadQueue, UploadSettings,
};
use tokio_util::sync::CancellationToken;

struct Server {
    addr: SocketAddr,
    shutdown: CancellationToken,
    task: tokio::task::JoinHandle<std::io::Result<()>>,
}

impl Server {
    async fn start(dir: &Path) -> Self {
        let store = UploadStore::open(dir).await.unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(serve(
            listener,
            router(AppState::new(store), DEFAULT_BODY_LIMIT),
            shutdown.clone(),
        ));
        Self { addr, shutdown, task }
    }

    fn url(&self) -> String {
        format!("http://{}{}", self.addr, UPLOAD_ROUTE)
    }

    async fn stop(self) {
        self.shutdown.cancel();
        self.task.await.unwrap().unwrap();
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 253) as u8).collect()
}

fn queue(target: String, chunk_size: u64) -> (UploadQueue, Arc<Mutex<Vec<QueueEvent>>>) {
    let settings = UploadSettings {
        target,
        chunk_size: Some(chunk_size),
        ..Default::default()
    };
    let transport = Arc::new(HttpTransport::new().unwrap());
    let mut queue = UploadQueue::new(UploadOptions::new(settings), transport);
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    queue.on(EventKind::CatchAll, move |event| {
        sink.lock().unwrap().push(event.clone());
        true
    });
    (queue, log)
}

fn success_reply(log: &Mutex<Vec<QueueEvent>>) -> Option<EndpointReply> {
    log.lock().unwrap().iter().find_map(|event| match event {
        QueueEvent::FileSuccess { reply, .. } => EndpointReply::parse(reply),
        _ => None,
    })
}

#[tokio::test]
async fn multi_chunk_upload_is_byte_exact() {
    let dir = tempfile::tempdir().unwrap();
    let server = Server::start(dir.path()).await;
    let data = pattern(3500);

    let (mut queue, log) = queue(server.url(), 1000);
    let source: Arc<dyn FileSource> =
        Arc::new(MemoryFile::new("report.bin", data.clone()).with_relative_path("docs/report.bin"));
    let id = queue.add_file(source).unwrap();
    queue.start();
    queue.run().await;

    assert_eq!(queue.file(id).unwrap().state, FileState::Complete);
    assert_eq!(queue.progress(), 1.0);
    assert_eq!(std::fs::read(dir.path().join("docs/report.bin")).unwrap(), data);
    assert!(!dir.path().join("docs/report.bin.3500.upload").exists());

    let reply = success_reply(&log).unwrap();
    assert!(reply.success);
    assert_eq!(reply.msg.as_deref(), Some("File report.bin successfully uploaded"));
    server.stop().await;
}

#[tokio::test]
async fn single_chunk_file_skips_offset_query() {
    let dir = tempfile::tempdir().unwrap();
    let server = Server::start(dir.path()).await;

    let (mut queue, log) = queue(server.url(), 1000);
    queue.add_file(Arc::new(MemoryFile::new("note.txt", b"hello".to_vec())));
    queue.start();
    queue.run().await;

    assert_eq!(std::fs::read(dir.path().join("note.txt")).unwrap(), b"hello");
    let reply = success_reply(&log).unwrap();
    assert_eq!(reply.msg.as_deref(), Some("File uploaded in one chunk"));
    server.stop().await;
}

#[tokio::test]
async fn upload_resumes_from_partial_accumulation() {
    let dir = tempfile::tempdir().unwrap();
    let server = Server::start(dir.path()).await;
    let data = pattern(3500);

    // A previous session left 2000 bytes behind. They are marked so the
    // final file proves they were kept rather than sent again.
    let marker = vec![0xAAu8; 2000];
    std::fs::write(dir.path().join("movie.bin.3500.upload"), &marker).unwrap();

    let (mut queue, _) = queue(server.url(), 1000);
    let id = queue.add_file(Arc::new(MemoryFile::new("movie.bin", data.clone()))).unwrap();
    queue.start();

    // The offset reply arrives first and rebases the counters.
    assert!(queue.process_next().await);
    let file = queue.file(id).unwrap();
    assert_eq!(file.offset, 2000);
    assert_eq!(file.completed_bytes, 2000);

    queue.run().await;
    assert_eq!(queue.file(id).unwrap().state, FileState::Complete);
    let stored = std::fs::read(dir.path().join("movie.bin")).unwrap();
    assert_eq!(stored.len(), 3500);
    assert_eq!(&stored[..2000], marker.as_slice());
    assert_eq!(&stored[2000..], &data[2000..]);
    server.stop().await;
}

#[tokio::test]
async fn traversal_is_a_permanent_error() {
    let dir = tempfile::tempdir().unwrap();
    let server = Server::start(dir.path()).await;

    let (mut queue, log) = queue(server.url(), 1000);
    let id = queue
        .add_file(Arc::new(MemoryFile::new("x.txt", b"x".to_vec()).with_relative_path("../escape/x.txt")))
        .unwrap();
    queue.start();
    queue.run().await;

    assert_eq!(queue.file(id).unwrap().state, FileState::Error);
    assert!(queue.is_paused());
    let events = log.lock().unwrap();
    let reply = events
        .iter()
        .find_map(|event| match event {
            QueueEvent::Error { reply, .. } => EndpointReply::parse(reply),
            _ => None,
        })
        .unwrap();
    assert!(!reply.success);
    assert!(reply.msg.unwrap().starts_with("invalid path"));
    drop(events);
    server.stop().await;
}
