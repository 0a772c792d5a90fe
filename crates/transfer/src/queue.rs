use std::sync::Arc;

use chunkferry_protocol::ChunkStatus;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::TransferError;
use crate::dispatch::{Dispatcher, Signal};
use crate::events::{EventBus, EventKind, ListenerId, QueueEvent};
use crate::file::{FileCtx, FileOutcome, FileTransfer};
use crate::ledger::ProgressLedger;
use crate::options::UploadOptions;
use crate::source::FileSource;
use crate::transport::ChunkTransport;
use crate::types::{FileId, FileSnapshot, QueueStats};
use crate::validation::is_directory_placeholder;

/// Control messages accepted through a [`QueueHandle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Pause,
    StartFile(FileId),
    PauseFile { id: FileId, skip_in_queue: bool },
    RemoveFile(FileId),
    RemoveAll,
}

/// Cloneable remote control for an [`UploadQueue`].
///
/// Commands are applied by the queue's next [`process_next`](UploadQueue::process_next).
#[derive(Debug, Clone)]
pub struct QueueHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl QueueHandle {
    pub fn send(&self, command: Command) -> Result<(), TransferError> {
        self.tx.send(command).map_err(|_| TransferError::QueueClosed)
    }

    pub fn start(&self) -> Result<(), TransferError> {
        self.send(Command::Start)
    }

    pub fn pause(&self) -> Result<(), TransferError> {
        self.send(Command::Pause)
    }

    pub fn start_file(&self, id: FileId) -> Result<(), TransferError> {
        self.send(Command::StartFile(id))
    }

    pub fn pause_file(&self, id: FileId, skip_in_queue: bool) -> Result<(), TransferError> {
        self.send(Command::PauseFile { id, skip_in_queue })
    }

    pub fn remove_file(&self, id: FileId) -> Result<(), TransferError> {
        self.send(Command::RemoveFile(id))
    }

    pub fn remove_all(&self) -> Result<(), TransferError> {
        self.send(Command::RemoveAll)
    }
}

/// Ordered set of files uploaded under a concurrency limit.
///
/// The queue owns all upload state. Network work runs on spawned tasks and
/// is folded back in by [`process_next`](Self::process_next) /
/// [`run`](Self::run); nothing changes between those calls except through
/// the queue's own methods.
pub struct UploadQueue {
    files: Vec<FileTransfer>,
    options: UploadOptions,
    ledger: ProgressLedger,
    paused: bool,
    /// `Complete` was fired and no file started since.
    drained: bool,
    completed_files: usize,
    next_file_id: u64,
    events: EventBus,
    dispatcher: Dispatcher,
    signals: mpsc::UnboundedReceiver<Signal>,
    commands: mpsc::UnboundedReceiver<Command>,
    command_tx: mpsc::UnboundedSender<Command>,
}

impl UploadQueue {
    pub fn new(options: UploadOptions, transport: Arc<dyn ChunkTransport>) -> Self {
        let (signal_tx, signals) = mpsc::unbounded_channel();
        let (command_tx, commands) = mpsc::unbounded_channel();
        Self {
            files: Vec::new(),
            options,
            ledger: ProgressLedger::default(),
            paused: false,
            drained: false,
            completed_files: 0,
            next_file_id: 1,
            events: EventBus::new(),
            dispatcher: Dispatcher::new(transport, signal_tx),
            signals,
            commands,
            command_tx,
        }
    }

    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    pub fn handle(&self) -> QueueHandle {
        QueueHandle {
            tx: self.command_tx.clone(),
        }
    }

    pub fn events(&mut self) -> &mut EventBus {
        &mut self.events
    }

    pub fn on(&mut self, kind: EventKind, listener: impl FnMut(&QueueEvent) -> bool + Send + 'static) -> ListenerId {
        self.events.on(kind, listener)
    }

    pub fn on_named(
        &mut self,
        name: &str,
        listener: impl FnMut(&QueueEvent) -> bool + Send + 'static,
    ) -> Result<ListenerId, TransferError> {
        self.events.on_named(name, listener)
    }

    pub fn off(&mut self, id: ListenerId) -> bool {
        self.events.off(id)
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Whether any file is transferring.
    pub fn is_uploading(&self) -> bool {
        self.files.iter().any(FileTransfer::is_uploading)
    }

    /// Whether no background operation can still report back.
    pub fn is_idle(&self) -> bool {
        self.dispatcher.is_idle()
    }

    pub fn ledger(&self) -> &ProgressLedger {
        &self.ledger
    }

    /// Completed fraction of all queued bytes; `1` for an empty queue.
    pub fn progress(&self) -> f64 {
        self.ledger.progress()
    }

    /// Estimated seconds until every queued byte is sent.
    pub fn time_remaining(&self) -> f64 {
        self.ledger.time_remaining()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            total_bytes: self.ledger.total_bytes(),
            completed_bytes: self.ledger.completed_bytes(),
            progress: self.ledger.progress(),
            file_count: self.files.len(),
            completed_files: self.completed_files,
            active_files: self.ledger.active(),
            average_speed: self.ledger.average_speed(),
            time_remaining: self.ledger.time_remaining(),
            paused: self.paused,
        }
    }

    pub fn file(&self, id: FileId) -> Option<FileSnapshot> {
        self.position(id).map(|index| self.files[index].snapshot())
    }

    pub fn files(&self) -> Vec<FileSnapshot> {
        self.files.iter().map(FileTransfer::snapshot).collect()
    }

    /// Status of each chunk of the file's current attempt.
    pub fn chunk_statuses(&self, id: FileId) -> Option<Vec<ChunkStatus>> {
        self.position(id)
            .map(|index| self.files[index].chunk_statuses(&self.options))
    }

    fn position(&self, id: FileId) -> Option<usize> {
        self.files.iter().position(|f| f.id() == id)
    }

    fn require(&self, id: FileId) -> Result<usize, TransferError> {
        self.position(id).ok_or(TransferError::FileNotFound(id))
    }

    fn with_file<R>(&mut self, index: usize, f: impl FnOnce(&mut FileTransfer, &mut FileCtx<'_>) -> R) -> R {
        let mut ctx = FileCtx {
            dispatcher: &mut self.dispatcher,
            ledger: &mut self.ledger,
            options: &self.options,
        };
        f(&mut self.files[index], &mut ctx)
    }

    // ---------------------------------------------------------------------
    // Adding files
    // ---------------------------------------------------------------------

    pub fn add_file(&mut self, source: Arc<dyn FileSource>) -> Option<FileId> {
        self.add_files([source]).into_iter().next()
    }

    /// Adds a batch of sources and returns the ids of those accepted.
    ///
    /// Directory placeholders, duplicates (by fingerprint) and files vetoed
    /// by a `FileAdded` listener are skipped.
    pub fn add_files<I>(&mut self, sources: I) -> Vec<FileId>
    where
        I: IntoIterator<Item = Arc<dyn FileSource>>,
    {
        let mut added = Vec::new();
        for source in sources {
            if self.options.settings.single_file && !self.files.is_empty() {
                debug!(name = %source.name(), "single-file queue already holds a file");
                break;
            }
            if is_directory_placeholder(source.name(), source.size()) {
                debug!(size = source.size(), "skipping directory placeholder");
                continue;
            }
            let fingerprint = self.options.fingerprint_of(source.as_ref());
            if self.files.iter().any(|f| f.info().fingerprint == fingerprint) {
                debug!(name = %source.name(), %fingerprint, "skipping duplicate file");
                continue;
            }

            let id = FileId(self.next_file_id);
            let file = FileTransfer::new(id, source, fingerprint);
            if !self.events.fire(&QueueEvent::FileAdded(file.snapshot())) {
                debug!(file = %id, name = %file.info().name, "file rejected by listener");
                continue;
            }
            self.next_file_id += 1;
            self.ledger.add_total(file.info().size);
            self.drained = false;
            debug!(file = %id, name = %file.info().name, size = file.info().size, "file added");
            self.files.push(file);
            added.push(id);
        }

        self.events.fire(&QueueEvent::FilesSubmitted(self.files()));
        if self.options.settings.start_on_submit {
            self.start();
        }
        added
    }

    // ---------------------------------------------------------------------
    // Control
    // ---------------------------------------------------------------------

    /// Clears the pause flag and admits files up to the concurrency limit.
    pub fn start(&mut self) {
        self.paused = false;
        info!(files = self.files.len(), "upload queue started");
        self.upload_next_file();
        self.events.fire(&QueueEvent::UploadStart);
    }

    /// Stops all transfers. Stored bytes are kept; resumed files negotiate
    /// their offset again.
    pub fn pause(&mut self) {
        self.paused = true;
        for index in 0..self.files.len() {
            let file = &self.files[index];
            if file.is_queue_paused() || file.is_paused() || file.is_complete() {
                continue;
            }
            self.pause_at(index, false);
        }
        self.ledger.reset_active();
        info!("upload queue paused");
        self.events.fire(&QueueEvent::Pause);
    }

    /// Starts one file immediately, regardless of the concurrency limit.
    pub fn start_file(&mut self, id: FileId) -> Result<(), TransferError> {
        let index = self.require(id)?;
        if !self.files[index].is_complete() && !self.files[index].is_uploading() {
            self.drained = false;
        }
        self.with_file(index, |file, ctx| file.start(ctx));
        Ok(())
    }

    /// Pauses one file. With `skip_in_queue` the scheduler leaves it alone
    /// and hands its slot to the next file.
    pub fn pause_file(&mut self, id: FileId, skip_in_queue: bool) -> Result<(), TransferError> {
        let index = self.require(id)?;
        self.pause_at(index, skip_in_queue);
        Ok(())
    }

    fn pause_at(&mut self, index: usize, skip_in_queue: bool) {
        let Some(paused) = self.with_file(index, |file, ctx| file.pause(skip_in_queue, ctx)) else {
            return;
        };
        if paused.was_uploading {
            self.ledger.transfer_stopped();
        }
        if paused.skip_in_queue {
            self.upload_next_file();
        }
        self.events
            .fire(&QueueEvent::FileProgress(self.files[index].snapshot()));
    }

    pub fn remove_file(&mut self, id: FileId) -> Result<(), TransferError> {
        let index = self.require(id)?;
        if self.remove_at(index) {
            self.upload_next_file();
        }
        Ok(())
    }

    /// Removes every file, last to first.
    pub fn remove_all(&mut self) {
        for index in (0..self.files.len()).rev() {
            self.remove_at(index);
        }
        self.ledger.reset_speed();
        self.ledger.reset_active();
    }

    /// Drops a file and its byte contribution. Returns whether it was
    /// uploading.
    fn remove_at(&mut self, index: usize) -> bool {
        let mut file = self.files.remove(index);
        let was_uploading = file.is_uploading();
        {
            let mut ctx = FileCtx {
                dispatcher: &mut self.dispatcher,
                ledger: &mut self.ledger,
                options: &self.options,
            };
            if was_uploading {
                file.abort(&mut ctx);
            }
            file.withdraw(ctx.ledger);
            file.reset(ctx.dispatcher);
        }
        self.ledger.remove_total(file.info().size);
        if was_uploading {
            self.ledger.transfer_stopped();
        }
        if file.is_complete() {
            self.completed_files = self.completed_files.saturating_sub(1);
        }
        info!(file = %file.id(), name = %file.info().name, "file removed");
        was_uploading
    }

    /// Admits files in insertion order while slots are free.
    fn upload_next_file(&mut self) {
        if self.paused {
            return;
        }
        let limit = self.options.settings.concurrency();
        let mut started = false;
        let mut busy = false;
        for index in 0..self.files.len() {
            let file = &self.files[index];
            if file.is_complete() {
                continue;
            }
            if file.is_queue_paused() || file.is_uploading() {
                busy = true;
                continue;
            }
            if self.ledger.active() >= limit {
                busy = true;
                break;
            }
            self.with_file(index, |file, ctx| file.start(ctx));
            started = true;
        }

        if started {
            self.drained = false;
        } else if !busy && !self.drained {
            self.drained = true;
            info!(files = self.completed_files, "upload queue complete");
            self.events.fire(&QueueEvent::Complete);
        }
    }

    // ---------------------------------------------------------------------
    // Event loop
    // ---------------------------------------------------------------------

    /// Applies one pending command or background signal.
    ///
    /// Waits while background work is outstanding. Returns `false` without
    /// waiting once the queue is idle and no command is pending.
    pub async fn process_next(&mut self) -> bool {
        if let Ok(command) = self.commands.try_recv() {
            self.apply(command);
            return true;
        }
        if self.dispatcher.is_idle() {
            return false;
        }
        tokio::select! {
            Some(signal) = self.signals.recv() => self.handle_signal(signal),
            Some(command) = self.commands.recv() => self.apply(command),
            else => return false,
        }
        true
    }

    /// Processes signals and commands until the queue is idle.
    pub async fn run(&mut self) {
        while self.process_next().await {}
    }

    fn apply(&mut self, command: Command) {
        debug!(?command, "applying queue command");
        let result = match command {
            Command::Start => {
                self.start();
                Ok(())
            }
            Command::Pause => {
                self.pause();
                Ok(())
            }
            Command::StartFile(id) => self.start_file(id),
            Command::PauseFile { id, skip_in_queue } => self.pause_file(id, skip_in_queue),
            Command::RemoveFile(id) => self.remove_file(id),
            Command::RemoveAll => {
                self.remove_all();
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!(error = %e, "queue command failed");
        }
    }

    fn handle_signal(&mut self, signal: Signal) {
        match signal {
            Signal::ChunkProgress {
                file,
                chunk,
                ticket,
                loaded,
                total,
            } => {
                let Some(index) = self.position(file) else {
                    return;
                };
                let outcome = self.with_file(index, |f, ctx| f.chunk_progress(chunk, ticket, loaded, total, ctx));
                self.apply_outcome(index, outcome);
            }
            Signal::ChunkDone {
                file,
                chunk,
                ticket,
                result,
            } => {
                let Some(index) = self.position(file) else {
                    return;
                };
                let outcome = self.with_file(index, |f, ctx| f.chunk_done(chunk, ticket, result, ctx));
                self.apply_outcome(index, outcome);
            }
            Signal::RetryDue {
                file,
                chunk,
                ticket,
            } => {
                if let Some(index) = self.position(file) {
                    self.with_file(index, |f, ctx| f.retry_due(chunk, ticket, ctx));
                }
            }
            Signal::OffsetReply {
                file,
                ticket,
                result,
            } => {
                let Some(index) = self.position(file) else {
                    return;
                };
                let outcome = self.with_file(index, |f, ctx| f.offset_reply(ticket, result, ctx));
                self.apply_outcome(index, outcome);
            }
        }
    }

    fn apply_outcome(&mut self, index: usize, outcome: FileOutcome) {
        match outcome {
            FileOutcome::Nothing => {}
            FileOutcome::Progress => {
                let snapshot = self.files[index].snapshot();
                self.report_progress(snapshot);
            }
            FileOutcome::Retry => {
                self.events
                    .fire(&QueueEvent::FileRetry(self.files[index].snapshot()));
            }
            FileOutcome::Succeeded { reply, report } => {
                self.report_progress(report);
                self.file_succeeded(index, reply);
            }
            FileOutcome::Failed(reply) => self.file_failed(index, reply),
        }
    }

    fn report_progress(&mut self, snapshot: FileSnapshot) {
        self.events.fire(&QueueEvent::FileProgress(snapshot));
        self.events.fire(&QueueEvent::Progress(self.stats()));
    }

    fn file_succeeded(&mut self, index: usize, reply: String) {
        self.ledger.transfer_stopped();
        self.completed_files += 1;
        self.events.fire(&QueueEvent::Progress(self.stats()));
        self.events.fire(&QueueEvent::FileSuccess {
            file: self.files[index].snapshot(),
            reply,
        });
        self.upload_next_file();
    }

    /// A permanent file failure stops the whole queue until restarted.
    fn file_failed(&mut self, index: usize, reply: String) {
        self.ledger.transfer_stopped();
        let file = self.files[index].snapshot();
        warn!(file = %file.id, name = %file.name, reply = %reply, "upload failed");
        self.events.fire(&QueueEvent::FileError {
            file: file.clone(),
            reply: reply.clone(),
        });
        self.events.fire(&QueueEvent::Error { reply, file });
        self.pause();
    }
}

impl std::fmt::Debug for UploadQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadQueue")
            .field("files", &self.files.len())
            .field("paused", &self.paused)
            .field("ledger", &self.ledger)
            .finish_non_exhaustive()
    }
}
