//! Queue lifecycle events and the listener registry.

use std::fmt;
use std::str::FromStr;

use tracing::trace;

use crate::TransferError;
use crate::types::{FileSnapshot, QueueStats};

/// Event names listeners can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    FileAdded,
    FilesSubmitted,
    UploadStart,
    FileProgress,
    Progress,
    FileSuccess,
    FileError,
    FileRetry,
    Error,
    Complete,
    Pause,
    /// Receives every event after the kind-specific listeners.
    CatchAll,
}

impl EventKind {
    pub const ALL: [EventKind; 12] = [
        EventKind::FileAdded,
        EventKind::FilesSubmitted,
        EventKind::UploadStart,
        EventKind::FileProgress,
        EventKind::Progress,
        EventKind::FileSuccess,
        EventKind::FileError,
        EventKind::FileRetry,
        EventKind::Error,
        EventKind::Complete,
        EventKind::Pause,
        EventKind::CatchAll,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EventKind::FileAdded => "fileAdded",
            EventKind::FilesSubmitted => "filesSubmitted",
            EventKind::UploadStart => "uploadStart",
            EventKind::FileProgress => "fileProgress",
            EventKind::Progress => "progress",
            EventKind::FileSuccess => "fileSuccess",
            EventKind::FileError => "fileError",
            EventKind::FileRetry => "fileRetry",
            EventKind::Error => "error",
            EventKind::Complete => "complete",
            EventKind::Pause => "pause",
            EventKind::CatchAll => "catchAll",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EventKind {
    type Err = TransferError;

    /// Names match case-insensitively (`FileSuccess`, `filesuccess`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| TransferError::UnknownEvent(s.to_string()))
    }
}

/// An event fired by the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    /// A file is about to join the queue. Returning `false` rejects it.
    FileAdded(FileSnapshot),
    /// A batch of additions finished; carries every file in the queue.
    FilesSubmitted(Vec<FileSnapshot>),
    UploadStart,
    FileProgress(FileSnapshot),
    Progress(QueueStats),
    FileSuccess { file: FileSnapshot, reply: String },
    FileError { file: FileSnapshot, reply: String },
    FileRetry(FileSnapshot),
    /// Queue-level error raised after a file error.
    Error { reply: String, file: FileSnapshot },
    Complete,
    Pause,
}

impl QueueEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            QueueEvent::FileAdded(_) => EventKind::FileAdded,
            QueueEvent::FilesSubmitted(_) => EventKind::FilesSubmitted,
            QueueEvent::UploadStart => EventKind::UploadStart,
            QueueEvent::FileProgress(_) => EventKind::FileProgress,
            QueueEvent::Progress(_) => EventKind::Progress,
            QueueEvent::FileSuccess { .. } => EventKind::FileSuccess,
            QueueEvent::FileError { .. } => EventKind::FileError,
            QueueEvent::FileRetry(_) => EventKind::FileRetry,
            QueueEvent::Error { .. } => EventKind::Error,
            QueueEvent::Complete => EventKind::Complete,
            QueueEvent::Pause => EventKind::Pause,
        }
    }

    /// The file the event is about, if any.
    pub fn file(&self) -> Option<&FileSnapshot> {
        match self {
            QueueEvent::FileAdded(file)
            | QueueEvent::FileProgress(file)
            | QueueEvent::FileRetry(file)
            | QueueEvent::FileSuccess { file, .. }
            | QueueEvent::FileError { file, .. }
            | QueueEvent::Error { file, .. } => Some(file),
            _ => None,
        }
    }
}

/// Event callback. Returning `false` prevents the event's default action.
pub type Listener = Box<dyn FnMut(&QueueEvent) -> bool + Send>;

/// Handle for removing a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Listener registry.
#[derive(Default)]
pub struct EventBus {
    listeners: Vec<(ListenerId, EventKind, Listener)>,
    next_id: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&mut self, kind: EventKind, listener: impl FnMut(&QueueEvent) -> bool + Send + 'static) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.listeners.push((id, kind, Box::new(listener)));
        id
    }

    /// Registers by event name, case-insensitively.
    pub fn on_named(
        &mut self,
        name: &str,
        listener: impl FnMut(&QueueEvent) -> bool + Send + 'static,
    ) -> Result<ListenerId, TransferError> {
        let kind = name.parse()?;
        Ok(self.on(kind, listener))
    }

    /// Removes one listener. Returns `false` if it was not registered.
    pub fn off(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _, _)| *lid != id);
        self.listeners.len() != before
    }

    /// Removes every listener of `kind`.
    pub fn off_kind(&mut self, kind: EventKind) {
        self.listeners.retain(|(_, k, _)| *k != kind);
    }

    pub fn clear(&mut self) {
        self.listeners.clear();
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Runs the listeners of the event's kind in registration order, then
    /// the catch-all listeners. Every listener runs even after one returns
    /// `false`. Returns `false` when any listener prevented the default.
    pub fn fire(&mut self, event: &QueueEvent) -> bool {
        let kind = event.kind();
        let mut prevented = false;
        for target in [kind, EventKind::CatchAll] {
            for (_, k, listener) in self.listeners.iter_mut() {
                if *k == target && !listener(event) {
                    prevented = true;
                }
            }
        }
        trace!(event = %kind, prevented, "event fired");
        !prevented
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &'static str, verdict: bool) -> impl FnMut(&QueueEvent) -> bool + Send + 'static {
        let log = Arc::clone(log);
        move |event| {
            log.lock().unwrap().push(format!("{tag}:{}", event.kind()));
            verdict
        }
    }

    #[test]
    fn names_parse_case_insensitively() {
        assert_eq!("FileSuccess".parse::<EventKind>().unwrap(), EventKind::FileSuccess);
        assert_eq!("filesuccess".parse::<EventKind>().unwrap(), EventKind::FileSuccess);
        assert_eq!("CATCHALL".parse::<EventKind>().unwrap(), EventKind::CatchAll);
        assert!(matches!(
            "fileDeleted".parse::<EventKind>(),
            Err(TransferError::UnknownEvent(name)) if name == "fileDeleted"
        ));
    }

    #[test]
    fn every_kind_round_trips_its_name() {
        for kind in EventKind::ALL {
            assert_eq!(kind.name().parse::<EventKind>().unwrap(), kind);
        }
    }

    #[test]
    fn listeners_run_in_order_then_catch_all() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();
        bus.on(EventKind::CatchAll, recorder(&log, "all", true));
        bus.on(EventKind::Complete, recorder(&log, "a", true));
        bus.on(EventKind::Pause, recorder(&log, "other", true));
        bus.on_named("COMPLETE", recorder(&log, "b", true)).unwrap();

        assert!(bus.fire(&QueueEvent::Complete));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:complete", "b:complete", "all:complete"]
        );
    }

    #[test]
    fn veto_still_runs_every_listener() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();
        bus.on(EventKind::UploadStart, recorder(&log, "first", false));
        bus.on(EventKind::UploadStart, recorder(&log, "second", true));
        bus.on(EventKind::CatchAll, recorder(&log, "all", true));

        assert!(!bus.fire(&QueueEvent::UploadStart));
        assert_eq!(log.lock().unwrap().len(), 3);
    }

    #[test]
    fn catch_all_can_prevent() {
        let mut bus = EventBus::new();
        bus.on(EventKind::CatchAll, |_| false);
        assert!(!bus.fire(&QueueEvent::Pause));
    }

    #[test]
    fn no_listeners_means_not_prevented() {
        let mut bus = EventBus::new();
        assert!(bus.fire(&QueueEvent::Complete));
    }

    #[test]
    fn removal() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();
        let a = bus.on(EventKind::Complete, recorder(&log, "a", true));
        bus.on(EventKind::Complete, recorder(&log, "b", true));
        bus.on(EventKind::Pause, recorder(&log, "p", true));

        assert!(bus.off(a));
        assert!(!bus.off(a));
        bus.fire(&QueueEvent::Complete);
        assert_eq!(*log.lock().unwrap(), vec!["b:complete"]);

        bus.off_kind(EventKind::Complete);
        assert_eq!(bus.len(), 1);
        bus.clear();
        assert!(bus.is_empty());
    }

    #[test]
    fn unknown_name_is_rejected() {
        let mut bus = EventBus::new();
        assert!(bus.on_named("nope", |_| true).is_err());
        assert!(bus.is_empty());
    }
}
