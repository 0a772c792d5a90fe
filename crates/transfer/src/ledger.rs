//! Byte and activity counters shared between files and their queue.

use crate::progress;

/// Queue-wide counters.
///
/// Only the queue owns a ledger. Files adjust it through [`ByteCounters`],
/// which always moves a file's own count and the queue's count together.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ProgressLedger {
    total_bytes: u64,
    completed_bytes: u64,
    active: usize,
    average_speed: f64,
}

impl ProgressLedger {
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn completed_bytes(&self) -> u64 {
        self.completed_bytes
    }

    /// Number of files currently transferring.
    pub fn active(&self) -> usize {
        self.active
    }

    /// Average speed most recently published by any file, in bytes/s.
    pub fn average_speed(&self) -> f64 {
        self.average_speed
    }

    /// Completed fraction; an empty ledger counts as done.
    pub fn progress(&self) -> f64 {
        if self.total_bytes == 0 {
            if self.completed_bytes == 0 { 1.0 } else { 0.0 }
        } else {
            (self.completed_bytes as f64 / self.total_bytes as f64).min(1.0)
        }
    }

    /// Estimated seconds until the queue drains.
    pub fn time_remaining(&self) -> f64 {
        progress::seconds_remaining(
            self.total_bytes.saturating_sub(self.completed_bytes),
            self.average_speed,
        )
    }

    pub(crate) fn add_total(&mut self, bytes: u64) {
        self.total_bytes += bytes;
    }

    pub(crate) fn remove_total(&mut self, bytes: u64) {
        self.total_bytes = self.total_bytes.saturating_sub(bytes);
    }

    pub(crate) fn transfer_started(&mut self) {
        self.active += 1;
    }

    pub(crate) fn transfer_stopped(&mut self) {
        self.active = self.active.saturating_sub(1);
    }

    pub(crate) fn reset_active(&mut self) {
        self.active = 0;
    }

    pub(crate) fn publish_speed(&mut self, average_speed: f64) {
        self.average_speed = average_speed;
    }

    pub(crate) fn reset_speed(&mut self) {
        self.average_speed = 0.0;
    }
}

/// A file's completed-byte count paired with its queue's ledger.
pub(crate) struct ByteCounters<'a> {
    file: &'a mut u64,
    ledger: &'a mut ProgressLedger,
}

impl<'a> ByteCounters<'a> {
    pub(crate) fn new(file: &'a mut u64, ledger: &'a mut ProgressLedger) -> Self {
        Self { file, ledger }
    }

    pub(crate) fn credit(&mut self, bytes: u64) {
        *self.file += bytes;
        self.ledger.completed_bytes += bytes;
    }

    pub(crate) fn debit(&mut self, bytes: u64) {
        *self.file = self.file.saturating_sub(bytes);
        self.ledger.completed_bytes = self.ledger.completed_bytes.saturating_sub(bytes);
    }

    /// Replaces the file's count with `bytes`, moving the queue by the
    /// same difference.
    pub(crate) fn rebase(&mut self, bytes: u64) {
        let previous = *self.file;
        self.debit(previous);
        self.credit(bytes);
    }

    /// Removes the file's whole contribution from the queue.
    pub(crate) fn withdraw_all(&mut self) {
        let previous = *self.file;
        self.debit(previous);
    }
}
