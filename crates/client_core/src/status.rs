use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex, PoisonError,
};

/// Observable request state of a store: exactly one variant holds at a time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncStatus {
    #[default]
    Idle,
    Loading,
    Failed(String),
}

impl SyncStatus {
    pub fn is_loading(&self) -> bool {
        matches!(self, SyncStatus::Loading)
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            SyncStatus::Failed(message) => Some(message),
            _ => None,
        }
    }
}

/// Tracks in-flight network operations and the last recorded failure.
///
/// The loading count is released by [`InFlight`] on drop, so an operation
/// that errors out or whose future is dropped mid-await still leaves the
/// store idle.
#[derive(Debug, Default)]
pub(crate) struct StatusTracker {
    in_flight: AtomicUsize,
    last_error: Mutex<Option<String>>,
}

pub(crate) struct InFlight<'a> {
    tracker: &'a StatusTracker,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.tracker.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

impl StatusTracker {
    /// Marks the start of a network-issuing operation and clears the previous
    /// error.
    pub(crate) fn begin(&self) -> InFlight<'_> {
        *self.error_slot() = None;
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        InFlight { tracker: self }
    }

    pub(crate) fn fail(&self, message: impl Into<String>) {
        *self.error_slot() = Some(message.into());
    }

    pub(crate) fn is_loading(&self) -> bool {
        self.in_flight.load(Ordering::Acquire) > 0
    }

    pub(crate) fn error(&self) -> Option<String> {
        self.error_slot().clone()
    }

    pub(crate) fn status(&self) -> SyncStatus {
        if self.is_loading() {
            return SyncStatus::Loading;
        }
        match self.error() {
            Some(message) => SyncStatus::Failed(message),
            None => SyncStatus::Idle,
        }
    }

    fn error_slot(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
