//! Health signals for files that fail mid-read.

use crate::error::VfsError;
use std::sync::{Mutex, PoisonError};

/// Receives out-of-band reports about damaged files.
///
/// Reports are fire-and-forget; implementations must not block for long.
pub trait HealthReporter: Send + Sync {
    /// Some bytes were served before the failure.
    fn mark_partial(&self, path: &str, err: &VfsError);
    /// Nothing could be served.
    fn mark_corrupted(&self, path: &str, err: &VfsError);
}

/// Discards every report.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHealthReporter;

impl HealthReporter for NoopHealthReporter {
    fn mark_partial(&self, _path: &str, _err: &VfsError) {}
    fn mark_corrupted(&self, _path: &str, _err: &VfsError) {}
}

/// Kind of health report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthEvent {
    Partial,
    Corrupted,
}

/// Keeps reports in memory, in arrival order.
#[derive(Debug, Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<(HealthEvent, String, String)>>,
}

impl RecordingHealthReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(event, path, error message)` triples.
    pub fn events(&self) -> Vec<(HealthEvent, String, String)> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, event: HealthEvent, path: &str, err: &VfsError) {
        tracing::info!(path, ?event, error = %err, "health.report");
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((event, path.to_string(), err.to_string()));
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn mark_partial(&self, path: &str, err: &VfsError) {
        self.record(HealthEvent::Partial, path, err);
    }

    fn mark_corrupted(&self, path: &str, err: &VfsError) {
        self.record(HealthEvent::Corrupted, path, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_reporter_keeps_order() {
        let reporter = RecordingHealthReporter::new();
        reporter.mark_corrupted("a.mkv", &VfsError::corrupted_stream(10, "gone"));
        reporter.mark_partial("b.mkv", &VfsError::partial(1, 10, "reset"));

        let events = reporter.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].0, HealthEvent::Corrupted);
        assert_eq!(events[0].1, "a.mkv");
        assert_eq!(events[1].0, HealthEvent::Partial);
        assert!(events[1].2.contains("reset"));
    }
}
