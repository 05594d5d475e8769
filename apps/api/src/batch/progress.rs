//! Aggregate progress counters shared between workers and observers.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use crate::batch::job::{JobId, JobState};

/// Point-in-time copy of the batch counters.
/// `pending + in_flight + completed == total` in every snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub pending: usize,
    pub in_flight: usize,
    pub completed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Highest `in_flight` seen so far.
    pub peak_in_flight: usize,
}

impl ProgressSnapshot {
    pub fn percent_complete(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.completed as f64 / self.total as f64 * 100.0
    }

    pub fn is_finished(&self) -> bool {
        self.completed == self.total
    }
}

#[derive(Debug, Default)]
struct Counters {
    total: usize,
    pending: usize,
    extracting: usize,
    analyzing: usize,
    succeeded: usize,
    failed: usize,
    skipped: usize,
    peak_in_flight: usize,
}

impl Counters {
    fn slot(&mut self, state: JobState) -> &mut usize {
        match state {
            JobState::Pending => &mut self.pending,
            JobState::Extracting => &mut self.extracting,
            JobState::Analyzing => &mut self.analyzing,
            JobState::Succeeded => &mut self.succeeded,
            JobState::Failed => &mut self.failed,
            JobState::Skipped => &mut self.skipped,
        }
    }

    fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.total,
            pending: self.pending,
            in_flight: self.extracting + self.analyzing,
            completed: self.succeeded + self.failed + self.skipped,
            succeeded: self.succeeded,
            failed: self.failed,
            skipped: self.skipped,
            peak_in_flight: self.peak_in_flight,
        }
    }
}

struct Inner {
    counters: Mutex<Counters>,
    updates: watch::Sender<ProgressSnapshot>,
}

/// Cheap to clone; all clones observe the same counters.
#[derive(Clone)]
pub struct ProgressTracker {
    inner: Arc<Inner>,
}

impl ProgressTracker {
    /// A tracker for `total` jobs, all starting in Pending.
    pub fn new(total: usize) -> Self {
        let counters = Counters {
            total,
            pending: total,
            ..Default::default()
        };
        let (updates, _) = watch::channel(counters.snapshot());
        Self {
            inner: Arc::new(Inner {
                counters: Mutex::new(counters),
                updates,
            }),
        }
    }

    pub fn record_transition(&self, job_id: JobId, from: JobState, to: JobState) {
        let mut counters = self.lock();
        let from_slot = counters.slot(from);
        *from_slot = from_slot.saturating_sub(1);
        *counters.slot(to) += 1;

        let in_flight = counters.extracting + counters.analyzing;
        counters.peak_in_flight = counters.peak_in_flight.max(in_flight);

        let snapshot = counters.snapshot();
        self.inner.updates.send_replace(snapshot);
        drop(counters);

        debug!(
            job = %job_id,
            %from,
            %to,
            completed = snapshot.completed,
            total = snapshot.total,
            "Job transition"
        );
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.lock().snapshot()
    }

    /// Receives a fresh snapshot after every transition.
    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.inner.updates.subscribe()
    }

    // A poisoned lock only means a panic happened mid-update of plain counters.
    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.inner
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ProgressTracker")
            .field(&self.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_consistent(s: &ProgressSnapshot) {
        assert_eq!(s.pending + s.in_flight + s.completed, s.total, "{s:?}");
        assert_eq!(s.succeeded + s.failed + s.skipped, s.completed, "{s:?}");
    }

    #[test]
    fn test_new_tracker_is_all_pending() {
        let tracker = ProgressTracker::new(4);
        let s = tracker.snapshot();
        assert_eq!(s.pending, 4);
        assert_eq!(s.percent_complete(), 0.0);
        assert!(!s.is_finished());
        assert_consistent(&s);
    }

    #[test]
    fn test_transitions_move_counts() {
        let tracker = ProgressTracker::new(2);
        tracker.record_transition(JobId(0), JobState::Pending, JobState::Extracting);
        tracker.record_transition(JobId(1), JobState::Pending, JobState::Extracting);
        tracker.record_transition(JobId(0), JobState::Extracting, JobState::Analyzing);
        let s = tracker.snapshot();
        assert_eq!(s.in_flight, 2);
        assert_eq!(s.peak_in_flight, 2);
        assert_consistent(&s);

        tracker.record_transition(JobId(0), JobState::Analyzing, JobState::Succeeded);
        tracker.record_transition(JobId(1), JobState::Extracting, JobState::Failed);
        let s = tracker.snapshot();
        assert_eq!((s.succeeded, s.failed, s.in_flight), (1, 1, 0));
        assert_eq!(s.peak_in_flight, 2);
        assert!(s.is_finished());
        assert_consistent(&s);
    }

    #[test]
    fn test_concurrent_updates_stay_consistent() {
        let tracker = ProgressTracker::new(800);
        let threads: Vec<_> = (0..8)
            .map(|t| {
                let tracker = tracker.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let id = JobId(t * 100 + i);
                        tracker.record_transition(id, JobState::Pending, JobState::Extracting);
                        assert_consistent(&tracker.snapshot());
                        tracker.record_transition(id, JobState::Extracting, JobState::Analyzing);
                        tracker.record_transition(id, JobState::Analyzing, JobState::Succeeded);
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        let s = tracker.snapshot();
        assert_eq!(s.succeeded, 800);
        assert!(s.is_finished());
    }

    #[tokio::test]
    async fn test_subscribers_see_updates() {
        let tracker = ProgressTracker::new(1);
        let mut rx = tracker.subscribe();
        tracker.record_transition(JobId(0), JobState::Pending, JobState::Skipped);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().skipped, 1);
    }
}
