//! Queue status - process-wide job counters

use crate::campaign::RatePolicy;
use gazette_storage::models::QueueStatusCounts;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Job counters updated on every job transition.
///
/// `completed` and `failed` are cumulative; archiving a finished campaign's
/// jobs does not lower them.
#[derive(Debug, Default)]
pub struct QueueCounters {
    pending: AtomicU64,
    processing: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

fn decrement(counter: &AtomicU64, n: u64) {
    // saturating: a late transition must never wrap the counter
    let _ = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
        Some(v.saturating_sub(n))
    });
}

impl QueueCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all counters, typically with counts read from the queue store
    pub fn seed(&self, counts: QueueStatusCounts) {
        self.pending.store(counts.pending, Ordering::SeqCst);
        self.processing.store(counts.processing, Ordering::SeqCst);
        self.completed.store(counts.completed, Ordering::SeqCst);
        self.failed.store(counts.failed, Ordering::SeqCst);
    }

    pub fn enqueued(&self, n: u64) {
        self.pending.fetch_add(n, Ordering::SeqCst);
    }

    pub fn claimed(&self, n: u64) {
        decrement(&self.pending, n);
        self.processing.fetch_add(n, Ordering::SeqCst);
    }

    pub fn released(&self, n: u64) {
        decrement(&self.processing, n);
        self.pending.fetch_add(n, Ordering::SeqCst);
    }

    pub fn completed(&self) {
        decrement(&self.processing, 1);
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn failed(&self) {
        decrement(&self.processing, 1);
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    /// Jobs dropped by a cancel or an unsubscribe
    pub fn discarded(&self, dropped: QueueStatusCounts) {
        decrement(&self.pending, dropped.pending);
        decrement(&self.processing, dropped.processing);
    }

    pub fn snapshot(&self) -> QueueStatusCounts {
        QueueStatusCounts {
            pending: self.pending.load(Ordering::SeqCst),
            processing: self.processing.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }
}

/// Queue progress as shown to operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub batch_size: usize,
    pub send_delay_ms: u64,
}

/// Answers queue status polls from the counters, never from a store scan
#[derive(Clone)]
pub struct QueueStatusReporter {
    counters: Arc<QueueCounters>,
    policy: RatePolicy,
}

impl QueueStatusReporter {
    pub fn new(counters: Arc<QueueCounters>, policy: RatePolicy) -> Self {
        Self { counters, policy }
    }

    pub fn status(&self) -> QueueStatus {
        let counts = self.counters.snapshot();
        QueueStatus {
            pending: counts.pending,
            processing: counts.processing,
            completed: counts.completed,
            failed: counts.failed,
            batch_size: self.policy.batch_size,
            send_delay_ms: self.policy.send_interval.as_millis() as u64,
        }
    }
}
