use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use tokio::sync::Notify;
use tokio::time::Instant;

/// One pending transfer. `attempt` starts at 1 and only grows on requeue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncJob {
    pub local_path: PathBuf,
    pub remote_path: String,
    pub attempt: u32,
}

impl SyncJob {
    pub fn new(local_path: impl Into<PathBuf>, remote_path: impl Into<String>, attempt: u32) -> Self {
        Self {
            local_path: local_path.into(),
            remote_path: remote_path.into(),
            attempt,
        }
    }
}

#[derive(Debug)]
struct Scheduled {
    due: Instant,
    seq: u64,
    job: SyncJob,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due
            .cmp(&other.due)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Jobs waiting for their due time, earliest first; ties keep insertion
/// order. A single scheduler task moves due jobs into the bounded queue.
#[derive(Debug, Default)]
pub struct RetrySchedule {
    entries: Mutex<BinaryHeap<Reverse<Scheduled>>>,
    seq: AtomicU64,
    changed: Notify,
}

impl RetrySchedule {
    pub fn push(&self, job: SyncJob, due: Instant) {
        let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
        self.lock().push(Reverse(Scheduled { due, seq, job }));
        self.changed.notify_one();
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.lock().peek().map(|Reverse(entry)| entry.due)
    }

    pub fn pop_due(&self, now: Instant) -> Option<SyncJob> {
        let mut entries = self.lock();
        match entries.peek() {
            Some(Reverse(entry)) if entry.due <= now => {
                entries.pop().map(|Reverse(entry)| entry.job)
            }
            _ => None,
        }
    }

    /// Removes everything that is due at `now`, in order.
    pub fn drain_due(&self, now: Instant) -> Vec<SyncJob> {
        let mut drained = Vec::new();
        while let Some(job) = self.pop_due(now) {
            drained.push(job);
        }
        drained
    }

    pub fn drain_all(&self) -> Vec<SyncJob> {
        let mut entries = std::mem::take(&mut *self.lock());
        let mut drained = Vec::with_capacity(entries.len());
        while let Some(Reverse(entry)) = entries.pop() {
            drained.push(entry.job);
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Resolves after the next `push`, or immediately if one happened since
    /// the previous wait.
    pub async fn changed(&self) {
        self.changed.notified().await;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BinaryHeap<Reverse<Scheduled>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
