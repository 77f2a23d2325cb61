use std::collections::HashMap;

use chrono::{DateTime, Utc};

/// State tracked per registered worker.
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub id: u64,
    pub busy: bool,
    pub completions: u64,
    pub last_completed: Option<DateTime<Utc>>,
}

impl WorkerRecord {
    fn new(id: u64) -> Self {
        Self {
            id,
            busy: false,
            completions: 0,
            last_completed: None,
        }
    }
}

/// Rotation roster: decides which waiting worker takes the next job.
///
/// The pick is the idle worker whose last successful completion is oldest,
/// ties broken by smallest worker id; workers that never completed rank
/// before all that have. Every worker therefore gets a turn within a
/// bounded number of assignments, and a burst of arrivals cannot stampede
/// a single worker.
#[derive(Debug, Default)]
pub struct WorkerRoster {
    workers: HashMap<u64, WorkerRecord>,
}

impl WorkerRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker as eligible for rotation. Re-registering an
    /// existing worker is a no-op.
    pub fn register(&mut self, worker_id: u64) {
        if self.workers.contains_key(&worker_id) {
            return;
        }
        self.workers.insert(worker_id, WorkerRecord::new(worker_id));
        tracing::info!(worker_id, "worker registered");
    }

    /// Remove a worker from rotation entirely.
    pub fn deregister(&mut self, worker_id: u64) {
        if self.workers.remove(&worker_id).is_some() {
            tracing::info!(worker_id, "worker deregistered");
        }
    }

    /// Mark a worker as running a job; it leaves the eligible set until its
    /// next completion is recorded.
    pub fn mark_busy(&mut self, worker_id: u64) {
        if let Some(worker) = self.workers.get_mut(&worker_id) {
            worker.busy = true;
        }
    }

    /// Record a successful completion, returning the worker to the back of
    /// the rotation.
    pub fn record_completion(&mut self, worker_id: u64, at: DateTime<Utc>) {
        if let Some(worker) = self.workers.get_mut(&worker_id) {
            worker.busy = false;
            worker.completions += 1;
            worker.last_completed = Some(at);
        }
    }

    /// The worker that takes the next job, per the rotation discipline.
    /// `None` when every registered worker is busy (or none is registered).
    pub fn next_worker(&self) -> Option<u64> {
        self.workers
            .values()
            .filter(|w| !w.busy)
            .min_by_key(|w| (w.last_completed, w.id))
            .map(|w| w.id)
    }

    /// Convenience for dispatchers: pick the next worker and mark it busy.
    pub fn assign_next(&mut self) -> Option<u64> {
        let picked = self.next_worker()?;
        self.mark_busy(picked);
        Some(picked)
    }

    /// All workers ordered by id.
    pub fn workers(&self) -> Vec<&WorkerRecord> {
        let mut workers: Vec<&WorkerRecord> = self.workers.values().collect();
        workers.sort_by_key(|w| w.id);
        workers
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
