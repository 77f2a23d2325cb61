//! The supervisor: one process per host that owns lease policy.
//!
//! Every `poll_interval` the supervisor runs one tick (scan the lease
//! directory, classify each lease, remediate the expired ones) and emits
//! lifecycle events for the host to consume. Between ticks it only sleeps,
//! and the sleep is interruptible by shutdown.
//!
//! Classification per lease:
//!
//! - **live**: file present and locked, or unlocked but fresh. Leave alone.
//! - **finished**: previously live, file now gone. The owner completed and
//!   unlinked on its way out.
//! - **expired**: file present, unlocked, and strictly older than the
//!   freshness window. The owner crashed; the supervisor sends a
//!   best-effort abort datagram, unlinks the residue, and reports the
//!   crash.
//!
//! Remediation never loops on a persistently broken job: a second expired
//! classification of the same id within one freshness window skips the
//! abort and re-announcement and only retries the unlink.

pub mod events;
pub mod rotation;
pub mod table;

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::SupervisorConfig;
use crate::error::{FarmError, Result};
use crate::lease::abort::send_abort;
use crate::lease::scanner::{scan, LeaseEntry};

pub use events::LeaseEvent;
pub use rotation::{WorkerRecord, WorkerRoster};
pub use table::{LeaseRecord, LeaseState, LeaseTable};

/// Events buffered towards the host before the supervisor starts dropping.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Periodically scans a lease directory, reaps crashed owners, and keeps
/// the rotation roster. Construct with [`Supervisor::new`], then either
/// drive ticks manually with [`tick`](Self::tick) or hand the loop to
/// [`run`](Self::run).
pub struct Supervisor {
    config: SupervisorConfig,
    table: Arc<RwLock<LeaseTable>>,
    roster: Arc<RwLock<WorkerRoster>>,
    events_tx: mpsc::Sender<LeaseEvent>,
    grace_deadline: Instant,
    ticks: Arc<AtomicU64>,
    started_at: DateTime<Utc>,
}

impl Supervisor {
    /// Validate the configuration and set up a supervisor plus the channel
    /// its lifecycle events arrive on. The startup grace period begins now.
    pub fn new(config: SupervisorConfig) -> Result<(Self, mpsc::Receiver<LeaseEvent>)> {
        config.validate()?;
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let grace_deadline = Instant::now() + config.startup_grace;
        let supervisor = Self {
            config,
            table: Arc::new(RwLock::new(LeaseTable::new())),
            roster: Arc::new(RwLock::new(WorkerRoster::new())),
            events_tx,
            grace_deadline,
            ticks: Arc::new(AtomicU64::new(0)),
            started_at: Utc::now(),
        };
        Ok((supervisor, events_rx))
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Shared handle to the lease table (read-only consumers: dashboard).
    pub fn table(&self) -> Arc<RwLock<LeaseTable>> {
        self.table.clone()
    }

    /// Shared handle to the rotation roster.
    pub fn roster(&self) -> Arc<RwLock<WorkerRoster>> {
        self.roster.clone()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Completed ticks, shared with the dashboard.
    pub fn tick_counter(&self) -> Arc<AtomicU64> {
        self.ticks.clone()
    }

    /// Run the tick loop until the token cancels.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        tracing::info!(
            lease_dir = %self.config.lease_dir.display(),
            freshness_window = ?self.config.freshness_window,
            poll_interval = ?self.config.poll_interval,
            startup_grace = ?self.config.startup_grace,
            "supervisor starting"
        );
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first interval tick fires immediately; that scan doubles as
        // the startup inventory of already-live leases.
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick(SystemTime::now()).await;
                }
                _ = shutdown.cancelled() => {
                    tracing::info!("supervisor shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// One scan + classify + remediate pass at time `now`.
    ///
    /// Returns the events this tick produced (they are also delivered on
    /// the event channel). A failed directory scan skips the tick; the loop
    /// itself never dies of I/O.
    pub async fn tick(&mut self, now: SystemTime) -> Vec<LeaseEvent> {
        self.ticks.fetch_add(1, Ordering::Relaxed);

        let entries = match scan(&self.config.lease_dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "lease scan failed, skipping tick");
                return Vec::new();
            }
        };

        let in_grace = Instant::now() < self.grace_deadline;
        let window = self.config.freshness_window;
        let present: HashSet<u64> = entries.iter().map(|e| e.id).collect();
        let mut events = Vec::new();

        let mut table = self.table.write().await;
        for entry in &entries {
            if entry.expired(now, window) {
                if in_grace {
                    tracing::debug!(
                        id = entry.id,
                        "expired-looking lease left alone during startup grace"
                    );
                    continue;
                }
                let consecutive = table.observe_expired(entry.id, entry.mtime, now, window);
                if let Some(event) = self.remediate(entry, now, consecutive) {
                    events.push(event);
                }
            } else if table.observe_live(entry.id, entry.mtime, now) {
                tracing::info!(id = entry.id, "lease started");
                events.push(LeaseEvent::Started {
                    id: entry.id,
                    started_at: entry.mtime.into(),
                });
            }
        }

        for id in table.finished_ids(&present) {
            table.remove(id);
            tracing::info!(id, "lease completed normally");
            events.push(LeaseEvent::Completed {
                id,
                finished_at: DateTime::<Utc>::from(now),
            });
        }

        table.prune_tombstones(&present, now, window);
        drop(table);

        for event in &events {
            if self.events_tx.try_send(event.clone()).is_err() {
                tracing::warn!(id = event.id(), "event channel full or closed, dropping event");
            }
        }
        events
    }

    /// Clean up one expired lease: cooperative abort (first classification
    /// only), then unlink file and endpoint. Unlink failures are retried on
    /// the next tick and never duplicate the crash event.
    fn remediate(
        &self,
        entry: &LeaseEntry,
        now: SystemTime,
        consecutive: bool,
    ) -> Option<LeaseEvent> {
        if consecutive {
            tracing::warn!(
                id = entry.id,
                "lease expired again within one window, skipping abort"
            );
        } else {
            let endpoint = entry.abort_endpoint();
            match send_abort(&endpoint) {
                Ok(()) => tracing::debug!(id = entry.id, "abort datagram sent"),
                Err(e) => {
                    // The owner is gone; refusal is success of the intent.
                    let err = FarmError::AbortUnreachable {
                        id: entry.id,
                        source: e,
                    };
                    tracing::debug!(id = entry.id, error = %err, "abort endpoint unreachable");
                }
            }
        }

        if let Err(e) = Self::reap_files(&entry.path, &entry.abort_endpoint()) {
            let err = FarmError::RemediationIo {
                id: entry.id,
                source: e,
            };
            tracing::warn!(id = entry.id, error = %err, "remediation failed, will retry next tick");
        }

        if consecutive {
            return None;
        }
        tracing::warn!(id = entry.id, "lease crashed");
        Some(LeaseEvent::Crashed {
            id: entry.id,
            last_mtime: entry.mtime.into(),
            detected_at: DateTime::<Utc>::from(now),
        })
    }

    /// Unlink a lease file and its endpoint; a file already gone is fine
    /// (remediating twice is a no-op).
    fn reap_files(lease: &Path, endpoint: &Path) -> io::Result<()> {
        for path in [lease, endpoint] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
