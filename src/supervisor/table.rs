use std::collections::{HashMap, HashSet};
use std::time::{Duration, SystemTime};

/// Supervisor-side view of one lease id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    /// File present and either locked or fresh; an owner is presumed alive.
    Live,
    /// Classified as crash residue. The record lingers as a tombstone so a
    /// successor crashing inside one window is recognized as consecutive.
    Expired,
}

impl std::fmt::Display for LeaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LeaseState::Live => write!(f, "live"),
            LeaseState::Expired => write!(f, "expired"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LeaseRecord {
    pub id: u64,
    pub state: LeaseState,
    /// Last observed modification time.
    pub mtime: SystemTime,
    pub first_seen: SystemTime,
    /// When this id was last classified expired, if ever.
    pub last_expired_at: Option<SystemTime>,
}

/// The supervisor's table of observed leases.
///
/// Transitions per id: absent → Live (on first sighting) → removed (on
/// normal completion) or → Expired (on crash classification). Expired
/// tombstones are pruned once they can no longer influence the consecutive
/// check.
#[derive(Debug, Default)]
pub struct LeaseTable {
    records: HashMap<u64, LeaseRecord>,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: u64) -> Option<&LeaseRecord> {
        self.records.get(&id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records ordered by id.
    pub fn records(&self) -> Vec<&LeaseRecord> {
        let mut records: Vec<&LeaseRecord> = self.records.values().collect();
        records.sort_by_key(|r| r.id);
        records
    }

    /// Record a live sighting. Returns true when this starts a new
    /// incarnation (not seen before, or only known as a tombstone), which
    /// is the moment to announce the lease.
    pub fn observe_live(&mut self, id: u64, mtime: SystemTime, now: SystemTime) -> bool {
        match self.records.get_mut(&id) {
            Some(record) if record.state == LeaseState::Live => {
                record.mtime = mtime;
                false
            }
            Some(record) => {
                // A successor took over an id we reaped earlier. Fresh
                // incarnation, but keep last_expired_at for the
                // consecutive-crash check.
                record.state = LeaseState::Live;
                record.mtime = mtime;
                record.first_seen = now;
                true
            }
            None => {
                self.records.insert(
                    id,
                    LeaseRecord {
                        id,
                        state: LeaseState::Live,
                        mtime,
                        first_seen: now,
                        last_expired_at: None,
                    },
                );
                true
            }
        }
    }

    /// Record an expired classification. Returns true when the previous
    /// expiry of this id was within `window` of `now`: the consecutive
    /// case, where the supervisor must neither re-abort nor re-announce.
    pub fn observe_expired(&mut self, id: u64, mtime: SystemTime, now: SystemTime, window: Duration) -> bool {
        let record = self.records.entry(id).or_insert(LeaseRecord {
            id,
            state: LeaseState::Expired,
            mtime,
            first_seen: now,
            last_expired_at: None,
        });
        let consecutive = record
            .last_expired_at
            .and_then(|at| now.duration_since(at).ok())
            .is_some_and(|since| since <= window);
        record.state = LeaseState::Expired;
        record.mtime = mtime;
        record.last_expired_at = Some(now);
        consecutive
    }

    /// Live ids whose file is gone: the owner completed normally.
    pub fn finished_ids(&self, present: &HashSet<u64>) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .records
            .values()
            .filter(|r| r.state == LeaseState::Live && !present.contains(&r.id))
            .map(|r| r.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn remove(&mut self, id: u64) -> Option<LeaseRecord> {
        self.records.remove(&id)
    }

    /// Drop expired tombstones whose file is gone and whose last expiry is
    /// older than the window; they can no longer make anything consecutive.
    pub fn prune_tombstones(&mut self, present: &HashSet<u64>, now: SystemTime, window: Duration) {
        self.records.retain(|id, record| {
            if record.state != LeaseState::Expired || present.contains(id) {
                return true;
            }
            match record.last_expired_at.and_then(|at| now.duration_since(at).ok()) {
                Some(since) => since <= window,
                None => false,
            }
        });
    }
}
