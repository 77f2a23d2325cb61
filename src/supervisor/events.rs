use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lifecycle events surfaced to the host, one per observed transition.
///
/// A healthy job produces exactly `Started` then `Completed`; a crashed
/// owner produces exactly `Started` (if the supervisor saw it live) then
/// `Crashed`. The supervisor never reports "stuck": stuckness manifests
/// as a crash once the freshness window runs out.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LeaseEvent {
    Started {
        id: u64,
        started_at: DateTime<Utc>,
    },
    Completed {
        id: u64,
        finished_at: DateTime<Utc>,
    },
    Crashed {
        id: u64,
        last_mtime: DateTime<Utc>,
        detected_at: DateTime<Utc>,
    },
}

impl LeaseEvent {
    pub fn id(&self) -> u64 {
        match self {
            LeaseEvent::Started { id, .. }
            | LeaseEvent::Completed { id, .. }
            | LeaseEvent::Crashed { id, .. } => *id,
        }
    }
}

impl std::fmt::Display for LeaseEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LeaseEvent::Started { id, started_at } => {
                write!(f, "lease {} started at {}", id, started_at.to_rfc3339())
            }
            LeaseEvent::Completed { id, finished_at } => {
                write!(
                    f,
                    "lease {} completed normally at {}",
                    id,
                    finished_at.to_rfc3339()
                )
            }
            LeaseEvent::Crashed {
                id,
                last_mtime,
                detected_at,
            } => {
                write!(
                    f,
                    "lease {} crashed (last heartbeat {}, detected {})",
                    id,
                    last_mtime.to_rfc3339(),
                    detected_at.to_rfc3339()
                )
            }
        }
    }
}
