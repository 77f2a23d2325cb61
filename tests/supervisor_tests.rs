//! Supervisor lifecycle tests: classification, remediation, escalation,
//! startup grace, and the end-to-end tick loop.

use std::fs;
use std::os::unix::net::UnixDatagram;
use std::path::Path;
use std::time::{Duration, SystemTime};

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use farmhand::config::SupervisorConfig;
use farmhand::lease::path::{abort_path, lease_path};
use farmhand::lease::{send_abort, AbortPolicy, LeaseHandle};
use farmhand::supervisor::{LeaseEvent, Supervisor};
use farmhand::worker::run_job;

const WINDOW: Duration = Duration::from_millis(200);

/// Config with short windows and a startup grace small enough that the
/// tests run past it before their first tick.
fn test_config(dir: &Path) -> SupervisorConfig {
    SupervisorConfig::new(dir)
        .with_freshness_window(WINDOW)
        .with_poll_interval(Duration::from_millis(100))
        .with_startup_grace(Duration::from_millis(1))
}

async fn settle_grace() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// A `now` far enough past every real mtime that age checks trip.
fn well_past_window() -> SystemTime {
    SystemTime::now() + WINDOW * 10
}

fn ids(events: &[LeaseEvent]) -> Vec<u64> {
    events.iter().map(|e| e.id()).collect()
}

// ---------------------------------------------------------------------------
// Scenario: normal completion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn normal_completion_emits_started_then_completed() {
    let dir = tempfile::tempdir().unwrap();
    let (mut supervisor, mut events_rx) = Supervisor::new(test_config(dir.path())).unwrap();
    settle_grace().await;

    let handle = LeaseHandle::acquire(dir.path(), 42).unwrap();

    let events = supervisor.tick(SystemTime::now()).await;
    assert!(matches!(events[..], [LeaseEvent::Started { id: 42, .. }]));

    // A second scan with the owner still alive changes nothing.
    assert!(supervisor.tick(SystemTime::now()).await.is_empty());

    handle.complete().unwrap();
    let events = supervisor.tick(SystemTime::now()).await;
    assert!(matches!(events[..], [LeaseEvent::Completed { id: 42, .. }]));

    // Exactly one Started and one Completed came over the channel.
    assert!(matches!(
        events_rx.try_recv().unwrap(),
        LeaseEvent::Started { id: 42, .. }
    ));
    assert!(matches!(
        events_rx.try_recv().unwrap(),
        LeaseEvent::Completed { id: 42, .. }
    ));
    assert!(events_rx.try_recv().is_err());

    // And the table dropped the lease.
    assert!(supervisor.table().read().await.is_empty());
}

// ---------------------------------------------------------------------------
// Scenario: crash detection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn crashed_owner_is_detected_and_reaped() {
    let dir = tempfile::tempdir().unwrap();
    let (mut supervisor, _events_rx) = Supervisor::new(test_config(dir.path())).unwrap();
    settle_grace().await;

    // Crash residue: an unlocked file nobody will ever refresh.
    fs::write(lease_path(dir.path(), 7), b"").unwrap();

    // Young residue is indistinguishable from a live-but-quiet owner.
    let events = supervisor.tick(SystemTime::now()).await;
    assert!(matches!(events[..], [LeaseEvent::Started { id: 7, .. }]));

    // Once the window runs out the crash is surfaced and the file reaped.
    let events = supervisor.tick(well_past_window()).await;
    assert!(matches!(events[..], [LeaseEvent::Crashed { id: 7, .. }]));
    assert!(!lease_path(dir.path(), 7).exists());

    // Remediating again is a no-op.
    assert!(supervisor.tick(well_past_window()).await.is_empty());
}

#[tokio::test]
async fn locked_lease_is_never_reaped() {
    let dir = tempfile::tempdir().unwrap();
    let (mut supervisor, _events_rx) = Supervisor::new(test_config(dir.path())).unwrap();
    settle_grace().await;

    let handle = LeaseHandle::acquire(dir.path(), 13).unwrap();

    let events = supervisor.tick(well_past_window()).await;
    assert_eq!(ids(&events), vec![13]);
    assert!(matches!(events[..], [LeaseEvent::Started { .. }]));
    assert!(lease_path(dir.path(), 13).exists());

    handle.complete().unwrap();
}

// ---------------------------------------------------------------------------
// Scenario: concurrent acquire rejected
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rejected_acquire_produces_no_events() {
    let dir = tempfile::tempdir().unwrap();
    let (mut supervisor, _events_rx) = Supervisor::new(test_config(dir.path())).unwrap();
    settle_grace().await;

    let holder = LeaseHandle::acquire(dir.path(), 11).unwrap();
    let busy = LeaseHandle::acquire(dir.path(), 11);
    assert!(busy.is_err());

    let events = supervisor.tick(SystemTime::now()).await;
    // Only the holder's Started; the rejected contender left no trace.
    assert!(matches!(events[..], [LeaseEvent::Started { id: 11, .. }]));
    assert!(supervisor.tick(SystemTime::now()).await.is_empty());

    holder.complete().unwrap();
}

// ---------------------------------------------------------------------------
// Remediation detail: the best-effort abort datagram
// ---------------------------------------------------------------------------

#[tokio::test]
async fn remediation_sends_abort_before_reaping() {
    let dir = tempfile::tempdir().unwrap();
    let (mut supervisor, _events_rx) = Supervisor::new(test_config(dir.path())).unwrap();
    settle_grace().await;

    fs::write(lease_path(dir.path(), 9), b"").unwrap();
    // An endpoint a crashed-but-lingering owner might still be reading.
    let listener = UnixDatagram::bind(abort_path(dir.path(), 9)).unwrap();
    listener.set_nonblocking(true).unwrap();

    let events = supervisor.tick(well_past_window()).await;
    assert!(matches!(events[..], [LeaseEvent::Crashed { id: 9, .. }]));

    let mut buf = [0u8; 16];
    assert!(listener.recv(&mut buf).is_ok(), "abort datagram expected");

    // Both the lease file and the endpoint path were reaped.
    assert!(!lease_path(dir.path(), 9).exists());
    assert!(!abort_path(dir.path(), 9).exists());
}

#[tokio::test]
async fn remediation_without_endpoint_still_reaps() {
    let dir = tempfile::tempdir().unwrap();
    let (mut supervisor, _events_rx) = Supervisor::new(test_config(dir.path())).unwrap();
    settle_grace().await;

    fs::write(lease_path(dir.path(), 14), b"").unwrap();

    // No endpoint anywhere; AbortUnreachable is swallowed as success.
    let events = supervisor.tick(well_past_window()).await;
    assert!(matches!(events[..], [LeaseEvent::Crashed { id: 14, .. }]));
    assert!(!lease_path(dir.path(), 14).exists());
}

// ---------------------------------------------------------------------------
// Remediation escalation: no abort/event feedback loops
// ---------------------------------------------------------------------------

#[tokio::test]
async fn consecutive_expiry_skips_abort_and_event() {
    let dir = tempfile::tempdir().unwrap();
    let (mut supervisor, _events_rx) = Supervisor::new(test_config(dir.path())).unwrap();
    settle_grace().await;

    fs::write(lease_path(dir.path(), 5), b"").unwrap();
    let first_now = well_past_window();
    let events = supervisor.tick(first_now).await;
    assert!(matches!(events[..], [LeaseEvent::Crashed { id: 5, .. }]));

    // A successor crashes straight away: residue reappears within the window.
    fs::write(lease_path(dir.path(), 5), b"").unwrap();
    let listener = UnixDatagram::bind(abort_path(dir.path(), 5)).unwrap();
    listener.set_nonblocking(true).unwrap();

    let events = supervisor
        .tick(first_now + Duration::from_millis(50))
        .await;
    // Unlinked and logged, but no re-abort and no duplicate crash event.
    assert!(events.is_empty());
    assert!(!lease_path(dir.path(), 5).exists());
    let mut buf = [0u8; 16];
    assert!(listener.recv(&mut buf).is_err(), "no abort datagram expected");
}

#[tokio::test]
async fn expiry_after_a_full_window_is_a_fresh_crash() {
    let dir = tempfile::tempdir().unwrap();
    let (mut supervisor, _events_rx) = Supervisor::new(test_config(dir.path())).unwrap();
    settle_grace().await;

    fs::write(lease_path(dir.path(), 5), b"").unwrap();
    let first_now = well_past_window();
    let events = supervisor.tick(first_now).await;
    assert!(matches!(events[..], [LeaseEvent::Crashed { id: 5, .. }]));

    // The successor's crash lands well outside the previous window.
    fs::write(lease_path(dir.path(), 5), b"").unwrap();
    let events = supervisor.tick(first_now + WINDOW * 2).await;
    assert!(matches!(events[..], [LeaseEvent::Crashed { id: 5, .. }]));
}

// ---------------------------------------------------------------------------
// Scenario: startup grace
// ---------------------------------------------------------------------------

#[tokio::test]
async fn startup_grace_defers_crash_classification() {
    let dir = tempfile::tempdir().unwrap();
    // Hour-old residue from before a supervisor restart.
    fs::write(lease_path(dir.path(), 3), b"").unwrap();

    let config = SupervisorConfig::new(dir.path())
        .with_freshness_window(Duration::from_millis(100))
        .with_poll_interval(Duration::from_millis(50))
        .with_startup_grace(Duration::from_millis(400));
    let (mut supervisor, _events_rx) = Supervisor::new(config).unwrap();

    // First scan inside the grace period: no avalanche, file untouched.
    let events = supervisor.tick(well_past_window()).await;
    assert!(events.is_empty());
    assert!(lease_path(dir.path(), 3).exists());

    // After the grace deadline, classification resumes immediately.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let events = supervisor.tick(well_past_window()).await;
    assert!(matches!(events[..], [LeaseEvent::Crashed { id: 3, .. }]));
    assert!(!lease_path(dir.path(), 3).exists());
}

// ---------------------------------------------------------------------------
// Scenario: non-integer entries are invisible
// ---------------------------------------------------------------------------

#[tokio::test]
async fn non_integer_entries_never_produce_events() {
    let dir = tempfile::tempdir().unwrap();
    let (mut supervisor, _events_rx) = Supervisor::new(test_config(dir.path())).unwrap();
    settle_grace().await;

    let readme = dir.path().join("README");
    fs::write(&readme, b"not a lease").unwrap();

    assert!(supervisor.tick(SystemTime::now()).await.is_empty());
    assert!(supervisor.tick(well_past_window()).await.is_empty());
    assert!(readme.exists());
}

// ---------------------------------------------------------------------------
// Failure semantics: a bad scan skips the tick, not the loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scan_failure_skips_tick_but_loop_survives() {
    let dir = tempfile::tempdir().unwrap();
    let lease_dir = dir.path().join("leases");
    let (mut supervisor, _events_rx) =
        Supervisor::new(test_config(&lease_dir)).unwrap();
    settle_grace().await;

    fs::remove_dir(&lease_dir).unwrap();
    assert!(supervisor.tick(SystemTime::now()).await.is_empty());

    // The directory coming back makes the next tick work again.
    fs::create_dir(&lease_dir).unwrap();
    fs::write(lease_path(&lease_dir, 1), b"").unwrap();
    let events = supervisor.tick(SystemTime::now()).await;
    assert!(matches!(events[..], [LeaseEvent::Started { id: 1, .. }]));
}

// ---------------------------------------------------------------------------
// End-to-end: the real tick loop over real time
// ---------------------------------------------------------------------------

#[tokio::test]
async fn run_loop_observes_completion_and_crash() {
    let dir = tempfile::tempdir().unwrap();
    let config = SupervisorConfig::new(dir.path())
        .with_freshness_window(Duration::from_millis(300))
        .with_poll_interval(Duration::from_millis(100))
        .with_startup_grace(Duration::from_millis(1));
    let (supervisor, mut events_rx) = Supervisor::new(config).unwrap();

    let shutdown = CancellationToken::new();
    let loop_handle = tokio::spawn(supervisor.run(shutdown.clone()));

    // A healthy owner completes.
    let handle = LeaseHandle::acquire(dir.path(), 1).unwrap();
    let event = timeout(Duration::from_secs(2), events_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, LeaseEvent::Started { id: 1, .. }));

    handle.complete().unwrap();
    let event = timeout(Duration::from_secs(2), events_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, LeaseEvent::Completed { id: 1, .. }));

    // Crash residue is reported within freshness_window + poll_interval.
    fs::write(lease_path(dir.path(), 2), b"").unwrap();
    let event = timeout(Duration::from_secs(2), events_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, LeaseEvent::Started { id: 2, .. }));
    let event = timeout(Duration::from_secs(2), events_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, LeaseEvent::Crashed { id: 2, .. }));

    shutdown.cancel();
    loop_handle.await.unwrap().unwrap();
}

// ---------------------------------------------------------------------------
// Scenario: cooperative abort ends in a clean completion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn aborted_worker_finishes_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let config = SupervisorConfig::new(dir.path())
        .with_freshness_window(Duration::from_millis(300))
        .with_poll_interval(Duration::from_millis(100))
        .with_startup_grace(Duration::from_millis(1));
    let (supervisor, mut events_rx) = Supervisor::new(config).unwrap();

    let shutdown = CancellationToken::new();
    let loop_handle = tokio::spawn(supervisor.run(shutdown.clone()));

    let handle = LeaseHandle::acquire_with(dir.path(), 99, AbortPolicy::Required).unwrap();
    let job = tokio::spawn(run_job(handle, "sleep 5", Duration::from_millis(300)));

    let event = timeout(Duration::from_secs(2), events_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, LeaseEvent::Started { id: 99, .. }));

    send_abort(&abort_path(dir.path(), 99)).unwrap();
    let outcome = timeout(Duration::from_secs(2), job).await.unwrap().unwrap();
    assert!(matches!(
        outcome,
        Ok(farmhand::worker::HoldOutcome::Aborted)
    ));

    // The supervisor sees a normal completion, never a crash.
    let event = timeout(Duration::from_secs(2), events_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, LeaseEvent::Completed { id: 99, .. }));

    shutdown.cancel();
    loop_handle.await.unwrap().unwrap();
}
