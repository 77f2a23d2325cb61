//! Worker-side harness: run one job under a held lease.
//!
//! The harness owns the full owner lifecycle: it takes an acquired
//! [`LeaseHandle`], starts the job command, heartbeats the lease mtime
//! while the job runs, watches the abort endpoint, and tears the lease
//! down on every exit path. The supervisor then observes a clean FINISHED,
//! never a crash, for anything that went through here.
//!
//! # Components
//!
//! - [`JobExecutor`]: shell execution and output capture
//! - [`RefreshCadence`]: heartbeat pacing at a third of the freshness window
//! - [`run_job`]: the select loop tying execution, refresh, and abort together

pub mod executor;
pub mod refresher;

use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::Result;
use crate::lease::abort::AbortListener;
use crate::lease::acquirer::LeaseHandle;

pub use executor::{ExecutionResult, JobExecutor};
pub use refresher::RefreshCadence;

/// How a job run under a lease ended.
#[derive(Debug)]
pub enum HoldOutcome {
    /// The command ran to completion (successfully or not).
    Completed(ExecutionResult),
    /// An abort datagram arrived; the job was cancelled and the lease
    /// released cleanly.
    Aborted,
}

/// Run `command` while holding `handle`, refreshing the lease at a third
/// of `freshness_window`.
///
/// Returns once the command exits, an abort request arrives (the command
/// is killed), or the lease is lost underneath us (`LeaseMissing`: some
/// other actor unlinked or replaced the file, so the job must stop).
/// In every case the lease file and abort endpoint are gone afterwards.
pub async fn run_job(
    handle: LeaseHandle,
    command: &str,
    freshness_window: Duration,
) -> Result<HoldOutcome> {
    let id = handle.id();
    let executor = JobExecutor::new();

    let mut cmd = executor.command(command);
    cmd.kill_on_drop(true);
    let output_fut = cmd.output();
    tokio::pin!(output_fut);

    let cadence = RefreshCadence::for_window(freshness_window);
    let (beat_tx, mut beat_rx) = mpsc::channel(1);
    let pacer = tokio::spawn(async move { cadence.run(beat_tx).await });

    tracing::info!(id, command, "job started under lease");
    let outcome = loop {
        tokio::select! {
            result = &mut output_fut => {
                break Ok(HoldOutcome::Completed(JobExecutor::process_output(id, result)));
            }
            _ = abort_requested(handle.abort_listener()) => {
                tracing::info!(id, "abort requested, cancelling job");
                // Dropping the pinned future reaps the child.
                break Ok(HoldOutcome::Aborted);
            }
            Some(()) = beat_rx.recv() => {
                if let Err(e) = handle.refresh() {
                    tracing::warn!(id, error = %e, "lease refresh failed, cancelling job");
                    break Err(e);
                }
            }
        }
    };
    pacer.abort();

    match outcome {
        Ok(result) => {
            handle.complete()?;
            Ok(result)
        }
        Err(e) => {
            // The lease is no longer ours; Drop leaves a successor's file
            // alone and cleans up anything that is still ours.
            drop(handle);
            Err(e)
        }
    }
}

/// Resolves when the endpoint receives an abort request; pends forever
/// when there is no endpoint or it fails (absence is not cancellation).
async fn abort_requested(listener: Option<&AbortListener>) {
    match listener {
        Some(listener) => {
            if let Err(e) = listener.recv().await {
                tracing::debug!(error = %e, "abort endpoint read failed, ignoring");
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending::<()>().await,
    }
}
