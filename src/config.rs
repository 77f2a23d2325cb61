use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{FarmError, Result};

/// Default freshness window: an unlocked lease file older than this is
/// interpreted as residue from a crashed owner.
pub const DEFAULT_FRESHNESS_WINDOW: Duration = Duration::from_secs(5);

/// Configuration for a supervisor instance.
///
/// The poll interval must stay strictly below the freshness window;
/// otherwise an expired lease cannot be told apart from an owner that is
/// merely quiet between two scans.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Directory holding lease files and their abort endpoints.
    pub lease_dir: PathBuf,
    /// Minimum age at which an unlocked lease counts as crash residue.
    pub freshness_window: Duration,
    /// Time between two supervisor ticks.
    pub poll_interval: Duration,
    /// After supervisor start, no lease is classified expired for this long.
    /// Avoids a stale-file avalanche when the supervisor itself restarts.
    pub startup_grace: Duration,
}

impl SupervisorConfig {
    /// Build a configuration with the reference defaults:
    /// `poll_interval = freshness_window / 2`, `startup_grace = freshness_window`.
    pub fn new(lease_dir: impl Into<PathBuf>) -> Self {
        Self {
            lease_dir: lease_dir.into(),
            freshness_window: DEFAULT_FRESHNESS_WINDOW,
            poll_interval: DEFAULT_FRESHNESS_WINDOW / 2,
            startup_grace: DEFAULT_FRESHNESS_WINDOW,
        }
    }

    /// Set the freshness window and re-derive the dependent defaults
    /// (poll interval, startup grace). Apply explicit overrides afterwards.
    pub fn with_freshness_window(mut self, window: Duration) -> Self {
        self.freshness_window = window;
        self.poll_interval = window / 2;
        self.startup_grace = window;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_startup_grace(mut self, grace: Duration) -> Self {
        self.startup_grace = grace;
        self
    }

    /// Validate the configuration and make sure the lease directory is
    /// usable, creating it if absent. Any failure here is fatal at startup.
    pub fn validate(&self) -> Result<()> {
        if self.freshness_window.is_zero() {
            return Err(FarmError::ConfigInvalid(
                "freshness window must be positive".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(FarmError::ConfigInvalid(
                "poll interval must be positive".to_string(),
            ));
        }
        if self.poll_interval >= self.freshness_window {
            return Err(FarmError::ConfigInvalid(format!(
                "poll interval ({:?}) must be shorter than the freshness window ({:?})",
                self.poll_interval, self.freshness_window
            )));
        }
        if self.startup_grace.is_zero() {
            return Err(FarmError::ConfigInvalid(
                "startup grace must be positive".to_string(),
            ));
        }
        if self.lease_dir.exists() {
            if !self.lease_dir.is_dir() {
                return Err(FarmError::ConfigInvalid(format!(
                    "lease dir {} is not a directory",
                    self.lease_dir.display()
                )));
            }
        } else if let Err(e) = fs::create_dir_all(&self.lease_dir) {
            return Err(FarmError::ConfigInvalid(format!(
                "lease dir {} cannot be created: {}",
                self.lease_dir.display(),
                e
            )));
        }
        Ok(())
    }
}
