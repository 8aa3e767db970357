//! Feed configuration.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use radar_common::{FeedError, FeedResult};

/// Configuration for one radar feed (a group of sites sharing a single
/// remote subscription).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Site identifiers (ICAO, e.g. "KTLX")
    pub sites: Vec<String>,

    /// Pending chunks at which the reassembly queue stops waiting for a
    /// missing successor and releases the oldest chunk
    #[serde(default = "default_force_release_threshold")]
    pub force_release_threshold: usize,

    /// Per-site threshold overrides
    #[serde(default)]
    pub site_thresholds: HashMap<String, usize>,

    /// Seconds with zero listeners before the subscription is torn down
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Idle monitor tick (seconds)
    #[serde(default = "default_idle_check_interval_secs")]
    pub idle_check_interval_secs: u64,

    /// Worker tasks pulling from the remote queue
    #[serde(default = "default_listener_threads")]
    pub listener_threads: usize,

    /// Delay before retrying a failed receive (milliseconds)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Local folder for fetched chunks
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Broadcast buffer per site; slower subscribers skip ahead
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Keep chunk files after decoding
    #[serde(default)]
    pub keep_chunk_files: bool,

    /// Subscribe at startup instead of on first listener
    #[serde(default)]
    pub activate_on_start: bool,
}

fn default_force_release_threshold() -> usize {
    12
}

fn default_idle_timeout_secs() -> u64 {
    20 * 60
}

fn default_idle_check_interval_secs() -> u64 {
    60
}

fn default_listener_threads() -> usize {
    1
}

fn default_retry_delay_ms() -> u64 {
    5000
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data/chunks")
}

fn default_event_capacity() -> usize {
    1024
}

impl FeedConfig {
    /// Configuration with defaults for the given sites.
    pub fn new<S: Into<String>>(sites: impl IntoIterator<Item = S>) -> Self {
        Self {
            sites: sites.into_iter().map(Into::into).collect(),
            force_release_threshold: default_force_release_threshold(),
            site_thresholds: HashMap::new(),
            idle_timeout_secs: default_idle_timeout_secs(),
            idle_check_interval_secs: default_idle_check_interval_secs(),
            listener_threads: default_listener_threads(),
            retry_delay_ms: default_retry_delay_ms(),
            data_dir: default_data_dir(),
            event_capacity: default_event_capacity(),
            keep_chunk_files: false,
            activate_on_start: false,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn idle_check_interval(&self) -> Duration {
        Duration::from_secs(self.idle_check_interval_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Force-release threshold for a site (override or global).
    pub fn threshold_for(&self, site: &str) -> usize {
        self.site_thresholds
            .get(site)
            .copied()
            .unwrap_or(self.force_release_threshold)
    }

    /// Check the configuration before any remote resource is created.
    pub fn validate(&self) -> FeedResult<()> {
        if self.sites.is_empty() {
            return Err(FeedError::Configuration("No sites configured".to_string()));
        }

        let mut seen = HashSet::new();
        for site in &self.sites {
            if !is_valid_site_id(site) {
                return Err(FeedError::Configuration(format!(
                    "Invalid site identifier '{}': expected 4 uppercase letters or digits",
                    site
                )));
            }
            if !seen.insert(site.as_str()) {
                return Err(FeedError::Configuration(format!(
                    "Site '{}' configured twice",
                    site
                )));
            }
        }

        if self.force_release_threshold == 0 {
            return Err(FeedError::Configuration(
                "force_release_threshold must be at least 1".to_string(),
            ));
        }
        for (site, threshold) in &self.site_thresholds {
            if !seen.contains(site.as_str()) {
                return Err(FeedError::Configuration(format!(
                    "Threshold override for unconfigured site '{}'",
                    site
                )));
            }
            if *threshold == 0 {
                return Err(FeedError::Configuration(format!(
                    "Threshold for '{}' must be at least 1",
                    site
                )));
            }
        }

        if self.listener_threads == 0 {
            return Err(FeedError::Configuration(
                "listener_threads must be at least 1".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(FeedError::Configuration(
                "event_capacity must be at least 1".to_string(),
            ));
        }
        if self.idle_check_interval_secs == 0 {
            return Err(FeedError::Configuration(
                "idle_check_interval_secs must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

fn is_valid_site_id(site: &str) -> bool {
    site.len() == 4
        && site
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}
