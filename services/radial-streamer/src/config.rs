//! Radial streamer configuration.
//!
//! Loaded from a YAML file, then selected fields can be overridden from
//! the environment (a `.env` file is read at startup).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use chunk_feed::FeedConfig;
use storage::{ObjectStorageConfig, RedisQueueConfig, SqsConfig};

/// Where chunk notifications come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum QueueConfig {
    /// SNS topic fan-out into a per-activation SQS queue
    Sqs(SqsConfig),
    /// Redis Streams relay
    Redis(RedisQueueConfig),
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig::Sqs(SqsConfig::default())
    }
}

impl QueueConfig {
    pub fn backend_name(&self) -> &'static str {
        match self {
            QueueConfig::Sqs(_) => "sqs",
            QueueConfig::Redis(_) => "redis",
        }
    }
}

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen")]
    pub listen: String,

    pub feed: FeedConfig,

    #[serde(default)]
    pub storage: ObjectStorageConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    /// Site metadata CSV; the built-in table is used when unset
    #[serde(default)]
    pub sites_file: Option<PathBuf>,
}

fn default_listen() -> String {
    "0.0.0.0:8090".to_string()
}

impl StreamerConfig {
    /// Defaults for the given sites.
    pub fn new<S: Into<String>>(sites: impl IntoIterator<Item = S>) -> Self {
        Self {
            listen: default_listen(),
            feed: FeedConfig::new(sites),
            storage: ObjectStorageConfig::default(),
            queue: QueueConfig::default(),
            sites_file: None,
        }
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse streamer config")
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml_str(&yaml).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Load `path` if it exists, otherwise start from defaults with no sites
    /// (to be supplied by `NEXRAD_SITES`).
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::new(Vec::<String>::new()))
        }
    }

    /// Apply environment overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup.
    ///
    /// - `NEXRAD_SITES`: comma separated site list
    /// - `NEXRAD_BUCKET`: chunk bucket
    /// - `CHUNK_DATA_DIR`: local chunk folder
    /// - `REDIS_URL`: switch to the Redis Streams backend at this URL
    /// - `SQS_TOPIC_ARN`: chunk topic for the SQS backend
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(sites) = lookup("NEXRAD_SITES") {
            self.feed.sites = sites
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(bucket) = lookup("NEXRAD_BUCKET") {
            self.storage.bucket = bucket;
        }
        if let Some(dir) = lookup("CHUNK_DATA_DIR") {
            self.feed.data_dir = PathBuf::from(dir);
        }

        if let Some(url) = lookup("REDIS_URL") {
            match &mut self.queue {
                QueueConfig::Redis(redis) => redis.url = url,
                QueueConfig::Sqs(_) => self.queue = QueueConfig::Redis(RedisQueueConfig::new(url)),
            }
        }
        if let Some(topic) = lookup("SQS_TOPIC_ARN") {
            if let QueueConfig::Sqs(sqs) = &mut self.queue {
                sqs.topic_arn = topic;
            }
        }
    }
}
