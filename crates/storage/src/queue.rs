//! Redis Streams-based chunk notification queue.
//!
//! Chunk arrivals are appended to a single stream as entries with `site`
//! and `key` fields. Every activation of the feed reads through its own
//! consumer group created at the stream tail, so a new subscription only
//! sees chunks that arrive after it was opened.

use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, streams::*, AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use radar_common::{FeedError, FeedResult};

use crate::notification::{ChunkNotification, NotificationStream, NotificationSubscriber};

const CONSUMER_NAME: &str = "listener";

/// Redis Streams queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisQueueConfig {
    pub url: String,
    /// Stream the chunk announcer appends to
    #[serde(default = "default_stream_key")]
    pub stream_key: String,
    /// XREADGROUP block window (long-poll) in milliseconds
    #[serde(default = "default_block_ms")]
    pub block_ms: usize,
    /// Maximum entries returned per read
    #[serde(default = "default_batch")]
    pub batch: usize,
}

fn default_stream_key() -> String {
    "radar:chunks".to_string()
}

fn default_block_ms() -> usize {
    5000
}

fn default_batch() -> usize {
    10
}

impl RedisQueueConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            stream_key: default_stream_key(),
            block_ms: default_block_ms(),
            batch: default_batch(),
        }
    }
}

fn redis_err(context: &str, e: redis::RedisError) -> FeedError {
    FeedError::Subscription(format!("{}: {}", context, e))
}

/// Opens Redis Streams subscriptions.
pub struct RedisSubscriber {
    client: Client,
    config: RedisQueueConfig,
}

impl RedisSubscriber {
    pub fn new(config: RedisQueueConfig) -> FeedResult<Self> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| FeedError::Configuration(format!("Invalid Redis URL: {}", e)))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl NotificationSubscriber for RedisSubscriber {
    async fn subscribe(&self, sites: &[String]) -> FeedResult<Arc<dyn NotificationStream>> {
        let queue = RedisNotificationQueue::open(&self.client, &self.config, sites).await?;
        Ok(Arc::new(queue))
    }
}

/// Connections not currently inside a blocking read.
///
/// `XREADGROUP ... BLOCK` holds a multiplexed connection until it returns,
/// so each concurrent reader checks out its own.
struct IdleConnections<C> {
    idle: Mutex<Vec<C>>,
}

impl<C> IdleConnections<C> {
    fn new(initial: C) -> Self {
        Self {
            idle: Mutex::new(vec![initial]),
        }
    }

    fn checkout(&self) -> Option<C> {
        match self.idle.lock() {
            Ok(mut idle) => idle.pop(),
            Err(poisoned) => poisoned.into_inner().pop(),
        }
    }

    fn checkin(&self, conn: C) {
        match self.idle.lock() {
            Ok(mut idle) => idle.push(conn),
            Err(poisoned) => poisoned.into_inner().push(conn),
        }
    }
}

/// One consumer group reading the chunk stream for a set of sites.
pub struct RedisNotificationQueue {
    client: Client,
    /// Connections used for blocking reads, one per concurrent reader
    readers: IdleConnections<MultiplexedConnection>,
    /// Connection for acks and group management, kept off the blocking path
    conn: MultiplexedConnection,
    stream_key: String,
    group: String,
    block_ms: usize,
    batch: usize,
    sites: HashSet<String>,
}

impl RedisNotificationQueue {
    /// Connect and create a fresh consumer group at the stream tail.
    pub async fn open(
        client: &Client,
        config: &RedisQueueConfig,
        sites: &[String],
    ) -> FeedResult<Self> {
        let read_conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| redis_err("Redis connection failed", e))?;
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| redis_err("Redis connection failed", e))?;

        let group = format!("radial-feed-{}", Uuid::new_v4().simple());
        let _: () = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&config.stream_key)
            .arg(&group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_err("Failed to create consumer group", e))?;

        info!(
            stream = %config.stream_key,
            group = %group,
            sites = sites.len(),
            "Opened Redis chunk subscription"
        );

        Ok(Self {
            client: client.clone(),
            readers: IdleConnections::new(read_conn),
            conn,
            stream_key: config.stream_key.clone(),
            group,
            block_ms: config.block_ms,
            batch: config.batch,
            sites: sites.iter().cloned().collect(),
        })
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    async fn reader(&self) -> FeedResult<MultiplexedConnection> {
        if let Some(conn) = self.readers.checkout() {
            return Ok(conn);
        }
        debug!(group = %self.group, "Opening additional Redis read connection");
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| redis_err("Redis connection failed", e))
    }

    /// Append a chunk-arrival entry to the stream (used by announcers and
    /// integration tests).
    pub async fn publish(
        conn: &mut MultiplexedConnection,
        stream_key: &str,
        site: &str,
        key: &str,
    ) -> FeedResult<String> {
        let entry_id: String = conn
            .xadd(stream_key, "*", &[("site", site), ("key", key)])
            .await
            .map_err(|e| redis_err("XADD failed", e))?;
        Ok(entry_id)
    }
}

/// Convert a stream entry into a notification; entries without a key are
/// malformed and yield `None`.
fn entry_to_notification(entry: &StreamId) -> Option<ChunkNotification> {
    let key: String = entry.get("key")?;
    let mut notification = ChunkNotification::new(key).with_receipt(entry.id.clone());
    if let Some(site) = entry.get::<String>("site") {
        notification = notification.with_site(site);
    }
    Some(notification)
}

/// Whether a notification belongs to the subscribed site set. Untagged
/// entries fall back to the site segment of the key.
fn wanted(sites: &HashSet<String>, notification: &ChunkNotification) -> bool {
    let site = notification
        .site
        .as_deref()
        .or_else(|| notification.key.split('/').next());
    site.map(|s| sites.contains(s)).unwrap_or(false)
}

#[async_trait]
impl NotificationStream for RedisNotificationQueue {
    async fn receive(&self) -> FeedResult<Vec<ChunkNotification>> {
        let opts = StreamReadOptions::default()
            .group(&self.group, CONSUMER_NAME)
            .count(self.batch)
            .block(self.block_ms);

        let mut conn = self.reader().await?;
        // A block window with no traffic replies nil
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.stream_key], &[">"], &opts)
            .await
            .map_err(|e| redis_err("XREADGROUP failed", e))?;
        // A connection that failed a read is dropped rather than reused
        self.readers.checkin(conn);

        let mut notifications = Vec::new();
        let mut skipped = Vec::new();
        for stream in reply.map(|r| r.keys).unwrap_or_default() {
            for entry in stream.ids {
                match entry_to_notification(&entry) {
                    Some(n) if wanted(&self.sites, &n) => notifications.push(n),
                    Some(_) => skipped.push(entry.id),
                    None => {
                        warn!(id = %entry.id, "Stream entry without chunk key");
                        skipped.push(entry.id);
                    }
                }
            }
        }

        // Entries for other sites are acknowledged straight away so they do
        // not linger in the pending list.
        if !skipped.is_empty() {
            let mut conn = self.conn.clone();
            let _: i64 = conn
                .xack(&self.stream_key, &self.group, skipped.as_slice())
                .await
                .map_err(|e| redis_err("XACK failed", e))?;
        }

        debug!(count = notifications.len(), "Received chunk notifications");
        Ok(notifications)
    }

    async fn acknowledge(&self, notification: &ChunkNotification) -> FeedResult<()> {
        let Some(id) = &notification.receipt else {
            return Ok(());
        };
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .xack(&self.stream_key, &self.group, &[id])
            .await
            .map_err(|e| redis_err("XACK failed", e))?;
        Ok(())
    }

    async fn close(&self) -> FeedResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .xgroup_destroy(&self.stream_key, &self.group)
            .await
            .map_err(|e| redis_err("XGROUP DESTROY failed", e))?;
        info!(group = %self.group, "Closed Redis chunk subscription");
        Ok(())
    }
}
