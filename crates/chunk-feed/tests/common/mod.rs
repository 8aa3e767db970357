//! Test doubles for the remote queue, chunk store and decoder.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use chunk_feed::{FeedConfig, SharedRadial};
use level2_decoder::RadialDecoder;
use radar_common::{ChunkIdentifier, ChunkKind, FeedError, FeedResult, RadialRecord};
use storage::{ChunkFetcher, ChunkNotification, NotificationStream, NotificationSubscriber};

pub fn chunk(site: &str, volume: u32, sequence: u32, kind: ChunkKind) -> ChunkIdentifier {
    ChunkIdentifier::new(
        site,
        volume,
        sequence,
        kind,
        test_utils::chunk_key(site, volume, sequence, kind.code()),
    )
}

/// Config with short timers for lifecycle tests.
pub fn fast_config(sites: &[&str]) -> FeedConfig {
    let mut config = FeedConfig::new(sites.iter().copied());
    config.idle_timeout_secs = 5;
    config.idle_check_interval_secs = 1;
    config.retry_delay_ms = 10;
    config
}

/// Wait (bounded) for the next radial on a subscription-like receiver.
pub async fn recv_within<F, T>(fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("timed out waiting")
}

/// Poll `check` until it holds or a few seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

pub fn azimuths(records: &[SharedRadial]) -> Vec<u16> {
    records.iter().map(|r| r.azimuth_number).collect()
}

// ============================================================================
// Notification queue
// ============================================================================

type Batch = FeedResult<Vec<ChunkNotification>>;

/// Scripted notification stream: tests push batches, workers receive them.
pub struct MockStream {
    tx: mpsc::UnboundedSender<Batch>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Batch>>,
    acked: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl MockStream {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            acked: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn push_keys<S: AsRef<str>>(&self, keys: &[S]) {
        let batch = keys
            .iter()
            .map(|k| ChunkNotification::new(k.as_ref()))
            .collect();
        let _ = self.tx.send(Ok(batch));
    }

    pub fn push_error(&self, message: &str) {
        let _ = self
            .tx
            .send(Err(FeedError::Subscription(message.to_string())));
    }

    pub fn acked(&self) -> Vec<String> {
        self.acked.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationStream for MockStream {
    async fn receive(&self) -> FeedResult<Vec<ChunkNotification>> {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(batch) => batch,
            None => std::future::pending().await,
        }
    }

    async fn acknowledge(&self, notification: &ChunkNotification) -> FeedResult<()> {
        self.acked.lock().unwrap().push(notification.key.clone());
        Ok(())
    }

    async fn close(&self) -> FeedResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Subscriber handing out fresh `MockStream`s and recording every call.
#[derive(Default)]
pub struct MockSubscriber {
    streams: Mutex<Vec<Arc<MockStream>>>,
    calls: AtomicUsize,
    failures_left: AtomicUsize,
}

impl MockSubscriber {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `n` subscribe calls with a subscription error.
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn stream_count(&self) -> usize {
        self.streams.lock().unwrap().len()
    }

    pub fn latest_stream(&self) -> Arc<MockStream> {
        self.streams
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no stream opened")
    }
}

#[async_trait]
impl NotificationSubscriber for MockSubscriber {
    async fn subscribe(&self, _sites: &[String]) -> FeedResult<Arc<dyn NotificationStream>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(FeedError::Subscription("queue creation refused".to_string()));
        }

        let stream = Arc::new(MockStream::new());
        self.streams.lock().unwrap().push(stream.clone());
        Ok(stream)
    }
}

// ============================================================================
// Chunk store and decoder
// ============================================================================

/// Fetcher that "downloads" a key to a path equal to the key itself.
#[derive(Default)]
pub struct MockFetcher {
    fail: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
    fetched: Mutex<Vec<String>>,
    removed: Mutex<Vec<PathBuf>>,
}

impl MockFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_on(&self, raw_path: impl Into<String>) {
        self.fail.lock().unwrap().insert(raw_path.into());
    }

    /// Make every fetch take `delay` before it completes.
    pub fn delay_fetch(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn removed(&self) -> usize {
        self.removed.lock().unwrap().len()
    }
}

#[async_trait]
impl ChunkFetcher for MockFetcher {
    async fn fetch(&self, raw_path: &str) -> FeedResult<PathBuf> {
        self.fetched.lock().unwrap().push(raw_path.to_string());
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.lock().unwrap().contains(raw_path) {
            return Err(FeedError::Transfer(format!("{} unavailable", raw_path)));
        }
        Ok(PathBuf::from(raw_path))
    }

    async fn remove(&self, local: &Path) -> FeedResult<()> {
        self.removed.lock().unwrap().push(local.to_path_buf());
        Ok(())
    }
}

/// Decoder that turns a chunk path back into its identifier and emits one
/// radial whose azimuth number is the chunk sequence.
#[derive(Default)]
pub struct MockDecoder {
    fail: Mutex<HashSet<u32>>,
}

impl MockDecoder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_on_sequence(&self, sequence: u32) {
        self.fail.lock().unwrap().insert(sequence);
    }
}

impl RadialDecoder for MockDecoder {
    fn decode(&self, path: &Path) -> FeedResult<Vec<RadialRecord>> {
        let id = ChunkIdentifier::parse(&path.to_string_lossy())?;
        if self.fail.lock().unwrap().contains(&id.sequence) {
            return Err(FeedError::Decode(format!("corrupt chunk {}", id)));
        }

        let mut record = RadialRecord::new(Utc::now(), "", 0.5, id.sequence as f32);
        record.azimuth_number = id.sequence as u16;
        record.elevation_number = id.volume as u8;
        Ok(vec![record])
    }

    fn decode_bytes(&self, _data: &[u8]) -> FeedResult<Vec<RadialRecord>> {
        Err(FeedError::Decode("not used".to_string()))
    }
}
