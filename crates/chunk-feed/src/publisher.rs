//! Per-site streaming publisher.
//!
//! Drains a reassembly queue in order: fetch the chunk, decode it on the
//! blocking pool, then broadcast every radial to the site's subscribers
//! and keep the latest one for late joiners.

use metrics::counter;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use level2_decoder::RadialDecoder;
use radar_common::{ChunkIdentifier, FeedError, RadialRecord};
use storage::ChunkFetcher;

use crate::reassembly::ChunkReassemblyQueue;

/// Shared, read-only view of a published radial.
pub type SharedRadial = Arc<RadialRecord>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PublisherState {
    Stopped,
    Running,
}

struct PublisherContext {
    site_id: String,
    queue: Arc<ChunkReassemblyQueue>,
    fetcher: Arc<dyn ChunkFetcher>,
    decoder: Arc<dyn RadialDecoder>,
    events: broadcast::Sender<SharedRadial>,
    latest: watch::Sender<Option<SharedRadial>>,
    keep_chunk_files: bool,
}

/// Publisher loop for one site.
pub struct SitePublisher {
    ctx: Arc<PublisherContext>,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl SitePublisher {
    pub fn new(
        queue: Arc<ChunkReassemblyQueue>,
        fetcher: Arc<dyn ChunkFetcher>,
        decoder: Arc<dyn RadialDecoder>,
        event_capacity: usize,
        keep_chunk_files: bool,
    ) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        let (latest, _) = watch::channel(None);

        Self {
            ctx: Arc::new(PublisherContext {
                site_id: queue.site_id().to_string(),
                queue,
                fetcher,
                decoder,
                events,
                latest,
                keep_chunk_files,
            }),
            task: Mutex::new(None),
        }
    }

    pub fn site_id(&self) -> &str {
        &self.ctx.site_id
    }

    pub fn queue(&self) -> &Arc<ChunkReassemblyQueue> {
        &self.ctx.queue
    }

    pub fn state(&self) -> PublisherState {
        match self.task.lock() {
            Ok(task) => match task.as_ref() {
                Some((_, handle)) if !handle.is_finished() => PublisherState::Running,
                _ => PublisherState::Stopped,
            },
            Err(_) => PublisherState::Stopped,
        }
    }

    /// Start the loop. Calling `start` on a running publisher does nothing.
    pub fn start(&self) {
        let Ok(mut task) = self.task.lock() else {
            error!(site = %self.ctx.site_id, "Publisher state lock poisoned");
            return;
        };
        if let Some((_, handle)) = task.as_ref() {
            if !handle.is_finished() {
                return;
            }
        }

        self.ctx.queue.reopen();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(self.ctx.clone(), cancel.clone()));
        *task = Some((cancel, handle));
        info!(site = %self.ctx.site_id, "Publisher started");
    }

    /// Stop the loop and join it. A wait for the next chunk is interrupted;
    /// a chunk already being processed finishes first.
    pub async fn stop(&self) {
        let running = match self.task.lock() {
            Ok(mut task) => task.take(),
            Err(_) => None,
        };
        let Some((cancel, handle)) = running else {
            return;
        };

        self.ctx.queue.shutdown();
        cancel.cancel();
        if let Err(e) = handle.await {
            warn!(site = %self.ctx.site_id, error = %e, "Publisher task panicked");
        }
        info!(site = %self.ctx.site_id, "Publisher stopped");
    }

    /// Receive every radial published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SharedRadial> {
        self.ctx.events.subscribe()
    }

    /// Watch the most recent radial.
    pub fn watch_latest(&self) -> watch::Receiver<Option<SharedRadial>> {
        self.ctx.latest.subscribe()
    }

    pub fn latest(&self) -> Option<SharedRadial> {
        self.ctx.latest.borrow().clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.ctx.events.receiver_count()
    }
}

async fn run(ctx: Arc<PublisherContext>, cancel: CancellationToken) {
    loop {
        let id = tokio::select! {
            _ = cancel.cancelled() => break,
            next = ctx.queue.next() => match next {
                Ok(id) => id,
                Err(FeedError::Cancelled) => break,
                Err(e) => {
                    error!(site = %ctx.site_id, error = %e, "Reassembly queue failed");
                    break;
                }
            },
        };

        // A released chunk is always finished so its local file is removed
        ctx.process(id).await;
    }
    debug!(site = %ctx.site_id, "Publisher loop exited");
}

impl PublisherContext {
    async fn process(&self, id: ChunkIdentifier) {
        let path = match self.fetcher.fetch(&id.raw_path).await {
            Ok(path) => path,
            Err(e) => {
                counter!("radar_chunk_fetch_errors_total", "site" => self.site_id.clone())
                    .increment(1);
                warn!(site = %self.site_id, chunk = %id, error = %e, "Chunk fetch failed");
                return;
            }
        };

        let decoded = self.decode(path.clone()).await;
        if !self.keep_chunk_files {
            if let Err(e) = self.fetcher.remove(&path).await {
                debug!(path = %path.display(), error = %e, "Failed to remove chunk file");
            }
        }

        let records = match decoded {
            Ok(records) => records,
            Err(e) => {
                counter!("radar_chunk_decode_errors_total", "site" => self.site_id.clone())
                    .increment(1);
                warn!(site = %self.site_id, chunk = %id, error = %e, "Chunk decode failed");
                return;
            }
        };

        debug!(site = %self.site_id, chunk = %id, radials = records.len(), "Publishing chunk");
        let count = records.len() as u64;
        for mut record in records {
            if record.site_id.is_empty() {
                record.site_id = self.site_id.clone();
            }
            let record = Arc::new(record);
            self.latest.send_replace(Some(record.clone()));
            // No receivers is fine; records are not replayed
            let _ = self.events.send(record);
        }
        counter!("radar_radials_published_total", "site" => self.site_id.clone()).increment(count);
    }

    async fn decode(&self, path: PathBuf) -> Result<Vec<RadialRecord>, FeedError> {
        let decoder = self.decoder.clone();
        tokio::task::spawn_blocking(move || decoder.decode(&path))
            .await
            .map_err(|e| FeedError::Decode(format!("Decoder task failed: {}", e)))?
    }
}
