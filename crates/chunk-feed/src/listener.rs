//! Feed listener: pulls chunk notifications off the remote queue and
//! routes them into the per-site reassembly queues.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use radar_common::ChunkIdentifier;
use storage::{ChunkNotification, NotificationStream};

use crate::router::ChunkRouter;

/// Running listener workers for one subscription.
pub struct FeedListener {
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl FeedListener {
    /// Spawn `threads` workers sharing `stream`.
    pub fn spawn(
        stream: Arc<dyn NotificationStream>,
        router: Arc<ChunkRouter>,
        threads: usize,
        retry_delay: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let workers = (0..threads.max(1))
            .map(|worker| {
                let stream = stream.clone();
                let router = router.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    run_worker(worker, stream, router, cancel, retry_delay).await;
                })
            })
            .collect();

        info!(workers = threads.max(1), "Feed listener started");
        Self { cancel, workers }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Cancel all workers (including any in-flight long-poll) and wait for
    /// them to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Listener worker panicked");
            }
        }
        info!("Feed listener stopped");
    }
}

async fn run_worker(
    worker: usize,
    stream: Arc<dyn NotificationStream>,
    router: Arc<ChunkRouter>,
    cancel: CancellationToken,
    retry_delay: Duration,
) {
    debug!(worker, "Listener worker running");

    loop {
        let batch = tokio::select! {
            _ = cancel.cancelled() => break,
            batch = stream.receive() => batch,
        };

        match batch {
            Ok(notifications) => {
                for notification in notifications {
                    route_notification(&router, &notification);
                    if let Err(e) = stream.acknowledge(&notification).await {
                        warn!(worker, key = %notification.key, error = %e, "Failed to acknowledge notification");
                    }
                }
            }
            Err(e) => {
                warn!(worker, error = %e, retry_ms = retry_delay.as_millis() as u64, "Receive failed, retrying");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(retry_delay) => {}
                }
            }
        }
    }

    debug!(worker, "Listener worker exited");
}

/// Parse and route one notification. Malformed keys are logged and dropped.
fn route_notification(router: &ChunkRouter, notification: &ChunkNotification) {
    match ChunkIdentifier::parse(&notification.key) {
        Ok(id) => {
            if !router.route(id) {
                debug!(key = %notification.key, "Notification not queued");
            }
        }
        Err(e) => {
            warn!(key = %notification.key, error = %e, "Skipping malformed chunk key");
        }
    }
}
