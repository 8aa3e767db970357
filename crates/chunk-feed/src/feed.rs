//! `RadarFeed`: wires queues, publishers, listener and lifecycle for a
//! group of sites.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use level2_decoder::RadialDecoder;
use radar_common::{FeedError, FeedResult};
use storage::{ChunkFetcher, NotificationSubscriber};

use crate::config::FeedConfig;
use crate::lifecycle::{FeedState, LifecycleController};
use crate::publisher::{PublisherState, SharedRadial, SitePublisher};
use crate::reassembly::{ChunkReassemblyQueue, QueueStats};
use crate::registry::{ListenerGuard, ListenerRegistry};
use crate::router::ChunkRouter;

/// Status of one site.
#[derive(Debug, Clone, Serialize)]
pub struct SiteStatus {
    pub site_id: String,
    pub listeners: usize,
    pub publisher: PublisherState,
    pub queue: QueueStats,
    pub latest_timestamp: Option<DateTime<Utc>>,
}

/// Status of the whole feed.
#[derive(Debug, Clone, Serialize)]
pub struct FeedStatus {
    pub state: FeedState,
    pub total_listeners: usize,
    pub sites: Vec<SiteStatus>,
}

/// Realtime radial feed for a configured group of sites.
pub struct RadarFeed {
    config: Arc<FeedConfig>,
    publishers: BTreeMap<String, Arc<SitePublisher>>,
    registry: Arc<ListenerRegistry>,
    lifecycle: Arc<LifecycleController>,
    monitor: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl RadarFeed {
    /// Build the feed. Nothing runs until [`start`](Self::start).
    pub fn new(
        config: FeedConfig,
        subscriber: Arc<dyn NotificationSubscriber>,
        fetcher: Arc<dyn ChunkFetcher>,
        decoder: Arc<dyn RadialDecoder>,
    ) -> FeedResult<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let queues: Vec<Arc<ChunkReassemblyQueue>> = config
            .sites
            .iter()
            .map(|site| Arc::new(ChunkReassemblyQueue::new(site.clone(), config.threshold_for(site))))
            .collect();

        let publishers = queues
            .iter()
            .map(|queue| {
                let publisher = SitePublisher::new(
                    queue.clone(),
                    fetcher.clone(),
                    decoder.clone(),
                    config.event_capacity,
                    config.keep_chunk_files,
                );
                (queue.site_id().to_string(), Arc::new(publisher))
            })
            .collect();

        let router = Arc::new(ChunkRouter::new(queues));
        let registry = Arc::new(ListenerRegistry::new(&config.sites));
        let lifecycle = Arc::new(LifecycleController::new(
            config.clone(),
            subscriber,
            router,
            registry.clone(),
        ));

        Ok(Self {
            config,
            publishers,
            registry,
            lifecycle,
            monitor: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    pub fn sites(&self) -> impl Iterator<Item = &str> {
        self.publishers.keys().map(String::as_str)
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleController> {
        &self.lifecycle
    }

    pub fn state(&self) -> FeedState {
        self.lifecycle.state()
    }

    fn publisher(&self, site: &str) -> FeedResult<&Arc<SitePublisher>> {
        self.publishers
            .get(site)
            .ok_or_else(|| FeedError::UnknownSite(site.to_string()))
    }

    /// Start publishers and the idle monitor; activate right away when
    /// configured to.
    pub async fn start(&self) -> FeedResult<()> {
        for publisher in self.publishers.values() {
            publisher.start();
        }

        let spawned = match self.monitor.lock() {
            Ok(mut monitor) if monitor.is_none() => {
                let cancel = CancellationToken::new();
                let handle = self.lifecycle.spawn_idle_monitor(cancel.clone());
                *monitor = Some((cancel, handle));
                true
            }
            _ => false,
        };

        if spawned && self.config.activate_on_start {
            match self.lifecycle.activate_eagerly().await {
                Ok(()) => {}
                Err(e @ FeedError::Configuration(_)) => return Err(e),
                Err(e) => warn!(error = %e, "Eager activation failed"),
            }
        }

        info!(sites = self.publishers.len(), "Radar feed started");
        Ok(())
    }

    /// Register a listener and make sure the feed is active.
    ///
    /// A subscription failure keeps the registration; the idle monitor
    /// retries activation. A configuration failure undoes it.
    pub async fn register_listener(&self, site: &str) -> FeedResult<usize> {
        let count = self.registry.register(site)?;
        self.activate_for_listener(site).await?;
        Ok(count)
    }

    pub fn unregister_listener(&self, site: &str) -> FeedResult<usize> {
        self.registry.unregister(site)
    }

    async fn activate_for_listener(&self, site: &str) -> FeedResult<()> {
        match self.lifecycle.ensure_active().await {
            Ok(()) => Ok(()),
            Err(e @ FeedError::Configuration(_)) => {
                let _ = self.registry.unregister(site);
                Err(e)
            }
            Err(e) => {
                warn!(site = %site, error = %e, "Activation failed; will retry");
                Ok(())
            }
        }
    }

    /// Subscribe to a site's radials. The listener stays registered until
    /// the subscription is dropped.
    pub async fn subscribe(&self, site: &str) -> FeedResult<RadialSubscription> {
        let publisher = self.publisher(site)?;
        let receiver = publisher.subscribe();
        let latest = publisher.watch_latest();

        let guard = self.registry.guard(site)?;
        if let Err(e) = self.lifecycle.ensure_active().await {
            if matches!(e, FeedError::Configuration(_)) {
                return Err(e);
            }
            warn!(site = %site, error = %e, "Activation failed; will retry");
        }

        Ok(RadialSubscription {
            receiver,
            latest,
            _guard: guard,
        })
    }

    /// Most recent radial for a site.
    pub fn latest(&self, site: &str) -> FeedResult<Option<SharedRadial>> {
        Ok(self.publisher(site)?.latest())
    }

    pub fn status(&self) -> FeedStatus {
        let sites = self
            .publishers
            .iter()
            .map(|(site, publisher)| SiteStatus {
                site_id: site.clone(),
                listeners: self.registry.count(site),
                publisher: publisher.state(),
                queue: publisher.queue().stats(),
                latest_timestamp: publisher.latest().map(|r| r.timestamp),
            })
            .collect();

        FeedStatus {
            state: self.lifecycle.state(),
            total_listeners: self.registry.total(),
            sites,
        }
    }

    /// Stop the idle monitor, tear down the subscription and stop every
    /// publisher.
    pub async fn shutdown(&self) {
        let monitor = match self.monitor.lock() {
            Ok(mut monitor) => monitor.take(),
            Err(_) => None,
        };
        if let Some((cancel, handle)) = monitor {
            cancel.cancel();
            let _ = handle.await;
        }

        if let Err(e) = self.lifecycle.deactivate().await {
            warn!(error = %e, "Closing subscription during shutdown failed");
        }
        for publisher in self.publishers.values() {
            publisher.stop().await;
        }
        info!("Radar feed shut down");
    }
}

/// Live radials for one site. Dropping it unregisters the listener.
pub struct RadialSubscription {
    receiver: broadcast::Receiver<SharedRadial>,
    latest: watch::Receiver<Option<SharedRadial>>,
    _guard: ListenerGuard,
}

impl RadialSubscription {
    pub fn site(&self) -> &str {
        self._guard.site()
    }

    /// Next published radial; `None` once the publisher is gone. A
    /// subscriber that falls behind skips the radials it missed.
    pub async fn recv(&mut self) -> Option<SharedRadial> {
        loop {
            match self.receiver.recv().await {
                Ok(record) => return Some(record),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(site = %self.site(), skipped, "Subscriber lagging, radials dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Most recent radial published before or since subscribing.
    pub fn latest(&self) -> Option<SharedRadial> {
        self.latest.borrow().clone()
    }
}
