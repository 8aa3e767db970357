//! Demand-driven subscription lifecycle.
//!
//! The remote subscription exists only while someone is listening. The
//! first registration activates it immediately; it is torn down once the
//! feed has had no listeners for longer than the idle timeout. A single
//! monitor task checks the idle condition for the whole feed.

use metrics::gauge;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use radar_common::FeedResult;
use storage::{NotificationStream, NotificationSubscriber};

use crate::config::FeedConfig;
use crate::listener::FeedListener;
use crate::registry::ListenerRegistry;
use crate::router::ChunkRouter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedState {
    Idle,
    Active,
}

struct ActiveFeed {
    stream: Arc<dyn NotificationStream>,
    listener: FeedListener,
}

/// Owns the remote subscription and the listener workers feeding it.
pub struct LifecycleController {
    config: Arc<FeedConfig>,
    subscriber: Arc<dyn NotificationSubscriber>,
    router: Arc<ChunkRouter>,
    registry: Arc<ListenerRegistry>,
    active: Mutex<Option<ActiveFeed>>,
    state: watch::Sender<FeedState>,
}

impl LifecycleController {
    pub fn new(
        config: Arc<FeedConfig>,
        subscriber: Arc<dyn NotificationSubscriber>,
        router: Arc<ChunkRouter>,
        registry: Arc<ListenerRegistry>,
    ) -> Self {
        let (state, _) = watch::channel(FeedState::Idle);
        Self {
            config,
            subscriber,
            router,
            registry,
            active: Mutex::new(None),
            state,
        }
    }

    pub fn state(&self) -> FeedState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<FeedState> {
        self.state.subscribe()
    }

    /// Open the subscription and start listening, unless already active.
    ///
    /// Configuration and subscription errors leave the feed Idle.
    pub async fn ensure_active(&self) -> FeedResult<()> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            return Ok(());
        }

        self.config.validate()?;
        let stream = self.subscriber.subscribe(&self.config.sites).await?;
        let listener = FeedListener::spawn(
            stream.clone(),
            self.router.clone(),
            self.config.listener_threads,
            self.config.retry_delay(),
        );
        *active = Some(ActiveFeed { stream, listener });

        self.state.send_replace(FeedState::Active);
        gauge!("radar_feed_active").set(1.0);
        info!(sites = ?self.config.sites, "Feed activated");
        Ok(())
    }

    /// Stop listening, close the subscription and reset all site queues.
    ///
    /// The feed is Idle afterwards even if closing the remote side fails;
    /// that error is returned.
    pub async fn deactivate(&self) -> FeedResult<()> {
        let mut active = self.active.lock().await;
        self.teardown(&mut active).await
    }

    /// Deactivate only if the feed has had no listeners for longer than the
    /// idle timeout at `now`. The listener count is read under the
    /// lifecycle lock, so a registration racing with this call either
    /// keeps the feed up or reactivates it after teardown.
    pub async fn deactivate_if_idle(&self, now: Instant) -> FeedResult<bool> {
        let mut active = self.active.lock().await;
        if active.is_none() || self.registry.total() > 0 {
            return Ok(false);
        }
        let idle_for = now.saturating_duration_since(self.registry.idle_since());
        if idle_for <= self.config.idle_timeout() {
            return Ok(false);
        }

        info!(idle_secs = idle_for.as_secs(), "No listeners, deactivating feed");
        self.teardown(&mut active).await?;
        Ok(true)
    }

    async fn teardown(&self, active: &mut Option<ActiveFeed>) -> FeedResult<()> {
        let Some(feed) = active.take() else {
            return Ok(());
        };

        feed.listener.stop().await;
        let closed = feed.stream.close().await;
        self.router.reset_all();

        self.state.send_replace(FeedState::Idle);
        gauge!("radar_feed_active").set(0.0);
        match &closed {
            Ok(()) => info!("Feed deactivated"),
            Err(e) => warn!(error = %e, "Feed deactivated; closing subscription failed"),
        }
        closed
    }

    /// One idle check at `now`. Returns `true` if the feed was deactivated.
    ///
    /// While Idle with listeners registered (an earlier activation failed),
    /// activation is retried instead.
    pub async fn check_idle_at(&self, now: Instant) -> FeedResult<bool> {
        if self.state() == FeedState::Idle {
            let listeners = self.registry.total();
            if listeners > 0 {
                debug!(listeners, "Retrying activation");
                self.ensure_active().await?;
            }
            return Ok(false);
        }

        self.deactivate_if_idle(now).await
    }

    /// Activate at startup with the idle clock running, so an unused feed
    /// shuts itself down after the idle timeout.
    pub async fn activate_eagerly(&self) -> FeedResult<()> {
        self.registry.mark_idle(Instant::now());
        self.ensure_active().await
    }

    /// Spawn the single periodic idle monitor for this feed.
    pub fn spawn_idle_monitor(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let controller = self.clone();
        let period = self.config.idle_check_interval();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = controller.check_idle_at(Instant::now()).await {
                            warn!(error = %e, "Idle check failed");
                        }
                    }
                }
            }
            debug!("Idle monitor stopped");
        })
    }
}
