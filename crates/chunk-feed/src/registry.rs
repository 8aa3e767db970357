//! Downstream listener registration.

use metrics::gauge;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;
use tracing::{debug, warn};

use radar_common::{FeedError, FeedResult};

/// Listener counts per site, plus when the feed last lost its final
/// listener.
pub struct ListenerRegistry {
    sites: BTreeMap<String, AtomicUsize>,
    total: AtomicUsize,
    idle_since: Mutex<Instant>,
}

impl ListenerRegistry {
    pub fn new<S: AsRef<str>>(sites: impl IntoIterator<Item = S>) -> Self {
        Self {
            sites: sites
                .into_iter()
                .map(|s| (s.as_ref().to_string(), AtomicUsize::new(0)))
                .collect(),
            total: AtomicUsize::new(0),
            idle_since: Mutex::new(Instant::now()),
        }
    }

    fn counter(&self, site: &str) -> FeedResult<&AtomicUsize> {
        self.sites
            .get(site)
            .ok_or_else(|| FeedError::UnknownSite(site.to_string()))
    }

    /// Add a listener; returns the site's new count.
    pub fn register(&self, site: &str) -> FeedResult<usize> {
        let count = self.counter(site)?.fetch_add(1, Ordering::AcqRel) + 1;
        let total = self.total.fetch_add(1, Ordering::AcqRel) + 1;

        gauge!("radar_listeners", "site" => site.to_string()).set(count as f64);
        debug!(site = %site, count, total, "Listener registered");
        Ok(count)
    }

    /// Remove a listener; returns the site's new count. Removing from a
    /// site with no listeners is a no-op.
    pub fn unregister(&self, site: &str) -> FeedResult<usize> {
        let counter = self.counter(site)?;
        let Ok(previous) =
            counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1))
        else {
            warn!(site = %site, "Unregister without a registered listener");
            return Ok(0);
        };
        let count = previous - 1;

        let total = self.total.fetch_sub(1, Ordering::AcqRel) - 1;
        if total == 0 {
            self.mark_idle(Instant::now());
        }

        gauge!("radar_listeners", "site" => site.to_string()).set(count as f64);
        debug!(site = %site, count, total, "Listener unregistered");
        Ok(count)
    }

    /// RAII registration: the listener is removed when the guard drops.
    pub fn guard(self: &Arc<Self>, site: &str) -> FeedResult<ListenerGuard> {
        self.register(site)?;
        Ok(ListenerGuard {
            registry: self.clone(),
            site: site.to_string(),
        })
    }

    pub fn count(&self, site: &str) -> usize {
        self.sites
            .get(site)
            .map(|c| c.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::Acquire)
    }

    pub fn contains(&self, site: &str) -> bool {
        self.sites.contains_key(site)
    }

    /// Instant of the last deregistration that left the feed without
    /// listeners (or of the last explicit `mark_idle`).
    pub fn idle_since(&self) -> Instant {
        match self.idle_since.lock() {
            Ok(stamp) => *stamp,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Restart the idle clock.
    pub fn mark_idle(&self, at: Instant) {
        match self.idle_since.lock() {
            Ok(mut stamp) => *stamp = at,
            Err(poisoned) => *poisoned.into_inner() = at,
        }
    }
}

/// Keeps one listener registered for as long as it lives.
pub struct ListenerGuard {
    registry: Arc<ListenerRegistry>,
    site: String,
}

impl ListenerGuard {
    pub fn site(&self) -> &str {
        &self.site
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        let _ = self.registry.unregister(&self.site);
    }
}
