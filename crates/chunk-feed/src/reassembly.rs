//! Per-site chunk reassembly queue.
//!
//! Notifications arrive in any order and may repeat. The queue hands chunks
//! to the publisher in `(volume, sequence)` order, starting from the first
//! chunk it sees. When the expected successor does not show up and too many
//! later chunks pile up, the oldest pending chunk is released out of order
//! so that a lost notification only costs one gap instead of stalling the
//! site forever.

use metrics::counter;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::{debug, info};

use radar_common::{ChunkIdentifier, ChunkPosition, FeedError, FeedResult};

/// Snapshot of a queue for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub site_id: String,
    pub threshold: usize,
    pub pending: usize,
    pub last_released: Option<ChunkPosition>,
    pub released: u64,
    pub force_released: u64,
    pub discarded: u64,
    pub shut_down: bool,
}

#[derive(Debug, Default)]
struct ReassemblyState {
    /// `None` until the first chunk is handed out
    last_released: Option<ChunkPosition>,
    pending: BTreeMap<(u32, u32), ChunkIdentifier>,
    released: u64,
    force_released: u64,
    discarded: u64,
}

impl ReassemblyState {
    /// Drop pending chunks at or before the last released position. They
    /// can never become the expected successor.
    ///
    /// An anchor at the top of the key range has no successor at all, so
    /// nothing counts as stale and the feed restarts through force release.
    fn discard_stale(&mut self, site: &str) {
        let Some(last) = self.last_released else {
            return;
        };
        if last.expected_successor().is_none() {
            return;
        }
        let anchor = last.order_key();
        while let Some((&key, _)) = self.pending.first_key_value() {
            if key > anchor {
                break;
            }
            self.pending.pop_first();
            self.discarded += 1;
            debug!(
                site = %site,
                volume = key.0,
                sequence = key.1,
                "Discarded stale chunk"
            );
        }
    }

    /// One evaluation of the release rule. Returns the chunk and whether it
    /// was forced out of order.
    fn release(&mut self, site: &str, threshold: usize) -> Option<(ChunkIdentifier, bool)> {
        self.discard_stale(site);

        let (id, forced) = match self.last_released {
            None => (self.pending.pop_first()?.1, false),
            Some(last) => {
                let successor = last
                    .expected_successor()
                    .and_then(|key| self.pending.remove(&key));
                if let Some(id) = successor {
                    (id, false)
                } else if self.pending.len() >= threshold {
                    (self.pending.pop_first()?.1, true)
                } else {
                    return None;
                }
            }
        };

        self.last_released = Some(id.position());
        self.released += 1;
        if forced {
            self.force_released += 1;
        }
        Some((id, forced))
    }
}

/// Ordered hand-off point between the feed listener and a site publisher.
pub struct ChunkReassemblyQueue {
    site_id: String,
    threshold: usize,
    state: Mutex<ReassemblyState>,
    notify: Notify,
    shutdown: AtomicBool,
}

impl ChunkReassemblyQueue {
    pub fn new(site_id: impl Into<String>, threshold: usize) -> Self {
        Self {
            site_id: site_id.into(),
            threshold: threshold.max(1),
            state: Mutex::new(ReassemblyState::default()),
            notify: Notify::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    fn lock(&self) -> MutexGuard<'_, ReassemblyState> {
        // State stays consistent across a panicking holder; every mutation
        // completes before the guard is released.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add an arrived chunk. Returns `false` for a duplicate of a chunk that
    /// is already pending. Never blocks.
    pub fn offer(&self, id: ChunkIdentifier) -> bool {
        let inserted = {
            let mut state = self.lock();
            let key = id.order_key();
            if state.pending.contains_key(&key) {
                false
            } else {
                state.pending.insert(key, id);
                true
            }
        };

        if inserted {
            self.notify.notify_waiters();
        }
        inserted
    }

    /// Evaluate the release rule once without waiting.
    pub fn try_next(&self) -> Option<ChunkIdentifier> {
        let released = self.lock().release(&self.site_id, self.threshold);

        released.map(|(id, forced)| {
            counter!("radar_chunks_released_total", "site" => self.site_id.clone()).increment(1);
            if forced {
                counter!("radar_chunks_force_released_total", "site" => self.site_id.clone())
                    .increment(1);
                info!(
                    site = %self.site_id,
                    volume = id.volume,
                    sequence = id.sequence,
                    threshold = self.threshold,
                    "Force-released chunk out of order"
                );
            } else {
                debug!(
                    site = %self.site_id,
                    volume = id.volume,
                    sequence = id.sequence,
                    kind = %id.kind,
                    "Released chunk"
                );
            }
            id
        })
    }

    /// Wait until a chunk can be released.
    ///
    /// Returns `FeedError::Cancelled` as soon as [`shutdown`](Self::shutdown)
    /// is called.
    pub async fn next(&self) -> FeedResult<ChunkIdentifier> {
        loop {
            // Register for wakeups before looking at the state so an offer
            // landing in between is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.shutdown.load(Ordering::Acquire) {
                return Err(FeedError::Cancelled);
            }
            if let Some(id) = self.try_next() {
                return Ok(id);
            }

            notified.await;
        }
    }

    /// Wake every waiter with `Cancelled`; later `next()` calls fail fast
    /// until [`reopen`](Self::reopen).
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn reopen(&self) {
        self.shutdown.store(false, Ordering::Release);
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Clear pending chunks and forget the ordering anchor.
    pub fn reset(&self) {
        let mut state = self.lock();
        let dropped = state.pending.len();
        state.pending.clear();
        state.last_released = None;
        drop(state);

        debug!(site = %self.site_id, dropped, "Reset reassembly queue");
    }

    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.lock();
        QueueStats {
            site_id: self.site_id.clone(),
            threshold: self.threshold,
            pending: state.pending.len(),
            last_released: state.last_released,
            released: state.released,
            force_released: state.force_released,
            discarded: state.discarded,
            shut_down: self.is_shut_down(),
        }
    }
}
