//! Routes parsed chunk identifiers to their site's reassembly queue.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use radar_common::ChunkIdentifier;

use crate::reassembly::ChunkReassemblyQueue;

/// Site -> queue lookup shared by the listener workers.
pub struct ChunkRouter {
    queues: BTreeMap<String, Arc<ChunkReassemblyQueue>>,
}

impl ChunkRouter {
    pub fn new(queues: impl IntoIterator<Item = Arc<ChunkReassemblyQueue>>) -> Self {
        Self {
            queues: queues
                .into_iter()
                .map(|q| (q.site_id().to_string(), q))
                .collect(),
        }
    }

    /// Offer a chunk to its site's queue. Chunks for unconfigured sites
    /// return `false`.
    pub fn route(&self, id: ChunkIdentifier) -> bool {
        match self.queues.get(&id.site_id) {
            Some(queue) => queue.offer(id),
            None => {
                debug!(site = %id.site_id, "Chunk for unconfigured site ignored");
                false
            }
        }
    }

    pub fn queue(&self, site: &str) -> Option<&Arc<ChunkReassemblyQueue>> {
        self.queues.get(site)
    }

    pub fn sites(&self) -> impl Iterator<Item = &str> {
        self.queues.keys().map(String::as_str)
    }

    /// Reset every queue (subscription torn down).
    pub fn reset_all(&self) {
        for queue in self.queues.values() {
            queue.reset();
        }
    }
}
