//! Realtime radial feed.
//!
//! Chunk notifications are pulled off a remote queue, routed to per-site
//! reassembly queues and handed to each site's publisher in order. The
//! publisher fetches and decodes the chunk, then broadcasts its radials.
//! The remote subscription only exists while listeners are registered.

pub mod config;
pub mod feed;
pub mod lifecycle;
pub mod listener;
pub mod publisher;
pub mod reassembly;
pub mod registry;
pub mod router;

pub use config::FeedConfig;
pub use feed::{FeedStatus, RadarFeed, RadialSubscription, SiteStatus};
pub use lifecycle::{FeedState, LifecycleController};
pub use listener::FeedListener;
pub use publisher::{PublisherState, SharedRadial, SitePublisher};
pub use reassembly::{ChunkReassemblyQueue, QueueStats};
pub use registry::{ListenerGuard, ListenerRegistry};
pub use router::ChunkRouter;
