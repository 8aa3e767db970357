//! Common types shared across the radial feed crates and services.

pub mod chunk;
pub mod error;
pub mod radial;
pub mod sites;

pub use chunk::{ChunkIdentifier, ChunkKind, ChunkPosition};
pub use error::{FeedError, FeedResult};
pub use radial::{MomentData, MomentKind, RadialRecord};
pub use sites::{SiteInfo, SiteTable};
