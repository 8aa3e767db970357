//! Chunk identifiers for the realtime Level II feed.
//!
//! Realtime chunks are published under object keys of the form
//! `{SITE}/{VOLUME}/{YYYYMMDD-HHMMSS}-{SEQ:03}-{KIND}`, for example
//! `KTLX/585/20240501-221204-012-I`. The volume number identifies one
//! complete sweep, the sequence is the chunk index inside that volume
//! (starting at 1) and the kind marks volume boundaries.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::error::{FeedError, FeedResult};

/// Boundary marker carried by every chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChunkKind {
    /// First chunk of a volume (carries the volume header).
    Start,
    /// Any chunk between the first and the last.
    Intermediate,
    /// Last chunk of a volume.
    End,
}

impl ChunkKind {
    /// Parse the single-letter suffix used in chunk keys.
    pub fn from_code(code: char) -> Option<Self> {
        match code {
            'S' => Some(ChunkKind::Start),
            'I' => Some(ChunkKind::Intermediate),
            'E' => Some(ChunkKind::End),
            _ => None,
        }
    }

    pub fn code(&self) -> char {
        match self {
            ChunkKind::Start => 'S',
            ChunkKind::Intermediate => 'I',
            ChunkKind::End => 'E',
        }
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Position of a chunk within a site's feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkPosition {
    pub volume: u32,
    pub sequence: u32,
    pub kind: ChunkKind,
}

impl ChunkPosition {
    pub fn new(volume: u32, sequence: u32, kind: ChunkKind) -> Self {
        Self {
            volume,
            sequence,
            kind,
        }
    }

    /// The `(volume, sequence)` pair that follows this position.
    ///
    /// An `End` chunk closes the volume, so the next chunk is the first
    /// chunk of the following volume. `None` at the top of the `u32` range.
    pub fn expected_successor(&self) -> Option<(u32, u32)> {
        match self.kind {
            ChunkKind::End => self.volume.checked_add(1).map(|volume| (volume, 1)),
            _ => self.sequence.checked_add(1).map(|sequence| (self.volume, sequence)),
        }
    }

    /// Ordering key shared with [`ChunkIdentifier::order_key`].
    pub fn order_key(&self) -> (u32, u32) {
        (self.volume, self.sequence)
    }
}

/// One chunk-arrival notification, resolved from its object key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkIdentifier {
    pub site_id: String,
    pub volume: u32,
    pub sequence: u32,
    pub kind: ChunkKind,
    /// Object key used to fetch the chunk bytes.
    pub raw_path: String,
}

impl ChunkIdentifier {
    pub fn new(
        site_id: impl Into<String>,
        volume: u32,
        sequence: u32,
        kind: ChunkKind,
        raw_path: impl Into<String>,
    ) -> Self {
        Self {
            site_id: site_id.into(),
            volume,
            sequence,
            kind,
            raw_path: raw_path.into(),
        }
    }

    /// Parse an object key such as `KTLX/585/20240501-221204-012-I`.
    ///
    /// A leading `/` and any bucket-relative prefix before the site are not
    /// accepted; the key must have exactly three path segments.
    pub fn parse(key: &str) -> FeedResult<Self> {
        let parts: Vec<&str> = key.split('/').collect();
        if parts.len() != 3 {
            return Err(FeedError::invalid_key(
                key,
                format!("expected 3 path segments, found {}", parts.len()),
            ));
        }

        let site_id = parts[0];
        if site_id.is_empty() {
            return Err(FeedError::invalid_key(key, "empty site identifier"));
        }

        let volume: u32 = parts[1]
            .parse()
            .map_err(|_| FeedError::invalid_key(key, format!("invalid volume '{}'", parts[1])))?;

        // Name is {date}-{time}-{seq}-{kind}; split from the right so the
        // timestamp portion may itself contain dashes.
        let mut name_parts = parts[2].rsplitn(3, '-');
        let kind_str = name_parts.next().unwrap_or_default();
        let seq_str = name_parts.next().unwrap_or_default();
        let timestamp = name_parts.next().unwrap_or_default();

        if timestamp.is_empty() {
            return Err(FeedError::invalid_key(key, "missing chunk timestamp"));
        }

        let mut kind_chars = kind_str.chars();
        let kind = match (kind_chars.next(), kind_chars.next()) {
            (Some(c), None) => ChunkKind::from_code(c),
            _ => None,
        }
        .ok_or_else(|| FeedError::invalid_key(key, format!("invalid chunk kind '{}'", kind_str)))?;

        let sequence: u32 = seq_str
            .parse()
            .map_err(|_| FeedError::invalid_key(key, format!("invalid sequence '{}'", seq_str)))?;
        if sequence == 0 {
            return Err(FeedError::invalid_key(key, "sequence numbers start at 1"));
        }

        Ok(Self {
            site_id: site_id.to_string(),
            volume,
            sequence,
            kind,
            raw_path: key.to_string(),
        })
    }

    pub fn position(&self) -> ChunkPosition {
        ChunkPosition::new(self.volume, self.sequence, self.kind)
    }

    /// Ordering key within a site's feed.
    pub fn order_key(&self) -> (u32, u32) {
        (self.volume, self.sequence)
    }
}

impl PartialOrd for ChunkIdentifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ChunkIdentifier {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order_key()
            .cmp(&other.order_key())
            .then_with(|| self.site_id.cmp(&other.site_id))
            .then_with(|| self.raw_path.cmp(&other.raw_path))
    }
}

impl fmt::Display for ChunkIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{:03}-{}",
            self.site_id, self.volume, self.sequence, self.kind
        )
    }
}
