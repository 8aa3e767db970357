//! NEXRAD Level II decoder for realtime chunks.
//!
//! A realtime chunk is a slice of an Archive II volume: Start chunks begin
//! with the 24-byte volume header and a metadata record, every chunk then
//! carries one or more LDM records holding digital radar data messages.
//! Only Message 31 (generic digital radar data) produces radials; all
//! other message types are skipped.

pub mod messages;
pub mod records;

use std::path::Path;

use radar_common::{FeedError, FeedResult, RadialRecord};
use thiserror::Error;
use tracing::debug;

pub use messages::{MessageHeader, MomentBlock, RadialHeader};
pub use records::{split_records, VolumeHeader};

/// Errors raised while walking a chunk.
#[derive(Debug, Error)]
pub enum Level2Error {
    #[error("Truncated {what}: need {needed} bytes at offset {offset}, have {available}")]
    Truncated {
        what: &'static str,
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("Invalid {what}: {reason}")]
    Invalid { what: &'static str, reason: String },

    #[error("Decompression failed: {0}")]
    Decompression(String),
}

impl From<Level2Error> for FeedError {
    fn from(e: Level2Error) -> Self {
        FeedError::Decode(e.to_string())
    }
}

/// Bounds-checked slice access used by every parser in this crate.
pub(crate) fn take<'a>(
    data: &'a [u8],
    offset: usize,
    len: usize,
    what: &'static str,
) -> Result<&'a [u8], Level2Error> {
    offset
        .checked_add(len)
        .and_then(|end| data.get(offset..end))
        .ok_or(Level2Error::Truncated {
            what,
            offset,
            needed: len,
            available: data.len().saturating_sub(offset),
        })
}

/// Converts a chunk into radials.
///
/// Implementations must not block on I/O other than reading the file; the
/// publisher runs them on the blocking thread pool.
pub trait RadialDecoder: Send + Sync {
    /// Decode the chunk stored at `path`.
    fn decode(&self, path: &Path) -> FeedResult<Vec<RadialRecord>> {
        let data = std::fs::read(path)?;
        self.decode_bytes(&data)
    }

    /// Decode an in-memory chunk.
    fn decode_bytes(&self, data: &[u8]) -> FeedResult<Vec<RadialRecord>>;
}

/// Decoder for Archive II Message 31 chunks.
#[derive(Debug, Clone, Default)]
pub struct Level2Decoder;

impl Level2Decoder {
    pub fn new() -> Self {
        Self
    }
}

impl RadialDecoder for Level2Decoder {
    fn decode_bytes(&self, data: &[u8]) -> FeedResult<Vec<RadialRecord>> {
        let (header, body) = match VolumeHeader::parse(data)? {
            Some(header) => (Some(header), &data[records::VOLUME_HEADER_SIZE..]),
            None => (None, data),
        };

        let mut radials = Vec::new();
        for record in split_records(body)? {
            let payload = record.payload()?;
            for message in messages::split_messages(&payload)? {
                if let Some(radial) = messages::decode_radial(&message)? {
                    radials.push(radial);
                }
            }
        }

        debug!(
            volume_header = header.is_some(),
            radials = radials.len(),
            "Decoded chunk"
        );
        Ok(radials)
    }
}
