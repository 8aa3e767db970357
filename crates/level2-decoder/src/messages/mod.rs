//! Digital radar data messages.
//!
//! Each message starts with a 12-byte CTM (legacy channel terminal
//! manager bytes, ignored) and a 16-byte message header:
//!
//! | offset | size | field                                  |
//! |--------|------|----------------------------------------|
//! | 0      | 2    | message size in halfwords (from header) |
//! | 2      | 1    | redundant channel                      |
//! | 3      | 1    | message type                           |
//! | 4      | 2    | sequence number                        |
//! | 6      | 2    | julian date                            |
//! | 8      | 4    | milliseconds past midnight             |
//! | 12     | 2    | segment count                          |
//! | 14     | 2    | segment number                         |
//!
//! Message 31 is variable length; every other type occupies a fixed
//! 2432-byte frame.

mod moments;

pub use moments::MomentBlock;

use chrono::{DateTime, Utc};
use radar_common::{MomentKind, RadialRecord};
use tracing::trace;

use crate::{take, Level2Error};

pub const CTM_SIZE: usize = 12;
pub const HEADER_SIZE: usize = 16;
pub const FIXED_FRAME_SIZE: usize = 2432;

/// Generic digital radar data.
pub const MSG_DIGITAL_RADAR_DATA: u8 = 31;

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Parsed message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub size_halfwords: u16,
    pub channel: u8,
    pub message_type: u8,
    pub sequence: u16,
    pub julian_date: u16,
    pub millis: u32,
    pub segment_count: u16,
    pub segment_number: u16,
}

impl MessageHeader {
    pub fn parse(data: &[u8]) -> Result<Self, Level2Error> {
        let h = take(data, 0, HEADER_SIZE, "message header")?;
        Ok(Self {
            size_halfwords: u16::from_be_bytes([h[0], h[1]]),
            channel: h[2],
            message_type: h[3],
            sequence: u16::from_be_bytes([h[4], h[5]]),
            julian_date: u16::from_be_bytes([h[6], h[7]]),
            millis: u32::from_be_bytes([h[8], h[9], h[10], h[11]]),
            segment_count: u16::from_be_bytes([h[12], h[13]]),
            segment_number: u16::from_be_bytes([h[14], h[15]]),
        })
    }

    /// Bytes occupied by the whole message including the CTM.
    pub fn frame_len(&self) -> Result<usize, Level2Error> {
        if self.message_type != MSG_DIGITAL_RADAR_DATA {
            return Ok(FIXED_FRAME_SIZE);
        }
        let len = self.size_halfwords as usize * 2;
        if len < HEADER_SIZE {
            return Err(Level2Error::Invalid {
                what: "message 31",
                reason: format!("size {} halfwords is smaller than its header", self.size_halfwords),
            });
        }
        Ok(CTM_SIZE + len)
    }
}

/// One framed message.
#[derive(Debug, Clone, Copy)]
pub struct Message<'a> {
    pub header: MessageHeader,
    /// Bytes after the message header
    pub body: &'a [u8],
}

/// Split a decompressed record into messages.
///
/// A trailing fragment too short to hold a header is padding and ignored.
/// Fixed frames at the end of a record may be short; they carry no radial
/// data and are accepted as-is.
pub fn split_messages(payload: &[u8]) -> Result<Vec<Message<'_>>, Level2Error> {
    let mut messages = Vec::new();
    let mut offset = 0;

    while payload.len() - offset >= CTM_SIZE + HEADER_SIZE {
        let header = MessageHeader::parse(&payload[offset + CTM_SIZE..])?;
        let frame_len = header.frame_len()?;
        let body_start = offset + CTM_SIZE + HEADER_SIZE;

        let body = if header.message_type == MSG_DIGITAL_RADAR_DATA {
            take(payload, body_start, frame_len - CTM_SIZE - HEADER_SIZE, "message 31")?
        } else {
            let end = (offset + frame_len).min(payload.len());
            &payload[body_start..end]
        };

        trace!(
            message_type = header.message_type,
            len = frame_len,
            "Framed message"
        );
        messages.push(Message { header, body });
        offset = (offset + frame_len).min(payload.len());
    }

    Ok(messages)
}

/// Fixed part of the Message 31 data header.
#[derive(Debug, Clone, PartialEq)]
pub struct RadialHeader {
    pub icao: String,
    pub millis: u32,
    pub julian_date: u16,
    pub azimuth_number: u16,
    pub azimuth_deg: f32,
    pub radial_status: u8,
    pub elevation_number: u8,
    pub elevation_deg: f32,
    /// Offsets of the data blocks, relative to the start of the body
    pub block_pointers: Vec<usize>,
}

impl RadialHeader {
    const FIXED_LEN: usize = 32;

    pub fn parse(body: &[u8]) -> Result<Self, Level2Error> {
        let b = take(body, 0, Self::FIXED_LEN, "radial header")?;
        let block_count = u16::from_be_bytes([b[30], b[31]]) as usize;
        let table = take(body, Self::FIXED_LEN, block_count * 4, "data block pointers")?;

        Ok(Self {
            icao: String::from_utf8_lossy(&b[0..4])
                .trim_end_matches(['\0', ' '])
                .to_string(),
            millis: u32::from_be_bytes([b[4], b[5], b[6], b[7]]),
            julian_date: u16::from_be_bytes([b[8], b[9]]),
            azimuth_number: u16::from_be_bytes([b[10], b[11]]),
            azimuth_deg: f32::from_be_bytes([b[12], b[13], b[14], b[15]]),
            radial_status: b[21],
            elevation_number: b[22],
            elevation_deg: f32::from_be_bytes([b[24], b[25], b[26], b[27]]),
            block_pointers: table
                .chunks_exact(4)
                .map(|p| u32::from_be_bytes([p[0], p[1], p[2], p[3]]) as usize)
                .collect(),
        })
    }

    /// Collection time. Julian day 1 is 1970-01-01.
    pub fn timestamp(&self) -> Result<DateTime<Utc>, Level2Error> {
        let millis = (self.julian_date as i64 - 1) * MILLIS_PER_DAY + self.millis as i64;
        DateTime::from_timestamp_millis(millis).ok_or(Level2Error::Invalid {
            what: "radial header",
            reason: format!("time out of range: day {} ms {}", self.julian_date, self.millis),
        })
    }
}

/// Decode a Message 31 into a radial. Other message types yield `None`.
pub fn decode_radial(message: &Message<'_>) -> Result<Option<RadialRecord>, Level2Error> {
    if message.header.message_type != MSG_DIGITAL_RADAR_DATA {
        return Ok(None);
    }

    let header = RadialHeader::parse(message.body)?;
    let mut radial = RadialRecord::new(
        header.timestamp()?,
        header.icao.clone(),
        header.elevation_deg,
        header.azimuth_deg,
    );
    radial.elevation_number = header.elevation_number;
    radial.azimuth_number = header.azimuth_number;

    for &pointer in &header.block_pointers {
        let Some(block) = MomentBlock::parse(message.body, pointer)? else {
            continue;
        };
        if let Some(kind) = MomentKind::from_block_name(&block.name) {
            radial.set_moment(kind, block.to_moment_data());
        }
    }

    Ok(Some(radial))
}
