//! Synthetic Level II chunk builders.
//!
//! These produce byte-exact archive records the decoder accepts, so tests
//! can exercise the full fetch -> decode -> publish path without recorded
//! radar data.
//!
//! Layout produced:
//! - optional 24-byte volume header (`AR2V0006.` + extension + date + time + ICAO)
//! - LDM records: big-endian i32 length, then a bzip2 or raw payload
//! - messages: 12-byte CTM, 16-byte message header, body

use std::io::Write;

/// Size of a fixed-length (non Message 31) frame including the CTM.
pub const FIXED_FRAME_SIZE: usize = 2432;

/// Control word prefix preceding every message header.
pub const CTM_SIZE: usize = 12;

/// Message header size (after the CTM).
pub const MESSAGE_HEADER_SIZE: usize = 16;

/// One generic data moment block.
#[derive(Debug, Clone)]
pub struct MomentSpec {
    /// Block name: "REF", "VEL" or "SW "
    pub name: &'static str,
    pub first_gate_m: i16,
    pub gate_spacing_m: i16,
    /// 8 or 16
    pub word_size: u8,
    pub scale: f32,
    pub offset: f32,
    /// Raw gate words (truncated to u8 when `word_size` is 8)
    pub raw: Vec<u16>,
}

impl MomentSpec {
    /// Decoded value the given raw word maps to.
    pub fn expected(&self, index: usize) -> f32 {
        match self.raw[index] {
            0 | 1 => f32::NAN,
            raw => (raw as f32 - self.offset) / self.scale,
        }
    }
}

/// Header fields of one Message 31 radial.
#[derive(Debug, Clone)]
pub struct RadialSpec {
    pub icao: String,
    /// Modified Julian date (day 1 = 1970-01-01)
    pub julian_date: u16,
    /// Milliseconds past midnight
    pub millis: u32,
    pub azimuth_number: u16,
    pub azimuth_deg: f32,
    pub elevation_number: u8,
    pub elevation_deg: f32,
    pub radial_status: u8,
    pub moments: Vec<MomentSpec>,
}

fn message_header(msg_type: u8, size_halfwords: u16, julian_date: u16, millis: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(CTM_SIZE + MESSAGE_HEADER_SIZE);
    out.extend_from_slice(&[0u8; CTM_SIZE]);
    out.extend_from_slice(&size_halfwords.to_be_bytes());
    out.push(0); // redundant channel
    out.push(msg_type);
    out.extend_from_slice(&1u16.to_be_bytes()); // sequence
    out.extend_from_slice(&julian_date.to_be_bytes());
    out.extend_from_slice(&millis.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes()); // segment count
    out.extend_from_slice(&1u16.to_be_bytes()); // segment number
    out
}

fn moment_block(spec: &MomentSpec) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(b'D');
    let mut name = [b' '; 3];
    for (slot, byte) in name.iter_mut().zip(spec.name.bytes()) {
        *slot = byte;
    }
    out.extend_from_slice(&name);
    out.extend_from_slice(&0u32.to_be_bytes()); // reserved
    out.extend_from_slice(&(spec.raw.len() as u16).to_be_bytes());
    out.extend_from_slice(&spec.first_gate_m.to_be_bytes());
    out.extend_from_slice(&spec.gate_spacing_m.to_be_bytes());
    out.extend_from_slice(&0i16.to_be_bytes()); // threshold
    out.extend_from_slice(&0i16.to_be_bytes()); // SNR threshold
    out.push(0); // control flags
    out.push(spec.word_size);
    out.extend_from_slice(&spec.scale.to_be_bytes());
    out.extend_from_slice(&spec.offset.to_be_bytes());
    for &raw in &spec.raw {
        if spec.word_size == 16 {
            out.extend_from_slice(&raw.to_be_bytes());
        } else {
            out.push(raw as u8);
        }
    }
    out
}

/// Build one complete Message 31 (CTM + header + body).
pub fn message31(spec: &RadialSpec) -> Vec<u8> {
    let blocks: Vec<Vec<u8>> = spec.moments.iter().map(moment_block).collect();

    let pointer_table = 32 + 4 * blocks.len();
    let mut body = Vec::new();
    let mut icao = [b' '; 4];
    for (slot, byte) in icao.iter_mut().zip(spec.icao.bytes()) {
        *slot = byte;
    }
    body.extend_from_slice(&icao);
    body.extend_from_slice(&spec.millis.to_be_bytes());
    body.extend_from_slice(&spec.julian_date.to_be_bytes());
    body.extend_from_slice(&spec.azimuth_number.to_be_bytes());
    body.extend_from_slice(&spec.azimuth_deg.to_be_bytes());
    body.push(0); // compression indicator
    body.push(0); // spare
    body.extend_from_slice(&0u16.to_be_bytes()); // radial length
    body.push(1); // azimuth resolution
    body.push(spec.radial_status);
    body.push(spec.elevation_number);
    body.push(1); // cut sector
    body.extend_from_slice(&spec.elevation_deg.to_be_bytes());
    body.push(0); // spot blanking
    body.push(0); // azimuth indexing mode
    body.extend_from_slice(&(blocks.len() as u16).to_be_bytes());

    let mut offset = pointer_table;
    for block in &blocks {
        body.extend_from_slice(&(offset as u32).to_be_bytes());
        offset += block.len();
    }
    for block in &blocks {
        body.extend_from_slice(block);
    }
    if body.len() % 2 == 1 {
        body.push(0);
    }

    let size_halfwords = ((MESSAGE_HEADER_SIZE + body.len()) / 2) as u16;
    let mut out = message_header(31, size_halfwords, spec.julian_date, spec.millis);
    out.extend_from_slice(&body);
    out
}

/// Build a fixed-size frame of another message type (metadata, status).
pub fn fixed_message(msg_type: u8) -> Vec<u8> {
    let payload = FIXED_FRAME_SIZE - CTM_SIZE;
    let mut out = message_header(msg_type, (payload / 2) as u16, 19845, 0);
    out.resize(FIXED_FRAME_SIZE, 0);
    out
}

/// Wrap messages into one LDM record, optionally bzip2-compressed.
pub fn ldm_record(messages: &[Vec<u8>], compress: bool) -> Vec<u8> {
    let raw: Vec<u8> = messages.concat();
    let payload = if compress {
        let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
        encoder
            .write_all(&raw)
            .expect("bzip2 write into memory");
        encoder.finish().expect("bzip2 finish into memory")
    } else {
        raw
    };

    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&(payload.len() as i32).to_be_bytes());
    out.extend_from_slice(&payload);
    out
}

/// 24-byte archive volume header carried by Start chunks.
pub fn volume_header(extension: u32, julian_date: u32, millis: u32, icao: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(24);
    out.extend_from_slice(b"AR2V0006.");
    out.extend_from_slice(format!("{:03}", extension % 1000).as_bytes());
    out.extend_from_slice(&julian_date.to_be_bytes());
    out.extend_from_slice(&millis.to_be_bytes());
    let mut site = [b' '; 4];
    for (slot, byte) in site.iter_mut().zip(icao.bytes()) {
        *slot = byte;
    }
    out.extend_from_slice(&site);
    out
}
