//! Generic data moment blocks.

use radar_common::MomentData;

use crate::{take, Level2Error};

const BLOCK_HEADER_LEN: usize = 28;

/// Raw words with special meaning.
const BELOW_THRESHOLD: u16 = 0;
const RANGE_FOLDED: u16 = 1;

/// One generic data moment ('D' block) of a Message 31.
#[derive(Debug, Clone, PartialEq)]
pub struct MomentBlock {
    /// Moment name, e.g. `REF`, `VEL`, `SW `
    pub name: String,
    pub gate_count: u16,
    pub first_gate_m: i16,
    pub gate_spacing_m: i16,
    pub word_size: u8,
    pub scale: f32,
    pub offset: f32,
    pub raw: Vec<u16>,
}

impl MomentBlock {
    /// Parse the block at `pointer`. Constant blocks (volume, elevation and
    /// radial data, type 'R') yield `None`.
    pub fn parse(body: &[u8], pointer: usize) -> Result<Option<Self>, Level2Error> {
        let h = take(body, pointer, BLOCK_HEADER_LEN, "data moment block")?;
        if h[0] != b'D' {
            return Ok(None);
        }

        let gate_count = u16::from_be_bytes([h[8], h[9]]);
        let word_size = h[19];
        let bytes_per_word = match word_size {
            8 => 1,
            16 => 2,
            other => {
                return Err(Level2Error::Invalid {
                    what: "data moment block",
                    reason: format!("unsupported word size {}", other),
                })
            }
        };

        let words = take(
            body,
            pointer + BLOCK_HEADER_LEN,
            gate_count as usize * bytes_per_word,
            "moment gates",
        )?;
        let raw = if bytes_per_word == 1 {
            words.iter().map(|&w| w as u16).collect()
        } else {
            words
                .chunks_exact(2)
                .map(|w| u16::from_be_bytes([w[0], w[1]]))
                .collect()
        };

        Ok(Some(Self {
            name: String::from_utf8_lossy(&h[1..4]).into_owned(),
            gate_count,
            first_gate_m: i16::from_be_bytes([h[10], h[11]]),
            gate_spacing_m: i16::from_be_bytes([h[12], h[13]]),
            word_size,
            scale: f32::from_be_bytes([h[20], h[21], h[22], h[23]]),
            offset: f32::from_be_bytes([h[24], h[25], h[26], h[27]]),
            raw,
        }))
    }

    /// Scaled value of one raw word; flag words decode to NaN.
    pub fn value(&self, raw: u16) -> f32 {
        match raw {
            BELOW_THRESHOLD | RANGE_FOLDED => f32::NAN,
            _ if self.scale == 0.0 => raw as f32,
            _ => (raw as f32 - self.offset) / self.scale,
        }
    }

    pub fn to_moment_data(&self) -> MomentData {
        MomentData::new(
            self.first_gate_m as f32,
            self.gate_spacing_m as f32,
            self.raw.iter().map(|&r| self.value(r)).collect(),
        )
    }
}
