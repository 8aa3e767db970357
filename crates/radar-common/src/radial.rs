//! Decoded radial records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Radar moments carried in a published radial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MomentKind {
    Reflectivity,
    Velocity,
    SpectrumWidth,
}

impl MomentKind {
    /// Block name used in Message 31 generic data moment blocks.
    pub fn block_name(&self) -> &'static str {
        match self {
            MomentKind::Reflectivity => "REF",
            MomentKind::Velocity => "VEL",
            MomentKind::SpectrumWidth => "SW",
        }
    }

    /// Resolve a block name (trailing spaces ignored).
    pub fn from_block_name(name: &str) -> Option<Self> {
        match name.trim_end() {
            "REF" => Some(MomentKind::Reflectivity),
            "VEL" => Some(MomentKind::Velocity),
            "SW" => Some(MomentKind::SpectrumWidth),
            _ => None,
        }
    }

    /// Unit of measure for the decoded samples.
    pub fn units(&self) -> &'static str {
        match self {
            MomentKind::Reflectivity => "dBZ",
            MomentKind::Velocity => "m/s",
            MomentKind::SpectrumWidth => "m/s",
        }
    }
}

/// Gate geometry and samples for a single moment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MomentData {
    /// Range to the center of the first gate (meters)
    pub first_gate_range_m: f32,
    /// Gate spacing (meters)
    pub gate_size_m: f32,
    pub gate_count: usize,
    /// Decoded values; below-threshold and range-folded gates are NaN
    pub samples: Vec<f32>,
}

impl MomentData {
    pub fn new(first_gate_range_m: f32, gate_size_m: f32, samples: Vec<f32>) -> Self {
        Self {
            first_gate_range_m,
            gate_size_m,
            gate_count: samples.len(),
            samples,
        }
    }

    /// Fixed-shape stand-in for a moment the source chunk did not carry.
    pub fn placeholder() -> Self {
        Self {
            first_gate_range_m: 0.0,
            gate_size_m: 0.0,
            gate_count: 1,
            samples: vec![f32::NAN],
        }
    }

    /// Placeholders are the only moments with zero gate spacing.
    pub fn is_placeholder(&self) -> bool {
        self.gate_count == 1 && self.gate_size_m == 0.0 && self.samples.len() == 1
    }

    /// Range (meters) to the center of gate `index`.
    pub fn gate_range_m(&self, index: usize) -> f32 {
        self.first_gate_range_m + index as f32 * self.gate_size_m
    }
}

impl Default for MomentData {
    fn default() -> Self {
        Self::placeholder()
    }
}

/// One decoded radial, the unit published to downstream listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadialRecord {
    pub timestamp: DateTime<Utc>,
    pub site_id: String,
    pub elevation_deg: f32,
    pub azimuth_deg: f32,
    /// Elevation cut number within the volume coverage pattern
    pub elevation_number: u8,
    /// Radial index within the elevation cut
    pub azimuth_number: u16,
    pub reflectivity: MomentData,
    pub velocity: MomentData,
    pub spectrum_width: MomentData,
}

impl RadialRecord {
    /// Create a record with every moment set to the placeholder.
    pub fn new(
        timestamp: DateTime<Utc>,
        site_id: impl Into<String>,
        elevation_deg: f32,
        azimuth_deg: f32,
    ) -> Self {
        Self {
            timestamp,
            site_id: site_id.into(),
            elevation_deg,
            azimuth_deg,
            elevation_number: 0,
            azimuth_number: 0,
            reflectivity: MomentData::placeholder(),
            velocity: MomentData::placeholder(),
            spectrum_width: MomentData::placeholder(),
        }
    }

    pub fn moment(&self, kind: MomentKind) -> &MomentData {
        match kind {
            MomentKind::Reflectivity => &self.reflectivity,
            MomentKind::Velocity => &self.velocity,
            MomentKind::SpectrumWidth => &self.spectrum_width,
        }
    }

    pub fn set_moment(&mut self, kind: MomentKind, data: MomentData) {
        match kind {
            MomentKind::Reflectivity => self.reflectivity = data,
            MomentKind::Velocity => self.velocity = data,
            MomentKind::SpectrumWidth => self.spectrum_width = data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_shape() {
        let m = MomentData::placeholder();
        assert_eq!(m.gate_count, 1);
        assert_eq!(m.samples.len(), 1);
        assert!(m.is_placeholder());
    }

    #[test]
    fn test_block_name_trailing_space() {
        assert_eq!(
            MomentKind::from_block_name("SW "),
            Some(MomentKind::SpectrumWidth)
        );
        assert_eq!(MomentKind::from_block_name("ZDR"), None);
    }
}
