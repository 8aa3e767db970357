//! Common test fixtures for radial feed tests.
//!
//! Chunk keys in the layout of the public realtime bucket, and ready-made
//! radials and chunks built from the generators.

use crate::generators::{fixed_message, ldm_record, message31, volume_header, MomentSpec, RadialSpec};

/// Sites used across the test suite.
pub mod sites {
    pub const KTLX: &str = "KTLX";
    pub const KFWS: &str = "KFWS";
    pub const KAMX: &str = "KAMX";
}

/// Julian date of 2024-05-01 in the Level II convention (1970-01-01 is day 1).
pub const JULIAN_2024_05_01: u16 = 19845;

/// Object key for a chunk: `{site}/{volume}/20240501-221204-{seq:03}-{kind}`.
pub fn chunk_key(site: &str, volume: u32, sequence: u32, kind: char) -> String {
    format!("{}/{}/20240501-221204-{:03}-{}", site, volume, sequence, kind)
}

/// Reflectivity block with `gates` gates, 8-bit words.
pub fn reflectivity_moment(gates: usize) -> MomentSpec {
    MomentSpec {
        name: "REF",
        first_gate_m: 2125,
        gate_spacing_m: 250,
        word_size: 8,
        scale: 2.0,
        offset: 66.0,
        raw: (0..gates).map(|i| (i % 250) as u16 + 2).collect(),
    }
}

/// Velocity block with `gates` gates, 8-bit words.
pub fn velocity_moment(gates: usize) -> MomentSpec {
    MomentSpec {
        name: "VEL",
        first_gate_m: 2125,
        gate_spacing_m: 250,
        word_size: 8,
        scale: 2.0,
        offset: 129.0,
        raw: (0..gates).map(|i| (i % 200) as u16 + 20).collect(),
    }
}

/// Spectrum width block with `gates` gates, 8-bit words.
pub fn spectrum_width_moment(gates: usize) -> MomentSpec {
    MomentSpec {
        name: "SW ",
        first_gate_m: 2125,
        gate_spacing_m: 250,
        word_size: 8,
        scale: 2.0,
        offset: 129.0,
        raw: (0..gates).map(|i| (i % 50) as u16 + 130).collect(),
    }
}

/// A radial at the lowest cut with reflectivity and velocity only.
pub fn sample_radial(site: &str, azimuth_number: u16) -> RadialSpec {
    RadialSpec {
        icao: site.to_string(),
        julian_date: JULIAN_2024_05_01,
        millis: 80_000_000 + azimuth_number as u32 * 50,
        azimuth_number,
        azimuth_deg: (azimuth_number.saturating_sub(1)) as f32 * 0.5 + 0.25,
        elevation_number: 1,
        elevation_deg: 0.48,
        radial_status: if azimuth_number == 1 { 0 } else { 1 },
        moments: vec![reflectivity_moment(16), velocity_moment(16)],
    }
}

/// An Intermediate chunk: one compressed record with `radials` Message 31s.
pub fn sample_chunk(site: &str, first_azimuth: u16, radials: u16) -> Vec<u8> {
    let messages: Vec<Vec<u8>> = (0..radials)
        .map(|i| message31(&sample_radial(site, first_azimuth + i)))
        .collect();
    ldm_record(&messages, true)
}

/// A Start chunk: volume header, a metadata record of fixed frames, then a
/// record of `radials` Message 31s.
pub fn sample_start_chunk(site: &str, volume: u32, radials: u16) -> Vec<u8> {
    let mut out = volume_header(volume, JULIAN_2024_05_01 as u32, 80_000_000, site);
    let metadata: Vec<Vec<u8>> = [15u8, 13, 18, 3, 5, 2]
        .iter()
        .map(|&t| fixed_message(t))
        .collect();
    out.extend(ldm_record(&metadata, true));
    out.extend(sample_chunk(site, 1, radials));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_key_format() {
        assert_eq!(
            chunk_key(sites::KTLX, 585, 12, 'I'),
            "KTLX/585/20240501-221204-012-I"
        );
    }

    #[test]
    fn test_moments_avoid_flag_words() {
        for spec in [reflectivity_moment(300), velocity_moment(300), spectrum_width_moment(300)] {
            assert!(spec.raw.iter().all(|&r| r > 1 && r < 256));
        }
    }
}
