//! Volume header and LDM record framing.

use std::borrow::Cow;
use std::io::Read;

use crate::{take, Level2Error};

/// Size of the Archive II volume header.
pub const VOLUME_HEADER_SIZE: usize = 24;

const VOLUME_MAGIC: &[u8] = b"AR2V";
const BZIP2_MAGIC: &[u8] = b"BZh";

/// Archive II volume header (Start chunks only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeHeader {
    /// Tape/version tag, e.g. `AR2V0006`
    pub version: String,
    /// Volume number modulo 1000
    pub extension: String,
    pub julian_date: u32,
    pub millis: u32,
    pub icao: String,
}

impl VolumeHeader {
    /// Parse the header if `data` starts with one.
    pub fn parse(data: &[u8]) -> Result<Option<Self>, Level2Error> {
        if !data.starts_with(VOLUME_MAGIC) {
            return Ok(None);
        }
        let raw = take(data, 0, VOLUME_HEADER_SIZE, "volume header")?;

        Ok(Some(Self {
            version: String::from_utf8_lossy(&raw[0..8]).into_owned(),
            extension: String::from_utf8_lossy(&raw[9..12]).into_owned(),
            julian_date: u32::from_be_bytes([raw[12], raw[13], raw[14], raw[15]]),
            millis: u32::from_be_bytes([raw[16], raw[17], raw[18], raw[19]]),
            icao: String::from_utf8_lossy(&raw[20..24])
                .trim_end_matches(['\0', ' '])
                .to_string(),
        }))
    }
}

/// One LDM record: a control word followed by its payload.
#[derive(Debug, Clone, Copy)]
pub struct LdmRecord<'a> {
    pub data: &'a [u8],
}

impl<'a> LdmRecord<'a> {
    pub fn is_compressed(&self) -> bool {
        self.data.starts_with(BZIP2_MAGIC)
    }

    /// Decompressed record contents.
    pub fn payload(&self) -> Result<Cow<'a, [u8]>, Level2Error> {
        if !self.is_compressed() {
            return Ok(Cow::Borrowed(self.data));
        }

        let mut out = Vec::with_capacity(self.data.len() * 8);
        bzip2::read::MultiBzDecoder::new(self.data)
            .read_to_end(&mut out)
            .map_err(|e| Level2Error::Decompression(e.to_string()))?;
        Ok(Cow::Owned(out))
    }
}

/// Split a chunk body (after any volume header) into LDM records.
///
/// The control word is a big-endian i32 whose magnitude is the payload
/// length; a negative value marks the last record of a volume.
pub fn split_records(body: &[u8]) -> Result<Vec<LdmRecord<'_>>, Level2Error> {
    let mut records = Vec::new();
    let mut offset = 0;

    while offset < body.len() {
        let word = take(body, offset, 4, "LDM control word")?;
        let length = i32::from_be_bytes([word[0], word[1], word[2], word[3]]).unsigned_abs() as usize;
        if length == 0 {
            return Err(Level2Error::Invalid {
                what: "LDM record",
                reason: format!("zero length at offset {}", offset),
            });
        }
        offset += 4;

        let data = take(body, offset, length, "LDM record")?;
        records.push(LdmRecord { data });
        offset += length;
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_volume_header() {
        assert_eq!(VolumeHeader::parse(&[0, 0, 0, 4, 1, 2, 3, 4]).unwrap(), None);
    }

    #[test]
    fn test_truncated_volume_header() {
        let err = VolumeHeader::parse(b"AR2V0006.5").unwrap_err();
        assert!(matches!(err, Level2Error::Truncated { .. }));
    }

    #[test]
    fn test_split_raw_records() {
        let mut body = Vec::new();
        body.extend_from_slice(&3i32.to_be_bytes());
        body.extend_from_slice(&[1, 2, 3]);
        body.extend_from_slice(&(-2i32).to_be_bytes());
        body.extend_from_slice(&[4, 5]);

        let records = split_records(&body).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].data, &[1, 2, 3]);
        assert_eq!(records[1].data, &[4, 5]);
        assert!(!records[1].is_compressed());
    }

    #[test]
    fn test_split_rejects_overlong_record() {
        let mut body = Vec::new();
        body.extend_from_slice(&10i32.to_be_bytes());
        body.extend_from_slice(&[1, 2, 3]);
        assert!(split_records(&body).is_err());
    }

    #[test]
    fn test_corrupt_bzip2_payload() {
        let record = LdmRecord {
            data: b"BZh91AY&SYgarbage",
        };
        let err = record.payload().unwrap_err();
        assert!(matches!(err, Level2Error::Decompression(_)));
    }
}
