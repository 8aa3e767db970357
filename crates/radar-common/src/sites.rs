//! NEXRAD site metadata.
//!
//! The table is an ordinary value: load it once at startup and pass it to
//! whoever needs site locations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{FeedError, FeedResult};

const BUILTIN_SITES: &str = include_str!("../data/nexrad_sites.csv");

/// Location of one radar site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteInfo {
    pub id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Antenna site elevation above mean sea level
    pub elevation_m: f64,
}

/// Site id -> metadata.
#[derive(Debug, Clone, Default)]
pub struct SiteTable {
    sites: BTreeMap<String, SiteInfo>,
}

impl SiteTable {
    /// Table shipped with the crate.
    pub fn builtin() -> FeedResult<Self> {
        Self::from_csv_str(BUILTIN_SITES)
    }

    /// Parse CSV with the header `id,name,latitude,longitude,elevation_m`.
    pub fn from_csv_str(data: &str) -> FeedResult<Self> {
        let mut reader = csv::Reader::from_reader(data.as_bytes());
        let mut sites = BTreeMap::new();

        for (row, record) in reader.deserialize::<SiteInfo>().enumerate() {
            let site = record.map_err(|e| {
                FeedError::Configuration(format!("Site table row {}: {}", row + 1, e))
            })?;
            if sites.insert(site.id.clone(), site).is_some() {
                return Err(FeedError::Configuration(format!(
                    "Site table row {}: duplicate site",
                    row + 1
                )));
            }
        }

        Ok(Self { sites })
    }

    pub fn load(path: impl AsRef<Path>) -> FeedResult<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| {
            FeedError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_csv_str(&data)
    }

    pub fn get(&self, id: &str) -> Option<&SiteInfo> {
        self.sites.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sites.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SiteInfo> {
        self.sites.values()
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}
