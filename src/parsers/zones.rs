use std::fs;
use std::path::Path;

use geo::{LineString, Polygon};
use log::{info, warn};
use serde::Deserialize;

use crate::engine::constraints::{ConstraintCategory, ExclusionZone};
use crate::error::ConfigurationError;

/// One zone as written in a zones file. Vertices are `[lon, lat]` pairs.
#[derive(Debug, Deserialize)]
struct ZoneRecord {
    name: String,
    #[serde(default = "default_category")]
    category: ConstraintCategory,
    #[serde(default = "default_active")]
    active: bool,
    exterior: Vec<[f64; 2]>,
    #[serde(default)]
    holes: Vec<Vec<[f64; 2]>>,
}

fn default_category() -> ConstraintCategory {
    ConstraintCategory::Regulatory
}

fn default_active() -> bool {
    true
}

fn ring(vertices: &[[f64; 2]]) -> LineString<f64> {
    vertices.iter().map(|[lon, lat]| (*lon, *lat)).collect()
}

impl ZoneRecord {
    fn into_zone(self) -> ExclusionZone {
        let holes = self.holes.iter().map(|h| ring(h)).collect();
        let polygon = Polygon::new(ring(&self.exterior), holes);
        let zone = ExclusionZone::new(self.name, self.category, polygon);
        if self.active { zone } else { zone.inactive() }
    }
}

/// Reads a JSON array of exclusion zones.
///
/// ```json
/// [{ "name": "TSS", "category": "Regulatory", "exterior": [[-5.0, 48.0], [-4.5, 48.0], [-4.5, 48.5]] }]
/// ```
pub fn load_zones<P: AsRef<Path>>(path: P) -> Result<Vec<ExclusionZone>, ConfigurationError> {
    let path = path.as_ref();
    info!("Loading exclusion zones from {:?}", path);
    let text = fs::read_to_string(path).map_err(|source| ConfigurationError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let records: Vec<ZoneRecord> =
        serde_json::from_str(&text).map_err(|source| ConfigurationError::Json {
            path: path.to_path_buf(),
            source,
        })?;

    let mut zones = Vec::with_capacity(records.len());
    for record in records {
        if record.exterior.len() < 3 {
            warn!("Skipping zone {:?}: fewer than 3 vertices", record.name);
            continue;
        }
        zones.push(record.into_zone());
    }
    info!("Loaded {} exclusion zones", zones.len());
    Ok(zones)
}
