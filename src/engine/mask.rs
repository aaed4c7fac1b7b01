use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use log::info;
use roaring::RoaringTreemap;
use xz2::read::XzDecoder;

use crate::engine::geodesy;
use crate::engine::models::Coordinate;
use crate::error::LandMaskError;

/// Cells per degree of the GSHHG raster (15 arc-second resolution).
pub const CELLS_PER_DEG: f64 = 240.0;
pub const NX: u64 = 86400;
pub const NY: u64 = 43200;

/// Samples taken along a leg never exceed this.
const MAX_LEG_SAMPLES: usize = 256;
/// Roughly one raster cell at the equator.
const CELL_SIZE_M: f64 = 463.0;

/// Global land raster stored as a compressed bitmap of land cells.
#[derive(Debug, Clone)]
pub struct LandMask {
    pub mask: RoaringTreemap,
}

impl Default for LandMask {
    fn default() -> Self {
        Self::new()
    }
}

impl LandMask {
    pub fn new() -> Self {
        Self { mask: RoaringTreemap::new() }
    }

    /// Loads a GSHHG mask serialized as an xz-compressed roaring treemap.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LandMaskError> {
        let path = path.as_ref();
        info!("Loading land mask from {:?}", path);

        let file = File::open(path).map_err(|source| LandMaskError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let decoder = XzDecoder::new(BufReader::new(file));
        let mask =
            RoaringTreemap::deserialize_from(decoder).map_err(|source| LandMaskError::Decode {
                path: path.to_path_buf(),
                source,
            })?;

        info!("Land mask loaded: {} land cells", mask.len());
        Ok(Self { mask })
    }

    fn coords_to_indices(lon: f64, lat: f64) -> (u64, u64) {
        // Affine transform: sa = 240, sc = 43200, se = 240, sf = 21600
        let x = (lon * CELLS_PER_DEG + 43200.0).max(0.0) as u64;
        let y = (lat * CELLS_PER_DEG + 21600.0).max(0.0) as u64;
        (x.min(NX - 1), y.min(NY - 1))
    }

    /// Marks a lon/lat box as land.
    pub fn add_land_box(&mut self, min_lon: f64, max_lon: f64, min_lat: f64, max_lat: f64) {
        let (min_x, min_y) = Self::coords_to_indices(min_lon, min_lat);
        let (max_x, max_y) = Self::coords_to_indices(max_lon, max_lat);

        for y in min_y..=max_y {
            self.mask.insert_range(y * NX + min_x..=y * NX + max_x);
        }
    }

    pub fn is_land(&self, coord: &Coordinate) -> bool {
        let (x, y) = Self::coords_to_indices(coord.lon, coord.lat);
        self.mask.contains(y * NX + x)
    }

    /// Samples the great circle from `a` to `b` at about cell spacing, end points included.
    pub fn leg_touches_land(&self, a: &Coordinate, b: &Coordinate) -> bool {
        if self.mask.is_empty() {
            return false;
        }
        let length = geodesy::distance(a, b);
        let samples = ((length / CELL_SIZE_M).ceil() as usize).clamp(1, MAX_LEG_SAMPLES);
        (0..=samples).any(|i| {
            let point = geodesy::interpolate(a, b, i as f64 / samples as f64);
            self.is_land(&point)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn island() -> LandMask {
        let mut mask = LandMask::new();
        mask.add_land_box(0.4, 0.6, -0.1, 0.1);
        mask
    }

    #[test]
    fn test_land_mask_classification() {
        let mask = island();
        assert!(mask.is_land(&Coordinate::new(0.0, 0.5)), "island centre should be land");
        assert!(!mask.is_land(&Coordinate::new(0.0, 0.0)), "open water should be sea");
        assert!(!mask.is_land(&Coordinate::new(0.5, 0.5)));
    }

    #[test]
    fn test_leg_across_island_touches_land() {
        let mask = island();
        let west = Coordinate::new(0.0, 0.0);
        let east = Coordinate::new(0.0, 1.0);
        assert!(mask.leg_touches_land(&west, &east));

        let north = Coordinate::new(0.3, 1.0);
        assert!(!mask.leg_touches_land(&Coordinate::new(0.3, 0.0), &north));
    }

    #[test]
    fn test_empty_mask_never_blocks() {
        let mask = LandMask::new();
        assert!(!mask.leg_touches_land(&Coordinate::new(0.0, 0.0), &Coordinate::new(0.0, 1.0)));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(matches!(
            LandMask::load("/nonexistent/mask.tbmap.xz"),
            Err(LandMaskError::Io { .. })
        ));
    }

    #[test]
    fn test_load_round_trip() {
        use std::io::Write;
        use xz2::write::XzEncoder;

        let mask = island();
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut encoder = XzEncoder::new(file.reopen().unwrap(), 6);
        mask.mask.serialize_into(&mut encoder).unwrap();
        encoder.finish().unwrap().flush().unwrap();

        let loaded = LandMask::load(file.path()).unwrap();
        assert_eq!(loaded.mask.len(), mask.mask.len());
        assert!(loaded.is_land(&Coordinate::new(0.0, 0.5)));
    }
}
