use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use eccodes::errors::CodesInternal;
use eccodes::{
    CodesError, CodesFile, DynamicKeyType, FallibleIterator, KeyRead, ProductKind, RefMessage,
};
use log::{info, warn};

use crate::engine::geodesy::normalize_lon;
use crate::engine::weather::{ForecastFrame, ForecastGrid, RegularGrid};
use crate::error::ConfigurationError;

#[derive(Default)]
struct FrameLayers {
    wind_u: Option<Vec<f32>>,
    wind_v: Option<Vec<f32>>,
    current_u: Option<Vec<f32>>,
    current_v: Option<Vec<f32>>,
}

/// Reads GRIB wind (and optionally surface current) messages into a [`ForecastGrid`].
#[derive(Debug, Clone)]
pub struct GribLoader {
    pub wind_u: String,
    pub wind_v: String,
    pub current_u: String,
    pub current_v: String,
}

impl Default for GribLoader {
    fn default() -> Self {
        Self {
            wind_u: "10u".into(),
            wind_v: "10v".into(),
            current_u: "ucurr".into(),
            current_v: "vcurr".into(),
        }
    }
}

fn grib_err(path: &Path, err: impl std::fmt::Display) -> ConfigurationError {
    ConfigurationError::InvalidGrid(format!("{}: {err}", path.display()))
}

impl GribLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every matching message, grouped by validity time. Messages on a
    /// different lattice than the first one are skipped.
    pub fn load_forecast<P: AsRef<Path>>(
        &self,
        path: P,
    ) -> Result<ForecastGrid, ConfigurationError> {
        let path = path.as_ref();
        info!("Loading forecast from GRIB file: {:?}", path);
        let path_str = path
            .to_str()
            .ok_or_else(|| grib_err(path, "path is not valid UTF-8"))?;

        let mut file = CodesFile::new_from_file(path_str, ProductKind::GRIB)
            .map_err(|e| grib_err(path, e))?;
        let mut iter = file.ref_message_iter();

        let mut grid: Option<RegularGrid> = None;
        let mut frames: BTreeMap<DateTime<Utc>, FrameLayers> = BTreeMap::new();

        loop {
            let message = match iter.next() {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(CodesError::Internal(CodesInternal::CodesPrematureEndOfFile)) => {
                    warn!(
                        "GRIB file {:?} ends prematurely, keeping the messages read so far",
                        path
                    );
                    break;
                }
                Err(e) => return Err(grib_err(path, e)),
            };

            let Ok(DynamicKeyType::Str(name)) = message.read_key_dynamic("shortName") else {
                continue;
            };
            let is_wanted = [&self.wind_u, &self.wind_v, &self.current_u, &self.current_v]
                .iter()
                .any(|wanted| **wanted == name);
            if !is_wanted {
                continue;
            }

            let message_grid = read_grid(&message).map_err(|e| grib_err(path, e))?;
            match grid {
                None => grid = Some(message_grid),
                Some(g) if g != message_grid => {
                    warn!("Skipping {} message on a different grid", name);
                    continue;
                }
                Some(_) => {}
            }
            let time = read_validity(&message).map_err(|e| grib_err(path, e))?;
            let values = read_values(&message).map_err(|e| grib_err(path, e))?;

            let layers = frames.entry(time).or_default();
            if name == self.wind_u {
                layers.wind_u = Some(values);
            } else if name == self.wind_v {
                layers.wind_v = Some(values);
            } else if name == self.current_u {
                layers.current_u = Some(values);
            } else {
                layers.current_v = Some(values);
            }
        }

        let grid = grid.ok_or_else(|| grib_err(path, "no wind messages found"))?;
        let frames: Vec<ForecastFrame> = frames
            .into_iter()
            .filter_map(|(time, layers)| match (layers.wind_u, layers.wind_v) {
                (Some(wind_u), Some(wind_v)) => Some(ForecastFrame {
                    time,
                    wind_u,
                    wind_v,
                    current_u: layers.current_u,
                    current_v: layers.current_v,
                }),
                _ => {
                    warn!("Dropping forecast time {} without both wind components", time);
                    None
                }
            })
            .collect();

        info!(
            "Loaded {} forecast frames on a {}x{} grid",
            frames.len(),
            grid.rows,
            grid.cols
        );
        ForecastGrid::new(grid, frames)
    }
}

fn read_grid(message: &RefMessage) -> Result<RegularGrid, eccodes::CodesError> {
    let cols: i64 = message.read_key("Ni")?;
    let rows: i64 = message.read_key("Nj")?;
    let lat0: f64 = message.read_key("latitudeOfFirstGridPointInDegrees")?;
    let lon0: f64 = message.read_key("longitudeOfFirstGridPointInDegrees")?;
    let lon_step: f64 = message.read_key("iDirectionIncrementInDegrees")?;
    let lat_step: f64 = message.read_key("jDirectionIncrementInDegrees")?;
    let south_to_north: i64 = message.read_key("jScansPositively")?;

    Ok(RegularGrid {
        lat0,
        lon0: normalize_lon(lon0),
        lat_step: if south_to_north == 1 { lat_step } else { -lat_step },
        lon_step,
        rows: rows.max(0) as usize,
        cols: cols.max(0) as usize,
    })
}

fn read_validity(message: &RefMessage) -> Result<DateTime<Utc>, String> {
    let date: i64 = message.read_key("validityDate").map_err(|e| e.to_string())?;
    let hhmm: i64 = message.read_key("validityTime").map_err(|e| e.to_string())?;
    NaiveDate::from_ymd_opt((date / 10_000) as i32, (date / 100 % 100) as u32, (date % 100) as u32)
        .and_then(|d| d.and_hms_opt((hhmm / 100) as u32, (hhmm % 100) as u32, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("invalid validity time {date} {hhmm:04}"))
}

/// Values with missing points turned into NaN.
fn read_values(message: &RefMessage) -> Result<Vec<f32>, eccodes::CodesError> {
    let values: Vec<f64> = message.read_key("values")?;
    let missing: f64 = message.read_key("missingValue").unwrap_or(9999.0);
    Ok(values
        .into_iter()
        .map(|v| if v == missing { f32::NAN } else { v as f32 })
        .collect())
}
