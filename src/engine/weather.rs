//! Wind and current lookup.
//!
//! A [`WeatherSnapshot`] is the immutable bundle the router reads during a step:
//! an optional live forecast behind the [`WeatherProvider`] trait and an optional
//! [`Climatology`]. Lookups never fail; missing forecast data falls back to the
//! climatological expectation and then to configured defaults, and the returned
//! [`Conditions`] say which source was used.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use log::debug;

use crate::config::FallbackDefaults;
use crate::engine::constraints::{ProviderVersion, VersionRange};
use crate::engine::geodesy::normalize_lon;
use crate::engine::models::{Coordinate, CurrentData, WindData};
use crate::error::{ConfigurationError, ConstraintProviderError, DataUnavailable};

/// A single forecast reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeatherSample {
    pub wind: WindData,
    pub current: CurrentData,
    /// 1.0 for analysed data, lower for extrapolated or ensemble-spread values
    pub confidence: f32,
}

/// Source of live forecast data.
pub trait WeatherProvider: Send + Sync {
    fn query(
        &self,
        coord: &Coordinate,
        time: DateTime<Utc>,
    ) -> Result<WeatherSample, DataUnavailable>;
}

/// The same wind and current everywhere, at all times.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantWeather {
    pub wind: WindData,
    pub current: CurrentData,
}

impl ConstantWeather {
    pub fn new(wind: WindData) -> Self {
        Self { wind, current: CurrentData::default() }
    }

    pub fn with_current(mut self, current: CurrentData) -> Self {
        self.current = current;
        self
    }
}

impl WeatherProvider for ConstantWeather {
    fn query(
        &self,
        _coord: &Coordinate,
        _time: DateTime<Utc>,
    ) -> Result<WeatherSample, DataUnavailable> {
        Ok(WeatherSample { wind: self.wind, current: self.current, confidence: 1.0 })
    }
}

/// A regular latitude/longitude lattice, row-major with latitude rows.
///
/// `lat_step` may be negative for grids stored north to south.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegularGrid {
    pub lat0: f64,
    pub lon0: f64,
    pub lat_step: f64,
    pub lon_step: f64,
    pub rows: usize,
    pub cols: usize,
}

/// The four surrounding cells of a point and their bilinear weights.
#[derive(Debug, Clone, Copy)]
struct CellWeights {
    indices: [usize; 4],
    weights: [f64; 4],
}

impl RegularGrid {
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.rows == 0 || self.cols == 0 {
            return Err(ConfigurationError::InvalidGrid("grid has no cells".into()));
        }
        let lat_ok = self.lat_step.is_finite() && self.lat_step != 0.0;
        let lon_ok = self.lon_step.is_finite() && self.lon_step > 0.0;
        if !(lat_ok && lon_ok) {
            return Err(ConfigurationError::InvalidGrid(format!(
                "invalid grid spacing {} x {}",
                self.lat_step, self.lon_step
            )));
        }
        Ok(())
    }

    fn is_global(&self) -> bool {
        self.cols as f64 * self.lon_step >= 360.0 - 1e-9
    }

    fn locate(&self, coord: &Coordinate) -> Result<CellWeights, DataUnavailable> {
        let y = (coord.lat - self.lat0) / self.lat_step;
        let max_y = (self.rows - 1) as f64;
        if !(y >= -1e-9 && y <= max_y + 1e-9) {
            return Err(DataUnavailable::OutsideGrid);
        }
        let y = y.clamp(0.0, max_y);

        let mut x = normalize_lon(coord.lon - self.lon0) / self.lon_step;
        if x < 0.0 {
            x += 360.0 / self.lon_step;
        }
        let max_x = (self.cols - 1) as f64;
        let global = self.is_global();
        if !global && x > max_x + 1e-9 {
            return Err(DataUnavailable::OutsideGrid);
        }

        let y0 = y.floor() as usize;
        let y1 = (y0 + 1).min(self.rows - 1);
        let fy = y - y0 as f64;

        let x0 = (x.floor() as usize).min(self.cols - 1);
        let x1 = if global { (x0 + 1) % self.cols } else { (x0 + 1).min(self.cols - 1) };
        let fx = (x - x0 as f64).clamp(0.0, 1.0);

        Ok(CellWeights {
            indices: [
                y0 * self.cols + x0,
                y0 * self.cols + x1,
                y1 * self.cols + x0,
                y1 * self.cols + x1,
            ],
            weights: [
                (1.0 - fx) * (1.0 - fy),
                fx * (1.0 - fy),
                (1.0 - fx) * fy,
                fx * fy,
            ],
        })
    }
}

fn bilinear(values: &[f32], cell: &CellWeights) -> Result<f64, DataUnavailable> {
    let mut total = 0.0;
    for (index, weight) in cell.indices.iter().zip(cell.weights) {
        if weight == 0.0 {
            continue;
        }
        let value = values.get(*index).copied().ok_or(DataUnavailable::OutsideGrid)?;
        if !value.is_finite() {
            return Err(DataUnavailable::MissingValue);
        }
        total += value as f64 * weight;
    }
    Ok(total)
}

/// One forecast time slice. Current layers are optional.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastFrame {
    pub time: DateTime<Utc>,
    pub wind_u: Vec<f32>,
    pub wind_v: Vec<f32>,
    pub current_u: Option<Vec<f32>>,
    pub current_v: Option<Vec<f32>>,
}

impl ForecastFrame {
    pub fn wind_only(time: DateTime<Utc>, wind_u: Vec<f32>, wind_v: Vec<f32>) -> Self {
        Self { time, wind_u, wind_v, current_u: None, current_v: None }
    }

    fn sample(&self, cell: &CellWeights) -> Result<(WindData, CurrentData), DataUnavailable> {
        let wind = WindData {
            u: bilinear(&self.wind_u, cell)? as f32,
            v: bilinear(&self.wind_v, cell)? as f32,
        };
        let current = match (&self.current_u, &self.current_v) {
            (Some(u), Some(v)) => CurrentData {
                u: bilinear(u, cell)? as f32,
                v: bilinear(v, cell)? as f32,
            },
            _ => CurrentData::default(),
        };
        Ok((wind, current))
    }
}

/// Gridded forecast: bilinear in space, linear in time between frames.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastGrid {
    grid: RegularGrid,
    frames: Vec<ForecastFrame>,
}

impl ForecastGrid {
    pub fn new(grid: RegularGrid, frames: Vec<ForecastFrame>) -> Result<Self, ConfigurationError> {
        grid.validate()?;
        if frames.is_empty() {
            return Err(ConfigurationError::InvalidGrid("forecast has no frames".into()));
        }
        for (i, frame) in frames.iter().enumerate() {
            let layers = [
                Some(&frame.wind_u),
                Some(&frame.wind_v),
                frame.current_u.as_ref(),
                frame.current_v.as_ref(),
            ];
            if layers.iter().flatten().any(|layer| layer.len() != grid.len()) {
                return Err(ConfigurationError::InvalidGrid(format!(
                    "frame {i} does not match the {}x{} grid",
                    grid.rows, grid.cols
                )));
            }
            if i > 0 && frame.time <= frames[i - 1].time {
                return Err(ConfigurationError::InvalidGrid(format!(
                    "frame {i} is not later than the previous frame"
                )));
            }
        }
        Ok(Self { grid, frames })
    }

    pub fn grid(&self) -> &RegularGrid {
        &self.grid
    }

    pub fn frames(&self) -> &[ForecastFrame] {
        &self.frames
    }
}

impl WeatherProvider for ForecastGrid {
    fn query(
        &self,
        coord: &Coordinate,
        time: DateTime<Utc>,
    ) -> Result<WeatherSample, DataUnavailable> {
        let cell = self.grid.locate(coord)?;
        let after = self.frames.partition_point(|f| f.time <= time);
        if after == 0 {
            return Err(DataUnavailable::OutsideTimeSpan);
        }
        let before = &self.frames[after - 1];
        if before.time == time {
            let (wind, current) = before.sample(&cell)?;
            return Ok(WeatherSample { wind, current, confidence: 1.0 });
        }
        let next = self.frames.get(after).ok_or(DataUnavailable::OutsideTimeSpan)?;

        let span = (next.time - before.time).num_milliseconds() as f64;
        let t = (time - before.time).num_milliseconds() as f64 / span;
        let (w0, c0) = before.sample(&cell)?;
        let (w1, c1) = next.sample(&cell)?;
        let lerp = |a: f32, b: f32| (a as f64 + (b as f64 - a as f64) * t) as f32;
        Ok(WeatherSample {
            wind: WindData { u: lerp(w0.u, w1.u), v: lerp(w0.v, w1.v) },
            current: CurrentData { u: lerp(c0.u, c1.u), v: lerp(c0.v, c1.v) },
            confidence: 1.0,
        })
    }
}

/// Long-term monthly statistics for one calendar month.
#[derive(Debug, Clone, PartialEq)]
pub struct ClimatologyMonth {
    pub wind_u: Vec<f32>,
    pub wind_v: Vec<f32>,
    /// Spread of the wind speed around the mean (m/s)
    pub uncertainty: Vec<f32>,
    /// Probability in `[0, 1]` of crossing a cyclone track
    pub cyclone_risk: Vec<f32>,
}

/// Expected conditions from climatology.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClimateSample {
    pub wind: WindData,
    pub uncertainty: f32,
    pub cyclone_risk: f32,
}

/// Version assumed for climatology data that does not declare one.
pub const CLIMATOLOGY_VERSION: ProviderVersion = ProviderVersion::new(1, 0);

#[derive(Debug, Clone, PartialEq)]
pub struct Climatology {
    grid: RegularGrid,
    months: Vec<ClimatologyMonth>,
    version: ProviderVersion,
}

impl Climatology {
    pub fn new(
        grid: RegularGrid,
        months: Vec<ClimatologyMonth>,
    ) -> Result<Self, ConfigurationError> {
        grid.validate()?;
        if months.len() != 12 {
            return Err(ConfigurationError::InvalidGrid(format!(
                "climatology needs 12 months, got {}",
                months.len()
            )));
        }
        for (i, month) in months.iter().enumerate() {
            let sizes = [
                month.wind_u.len(),
                month.wind_v.len(),
                month.uncertainty.len(),
                month.cyclone_risk.len(),
            ];
            if sizes.iter().any(|&n| n != grid.len()) {
                return Err(ConfigurationError::InvalidGrid(format!(
                    "climatology month {} does not match the grid",
                    i + 1
                )));
            }
        }
        Ok(Self { grid, months, version: CLIMATOLOGY_VERSION })
    }

    /// Declares the version of the data source.
    pub fn with_version(mut self, version: ProviderVersion) -> Self {
        self.version = version;
        self
    }

    pub fn version(&self) -> ProviderVersion {
        self.version
    }

    pub fn expected(
        &self,
        coord: &Coordinate,
        time: DateTime<Utc>,
    ) -> Result<ClimateSample, DataUnavailable> {
        let cell = self.grid.locate(coord)?;
        let month = self
            .months
            .get(time.month0() as usize)
            .ok_or(DataUnavailable::OutsideTimeSpan)?;
        Ok(ClimateSample {
            wind: WindData {
                u: bilinear(&month.wind_u, &cell)? as f32,
                v: bilinear(&month.wind_v, &cell)? as f32,
            },
            uncertainty: bilinear(&month.uncertainty, &cell)?.max(0.0) as f32,
            cyclone_risk: bilinear(&month.cyclone_risk, &cell)?.clamp(0.0, 1.0) as f32,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum WeatherSource {
    Forecast,
    Climatology,
    Default,
}

/// What the router sees at one point and time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conditions {
    pub wind: WindData,
    pub current: CurrentData,
    pub confidence: f32,
    pub uncertainty: f32,
    pub cyclone_risk: f32,
    pub source: WeatherSource,
}

impl Conditions {
    pub fn degraded(&self) -> bool {
        self.source != WeatherSource::Forecast
    }
}

/// Immutable weather state handed to the engine. Replaced wholesale, never mutated.
#[derive(Clone, Default)]
pub struct WeatherSnapshot {
    forecast: Option<Arc<dyn WeatherProvider>>,
    climatology: Option<Arc<Climatology>>,
}

impl WeatherSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_forecast(provider: impl WeatherProvider + 'static) -> Self {
        Self { forecast: Some(Arc::new(provider)), climatology: None }
    }

    pub fn with_climatology(mut self, climatology: Climatology) -> Self {
        self.climatology = Some(Arc::new(climatology));
        self
    }

    /// Checks the climatology version against `range`. Passes without climatology.
    pub fn check_climatology(&self, range: &VersionRange) -> Result<(), ConstraintProviderError> {
        match &self.climatology {
            Some(climatology) if !range.contains(climatology.version) => {
                Err(ConstraintProviderError::IncompatibleVersion {
                    found: climatology.version,
                    min: range.min,
                    max: range.max,
                })
            }
            _ => Ok(()),
        }
    }

    /// The same forecast without climatology.
    pub fn without_climatology(&self) -> Self {
        Self { forecast: self.forecast.clone(), climatology: None }
    }

    pub fn has_forecast(&self) -> bool {
        self.forecast.is_some()
    }

    pub fn climatology(&self) -> Option<&Climatology> {
        self.climatology.as_deref()
    }

    /// Cyclone-track probability at a point, zero without climatology.
    pub fn cyclone_risk(&self, coord: &Coordinate, time: DateTime<Utc>) -> f32 {
        self.climatology
            .as_ref()
            .and_then(|c| c.expected(coord, time).ok())
            .map_or(0.0, |s| s.cyclone_risk)
    }

    pub fn sample(
        &self,
        coord: &Coordinate,
        time: DateTime<Utc>,
        fallback: &FallbackDefaults,
    ) -> Conditions {
        let climate = self.climatology.as_ref().map(|c| c.expected(coord, time));
        let cyclone_risk = match &climate {
            Some(Ok(sample)) => sample.cyclone_risk,
            _ => 0.0,
        };

        let forecast = match &self.forecast {
            Some(provider) => provider.query(coord, time),
            None => Err(DataUnavailable::OutsideTimeSpan),
        };
        match forecast {
            Ok(sample) => Conditions {
                wind: sample.wind,
                current: sample.current,
                confidence: sample.confidence,
                uncertainty: 0.0,
                cyclone_risk,
                source: WeatherSource::Forecast,
            },
            Err(reason) => {
                debug!("No forecast at {:?} {}: {}", coord, time, reason);
                match climate {
                    Some(Ok(sample)) => Conditions {
                        wind: sample.wind,
                        current: fallback.current(),
                        confidence: 1.0 / (1.0 + sample.uncertainty),
                        uncertainty: sample.uncertainty,
                        cyclone_risk,
                        source: WeatherSource::Climatology,
                    },
                    _ => Conditions {
                        wind: fallback.wind(),
                        current: fallback.current(),
                        confidence: 0.0,
                        uncertainty: 0.0,
                        cyclone_risk,
                        source: WeatherSource::Default,
                    },
                }
            }
        }
    }
}

impl std::fmt::Debug for WeatherSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeatherSnapshot")
            .field("forecast", &self.forecast.is_some())
            .field("climatology", &self.climatology.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    fn grid_2x2() -> RegularGrid {
        RegularGrid { lat0: 0.0, lon0: 0.0, lat_step: 1.0, lon_step: 1.0, rows: 2, cols: 2 }
    }

    fn forecast() -> ForecastGrid {
        let frames = vec![
            ForecastFrame::wind_only(t0(), vec![0.0, 2.0, 0.0, 2.0], vec![0.0; 4]),
            ForecastFrame::wind_only(
                t0() + Duration::hours(6),
                vec![4.0, 6.0, 4.0, 6.0],
                vec![1.0; 4],
            ),
        ];
        ForecastGrid::new(grid_2x2(), frames).unwrap()
    }

    #[test]
    fn test_bilinear_in_space() {
        let sample = forecast().query(&Coordinate::new(0.5, 0.25), t0()).unwrap();
        assert!((sample.wind.u - 0.5).abs() < 1e-6);
        assert_eq!(sample.wind.v, 0.0);
    }

    #[test]
    fn test_linear_in_time() {
        let sample = forecast()
            .query(&Coordinate::new(0.0, 0.5), t0() + Duration::hours(3))
            .unwrap();
        // Halfway between 1.0 and 5.0
        assert!((sample.wind.u - 3.0).abs() < 1e-6);
        assert!((sample.wind.v - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_no_data_outside_grid_and_time() {
        let grid = forecast();
        assert_eq!(
            grid.query(&Coordinate::new(5.0, 0.5), t0()),
            Err(DataUnavailable::OutsideGrid)
        );
        assert_eq!(
            grid.query(&Coordinate::new(0.5, 0.5), t0() + Duration::hours(7)),
            Err(DataUnavailable::OutsideTimeSpan)
        );
    }

    #[test]
    fn test_missing_cell_value() {
        let u = vec![f32::NAN, 1.0, 1.0, 1.0];
        let frames = vec![ForecastFrame::wind_only(t0(), u, vec![0.0; 4])];
        let grid = ForecastGrid::new(grid_2x2(), frames).unwrap();
        assert_eq!(
            grid.query(&Coordinate::new(0.5, 0.5), t0()),
            Err(DataUnavailable::MissingValue)
        );
    }

    #[test]
    fn test_rejects_unsorted_frames() {
        let frames = vec![
            ForecastFrame::wind_only(t0(), vec![0.0; 4], vec![0.0; 4]),
            ForecastFrame::wind_only(t0(), vec![0.0; 4], vec![0.0; 4]),
        ];
        assert!(ForecastGrid::new(grid_2x2(), frames).is_err());
    }

    #[test]
    fn test_global_grid_wraps_longitude() {
        let grid = RegularGrid {
            lat0: -90.0,
            lon0: 0.0,
            lat_step: 90.0,
            lon_step: 90.0,
            rows: 3,
            cols: 4,
        };
        let mut u = vec![0.0; 12];
        u[4 + 3] = 8.0; // equator row, lon 270
        let frames = vec![ForecastFrame::wind_only(t0(), u, vec![0.0; 12])];
        let forecast = ForecastGrid::new(grid, frames).unwrap();
        // 315E sits between lon 270 (8.0) and lon 0 (0.0) on the wrapped grid.
        let sample = forecast.query(&Coordinate::new(0.0, -45.0), t0()).unwrap();
        assert!((sample.wind.u - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_snapshot_falls_back_to_climatology_then_defaults() {
        let month = ClimatologyMonth {
            wind_u: vec![3.0; 4],
            wind_v: vec![0.0; 4],
            uncertainty: vec![2.0; 4],
            cyclone_risk: vec![0.25; 4],
        };
        let climatology = Climatology::new(grid_2x2(), vec![month; 12]).unwrap();
        let snapshot = WeatherSnapshot::with_forecast(forecast()).with_climatology(climatology);
        let fallback = FallbackDefaults::default();

        let live = snapshot.sample(&Coordinate::new(0.5, 0.5), t0(), &fallback);
        assert_eq!(live.source, WeatherSource::Forecast);
        assert!(!live.degraded());
        assert_eq!(live.cyclone_risk, 0.25);

        let late = t0() + Duration::days(2);
        let climate = snapshot.sample(&Coordinate::new(0.5, 0.5), late, &fallback);
        assert_eq!(climate.source, WeatherSource::Climatology);
        assert!(climate.degraded());
        assert_eq!(climate.wind.u, 3.0);
        assert_eq!(climate.uncertainty, 2.0);

        let nowhere = snapshot.sample(&Coordinate::new(40.0, 40.0), late, &fallback);
        assert_eq!(nowhere.source, WeatherSource::Default);
        assert_eq!(nowhere.wind, fallback.wind());
        assert_eq!(nowhere.current, CurrentData::default());
    }

    #[test]
    fn test_climatology_version_check() {
        let month = ClimatologyMonth {
            wind_u: vec![3.0; 4],
            wind_v: vec![0.0; 4],
            uncertainty: vec![2.0; 4],
            cyclone_risk: vec![0.5; 4],
        };
        let range = VersionRange {
            min: ProviderVersion::new(0, 10),
            max: ProviderVersion::new(1, 4),
        };
        let current = Climatology::new(grid_2x2(), vec![month; 12]).unwrap();
        assert_eq!(current.version(), CLIMATOLOGY_VERSION);
        let snapshot = WeatherSnapshot::new().with_climatology(current.clone());
        assert!(snapshot.check_climatology(&range).is_ok());
        assert!(WeatherSnapshot::new().check_climatology(&range).is_ok());

        let future = ProviderVersion::new(2, 0);
        let newer = WeatherSnapshot::new().with_climatology(current.with_version(future));
        assert!(matches!(
            newer.check_climatology(&range),
            Err(ConstraintProviderError::IncompatibleVersion { found, .. }) if found == future
        ));

        let stripped = newer.without_climatology();
        assert!(stripped.climatology().is_none());
        let point = Coordinate::new(0.5, 0.5);
        assert_eq!(stripped.cyclone_risk(&point, t0()), 0.0);
        let sample = stripped.sample(&point, t0(), &FallbackDefaults::default());
        assert_eq!(sample.source, WeatherSource::Default);
    }
}
