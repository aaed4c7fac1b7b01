use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::info;

use crate::error::PolarError;

/// Lowest wind angle a polar must reach down to.
const MIN_COVERED_TWA: f32 = 60.0;
/// Highest wind angle a polar must reach up to.
const MAX_COVERED_TWA: f32 = 150.0;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolarData {
    /// True Wind Speeds (knots)
    pub tws: Vec<f32>,
    /// True Wind Angles (degrees)
    pub twa: Vec<f32>,
    /// Boat speeds in knots: speeds[twa_idx][tws_idx]
    pub speeds: Vec<Vec<f32>>,
}

impl PolarData {
    /// Builds and validates a polar table.
    pub fn new(tws: Vec<f32>, twa: Vec<f32>, speeds: Vec<Vec<f32>>) -> Result<Self, PolarError> {
        let polar = Self { tws, twa, speeds };
        polar.validate()?;
        Ok(polar)
    }

    /// Loads a polar from a CSV whose header is `twa/tws,<tws>...` and whose rows are
    /// `<twa>,<speed>...`. Commas, semicolons and tabs are accepted as separators.
    pub fn load_from_csv<P: AsRef<Path>>(path: P) -> Result<Self, PolarError> {
        let path = path.as_ref();
        info!("Loading polar data from CSV: {:?}", path);

        let io_err = |source| PolarError::Io { path: path.to_path_buf(), source };
        let file = File::open(path).map_err(io_err)?;
        let reader = BufReader::new(file);

        let mut tws: Vec<f32> = Vec::new();
        let mut twa_list = Vec::new();
        let mut speeds = Vec::new();

        for (number, line_result) in reader.lines().enumerate() {
            let line = line_result.map_err(io_err)?;
            let line_no = number + 1;
            if line.trim().is_empty() {
                continue;
            }
            let parts: Vec<&str> = line
                .split([',', ';', '\t'])
                .map(str::trim)
                .collect();

            // First line is header: "twa/tws", "5", "10", ...
            if tws.is_empty() && twa_list.is_empty() {
                for val in &parts[1..] {
                    tws.push(parse_value(val, line_no)?);
                }
                continue;
            }

            twa_list.push(parse_value(parts[0], line_no)?);
            let mut row_speeds = Vec::with_capacity(parts.len().saturating_sub(1));
            for val in &parts[1..] {
                // Blank cells are read as "cannot sail here"
                if val.is_empty() {
                    row_speeds.push(0.0);
                } else {
                    row_speeds.push(parse_value(val, line_no)?);
                }
            }
            speeds.push(row_speeds);
        }

        let polar = Self::new(tws, twa_list, speeds)?;
        info!("Polar loaded: {} TWA x {} TWS points", polar.twa.len(), polar.tws.len());
        Ok(polar)
    }

    /// Checks coverage and monotonic sanity. A failing table is a configuration
    /// error and must never reach the router.
    pub fn validate(&self) -> Result<(), PolarError> {
        if self.tws.is_empty() || self.twa.is_empty() || self.speeds.is_empty() {
            return Err(PolarError::Empty);
        }
        check_increasing("wind speed", &self.tws)?;
        check_increasing("wind angle", &self.twa)?;

        if self.speeds.len() != self.twa.len() {
            return Err(PolarError::ShapeMismatch {
                row: self.speeds.len().min(self.twa.len()),
                expected: self.twa.len(),
                found: self.speeds.len(),
            });
        }
        for (row, speeds) in self.speeds.iter().enumerate() {
            if speeds.len() != self.tws.len() {
                return Err(PolarError::ShapeMismatch {
                    row,
                    expected: self.tws.len(),
                    found: speeds.len(),
                });
            }
            for (column, &value) in speeds.iter().enumerate() {
                if !value.is_finite() || value < 0.0 {
                    return Err(PolarError::InvalidSpeed { row, column, value });
                }
            }
        }

        let min = self.twa[0];
        let max = self.twa[self.twa.len() - 1];
        if min < 0.0 || max > 180.0 || min > MIN_COVERED_TWA || max < MAX_COVERED_TWA {
            return Err(PolarError::MissingAngleCoverage { min, max });
        }
        if self.max_speed() <= 0.0 {
            return Err(PolarError::NoPositiveSpeed);
        }
        Ok(())
    }

    /// Fastest boat speed anywhere in the table (knots).
    pub fn max_speed(&self) -> f32 {
        self.speeds
            .iter()
            .flatten()
            .copied()
            .fold(0.0, f32::max)
    }

    /// Bilinear interpolation to find the boat speed (in knots) for a given TWS and TWA.
    pub fn get_speed(&self, target_tws: f32, target_twa: f32) -> f32 {
        let (Some(&tws_min), Some(&tws_max)) = (self.tws.first(), self.tws.last()) else {
            return 0.0;
        };
        let (Some(&twa_min), Some(&twa_max)) = (self.twa.first(), self.twa.last()) else {
            return 0.0;
        };

        // 1. Clamp bounds
        let tws_clamped = target_tws.clamp(tws_min, tws_max);
        let twa_clamped = target_twa.clamp(twa_min, twa_max);

        // 2. Find bounding indices
        let (tws_idx0, tws_idx1) = bracket(&self.tws, tws_clamped);
        let (twa_idx0, twa_idx1) = bracket(&self.twa, twa_clamped);

        // 3. Extract 4 points
        let tws0 = self.tws[tws_idx0];
        let tws1 = self.tws[tws_idx1];
        let twa0 = self.twa[twa_idx0];
        let twa1 = self.twa[twa_idx1];

        let val00 = self.speeds[twa_idx0][tws_idx0];
        let val01 = self.speeds[twa_idx0][tws_idx1];
        let val10 = self.speeds[twa_idx1][tws_idx0];
        let val11 = self.speeds[twa_idx1][tws_idx1];

        // 4. Bilinear Interpolation
        if tws_idx0 == tws_idx1 && twa_idx0 == twa_idx1 {
            return val00;
        }

        let tws_frac = if tws0 == tws1 { 0.0 } else { (tws_clamped - tws0) / (tws1 - tws0) };
        let twa_frac = if twa0 == twa1 { 0.0 } else { (twa_clamped - twa0) / (twa1 - twa0) };

        let val0 = val00 * (1.0 - tws_frac) + val01 * tws_frac; // Interpolate across TWS at TWA 0
        let val1 = val10 * (1.0 - tws_frac) + val11 * tws_frac; // Interpolate across TWS at TWA 1

        val0 * (1.0 - twa_frac) + val1 * twa_frac // Interpolate across TWA
    }
}

fn parse_value(raw: &str, line: usize) -> Result<f32, PolarError> {
    raw.parse().map_err(|_| PolarError::Parse { line, value: raw.to_string() })
}

fn check_increasing(axis: &'static str, values: &[f32]) -> Result<(), PolarError> {
    for (index, pair) in values.windows(2).enumerate() {
        if !(pair[1] > pair[0]) {
            return Err(PolarError::NonIncreasingAxis { axis, index: index + 1 });
        }
    }
    Ok(())
}

/// Indices of the axis values surrounding `value`, which must already be clamped.
fn bracket(axis: &[f32], value: f32) -> (usize, usize) {
    if axis.len() < 2 {
        return (0, 0);
    }
    let upper = axis.partition_point(|&v| v < value).clamp(1, axis.len() - 1);
    (upper - 1, upper)
}
