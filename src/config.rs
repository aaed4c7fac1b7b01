use std::fs;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::engine::constraints::{ProviderVersion, VersionRange};
use crate::engine::models::{CurrentData, WindData};
use crate::error::ConfigurationError;

/// Values substituted when neither forecast nor climatology cover a point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackDefaults {
    pub wind_speed_kts: f64,
    /// Direction the default wind blows from
    pub wind_direction_deg: f64,
    /// Eastward current (m/s)
    pub current_u: f32,
    /// Northward current (m/s)
    pub current_v: f32,
}

impl Default for FallbackDefaults {
    fn default() -> Self {
        Self {
            wind_speed_kts: 0.0,
            wind_direction_deg: 0.0,
            current_u: 0.0,
            current_v: 0.0,
        }
    }
}

impl FallbackDefaults {
    pub fn wind(&self) -> WindData {
        WindData::from_knots(self.wind_speed_kts, self.wind_direction_deg)
    }

    pub fn current(&self) -> CurrentData {
        CurrentData { u: self.current_u, v: self.current_v }
    }
}

/// Tuning and safety limits of one route computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Integration time step in seconds
    pub time_step_secs: f64,
    /// Headings sampled around each boundary position
    pub heading_count: usize,
    /// Width of the bearing-from-start bins used for pruning
    pub bearing_bin_deg: f64,
    /// Legs starting in stronger true wind are discarded
    pub max_wind_kts: Option<f64>,
    /// Legs faster through the water than this are discarded
    pub max_boat_speed_kts: Option<f64>,
    pub max_steps: usize,
    pub max_duration_hours: Option<f64>,
    pub fallback: FallbackDefaults,
    pub avoid_cyclones: bool,
    /// Cyclone-track probability above which a position is excluded
    pub cyclone_risk_threshold: f64,
    /// Boundary provider versions the evaluator accepts
    pub provider_versions: VersionRange,
    /// Climatology versions the router accepts; others are ignored
    pub climatology_versions: VersionRange,
}

/// Climatology data versions the router understands.
pub const CLIMATOLOGY_VERSIONS: VersionRange = VersionRange {
    min: ProviderVersion::new(0, 10),
    max: ProviderVersion::new(1, 4),
};

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            time_step_secs: 3600.0,
            heading_count: 72,
            bearing_bin_deg: 1.0,
            max_wind_kts: None,
            max_boat_speed_kts: None,
            max_steps: 500,
            max_duration_hours: None,
            fallback: FallbackDefaults::default(),
            avoid_cyclones: false,
            cyclone_risk_threshold: 0.1,
            provider_versions: VersionRange::default(),
            climatology_versions: CLIMATOLOGY_VERSIONS,
        }
    }
}

impl RoutingConfig {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Reads and validates a JSON configuration file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        info!("Loading routing configuration from {:?}", path);
        let text = fs::read_to_string(path).map_err(|source| ConfigurationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json_str(&text).map_err(|source| ConfigurationError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !(self.time_step_secs.is_finite() && self.time_step_secs > 0.0) {
            return Err(ConfigurationError::InvalidTimeStep(self.time_step_secs));
        }
        if self.heading_count < 8 {
            return Err(ConfigurationError::TooFewHeadings(self.heading_count));
        }
        if !(self.bearing_bin_deg > 0.0 && self.bearing_bin_deg <= 45.0) {
            return Err(ConfigurationError::InvalidBinWidth(self.bearing_bin_deg));
        }
        let limits = [
            ("max_wind_kts", self.max_wind_kts),
            ("max_boat_speed_kts", self.max_boat_speed_kts),
            ("max_duration_hours", self.max_duration_hours),
        ];
        for (name, value) in limits {
            if let Some(value) = value {
                if !(value.is_finite() && value > 0.0) {
                    return Err(ConfigurationError::InvalidThreshold { name, value });
                }
            }
        }
        if !(0.0..=1.0).contains(&self.cyclone_risk_threshold) {
            return Err(ConfigurationError::InvalidThreshold {
                name: "cyclone_risk_threshold",
                value: self.cyclone_risk_threshold,
            });
        }
        if !(self.fallback.wind_speed_kts.is_finite() && self.fallback.wind_speed_kts >= 0.0) {
            return Err(ConfigurationError::InvalidThreshold {
                name: "fallback.wind_speed_kts",
                value: self.fallback.wind_speed_kts,
            });
        }
        if self.max_steps == 0 {
            return Err(ConfigurationError::EmptyBudget);
        }
        for range in [self.provider_versions, self.climatology_versions] {
            if range.min > range.max {
                return Err(ConfigurationError::InvalidVersionRange {
                    min: range.min,
                    max: range.max,
                });
            }
        }
        Ok(())
    }

    /// Number of bearing bins covering a full circle.
    pub fn bin_count(&self) -> usize {
        ((360.0 / self.bearing_bin_deg).ceil() as usize).max(1)
    }

    /// Elapsed-time budget in seconds, if any.
    pub fn max_duration_secs(&self) -> Option<f64> {
        self.max_duration_hours.map(|h| h * 3600.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = RoutingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.time_step_secs, 3600.0,
            "Default time step should be 1 hour (3600 seconds)"
        );
        assert_eq!(config.bin_count(), 360);
    }

    #[test]
    fn test_rejects_non_positive_time_step() {
        for step in [0.0, -60.0, f64::NAN] {
            let config = RoutingConfig { time_step_secs: step, ..RoutingConfig::default() };
            assert!(matches!(config.validate(), Err(ConfigurationError::InvalidTimeStep(_))));
        }
    }

    #[test]
    fn test_rejects_bad_thresholds() {
        let config = RoutingConfig { max_wind_kts: Some(-5.0), ..RoutingConfig::default() };
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidThreshold { name: "max_wind_kts", .. })
        ));

        let config = RoutingConfig { max_steps: 0, ..RoutingConfig::default() };
        assert!(matches!(config.validate(), Err(ConfigurationError::EmptyBudget)));

        let config = RoutingConfig { heading_count: 4, ..RoutingConfig::default() };
        assert!(matches!(config.validate(), Err(ConfigurationError::TooFewHeadings(4))));
    }

    #[test]
    fn test_rejects_inverted_version_ranges() {
        let inverted = VersionRange {
            min: ProviderVersion::new(1, 4),
            max: ProviderVersion::new(0, 10),
        };
        let config = RoutingConfig { climatology_versions: inverted, ..RoutingConfig::default() };
        assert!(matches!(config.validate(), Err(ConfigurationError::InvalidVersionRange { .. })));

        let config = RoutingConfig { provider_versions: inverted, ..RoutingConfig::default() };
        assert!(matches!(config.validate(), Err(ConfigurationError::InvalidVersionRange { .. })));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "time_step_secs": 1800, "max_wind_kts": 35.0 }}"#).unwrap();

        let config = RoutingConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.time_step_secs, 1800.0);
        assert_eq!(config.max_wind_kts, Some(35.0));
        assert_eq!(config.heading_count, RoutingConfig::default().heading_count);
    }

    #[test]
    fn test_invalid_json_file_is_a_configuration_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "time_step_secs": -1 }}"#).unwrap();
        assert!(matches!(
            RoutingConfig::from_json_file(file.path()),
            Err(ConfigurationError::InvalidTimeStep(_))
        ));

        let mut garbage = tempfile::NamedTempFile::new().unwrap();
        write!(garbage, "not json").unwrap();
        assert!(matches!(
            RoutingConfig::from_json_file(garbage.path()),
            Err(ConfigurationError::Json { .. })
        ));
    }
}
