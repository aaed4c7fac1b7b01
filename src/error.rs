use std::path::PathBuf;

use thiserror::Error;

use crate::engine::constraints::ProviderVersion;

/// Problems found while loading or validating a polar table.
#[derive(Debug, Error)]
pub enum PolarError {
    #[error("polar table is empty")]
    Empty,

    #[error("polar row {row} has {found} speeds, expected {expected}")]
    ShapeMismatch {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("polar {axis} axis is not strictly increasing at index {index}")]
    NonIncreasingAxis { axis: &'static str, index: usize },

    #[error("polar wind angles cover {min}..{max} degrees, need at least 60..150")]
    MissingAngleCoverage { min: f32, max: f32 },

    #[error("polar speed {value} at row {row}, column {column} must be finite and non-negative")]
    InvalidSpeed {
        row: usize,
        column: usize,
        value: f32,
    },

    #[error("polar table has no positive boat speed")]
    NoPositiveSpeed,

    #[error("failed to parse polar value {value:?} on line {line}")]
    Parse { line: usize, value: String },

    #[error("failed to read polar file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Fatal problems detected before the first propagation step.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("time step must be a positive number of seconds, got {0}")]
    InvalidTimeStep(f64),

    #[error("at least 8 headings are required per position, got {0}")]
    TooFewHeadings(usize),

    #[error("bearing bin width must be in (0, 45] degrees, got {0}")]
    InvalidBinWidth(f64),

    #[error("{name} must be positive and finite, got {value}")]
    InvalidThreshold { name: &'static str, value: f64 },

    #[error("step budget must allow at least one step")]
    EmptyBudget,

    #[error("{name} coordinate ({lat}, {lon}) is out of range")]
    InvalidCoordinate {
        name: &'static str,
        lat: f64,
        lon: f64,
    },

    #[error("supported provider version range {min}..={max} is empty")]
    InvalidVersionRange {
        min: ProviderVersion,
        max: ProviderVersion,
    },

    #[error("boat model has no sail plan")]
    NoSailPlan,

    #[error("invalid polar for sail plan {name:?}")]
    InvalidPolar {
        name: String,
        #[source]
        source: PolarError,
    },

    #[error("forecast grid is malformed: {0}")]
    InvalidGrid(String),

    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {path}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Why a forecast lookup produced no value. Never escapes a propagation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DataUnavailable {
    #[error("requested time is outside the forecast span")]
    OutsideTimeSpan,

    #[error("requested position is outside the forecast grid")]
    OutsideGrid,

    #[error("forecast cell has no value")]
    MissingValue,
}

/// An absent or unusable constraint provider. Disables the affected category.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize)]
pub enum ConstraintProviderError {
    #[error("no constraint provider is attached")]
    Missing,

    #[error("provider version {found} is outside the supported range {min}..={max}")]
    IncompatibleVersion {
        found: ProviderVersion,
        min: ProviderVersion,
        max: ProviderVersion,
    },

    #[error("constraint provider query failed: {0}")]
    QueryFailed(String),
}

#[derive(Debug, Error)]
pub enum LandMaskError {
    #[error("failed to open land mask {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode land mask {path}")]
    Decode {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Why a computation ended without enclosing the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum UnreachableReason {
    /// Every candidate of the last step was filtered out.
    NoCandidates,
    /// The step count or elapsed time budget ran out first.
    BudgetExhausted,
}

impl std::fmt::Display for UnreachableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnreachableReason::NoCandidates => write!(f, "no valid candidates remain"),
            UnreachableReason::BudgetExhausted => write!(f, "step or time budget exhausted"),
        }
    }
}

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("destination unreachable: {0}")]
    Unreachable(UnreachableReason),

    #[error("route computation was cancelled")]
    Cancelled,

    #[error("routing worker panicked")]
    WorkerPanicked,
}
