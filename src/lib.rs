//! Isochrone weather routing for sailing and motor-sailing vessels.
//!
//! A [`RouteMap`] grows isochrones (time fronts) from a start position until
//! one of them encloses the destination, then backtracks the fastest route.
//! [`RouteWorker`] runs a map on its own thread with cancellation and live
//! snapshot swaps.

pub mod config;
pub mod engine;
pub mod error;
pub mod parsers;

pub use config::{FallbackDefaults, RoutingConfig};
pub use engine::constraints::{ConstraintCategory, ConstraintProvider, ConstraintSet, ExclusionZone};
pub use engine::controller::{RouteControl, RouteHandle, RouteWorker, StepReport};
pub use engine::models::{Coordinate, Isochrone, Route, RouteStatus, Waypoint};
pub use engine::physics::{BoatModel, MotorParameters, SailPlan};
pub use engine::routemap::{RouteMap, RouteOutcome, RouteRequest, StepOutcome};
pub use engine::weather::{WeatherProvider, WeatherSnapshot};
pub use error::{ConfigurationError, RoutingError, UnreachableReason};
