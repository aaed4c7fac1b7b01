use std::ops::Range;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::constraints::DisabledConstraint;
use crate::engine::geodesy;
use crate::error::{ConstraintProviderError, UnreachableReason};

/// Knots per metre-per-second.
pub const MS_TO_KNOTS: f64 = 1.943_844;
/// Metres-per-second per knot.
pub const KNOTS_TO_MS: f64 = 1852.0 / 3600.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

/// Weather data for wind at a specific point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindData {
    /// U component of wind (m/s)
    pub u: f32,
    /// V component of wind (m/s)
    pub v: f32,
}

impl WindData {
    pub const CALM: WindData = WindData { u: 0.0, v: 0.0 };

    /// Builds a wind vector from a speed in knots and the direction it blows FROM.
    pub fn from_knots(speed_kts: f64, direction_deg: f64) -> Self {
        let speed_ms = speed_kts / MS_TO_KNOTS;
        let towards = direction_deg.to_radians();
        Self {
            u: (-speed_ms * towards.sin()) as f32,
            v: (-speed_ms * towards.cos()) as f32,
        }
    }

    pub fn speed(&self) -> f32 {
        (self.u.powi(2) + self.v.powi(2)).sqrt()
    }

    pub fn speed_kts(&self) -> f64 {
        self.speed() as f64 * MS_TO_KNOTS
    }

    /// Navigational direction the wind blows from, 0 = North.
    pub fn direction(&self) -> f32 {
        let angle = self.v.atan2(self.u).to_degrees();
        let mut dir = 270.0 - angle;
        if dir < 0.0 { dir += 360.0; }
        if dir >= 360.0 { dir -= 360.0; }
        dir
    }
}

/// Ocean current data
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CurrentData {
    /// Eastward set (m/s)
    pub u: f32,
    /// Northward set (m/s)
    pub v: f32,
}

/// How the boat was driven over a leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Propulsion {
    /// Index into the boat's sail plans.
    Sail(usize),
    Motor,
}

/// A node of an isochrone. Owned by the isochrone that created it and never
/// mutated afterwards; `parent` indexes into the previous isochrone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub coordinate: Coordinate,
    pub time: DateTime<Utc>,
    /// Elapsed time since departure in seconds
    pub elapsed_time: f64,
    /// Heading through the water on the incoming leg
    pub heading: Option<f64>,
    /// Speed over ground on the incoming leg (knots)
    pub speed_kts: f64,
    /// Cumulative risk accrued from climatology uncertainty and cyclone risk
    pub risk: f64,
    pub propulsion: Option<Propulsion>,
    pub parent: Option<usize>,
    /// Set when the incoming leg used fallback weather
    pub degraded: bool,
}

impl Position {
    pub fn origin(coordinate: Coordinate, departure: DateTime<Utc>) -> Self {
        Self {
            coordinate,
            time: departure,
            elapsed_time: 0.0,
            heading: None,
            speed_kts: 0.0,
            risk: 0.0,
            propulsion: None,
            parent: None,
            degraded: false,
        }
    }
}

/// The boundary of everything reachable after `elapsed_time` seconds.
///
/// `positions` are ordered by bearing from the start. `curves` splits them into
/// contiguous runs; when `closed` is set there is a single run whose last
/// position connects back to the first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Isochrone {
    pub step: usize,
    pub elapsed_time: f64,
    pub time: DateTime<Utc>,
    pub positions: Vec<Position>,
    pub curves: Vec<Range<usize>>,
    pub closed: bool,
    /// Furthest distance from the start (metres) reached so far in each bearing bin
    #[serde(skip)]
    pub reach: Vec<f64>,
}

impl Isochrone {
    pub fn origin(start: Coordinate, departure: DateTime<Utc>) -> Self {
        Self {
            step: 0,
            elapsed_time: 0.0,
            time: departure,
            positions: vec![Position::origin(start, departure)],
            curves: vec![0..1],
            closed: false,
            reach: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn curve(&self, index: usize) -> Option<&[Position]> {
        self.curves.get(index).and_then(|range| self.positions.get(range.clone()))
    }

    /// Index pairs of positions joined by a boundary segment, in boundary order.
    pub fn boundary_pairs(&self) -> Vec<(usize, usize)> {
        let mut pairs = Vec::with_capacity(self.positions.len());
        for range in &self.curves {
            for i in range.start..range.end.saturating_sub(1) {
                pairs.push((i, i + 1));
            }
        }
        if self.closed && self.positions.len() > 2 {
            pairs.push((self.positions.len() - 1, 0));
        }
        pairs
    }

    pub fn is_degraded(&self) -> bool {
        self.positions.iter().any(|p| p.degraded)
    }
}

/// Terminal and transient states of a route computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteStatus {
    Pending,
    Running,
    Reached,
    Unreachable(UnreachableReason),
    Cancelled,
}

impl RouteStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RouteStatus::Reached | RouteStatus::Unreachable(_) | RouteStatus::Cancelled
        )
    }
}

/// Records every place where the computation substituted defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Degradation {
    /// Boundary positions whose weather came from climatology or configured defaults
    pub weather_fallbacks: usize,
    pub disabled_constraints: Vec<DisabledConstraint>,
    /// Set when the climatology was ignored, e.g. for an unsupported version
    pub climatology_disabled: Option<ConstraintProviderError>,
}

impl Degradation {
    pub fn is_degraded(&self) -> bool {
        self.weather_fallbacks > 0
            || !self.disabled_constraints.is_empty()
            || self.climatology_disabled.is_some()
    }

    pub fn record_disabled(&mut self, disabled: DisabledConstraint) {
        if !self
            .disabled_constraints
            .iter()
            .any(|d| d.category == disabled.category)
        {
            self.disabled_constraints.push(disabled);
        }
    }

    pub fn merge(&mut self, other: Degradation) {
        self.weather_fallbacks += other.weather_fallbacks;
        for disabled in other.disabled_constraints {
            self.record_disabled(disabled);
        }
        if self.climatology_disabled.is_none() {
            self.climatology_disabled = other.climatology_disabled;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Waypoint {
    pub coordinate: Coordinate,
    pub time: DateTime<Utc>,
    pub elapsed_time: f64,
    /// Heading through the water on the leg ending here
    pub heading: Option<f64>,
    /// Speed over ground on the leg ending here (knots)
    pub speed_kts: f64,
    pub propulsion: Option<Propulsion>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Route {
    pub waypoints: Vec<Waypoint>,
    pub degraded: bool,
}

impl Route {
    pub fn departure(&self) -> Option<&Waypoint> {
        self.waypoints.first()
    }

    pub fn arrival(&self) -> Option<&Waypoint> {
        self.waypoints.last()
    }

    /// Total sailing time in seconds.
    pub fn duration(&self) -> f64 {
        self.arrival().map_or(0.0, |w| w.elapsed_time)
    }

    pub fn duration_hours(&self) -> f64 {
        self.duration() / 3600.0
    }

    /// Great-circle length of all legs in metres.
    pub fn distance(&self) -> f64 {
        self.waypoints
            .windows(2)
            .map(|leg| geodesy::distance(&leg[0].coordinate, &leg[1].coordinate))
            .sum()
    }

    /// Where the boat is `elapsed` seconds after departure.
    pub fn position_at(&self, elapsed: f64) -> Option<Coordinate> {
        let first = self.waypoints.first()?;
        if elapsed <= first.elapsed_time {
            return Some(first.coordinate);
        }
        for leg in self.waypoints.windows(2) {
            let (a, b) = (&leg[0], &leg[1]);
            if elapsed <= b.elapsed_time {
                let span = b.elapsed_time - a.elapsed_time;
                let fraction = if span > 0.0 { (elapsed - a.elapsed_time) / span } else { 1.0 };
                return Some(geodesy::interpolate(&a.coordinate, &b.coordinate, fraction));
            }
        }
        self.waypoints.last().map(|w| w.coordinate)
    }

    /// Shortest distance in metres from `coord` to any leg.
    pub fn distance_to(&self, coord: &Coordinate) -> Option<f64> {
        match self.waypoints.as_slice() {
            [] => None,
            [only] => Some(geodesy::distance(coord, &only.coordinate)),
            legs => legs
                .windows(2)
                .map(|leg| {
                    geodesy::distance_to_segment(coord, &leg[0].coordinate, &leg[1].coordinate)
                })
                .min_by(f64::total_cmp),
        }
    }
}
