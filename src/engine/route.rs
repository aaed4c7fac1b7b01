//! Destination enclosure, arrival time and backtracking.
//!
//! Boundary segments are tested in a local azimuthal-equidistant plane
//! centred on the start: every position maps to `(r sin θ, r cos θ)` where `r`
//! and `θ` are its great-circle distance and bearing from the start. The
//! destination is enclosed when the ray towards it meets a boundary segment at
//! or beyond the destination distance.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::config::RoutingConfig;
use crate::engine::constraints::ConstraintEvaluator;
use crate::engine::geodesy::{angle_difference, bearing, distance};
use crate::engine::models::{Coordinate, Isochrone, KNOTS_TO_MS, Propulsion, Route, Waypoint};
use crate::engine::physics::BoatModel;
use crate::engine::weather::WeatherSnapshot;

type Plane = [f64; 2];

/// Where the ray from the start towards the destination meets a boundary segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Crossing {
    /// Index of the segment in [`Isochrone::boundary_pairs`]
    pub pair: usize,
    pub a: usize,
    pub b: usize,
    /// Position of the crossing along the segment, 0 at `a`
    pub t: f64,
    /// Distance from the start to the crossing (metres)
    pub reach: f64,
}

/// How and when the destination is reached.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Arrival {
    pub elapsed_time: f64,
    pub time: DateTime<Utc>,
    /// Last position before the destination, in the isochrone preceding the enclosing one
    pub parent: usize,
    pub heading: f64,
    pub speed_kts: f64,
    pub propulsion: Option<Propulsion>,
    /// No direct final leg was feasible; the time is interpolated between isochrones
    pub interpolated: bool,
    pub pair: usize,
}

fn to_plane(start: &Coordinate, p: &Coordinate) -> Plane {
    let r = distance(start, p);
    let theta = bearing(start, p).to_radians();
    [r * theta.sin(), r * theta.cos()]
}

fn cross(a: Plane, b: Plane) -> f64 {
    a[0] * b[1] - a[1] * b[0]
}

fn dot(a: Plane, b: Plane) -> f64 {
    a[0] * b[0] + a[1] * b[1]
}

/// All boundary segments hit by the ray from `start` towards `destination`.
pub fn crossings(iso: &Isochrone, start: &Coordinate, destination: &Coordinate) -> Vec<Crossing> {
    let theta = bearing(start, destination).to_radians();
    let u = [theta.sin(), theta.cos()];
    iso.boundary_pairs()
        .into_iter()
        .enumerate()
        .filter_map(|(pair, (a, b))| {
            let pa = to_plane(start, &iso.positions[a].coordinate);
            let pb = to_plane(start, &iso.positions[b].coordinate);
            let d = [pb[0] - pa[0], pb[1] - pa[1]];
            let denom = cross(u, d);
            if denom.abs() < 1e-9 {
                return None;
            }
            let reach = cross(pa, d) / denom;
            let t = cross(pa, u) / denom;
            ((0.0..=1.0).contains(&t) && reach > 0.0).then_some(Crossing { pair, a, b, t, reach })
        })
        .collect()
}

/// True when some boundary segment lies on or beyond the destination.
pub fn encloses(iso: &Isochrone, start: &Coordinate, destination: &Coordinate) -> bool {
    let target = distance(start, destination);
    crossings(iso, start, destination).iter().any(|c| c.reach >= target)
}

/// Finds the arrival on an enclosing isochrone and walks parent links back to the start.
pub struct RouteExtractor<'a> {
    pub start: Coordinate,
    pub destination: Coordinate,
    pub config: &'a RoutingConfig,
    pub boat: &'a BoatModel,
    pub weather: &'a WeatherSnapshot,
}

impl RouteExtractor<'_> {
    /// Earliest arrival over all enclosing crossings of `iso`, whose parents
    /// live in `prev`. Ties go to the lowest boundary segment.
    pub fn find_arrival(
        &self,
        prev: &Isochrone,
        iso: &Isochrone,
        evaluator: &mut ConstraintEvaluator<'_>,
    ) -> Option<Arrival> {
        let target = distance(&self.start, &self.destination);
        let mut best: Option<Arrival> = None;

        for crossing in crossings(iso, &self.start, &self.destination) {
            if crossing.reach < target {
                continue;
            }
            let mut parents = Vec::with_capacity(2);
            for index in [crossing.a, crossing.b] {
                if let Some(parent) = iso.positions[index].parent {
                    if !parents.contains(&parent) {
                        parents.push(parent);
                    }
                }
            }
            let mut direct: Option<Arrival> = None;
            for parent in parents {
                if let Some(leg) = self.direct_leg(prev, parent, evaluator) {
                    if direct.is_none_or(|d| leg.elapsed_time < d.elapsed_time) {
                        direct = Some(leg);
                    }
                }
            }
            let arrival = match direct {
                Some(arrival) => Some(arrival),
                None => self.interpolate(prev, iso, &crossing, target, evaluator),
            };

            if let Some(mut arrival) = arrival {
                arrival.pair = crossing.pair;
                if best.is_none_or(|b| arrival.elapsed_time < b.elapsed_time) {
                    best = Some(arrival);
                }
            }
        }
        best
    }

    /// A straight final leg from a boundary position of `prev`, if it fits in one step.
    fn direct_leg(
        &self,
        prev: &Isochrone,
        parent: usize,
        evaluator: &mut ConstraintEvaluator<'_>,
    ) -> Option<Arrival> {
        let config = self.config;
        let from = prev.positions.get(parent)?.coordinate;
        let conditions = self.weather.sample(&from, prev.time, &config.fallback);
        if config.max_wind_kts.is_some_and(|max| conditions.wind.speed_kts() > max) {
            return None;
        }

        let heading = bearing(&from, &self.destination);
        let option = self.boat.best_option_below(
            heading,
            &conditions.wind,
            &conditions.current,
            config.max_boat_speed_kts,
        )?;
        // Progress made good along the final leg.
        let speed_kts = option.sog_kts * angle_difference(heading, option.cog).to_radians().cos();
        if speed_kts <= 1e-9 {
            return None;
        }
        let leg_secs = distance(&from, &self.destination) / (speed_kts * KNOTS_TO_MS);
        if leg_secs > config.time_step_secs + 1e-6 {
            return None;
        }

        let time = prev.time + Duration::milliseconds((leg_secs * 1000.0).round() as i64);
        if !evaluator.leg_is_clear(&from, &self.destination, time)
            || !evaluator.admit_leg(&from, &self.destination)
        {
            return None;
        }
        Some(Arrival {
            elapsed_time: prev.elapsed_time + leg_secs,
            time,
            parent,
            heading,
            speed_kts,
            propulsion: Some(option.propulsion),
            interpolated: false,
            pair: 0,
        })
    }

    /// Radial interpolation of the arrival time between `prev` and `iso`.
    fn interpolate(
        &self,
        prev: &Isochrone,
        iso: &Isochrone,
        crossing: &Crossing,
        target: f64,
        evaluator: &mut ConstraintEvaluator<'_>,
    ) -> Option<Arrival> {
        let (a, b) = (&iso.positions[crossing.a], &iso.positions[crossing.b]);
        let (pa, pb) = (a.parent?, b.parent?);
        let theta = bearing(&self.start, &self.destination).to_radians();
        let u = [theta.sin(), theta.cos()];
        let project = |index: usize| {
            prev.positions
                .get(index)
                .map(|p| dot(to_plane(&self.start, &p.coordinate), u))
        };
        let previous_reach = (1.0 - crossing.t) * project(pa)? + crossing.t * project(pb)?;

        let gained = crossing.reach - previous_reach;
        let fraction = if gained > 1e-9 {
            ((target - previous_reach) / gained).clamp(0.0, 1.0)
        } else {
            1.0
        };
        let (parent, child) = if crossing.t < 0.5 { (pa, a) } else { (pb, b) };
        let from = prev.positions.get(parent)?.coordinate;
        let leg_secs = self.config.time_step_secs * fraction;
        let time = prev.time + Duration::milliseconds((leg_secs * 1000.0).round() as i64);
        if !evaluator.leg_is_clear(&from, &self.destination, time)
            || !evaluator.admit_leg(&from, &self.destination)
        {
            return None;
        }

        let speed_kts = if leg_secs > 0.0 {
            distance(&from, &self.destination) / leg_secs / KNOTS_TO_MS
        } else {
            child.speed_kts
        };
        Some(Arrival {
            elapsed_time: prev.elapsed_time + leg_secs,
            time,
            parent,
            heading: bearing(&from, &self.destination),
            speed_kts,
            propulsion: child.propulsion,
            interpolated: true,
            pair: 0,
        })
    }
}

/// Follows parent links from the arrival back to the origin.
///
/// `isochrones` starts with the origin and ends with the enclosing isochrone.
/// Returns `None` if a parent link does not resolve.
pub fn backtrack(
    isochrones: &[Arc<Isochrone>],
    arrival: &Arrival,
    destination: Coordinate,
) -> Option<Route> {
    let mut level = isochrones.len().checked_sub(2)?;
    let mut index = arrival.parent;
    let mut waypoints = Vec::with_capacity(level + 2);
    let mut degraded = false;

    loop {
        let position = isochrones.get(level)?.positions.get(index)?;
        degraded |= position.degraded;
        waypoints.push(Waypoint {
            coordinate: position.coordinate,
            time: position.time,
            elapsed_time: position.elapsed_time,
            heading: position.heading,
            speed_kts: position.speed_kts,
            propulsion: position.propulsion,
        });
        match position.parent {
            Some(parent) => {
                level = level.checked_sub(1)?;
                index = parent;
            }
            None => break,
        }
    }
    waypoints.reverse();
    waypoints.push(Waypoint {
        coordinate: destination,
        time: arrival.time,
        elapsed_time: arrival.elapsed_time,
        heading: Some(arrival.heading),
        speed_kts: arrival.speed_kts,
        propulsion: arrival.propulsion,
    });
    Some(Route { waypoints, degraded })
}
