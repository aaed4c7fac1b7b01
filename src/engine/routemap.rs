use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::RoutingConfig;
use crate::engine::constraints::{ConstraintEvaluator, ConstraintSet};
use crate::engine::geodesy::{distance, distance_to_segment};
use crate::engine::models::{Coordinate, Degradation, Isochrone, Route, RouteStatus, Waypoint};
use crate::engine::physics::BoatModel;
use crate::engine::route::{RouteExtractor, backtrack};
use crate::engine::router::IsochroneRouter;
use crate::engine::weather::WeatherSnapshot;
use crate::error::{ConfigurationError, RoutingError, UnreachableReason};

/// Start, destination and departure time of one computation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RouteRequest {
    pub start: Coordinate,
    pub destination: Coordinate,
    pub departure: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// A new isochrone was published and the computation goes on
    Continue,
    Finished(RouteStatus),
}

/// Everything a finished (or stopped) computation produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteOutcome {
    pub status: RouteStatus,
    /// Published isochrones in completion order, without the origin
    pub isochrones: Vec<Arc<Isochrone>>,
    pub route: Option<Route>,
    pub degradation: Degradation,
}

impl RouteOutcome {
    pub fn into_route(self) -> Result<Route, RoutingError> {
        match (self.status, self.route) {
            (RouteStatus::Reached, Some(route)) => Ok(route),
            (RouteStatus::Unreachable(reason), _) => Err(RoutingError::Unreachable(reason)),
            _ => Err(RoutingError::Cancelled),
        }
    }
}

/// Closest published isochrone to a point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IsochroneHit {
    pub step: usize,
    pub elapsed_time: f64,
    pub time: DateTime<Utc>,
    /// Boundary position closest to the point
    pub position: usize,
    /// Distance from the point to the isochrone boundary (metres)
    pub distance: f64,
}

/// One route computation: owns its isochrones and shares only read-only snapshots.
pub struct RouteMap {
    request: RouteRequest,
    router: IsochroneRouter,
    boat: Arc<BoatModel>,
    weather: Arc<WeatherSnapshot>,
    constraints: Arc<ConstraintSet>,
    /// Starts with the origin
    isochrones: Vec<Arc<Isochrone>>,
    status: RouteStatus,
    route: Option<Route>,
    degradation: Degradation,
    cancel_requested: bool,
}

impl RouteMap {
    /// Validates the request and configuration. Nothing is computed yet.
    pub fn new(
        request: RouteRequest,
        config: RoutingConfig,
        boat: Arc<BoatModel>,
        weather: Arc<WeatherSnapshot>,
        constraints: Arc<ConstraintSet>,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;
        for (name, c) in [("start", request.start), ("destination", request.destination)] {
            if !c.is_valid() {
                return Err(ConfigurationError::InvalidCoordinate { name, lat: c.lat, lon: c.lon });
            }
        }

        let origin = Arc::new(Isochrone::origin(request.start, request.departure));
        Ok(Self {
            request,
            router: IsochroneRouter::new(request.start, request.destination, config),
            boat,
            weather,
            constraints,
            isochrones: vec![origin],
            status: RouteStatus::Pending,
            route: None,
            degradation: Degradation::default(),
            cancel_requested: false,
        })
    }

    pub fn request(&self) -> &RouteRequest {
        &self.request
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.router.config
    }

    pub fn boat(&self) -> &Arc<BoatModel> {
        &self.boat
    }

    pub fn weather(&self) -> &Arc<WeatherSnapshot> {
        &self.weather
    }

    pub fn constraints(&self) -> &Arc<ConstraintSet> {
        &self.constraints
    }

    pub fn status(&self) -> RouteStatus {
        self.status
    }

    /// Published isochrones, origin excluded.
    pub fn isochrones(&self) -> &[Arc<Isochrone>] {
        &self.isochrones[1..]
    }

    pub fn latest_isochrone(&self) -> Option<&Arc<Isochrone>> {
        self.isochrones().last()
    }

    pub fn route(&self) -> Option<&Route> {
        self.route.as_ref()
    }

    pub fn degradation(&self) -> &Degradation {
        &self.degradation
    }

    /// Replaces the weather snapshot used by the next step.
    pub fn set_weather(&mut self, weather: Arc<WeatherSnapshot>) {
        self.weather = weather;
    }

    /// Replaces the constraint snapshot used by the next step.
    pub fn set_constraints(&mut self, constraints: Arc<ConstraintSet>) {
        self.constraints = constraints;
    }

    /// Takes effect at the start of the next step.
    pub fn cancel(&mut self) {
        self.cancel_requested = true;
    }

    fn finish(&mut self, status: RouteStatus) -> StepOutcome {
        self.status = status;
        match status {
            RouteStatus::Reached => info!(
                "Destination reached after {:.2} h",
                self.route.as_ref().map_or(0.0, Route::duration_hours)
            ),
            RouteStatus::Unreachable(reason) => warn!("Destination unreachable: {}", reason),
            RouteStatus::Cancelled => {
                info!("Route computation cancelled after {} steps", self.isochrones().len())
            }
            RouteStatus::Pending | RouteStatus::Running => {}
        }
        StepOutcome::Finished(status)
    }

    /// Computes and publishes the next isochrone, or reports a terminal status.
    pub fn step(&mut self) -> StepOutcome {
        if self.status.is_terminal() {
            return StepOutcome::Finished(self.status);
        }
        if self.cancel_requested {
            return self.finish(RouteStatus::Cancelled);
        }
        if distance(&self.request.start, &self.request.destination) < 1.0 {
            self.route = Some(Route {
                waypoints: vec![Waypoint {
                    coordinate: self.request.destination,
                    time: self.request.departure,
                    elapsed_time: 0.0,
                    heading: None,
                    speed_kts: 0.0,
                    propulsion: None,
                }],
                degraded: false,
            });
            return self.finish(RouteStatus::Reached);
        }

        let config = &self.router.config;
        let Some(current) = self.isochrones.last().cloned() else {
            return self.finish(RouteStatus::Unreachable(UnreachableReason::NoCandidates));
        };
        let over_duration = config
            .max_duration_secs()
            .is_some_and(|max| current.elapsed_time + config.time_step_secs > max + 1e-6);
        if self.isochrones().len() >= config.max_steps || over_duration {
            return self.finish(RouteStatus::Unreachable(UnreachableReason::BudgetExhausted));
        }
        self.status = RouteStatus::Running;

        // Snapshots are pinned for the whole step; a swap only affects the next one.
        let mut weather = Arc::clone(&self.weather);
        if let Err(reason) = weather.check_climatology(&config.climatology_versions) {
            if self.degradation.climatology_disabled.is_none() {
                warn!("Climatology ignored: {}", reason);
            }
            self.degradation.climatology_disabled = Some(reason);
            weather = Arc::new(weather.without_climatology());
        }
        let constraints = Arc::clone(&self.constraints);
        let mut evaluator = ConstraintEvaluator::new(&constraints, config, &weather);
        let result = self.router.step(&current, &self.boat, &weather, &mut evaluator);

        if result.isochrone.is_empty() {
            self.degradation.merge(result.degradation);
            for disabled in evaluator.finish() {
                self.degradation.record_disabled(disabled);
            }
            return self.finish(RouteStatus::Unreachable(UnreachableReason::NoCandidates));
        }

        let isochrone = Arc::new(result.isochrone);
        info!(
            "Isochrone {} published: {} positions in {} curve(s){}",
            isochrone.step,
            isochrone.len(),
            isochrone.curves.len(),
            if isochrone.closed { ", closed" } else { "" }
        );
        self.isochrones.push(Arc::clone(&isochrone));
        self.degradation.merge(result.degradation);

        let extractor = RouteExtractor {
            start: self.request.start,
            destination: self.request.destination,
            config,
            boat: &self.boat,
            weather: &weather,
        };
        let arrival = extractor.find_arrival(&current, &isochrone, &mut evaluator);
        for disabled in evaluator.finish() {
            self.degradation.record_disabled(disabled);
        }

        if let Some(arrival) = arrival {
            let route = backtrack(&self.isochrones, &arrival, self.request.destination);
            if let Some(mut route) = route {
                route.degraded |= self.degradation.is_degraded();
                self.route = Some(route);
                return self.finish(RouteStatus::Reached);
            }
            warn!("Arrival found on isochrone {} but its parent chain is broken", isochrone.step);
        }
        StepOutcome::Continue
    }

    /// Steps until a terminal status.
    pub fn run(&mut self) -> RouteOutcome {
        while let StepOutcome::Continue = self.step() {}
        self.outcome()
    }

    pub fn outcome(&self) -> RouteOutcome {
        RouteOutcome {
            status: self.status,
            isochrones: self.isochrones().to_vec(),
            route: self.route.clone(),
            degradation: self.degradation.clone(),
        }
    }

    /// The published isochrone whose boundary passes closest to `coord`.
    pub fn nearest_isochrone(&self, coord: &Coordinate) -> Option<IsochroneHit> {
        let mut best: Option<IsochroneHit> = None;
        for iso in self.isochrones() {
            let Some((position, vertex_distance)) = iso
                .positions
                .iter()
                .enumerate()
                .map(|(i, p)| (i, distance(coord, &p.coordinate)))
                .min_by(|a, b| a.1.total_cmp(&b.1))
            else {
                continue;
            };
            let boundary_distance = iso
                .boundary_pairs()
                .into_iter()
                .map(|(a, b)| {
                    let (a, b) = (&iso.positions[a].coordinate, &iso.positions[b].coordinate);
                    distance_to_segment(coord, a, b)
                })
                .fold(vertex_distance, f64::min);

            if best.is_none_or(|b| boundary_distance < b.distance) {
                best = Some(IsochroneHit {
                    step: iso.step,
                    elapsed_time: iso.elapsed_time,
                    time: iso.time,
                    position,
                    distance: boundary_distance,
                });
            }
        }
        best
    }

    /// Distance in metres from `coord` to the computed route, if any.
    pub fn distance_to_route(&self, coord: &Coordinate) -> Option<f64> {
        self.route.as_ref()?.distance_to(coord)
    }
}
