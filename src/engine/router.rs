use chrono::Duration;
use log::{debug, warn};
use rayon::prelude::*;

use crate::config::RoutingConfig;
use crate::engine::constraints::ConstraintEvaluator;
use crate::engine::geodesy::{bearing, destination, distance, normalize_bearing};
use crate::engine::models::{Coordinate, Degradation, Isochrone, KNOTS_TO_MS, Position};
use crate::engine::physics::BoatModel;
use crate::engine::weather::WeatherSnapshot;

/// A candidate must beat the previous reach of its bin by this much (metres).
const MIN_PROGRESS_M: f64 = 1.0;

/// Counters reported by one propagation step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepStats {
    /// Candidates produced by the boat model
    pub candidates: usize,
    /// Discarded by the wind or boat speed thresholds
    pub over_threshold: usize,
    /// Discarded by zones, land, cyclone risk or the boundary provider
    pub constrained: usize,
    /// Dropped because they did not advance beyond the previous isochrone
    pub no_progress: usize,
    /// Positions in the new isochrone
    pub kept: usize,
}

#[derive(Debug, Clone)]
pub struct StepResult {
    pub isochrone: Isochrone,
    pub degradation: Degradation,
    pub stats: StepStats,
}

/// A candidate next position before pruning.
#[derive(Debug, Clone)]
struct Candidate {
    /// Where the leg starts
    from: Coordinate,
    position: Position,
    bin: usize,
    reach: f64,
}

impl Candidate {
    /// Furthest first, then lower risk. Full ties keep the earlier candidate.
    fn beats(&self, other: &Candidate) -> bool {
        self.reach > other.reach
            || (self.reach == other.reach && self.position.risk < other.position.risk)
    }
}

#[derive(Debug, Default)]
struct Expansion {
    candidates: Vec<Candidate>,
    over_threshold: usize,
    constrained: usize,
    /// Bins of the legs that hit a constraint
    rejected_bins: Vec<usize>,
    produced: usize,
    degraded_weather: bool,
}

/// Expands isochrones one time step at a time.
pub struct IsochroneRouter {
    pub start: Coordinate,
    pub destination: Coordinate,
    pub config: RoutingConfig,
}

impl IsochroneRouter {
    pub fn new(start: Coordinate, destination: Coordinate, config: RoutingConfig) -> Self {
        Self { start, destination, config }
    }

    /// Time step in seconds
    pub fn time_step(&self) -> f64 {
        self.config.time_step_secs
    }

    fn bin_of(&self, bearing_deg: f64) -> usize {
        let bins = self.config.bin_count();
        ((bearing_deg / self.config.bearing_bin_deg) as usize).min(bins - 1)
    }

    /// Performs one step of the isochrone expansion.
    ///
    /// The result depends only on the arguments: candidates are generated in
    /// parallel but merged in (parent, heading) order.
    pub fn step(
        &self,
        current: &Isochrone,
        boat: &BoatModel,
        weather: &WeatherSnapshot,
        evaluator: &mut ConstraintEvaluator<'_>,
    ) -> StepResult {
        let dt = self.time_step();
        let time = current.time + Duration::milliseconds((dt * 1000.0).round() as i64);
        let elapsed_time = current.elapsed_time + dt;
        debug!("Expanding isochrone {} from {} positions", current.step, current.len());

        let shared: &ConstraintEvaluator<'_> = evaluator;
        let expansions: Vec<Expansion> = current
            .positions
            .par_iter()
            .enumerate()
            .map(|(parent, position)| self.expand(parent, position, current, boat, weather, shared))
            .collect();

        let bins = self.config.bin_count();
        let mut stats = StepStats::default();
        let mut degradation = Degradation::default();
        let mut rejected = vec![false; bins];
        let mut candidates = Vec::new();
        for expansion in expansions {
            stats.candidates += expansion.produced;
            stats.over_threshold += expansion.over_threshold;
            stats.constrained += expansion.constrained;
            if expansion.degraded_weather {
                degradation.weather_fallbacks += 1;
            }
            for bin in expansion.rejected_bins {
                rejected[bin] = true;
            }
            candidates.extend(expansion.candidates);
        }

        // Provider lookups go through the step cache, so they run in order.
        let before = candidates.len();
        candidates.retain(|c| {
            let admitted = evaluator.admit_leg(&c.from, &c.position.coordinate);
            if !admitted {
                rejected[c.bin] = true;
            }
            admitted
        });
        stats.constrained += before - candidates.len();

        let mut best: Vec<Option<Candidate>> = vec![None; bins];
        for candidate in candidates {
            let previous = current.reach.get(candidate.bin).copied().unwrap_or(0.0);
            if candidate.reach <= previous + MIN_PROGRESS_M {
                stats.no_progress += 1;
                continue;
            }
            let bin = candidate.bin;
            if best[bin].as_ref().is_none_or(|kept| candidate.beats(kept)) {
                best[bin] = Some(candidate);
            }
        }

        let mut reach = current.reach.clone();
        reach.resize(bins, 0.0);
        for kept in best.iter().flatten() {
            reach[kept.bin] = reach[kept.bin].max(kept.reach);
        }

        // Only a constraint splits the boundary. Bins that merely saw no progress stay open.
        let blocked: Vec<bool> = (0..bins).map(|b| rejected[b] && best[b].is_none()).collect();
        let (positions, curves, closed) = assemble(best, &blocked);
        stats.kept = positions.len();

        if degradation.weather_fallbacks > 0 {
            warn!(
                "Step {}: {} boundary positions used fallback weather",
                current.step + 1,
                degradation.weather_fallbacks
            );
        }
        if stats.candidates == 0 {
            warn!(
                "Step {}: no heading produced any boat speed, check the polar and wind data",
                current.step + 1
            );
        }
        debug!("Step {} stats: {:?}", current.step + 1, stats);

        let isochrone = Isochrone {
            step: current.step + 1,
            elapsed_time,
            time,
            positions,
            curves,
            closed,
            reach,
        };
        StepResult { isochrone, degradation, stats }
    }

    /// Candidates from one boundary position, in heading order.
    fn expand(
        &self,
        parent: usize,
        state: &Position,
        current: &Isochrone,
        boat: &BoatModel,
        weather: &WeatherSnapshot,
        evaluator: &ConstraintEvaluator<'_>,
    ) -> Expansion {
        let config = &self.config;
        let dt = config.time_step_secs;
        let mut out = Expansion::default();

        let conditions = weather.sample(&state.coordinate, current.time, &config.fallback);
        out.degraded_weather = conditions.degraded();
        let wind_kts = conditions.wind.speed_kts();
        if config.max_wind_kts.is_some_and(|max| wind_kts > max) {
            out.over_threshold = config.heading_count;
            return out;
        }

        // Leg risk grows with how unsure the weather is and how likely a cyclone is.
        let hazard = conditions.uncertainty as f64 + conditions.cyclone_risk as f64;
        let leg_risk = hazard * dt / 3600.0;
        let time = current.time + Duration::milliseconds((dt * 1000.0).round() as i64);
        let twd = conditions.wind.direction() as f64;
        let angle_step = 360.0 / config.heading_count as f64;
        out.candidates.reserve(config.heading_count);

        for heading_index in 0..config.heading_count {
            let heading = normalize_bearing(twd + heading_index as f64 * angle_step);
            let fastest = boat.best_option(heading, &conditions.wind, &conditions.current);
            let Some(fastest) = fastest else {
                continue;
            };
            out.produced += 1;
            let best = if config.max_boat_speed_kts.is_some_and(|max| fastest.stw_kts > max) {
                // A slower sail plan may still be within the limit
                let slower = boat.best_option_below(
                    heading,
                    &conditions.wind,
                    &conditions.current,
                    config.max_boat_speed_kts,
                );
                let Some(slower) = slower else {
                    out.over_threshold += 1;
                    continue;
                };
                slower
            } else {
                fastest
            };
            if best.sog_kts <= 1e-9 {
                continue;
            }

            // Distance = Speed * Time
            let distance_m = best.sog_kts * KNOTS_TO_MS * dt;
            let new_position = destination(&state.coordinate, distance_m, best.cog);
            let bin = self.bin_of(bearing(&self.start, &new_position));
            if !evaluator.leg_is_clear(&state.coordinate, &new_position, time) {
                out.constrained += 1;
                out.rejected_bins.push(bin);
                continue;
            }

            let reach = distance(&self.start, &new_position);
            out.candidates.push(Candidate {
                from: state.coordinate,
                position: Position {
                    coordinate: new_position,
                    time,
                    elapsed_time: state.elapsed_time + dt,
                    heading: Some(heading),
                    speed_kts: best.sog_kts,
                    risk: state.risk + leg_risk,
                    propulsion: Some(best.propulsion),
                    parent: Some(parent),
                    degraded: conditions.degraded(),
                },
                bin,
                reach,
            });
        }
        out
    }
}

/// Orders the kept candidates by bearing bin and splits them into curves at
/// blocked bins. The ordering starts after the first blocked bin so that no
/// curve wraps past north.
fn assemble(
    best: Vec<Option<Candidate>>,
    blocked: &[bool],
) -> (Vec<Position>, Vec<std::ops::Range<usize>>, bool) {
    let bins = best.len();
    let first_blocked = blocked.iter().position(|&b| b);
    let offset = first_blocked.map_or(0, |b| b + 1);

    let mut slots = best;
    slots.rotate_left(offset % bins.max(1));
    let mut order_blocked = blocked.to_vec();
    order_blocked.rotate_left(offset % bins.max(1));

    let mut positions = Vec::new();
    let mut curves = Vec::new();
    let mut curve_start = 0;
    for (slot, is_blocked) in slots.into_iter().zip(order_blocked) {
        if is_blocked {
            if positions.len() > curve_start {
                curves.push(curve_start..positions.len());
            }
            curve_start = positions.len();
        }
        if let Some(candidate) = slot {
            positions.push(candidate.position);
        }
    }
    if positions.len() > curve_start {
        curves.push(curve_start..positions.len());
    }

    let closed = first_blocked.is_none() && positions.len() >= 3;
    (positions, curves, closed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::constraints::{ConstraintCategory, ConstraintSet, ExclusionZone};
    use crate::engine::mask::LandMask;
    use crate::engine::models::{Propulsion, WindData};
    use crate::engine::physics::SailPlan;
    use crate::engine::weather::{Climatology, ClimatologyMonth, ConstantWeather, RegularGrid};
    use crate::parsers::polars::PolarData;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn constant_polar(speed: f32) -> PolarData {
        PolarData::new(
            vec![0.0, 10.0, 20.0],
            vec![0.0, 90.0, 180.0],
            vec![vec![speed; 3], vec![speed; 3], vec![speed; 3]],
        )
        .unwrap()
    }

    fn uniform(speed_kts: f64, direction: f64) -> WeatherSnapshot {
        let wind = WindData::from_knots(speed_kts, direction);
        WeatherSnapshot::with_forecast(ConstantWeather::new(wind))
    }

    fn router_to(start: Coordinate, destination: Coordinate) -> IsochroneRouter {
        IsochroneRouter::new(start, destination, RoutingConfig::default())
    }

    fn origin(start: Coordinate) -> Isochrone {
        Isochrone::origin(start, Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap())
    }

    fn run_step(
        router: &IsochroneRouter,
        iso: &Isochrone,
        boat: &BoatModel,
        weather: &WeatherSnapshot,
        set: &ConstraintSet,
    ) -> StepResult {
        let mut evaluator = ConstraintEvaluator::new(set, &router.config, weather);
        router.step(iso, boat, weather, &mut evaluator)
    }

    #[test]
    fn test_router_expansion() {
        let start = Coordinate::new(45.0, -1.0);
        let dest = Coordinate::new(46.0, -1.0); // North
        let router = IsochroneRouter::new(start, dest, RoutingConfig::default());

        // Setup simple polar: always 5 knots
        let boat = BoatModel::with_polar(constant_polar(5.0)).unwrap();
        let southerly = WindData { u: 0.0, v: 5.0 };
        let weather = WeatherSnapshot::with_forecast(ConstantWeather::new(southerly));

        let result = run_step(&router, &origin(start), &boat, &weather, &ConstraintSet::new());
        let iso = &result.isochrone;

        assert_eq!(iso.len(), 72, "Router should keep one position per heading, got {}", iso.len());
        assert!(iso.closed);
        assert_eq!(iso.curves, vec![0..72]);
        for state in &iso.positions {
            let travelled = distance(&start, &state.coordinate);
            assert!((travelled - 5.0 * 1852.0).abs() < 1.0, "travelled {travelled} m");
            assert_eq!(state.parent, Some(0));
        }
        assert!(!result.degradation.is_degraded());
    }

    #[test]
    fn test_positions_ordered_by_bearing() {
        let start = Coordinate::new(10.0, 20.0);
        let router = router_to(start, Coordinate::new(11.0, 20.0));
        let boat = BoatModel::with_polar(constant_polar(6.0)).unwrap();
        let weather = uniform(12.0, 45.0);
        let set = ConstraintSet::new();

        let first = run_step(&router, &origin(start), &boat, &weather, &set).isochrone;
        let second = run_step(&router, &first, &boat, &weather, &set).isochrone;
        let bearings: Vec<f64> =
            second.positions.iter().map(|p| bearing(&start, &p.coordinate)).collect();
        assert!(bearings.windows(2).all(|w| w[0] <= w[1]), "positions must follow bearing order");
        assert!(second.elapsed_time > first.elapsed_time);
        for p in &second.positions {
            let parent = &first.positions[p.parent.unwrap()];
            let leg = distance(&parent.coordinate, &p.coordinate);
            assert!(leg <= 6.0 * 1852.0 + 1.0, "no position may teleport");
        }
    }

    #[test]
    fn test_router_zero_speed() {
        let start = Coordinate::new(45.0, -1.0);
        let router = router_to(start, Coordinate::new(46.0, -1.0));
        // Only moves in wind stronger than 10 kt
        let speeds = vec![vec![0.0, 5.0], vec![0.0, 5.0]];
        let polar = PolarData::new(vec![10.0, 20.0], vec![0.0, 180.0], speeds).unwrap();
        let boat = BoatModel::with_polar(polar).unwrap();
        let weather = WeatherSnapshot::with_forecast(ConstantWeather::new(WindData::CALM));

        let result = run_step(&router, &origin(start), &boat, &weather, &ConstraintSet::new());
        assert!(result.isochrone.is_empty());
        assert_eq!(result.stats.candidates, 0);
    }

    #[test]
    fn test_wind_threshold_discards_everything() {
        let start = Coordinate::new(0.0, 0.0);
        let config = RoutingConfig { max_wind_kts: Some(20.0), ..RoutingConfig::default() };
        let router = IsochroneRouter::new(start, Coordinate::new(0.0, 1.0), config);
        let boat = BoatModel::with_polar(constant_polar(6.0)).unwrap();
        let weather = uniform(30.0, 270.0);

        let result = run_step(&router, &origin(start), &boat, &weather, &ConstraintSet::new());
        assert!(result.isochrone.is_empty());
        assert_eq!(result.stats.over_threshold, 72);
    }

    #[test]
    fn test_missing_forecast_degrades_to_defaults() {
        let start = Coordinate::new(0.0, 0.0);
        let mut config = RoutingConfig::default();
        config.fallback.wind_speed_kts = 10.0;
        let router = IsochroneRouter::new(start, Coordinate::new(0.0, 1.0), config);
        let boat = BoatModel::with_polar(constant_polar(4.0)).unwrap();

        let weather = WeatherSnapshot::new();
        let result = run_step(&router, &origin(start), &boat, &weather, &ConstraintSet::new());
        assert_eq!(result.isochrone.len(), 72);
        assert_eq!(result.degradation.weather_fallbacks, 1);
        assert!(result.isochrone.is_degraded());
    }

    #[test]
    fn test_router_land_avoidance() {
        let start = Coordinate::new(0.0, 0.0);
        let mut mask = LandMask::new();
        mask.add_land_box(0.05, 0.3, -0.3, 0.3);
        let set = ConstraintSet::new().with_land_mask(Arc::new(mask));
        let router = router_to(start, Coordinate::new(0.0, 1.0));
        let boat = BoatModel::with_polar(constant_polar(10.0)).unwrap();
        let weather = uniform(15.0, 270.0);

        let result = run_step(&router, &origin(start), &boat, &weather, &set);
        assert!(result.stats.constrained > 0);
        for state in &result.isochrone.positions {
            assert!(
                state.coordinate.lon < 0.05,
                "Point should not be on or behind land: {:?}",
                state.coordinate
            );
        }
    }

    #[test]
    fn test_obstacle_splits_isochrone() {
        let start = Coordinate::new(0.0, 0.0);
        let wall = ExclusionZone::from_vertices(
            "wall",
            ConstraintCategory::Regulatory,
            &[
                Coordinate::new(-0.5, 0.1),
                Coordinate::new(-0.5, 0.12),
                Coordinate::new(0.5, 0.12),
                Coordinate::new(0.5, 0.1),
            ],
        );
        let set = ConstraintSet::new().with_zone(wall);
        let config = RoutingConfig { heading_count: 180, ..RoutingConfig::default() };
        let router = IsochroneRouter::new(start, Coordinate::new(0.0, 1.0), config);
        let boat = BoatModel::with_polar(constant_polar(6.0)).unwrap();
        let weather = uniform(15.0, 270.0);

        let first = run_step(&router, &origin(start), &boat, &weather, &set).isochrone;
        assert!(first.closed, "the wall is out of reach after one hour");
        let second = run_step(&router, &first, &boat, &weather, &set);
        assert!(second.stats.constrained > 0);
        assert!(second.stats.no_progress > 0);
        for p in &second.isochrone.positions {
            assert!(p.coordinate.lon < 0.1, "crossed the wall: {:?}", p.coordinate);
        }
    }

    fn slot(bin: usize) -> Option<Candidate> {
        let departure = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        Some(Candidate {
            from: Coordinate::new(0.0, 0.0),
            position: Position::origin(Coordinate::new(0.0, bin as f64), departure),
            bin,
            reach: 1.0,
        })
    }

    #[test]
    fn test_assemble_splits_at_blocked_bins() {
        let best = vec![slot(0), slot(1), None, slot(3), None, slot(5), slot(6), None];
        let blocked = [false, false, true, false, false, false, false, true];
        let (positions, curves, closed) = assemble(best, &blocked);

        let bins: Vec<f64> = positions.iter().map(|p| p.coordinate.lon).collect();
        assert_eq!(bins, vec![3.0, 5.0, 6.0, 0.0, 1.0]);
        assert_eq!(curves, vec![0..3, 3..5]);
        assert!(!closed);
    }

    #[test]
    fn test_assemble_without_blocked_bins_is_closed() {
        let best = vec![slot(0), None, slot(2), slot(3)];
        let (positions, curves, closed) = assemble(best, &[false; 4]);
        assert_eq!(positions.len(), 3);
        assert_eq!(curves, vec![0..3]);
        assert!(closed);

        let (_, _, closed) = assemble(vec![slot(0), slot(1)], &[false; 2]);
        assert!(!closed, "two positions cannot enclose anything");
    }

    #[test]
    fn test_step_is_deterministic() {
        let start = Coordinate::new(0.0, 0.0);
        let router = router_to(start, Coordinate::new(0.0, 1.0));
        let boat = BoatModel::with_polar(constant_polar(6.0)).unwrap();
        let weather = uniform(15.0, 200.0);
        let set = ConstraintSet::new();

        let a = run_step(&router, &origin(start), &boat, &weather, &set).isochrone;
        let a = run_step(&router, &a, &boat, &weather, &set).isochrone;
        let b = run_step(&router, &origin(start), &boat, &weather, &set).isochrone;
        let b = run_step(&router, &b, &boat, &weather, &set).isochrone;
        assert_eq!(a, b);
    }

    #[test]
    fn test_open_water_isochrone_stays_closed() {
        let start = Coordinate::new(10.0, 20.0);
        let router = router_to(start, Coordinate::new(11.0, 20.0));
        let boat = BoatModel::with_polar(constant_polar(6.0)).unwrap();
        let weather = uniform(12.0, 45.0);
        let set = ConstraintSet::new();

        let first = run_step(&router, &origin(start), &boat, &weather, &set).isochrone;
        let second = run_step(&router, &first, &boat, &weather, &set);
        // Inward legs make no progress but must not open the boundary.
        assert!(second.stats.no_progress > 0);
        assert_eq!(second.stats.constrained, 0);
        assert!(second.isochrone.closed);
        assert_eq!(second.isochrone.curves, vec![0..second.isochrone.len()]);
    }

    #[test]
    fn test_speed_cap_falls_back_to_slower_sail_plan() {
        let start = Coordinate::new(0.0, 0.0);
        let boat = BoatModel::new(
            vec![
                SailPlan { name: "genoa".into(), polar: constant_polar(4.0) },
                SailPlan { name: "spinnaker".into(), polar: constant_polar(9.0) },
            ],
            None,
        )
        .unwrap();
        let weather = uniform(15.0, 270.0);
        let set = ConstraintSet::new();

        let uncapped = router_to(start, Coordinate::new(0.0, 1.0));
        let result = run_step(&uncapped, &origin(start), &boat, &weather, &set);
        let positions = &result.isochrone.positions;
        assert!(positions.iter().all(|p| p.propulsion == Some(Propulsion::Sail(1))));

        let config = RoutingConfig { max_boat_speed_kts: Some(6.0), ..RoutingConfig::default() };
        let capped = IsochroneRouter::new(start, Coordinate::new(0.0, 1.0), config);
        let result = run_step(&capped, &origin(start), &boat, &weather, &set);
        assert_eq!(result.isochrone.len(), 72);
        assert_eq!(result.stats.over_threshold, 0);
        for p in &result.isochrone.positions {
            assert_eq!(p.propulsion, Some(Propulsion::Sail(0)));
            assert!((p.speed_kts - 4.0).abs() < 1e-6);
        }

        let config = RoutingConfig { max_boat_speed_kts: Some(3.0), ..RoutingConfig::default() };
        let too_slow = IsochroneRouter::new(start, Coordinate::new(0.0, 1.0), config);
        let result = run_step(&too_slow, &origin(start), &boat, &weather, &set);
        assert!(result.isochrone.is_empty());
        assert_eq!(result.stats.over_threshold, 72);
    }

    fn uncertain_climatology(uncertainty: f32, cyclone_risk: f32) -> Climatology {
        let grid = RegularGrid {
            lat0: -5.0,
            lon0: -5.0,
            lat_step: 5.0,
            lon_step: 5.0,
            rows: 3,
            cols: 3,
        };
        let month = ClimatologyMonth {
            wind_u: vec![7.5; grid.len()],
            wind_v: vec![0.0; grid.len()],
            uncertainty: vec![uncertainty; grid.len()],
            cyclone_risk: vec![cyclone_risk; grid.len()],
        };
        Climatology::new(grid, vec![month; 12]).unwrap()
    }

    #[test]
    fn test_risk_accumulates_along_the_path() {
        let start = Coordinate::new(0.0, 0.0);
        let router = router_to(start, Coordinate::new(0.0, 1.0));
        let boat = BoatModel::with_polar(constant_polar(6.0)).unwrap();
        let weather = WeatherSnapshot::new().with_climatology(uncertain_climatology(2.0, 0.25));
        let set = ConstraintSet::new();

        let first = run_step(&router, &origin(start), &boat, &weather, &set);
        assert!(first.degradation.weather_fallbacks > 0);
        assert!(first.isochrone.positions.iter().all(|p| (p.risk - 2.25).abs() < 1e-6));
        let second = run_step(&router, &first.isochrone, &boat, &weather, &set).isochrone;
        assert!(!second.is_empty());
        assert!(second.positions.iter().all(|p| (p.risk - 4.5).abs() < 1e-6));
    }

    #[test]
    fn test_equal_reach_prefers_lower_risk() {
        let calm = slot(0).unwrap();
        let mut risky = slot(0).unwrap();
        risky.position.risk = 0.5;
        assert!(calm.beats(&risky));
        assert!(!risky.beats(&calm));
        // Full ties keep the candidate already in the bin
        assert!(!calm.beats(&calm.clone()));

        let mut further = risky.clone();
        further.reach = 2.0;
        assert!(further.beats(&calm));
    }
}
