//! Exclusion zones, external boundary providers and the per-step evaluator.
//!
//! A [`ConstraintSet`] is the immutable snapshot of everything the route must
//! avoid. Each propagation step builds a [`ConstraintEvaluator`] from it, which
//! performs the spherical segment tests, caches provider answers for the step
//! and records any category it had to disable.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use geo::{BoundingRect, LineString, Polygon, Rect};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::config::RoutingConfig;
use crate::engine::geodesy::{arcs_intersect, distance, interpolate, point_in_ring};
use crate::engine::mask::LandMask;
use crate::engine::models::Coordinate;
use crate::engine::weather::WeatherSnapshot;
use crate::error::ConstraintProviderError;

/// Provider answers are cached on a grid of this many cells per degree.
const CACHE_CELLS_PER_DEG: f64 = 1e5;

/// Spacing of the points a provider is asked about along a leg (metres).
pub const LEG_SAMPLE_SPACING_M: f64 = 500.0;

const MAX_LEG_SAMPLES: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstraintCategory {
    Land,
    Regulatory,
    CycloneRisk,
    ExternalBoundary,
}

/// A polygon the route must not enter or cross.
///
/// Polygon coordinates are `x = longitude`, `y = latitude`; edges are great-circle arcs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExclusionZone {
    pub name: String,
    pub category: ConstraintCategory,
    #[serde(default = "default_active")]
    pub active: bool,
    pub polygon: Polygon<f64>,
}

fn default_active() -> bool {
    true
}

impl ExclusionZone {
    pub fn new(
        name: impl Into<String>,
        category: ConstraintCategory,
        polygon: Polygon<f64>,
    ) -> Self {
        Self { name: name.into(), category, active: true, polygon }
    }

    /// Builds a zone without holes from its outline.
    pub fn from_vertices(
        name: impl Into<String>,
        category: ConstraintCategory,
        vertices: &[Coordinate],
    ) -> Self {
        let exterior: LineString<f64> = vertices.iter().map(|c| (c.lon, c.lat)).collect();
        Self::new(name, category, Polygon::new(exterior, vec![]))
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// Version declared by an external boundary provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProviderVersion {
    pub major: u32,
    pub minor: u32,
}

impl ProviderVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for ProviderVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Inclusive range of provider versions the evaluator can talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRange {
    pub min: ProviderVersion,
    pub max: ProviderVersion,
}

impl Default for VersionRange {
    fn default() -> Self {
        Self { min: ProviderVersion::new(1, 1), max: ProviderVersion::new(1, 99) }
    }
}

impl VersionRange {
    pub fn contains(&self, version: ProviderVersion) -> bool {
        (self.min..=self.max).contains(&version)
    }
}

/// Which boundaries an external provider should consider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneFilter {
    pub active_only: bool,
    pub exclusion_only: bool,
}

impl Default for ZoneFilter {
    fn default() -> Self {
        Self { active_only: true, exclusion_only: true }
    }
}

/// Dynamic boundaries managed by a collaborating service.
pub trait ConstraintProvider: Send + Sync {
    fn version(&self) -> ProviderVersion;

    fn point_in_exclusion(
        &self,
        coord: &Coordinate,
        filter: &ZoneFilter,
    ) -> Result<bool, ConstraintProviderError>;

    /// Whether the great-circle leg enters an exclusion.
    ///
    /// Providers that can intersect lines natively should override this. The
    /// default asks [`point_in_exclusion`](Self::point_in_exclusion) every
    /// [`LEG_SAMPLE_SPACING_M`] metres along the leg, end point included.
    fn leg_crosses_exclusion(
        &self,
        from: &Coordinate,
        to: &Coordinate,
        filter: &ZoneFilter,
    ) -> Result<bool, ConstraintProviderError> {
        let samples = (distance(from, to) / LEG_SAMPLE_SPACING_M).ceil() as usize;
        let samples = samples.clamp(1, MAX_LEG_SAMPLES);
        for i in 1..=samples {
            let point = interpolate(from, to, i as f64 / samples as f64);
            if self.point_in_exclusion(&point, filter)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// A constraint category switched off for (part of) a step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisabledConstraint {
    pub category: ConstraintCategory,
    pub reason: ConstraintProviderError,
}

#[derive(Clone, Default)]
enum BoundarySource {
    #[default]
    NotRequested,
    Missing,
    Provider(Arc<dyn ConstraintProvider>),
}

/// Zone with precomputed closed rings and a padded bounding box.
#[derive(Debug, Clone)]
struct PreparedZone {
    name: String,
    exterior: Vec<Coordinate>,
    holes: Vec<Vec<Coordinate>>,
    bounds: Option<Rect<f64>>,
}

impl PreparedZone {
    fn new(zone: &ExclusionZone) -> Self {
        let exterior = closed_ring(zone.polygon.exterior());
        let holes = zone.polygon.interiors().iter().map(closed_ring).collect();
        let bounds = zone.polygon.bounding_rect().and_then(|rect| {
            let (min, max) = (rect.min(), rect.max());
            // Rings spanning the antimeridian get no prefilter.
            if max.x - min.x > 180.0 {
                return None;
            }
            // Great-circle edges bulge poleward of their vertices.
            let pad = 0.05 + 0.02 * (max.x - min.x).max(max.y - min.y);
            Some(Rect::new((min.x - pad, min.y - pad), (max.x + pad, max.y + pad)))
        });
        Self { name: zone.name.clone(), exterior, holes, bounds }
    }

    fn rings(&self) -> impl Iterator<Item = &[Coordinate]> {
        std::iter::once(self.exterior.as_slice()).chain(self.holes.iter().map(Vec::as_slice))
    }

    fn may_touch(&self, from: &Coordinate, to: &Coordinate) -> bool {
        let Some(bounds) = self.bounds else {
            return true;
        };
        if (from.lon - to.lon).abs() > 180.0 {
            return true;
        }
        let (min, max) = (bounds.min(), bounds.max());
        from.lon.max(to.lon) >= min.x
            && from.lon.min(to.lon) <= max.x
            && from.lat.max(to.lat) >= min.y
            && from.lat.min(to.lat) <= max.y
    }

    fn contains(&self, p: &Coordinate) -> bool {
        point_in_ring(p, edges(&self.exterior))
            && !self.holes.iter().any(|hole| point_in_ring(p, edges(hole)))
    }

    fn blocks(&self, from: &Coordinate, to: &Coordinate) -> bool {
        if !self.may_touch(from, to) {
            return false;
        }
        let crosses = self
            .rings()
            .any(|ring| edges(ring).any(|(a, b)| arcs_intersect(from, to, &a, &b)));
        crosses || self.contains(to)
    }
}

fn closed_ring(ring: &LineString<f64>) -> Vec<Coordinate> {
    let mut points: Vec<Coordinate> = ring.coords().map(|c| Coordinate::new(c.y, c.x)).collect();
    if let (Some(first), Some(last)) = (points.first().copied(), points.last().copied()) {
        if first != last {
            points.push(first);
        }
    }
    points
}

fn edges(ring: &[Coordinate]) -> impl Iterator<Item = (Coordinate, Coordinate)> + '_ {
    ring.windows(2).map(|w| (w[0], w[1]))
}

/// Immutable snapshot of all constraints. Replaced wholesale between steps.
#[derive(Clone, Default)]
pub struct ConstraintSet {
    zones: Vec<PreparedZone>,
    land: Option<Arc<LandMask>>,
    boundaries: BoundarySource,
}

impl fmt::Debug for ConstraintSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let boundaries = match &self.boundaries {
            BoundarySource::NotRequested => "none".to_string(),
            BoundarySource::Missing => "missing".to_string(),
            BoundarySource::Provider(p) => format!("v{}", p.version()),
        };
        f.debug_struct("ConstraintSet")
            .field("zones", &self.zones.iter().map(|z| z.name.as_str()).collect::<Vec<_>>())
            .field("land", &self.land.is_some())
            .field("boundaries", &boundaries)
            .finish()
    }
}

impl ConstraintSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a zone. Inactive zones are ignored.
    pub fn with_zone(mut self, zone: ExclusionZone) -> Self {
        if zone.active {
            self.zones.push(PreparedZone::new(&zone));
        }
        self
    }

    pub fn with_zones(self, zones: impl IntoIterator<Item = ExclusionZone>) -> Self {
        zones.into_iter().fold(self, Self::with_zone)
    }

    pub fn with_land_mask(mut self, mask: Arc<LandMask>) -> Self {
        self.land = Some(mask);
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn ConstraintProvider>) -> Self {
        self.boundaries = BoundarySource::Provider(provider);
        self
    }

    /// Declares that external boundaries are wanted even though no provider is attached yet.
    pub fn expect_provider(mut self) -> Self {
        if matches!(self.boundaries, BoundarySource::NotRequested) {
            self.boundaries = BoundarySource::Missing;
        }
        self
    }

    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }

    /// True when the great-circle leg crosses or ends inside any static zone.
    pub fn leg_crosses_zone(&self, from: &Coordinate, to: &Coordinate) -> bool {
        self.zones.iter().any(|zone| zone.blocks(from, to))
    }
}

type LegKey = ((i64, i64), (i64, i64));

/// Per-step view of a [`ConstraintSet`].
///
/// Static checks take `&self` so they can run on the rayon pool. Provider
/// lookups mutate the step cache and run sequentially.
pub struct ConstraintEvaluator<'a> {
    set: &'a ConstraintSet,
    provider: Option<&'a dyn ConstraintProvider>,
    cyclones: Option<(&'a WeatherSnapshot, f64)>,
    filter: ZoneFilter,
    cache: HashMap<LegKey, bool>,
    disabled: Vec<DisabledConstraint>,
    lookups: usize,
    cache_hits: usize,
}

impl<'a> ConstraintEvaluator<'a> {
    /// Performs the provider version handshake and decides which categories are live.
    pub fn new(
        set: &'a ConstraintSet,
        config: &RoutingConfig,
        weather: &'a WeatherSnapshot,
    ) -> Self {
        let mut disabled = Vec::new();
        let provider = match &set.boundaries {
            BoundarySource::NotRequested => None,
            BoundarySource::Missing => {
                disabled.push(DisabledConstraint {
                    category: ConstraintCategory::ExternalBoundary,
                    reason: ConstraintProviderError::Missing,
                });
                None
            }
            BoundarySource::Provider(provider) => {
                let version = provider.version();
                let range = config.provider_versions;
                if range.contains(version) {
                    Some(provider.as_ref())
                } else {
                    disabled.push(DisabledConstraint {
                        category: ConstraintCategory::ExternalBoundary,
                        reason: ConstraintProviderError::IncompatibleVersion {
                            found: version,
                            min: range.min,
                            max: range.max,
                        },
                    });
                    None
                }
            }
        };

        let cyclones = if !config.avoid_cyclones {
            None
        } else if weather.climatology().is_some() {
            Some((weather, config.cyclone_risk_threshold))
        } else {
            disabled.push(DisabledConstraint {
                category: ConstraintCategory::CycloneRisk,
                reason: ConstraintProviderError::Missing,
            });
            None
        };

        for d in &disabled {
            warn!("Constraint category {:?} disabled: {}", d.category, d.reason);
        }

        Self {
            set,
            provider,
            cyclones,
            filter: ZoneFilter::default(),
            cache: HashMap::new(),
            disabled,
            lookups: 0,
            cache_hits: 0,
        }
    }

    /// Static zones and the land mask along the whole leg, cyclone risk at its end.
    pub fn leg_is_clear(&self, from: &Coordinate, to: &Coordinate, arrival: DateTime<Utc>) -> bool {
        if self.set.leg_crosses_zone(from, to) {
            return false;
        }
        if let Some(land) = &self.set.land {
            if land.leg_touches_land(from, to) {
                return false;
            }
        }
        if let Some((weather, threshold)) = self.cyclones {
            if weather.cyclone_risk(to, arrival) as f64 > threshold {
                return false;
            }
        }
        true
    }

    /// Asks the external provider about a whole leg. A failing provider is
    /// disabled for the rest of the step, the failure is recorded and the leg
    /// is admitted.
    pub fn admit_leg(&mut self, from: &Coordinate, to: &Coordinate) -> bool {
        let Some(provider) = self.provider else {
            return true;
        };
        let cell = |c: &Coordinate| {
            (
                (c.lat * CACHE_CELLS_PER_DEG).round() as i64,
                (c.lon * CACHE_CELLS_PER_DEG).round() as i64,
            )
        };
        let key = (cell(from), cell(to));
        self.lookups += 1;
        if let Some(&crosses) = self.cache.get(&key) {
            self.cache_hits += 1;
            return !crosses;
        }
        match provider.leg_crosses_exclusion(from, to, &self.filter) {
            Ok(crosses) => {
                self.cache.insert(key, crosses);
                !crosses
            }
            Err(reason) => {
                warn!("Boundary provider failed, disabling external boundaries: {}", reason);
                self.provider = None;
                self.disabled.push(DisabledConstraint {
                    category: ConstraintCategory::ExternalBoundary,
                    reason,
                });
                true
            }
        }
    }

    pub fn disabled(&self) -> &[DisabledConstraint] {
        &self.disabled
    }

    /// Consumes the evaluator, returning the categories disabled during the step.
    pub fn finish(self) -> Vec<DisabledConstraint> {
        debug!(
            "Constraint evaluator: {} provider lookups, {} cache hits",
            self.lookups, self.cache_hits
        );
        self.disabled
    }
}
