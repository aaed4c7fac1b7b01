//! Shared fixtures for the routing integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use weather_routing::config::RoutingConfig;
use weather_routing::engine::constraints::ConstraintSet;
use weather_routing::engine::models::{Coordinate, WindData};
use weather_routing::engine::physics::BoatModel;
use weather_routing::engine::routemap::{RouteMap, RouteRequest};
use weather_routing::engine::weather::{ConstantWeather, WeatherSnapshot};
use weather_routing::parsers::polars::PolarData;

/// Fastest boat speed of [`symmetric_polar`] in 15 kt of wind.
pub const PEAK_SPEED_KTS: f64 = 8.0;

/// Symmetric polar scaling linearly with wind: 8 kt from beam to dead run in 15 kt.
pub fn symmetric_polar() -> PolarData {
    let tws = vec![0.0, 30.0];
    let twa = vec![0.0, 30.0, 45.0, 60.0, 90.0, 120.0, 150.0, 180.0];
    let at_30 = [0.0, 4.0, 10.0, 13.0, 16.0, 16.0, 16.0, 16.0];
    let speeds = at_30.iter().map(|s| vec![0.0, *s]).collect();
    PolarData::new(tws, twa, speeds).expect("fixture polar is valid")
}

/// Same speed on every angle and in any wind.
pub fn constant_polar(speed_kts: f32) -> PolarData {
    PolarData::new(vec![0.0, 30.0], vec![0.0, 180.0], vec![vec![speed_kts; 2], vec![speed_kts; 2]])
        .expect("fixture polar is valid")
}

pub fn boat() -> Arc<BoatModel> {
    Arc::new(BoatModel::with_polar(symmetric_polar()).expect("fixture boat is valid"))
}

pub fn departure() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
}

/// Uniform wind blowing from `direction` everywhere.
pub fn wind(speed_kts: f64, direction: f64) -> Arc<WeatherSnapshot> {
    Arc::new(WeatherSnapshot::with_forecast(ConstantWeather::new(WindData::from_knots(
        speed_kts, direction,
    ))))
}

pub fn westerly() -> Arc<WeatherSnapshot> {
    wind(15.0, 270.0)
}

pub fn request(destination: Coordinate) -> RouteRequest {
    RouteRequest {
        start: Coordinate::new(0.0, 0.0),
        destination,
        departure: departure(),
    }
}

/// Start (0,0), destination (0,1): about 60 nm due east.
pub fn equator_map(weather: Arc<WeatherSnapshot>, constraints: ConstraintSet) -> RouteMap {
    map_to(Coordinate::new(0.0, 1.0), weather, constraints)
}

pub fn map_to(
    destination: Coordinate,
    weather: Arc<WeatherSnapshot>,
    constraints: ConstraintSet,
) -> RouteMap {
    custom_map(destination, RoutingConfig::default(), boat(), weather, constraints)
}

pub fn custom_map(
    destination: Coordinate,
    config: RoutingConfig,
    boat: Arc<BoatModel>,
    weather: Arc<WeatherSnapshot>,
    constraints: ConstraintSet,
) -> RouteMap {
    RouteMap::new(request(destination), config, boat, weather, Arc::new(constraints))
        .expect("fixture request is valid")
}
