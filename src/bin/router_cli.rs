use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use clap::{Parser, ValueHint};
use log::info;

use weather_routing::config::RoutingConfig;
use weather_routing::engine::constraints::ConstraintSet;
use weather_routing::engine::controller::RouteWorker;
use weather_routing::engine::mask::LandMask;
use weather_routing::engine::models::{Coordinate, WindData};
use weather_routing::engine::physics::{BoatModel, MotorParameters, SailPlan};
use weather_routing::engine::routemap::{RouteMap, RouteRequest};
use weather_routing::engine::weather::{ConstantWeather, WeatherSnapshot};
use weather_routing::error::ConfigurationError;
use weather_routing::parsers::polars::PolarData;
use weather_routing::parsers::zones::load_zones;

#[derive(Parser, Debug)]
#[command(author, version, about = "Isochrone weather routing", long_about = None)]
struct Cli {
    /// Polar CSV (`twa/tws` header row)
    #[arg(long, value_hint = ValueHint::FilePath)]
    polar: PathBuf,

    /// Routing configuration JSON; defaults are used for missing fields
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Exclusion zones JSON
    #[arg(long, value_hint = ValueHint::FilePath)]
    zones: Option<PathBuf>,

    /// xz-compressed land mask
    #[arg(long, value_hint = ValueHint::FilePath)]
    land_mask: Option<PathBuf>,

    /// GRIB forecast; replaces the uniform wind
    #[cfg(feature = "grib")]
    #[arg(long, value_hint = ValueHint::FilePath)]
    grib: Option<PathBuf>,

    #[arg(long, allow_negative_numbers = true)]
    start_lat: f64,
    #[arg(long, allow_negative_numbers = true)]
    start_lon: f64,
    #[arg(long, allow_negative_numbers = true)]
    dest_lat: f64,
    #[arg(long, allow_negative_numbers = true)]
    dest_lon: f64,

    /// Departure time (RFC 3339); now if omitted
    #[arg(long)]
    departure: Option<DateTime<Utc>>,

    /// Uniform wind speed in knots
    #[arg(long, default_value_t = 15.0)]
    wind_kts: f64,

    /// Direction the uniform wind blows from
    #[arg(long, default_value_t = 270.0)]
    wind_dir: f64,

    /// Motoring speed in knots; no engine if omitted
    #[arg(long)]
    motor_kts: Option<f64>,

    /// Strongest wind the engine is used in
    #[arg(long, default_value_t = 25.0)]
    motor_max_wind_kts: f64,

    /// Also print every isochrone in the JSON output
    #[arg(long)]
    isochrones: bool,
}

fn uniform_wind(cli: &Cli) -> WeatherSnapshot {
    let wind = WindData::from_knots(cli.wind_kts, cli.wind_dir);
    WeatherSnapshot::with_forecast(ConstantWeather::new(wind))
}

#[cfg(feature = "grib")]
fn weather(cli: &Cli) -> Result<WeatherSnapshot, ConfigurationError> {
    match &cli.grib {
        Some(path) => {
            let forecast = weather_routing::parsers::grib::GribLoader::new().load_forecast(path)?;
            Ok(WeatherSnapshot::with_forecast(forecast))
        }
        None => Ok(uniform_wind(cli)),
    }
}

#[cfg(not(feature = "grib"))]
fn weather(cli: &Cli) -> Result<WeatherSnapshot, ConfigurationError> {
    Ok(uniform_wind(cli))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => RoutingConfig::from_json_file(path)?,
        None => RoutingConfig::default(),
    };

    let polar = PolarData::load_from_csv(&cli.polar)?;
    let name = cli
        .polar
        .file_stem()
        .map_or_else(|| "main".to_string(), |s| s.to_string_lossy().into_owned());
    let motor = cli.motor_kts.map(|speed_kts| MotorParameters {
        speed_kts,
        max_wind_kts: cli.motor_max_wind_kts,
    });
    let boat = BoatModel::new(vec![SailPlan { name, polar }], motor)?;

    let mut constraints = ConstraintSet::new();
    if let Some(path) = &cli.zones {
        constraints = constraints.with_zones(load_zones(path)?);
    }
    if let Some(path) = &cli.land_mask {
        constraints = constraints.with_land_mask(Arc::new(LandMask::load(path)?));
    }

    let request = RouteRequest {
        start: Coordinate::new(cli.start_lat, cli.start_lon),
        destination: Coordinate::new(cli.dest_lat, cli.dest_lon),
        departure: cli.departure.unwrap_or_else(Utc::now),
    };
    let map = RouteMap::new(
        request,
        config,
        Arc::new(boat),
        Arc::new(weather(&cli)?),
        Arc::new(constraints),
    )?;

    let started = Instant::now();
    let handle = RouteWorker::new(map).spawn_with(|report| {
        info!(
            "Step {}: {} positions at {:.1} h{}",
            report.step,
            report.positions,
            report.elapsed_time / 3600.0,
            if report.closed { " (closed)" } else { "" }
        );
    })?;
    let outcome = handle.join()?;
    info!("Routing finished in {:?}: {:?}", started.elapsed(), outcome.status);

    let json = if cli.isochrones {
        serde_json::to_string_pretty(&outcome)?
    } else {
        serde_json::to_string_pretty(&serde_json::json!({
            "status": outcome.status,
            "route": outcome.route,
            "degradation": outcome.degradation,
        }))?
    };
    println!("{json}");

    outcome.into_route()?;
    Ok(())
}
