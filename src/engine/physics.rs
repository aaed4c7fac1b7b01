use serde::{Deserialize, Serialize};

use crate::engine::geodesy::normalize_bearing;
use crate::engine::models::{CurrentData, MS_TO_KNOTS, Propulsion, WindData};
use crate::error::ConfigurationError;
use crate::parsers::polars::PolarData;

pub struct PhysicsModel;

impl PhysicsModel {
    /// Calculates True Wind Angle (TWA) from True Wind Direction (TWD) and Boat Heading
    pub fn calculate_twa(twd: f64, heading: f64) -> f64 {
        let mut twa = twd - heading;
        while twa > 180.0 { twa -= 360.0; }
        while twa < -180.0 { twa += 360.0; }
        twa.abs() // Usually polars are symmetric
    }

    /// Adds the current to a boat velocity through the water.
    /// Returns (SOG in knots, COG in degrees).
    pub fn over_ground(heading: f64, stw_kts: f64, current: &CurrentData) -> (f64, f64) {
        let heading_rad = heading.to_radians();
        let boat_vx = stw_kts * heading_rad.sin(); // East component
        let boat_vy = stw_kts * heading_rad.cos(); // North component

        let sog_x = boat_vx + current.u as f64 * MS_TO_KNOTS;
        let sog_y = boat_vy + current.v as f64 * MS_TO_KNOTS;

        let sog = (sog_x.powi(2) + sog_y.powi(2)).sqrt();
        let cog = normalize_bearing(sog_x.atan2(sog_y).to_degrees());
        (sog, cog)
    }

    /// Computes the speed through the water from a polar, then SOG and COG.
    /// Returns (STW, SOG, COG), speeds in knots.
    pub fn compute_vector(
        heading: f64, // true heading (0=North, 90=East)
        wind: &WindData,
        current: &CurrentData,
        polar: &PolarData,
    ) -> (f64, f64, f64) {
        let tws_kts = wind.speed_kts();
        let twa = Self::calculate_twa(wind.direction() as f64, heading);
        let stw = polar.get_speed(tws_kts as f32, twa as f32) as f64;
        let (sog, cog) = Self::over_ground(heading, stw, current);
        (stw, sog, cog)
    }
}

/// Auxiliary engine, used only below a wind threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotorParameters {
    pub speed_kts: f64,
    /// The engine is only considered when the true wind is below this
    pub max_wind_kts: f64,
}

/// A named sail configuration with its own polar.
#[derive(Debug, Clone, PartialEq)]
pub struct SailPlan {
    pub name: String,
    pub polar: PolarData,
}

/// One feasible way of sailing a given heading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LegOption {
    pub heading: f64,
    pub stw_kts: f64,
    pub sog_kts: f64,
    pub cog: f64,
    pub propulsion: Propulsion,
}

/// Vessel performance: one or more sail plans plus an optional engine.
#[derive(Debug, Clone, PartialEq)]
pub struct BoatModel {
    sail_plans: Vec<SailPlan>,
    motor: Option<MotorParameters>,
}

impl BoatModel {
    /// Validates every polar before the model can be used.
    pub fn new(
        sail_plans: Vec<SailPlan>,
        motor: Option<MotorParameters>,
    ) -> Result<Self, ConfigurationError> {
        if sail_plans.is_empty() {
            return Err(ConfigurationError::NoSailPlan);
        }
        for plan in &sail_plans {
            plan.polar.validate().map_err(|source| ConfigurationError::InvalidPolar {
                name: plan.name.clone(),
                source,
            })?;
        }
        if let Some(motor) = motor {
            let limits = [
                ("motor.speed_kts", motor.speed_kts),
                ("motor.max_wind_kts", motor.max_wind_kts),
            ];
            for (name, value) in limits {
                if !(value.is_finite() && value > 0.0) {
                    return Err(ConfigurationError::InvalidThreshold { name, value });
                }
            }
        }
        Ok(Self { sail_plans, motor })
    }

    pub fn with_polar(polar: PolarData) -> Result<Self, ConfigurationError> {
        Self::new(vec![SailPlan { name: "default".into(), polar }], None)
    }

    pub fn sail_plans(&self) -> &[SailPlan] {
        &self.sail_plans
    }

    pub fn motor(&self) -> Option<&MotorParameters> {
        self.motor.as_ref()
    }

    /// Human-readable name of a propulsion choice.
    pub fn describe(&self, propulsion: Propulsion) -> &str {
        match propulsion {
            Propulsion::Sail(i) => self.sail_plans.get(i).map_or("sail", |p| p.name.as_str()),
            Propulsion::Motor => "motor",
        }
    }

    /// Every feasible (speed, course, configuration) for a heading.
    pub fn options(&self, heading: f64, wind: &WindData, current: &CurrentData) -> Vec<LegOption> {
        let mut options = Vec::with_capacity(self.sail_plans.len() + 1);
        for (i, plan) in self.sail_plans.iter().enumerate() {
            let (stw, sog, cog) = PhysicsModel::compute_vector(heading, wind, current, &plan.polar);
            if stw > 0.0 {
                options.push(LegOption {
                    heading,
                    stw_kts: stw,
                    sog_kts: sog,
                    cog,
                    propulsion: Propulsion::Sail(i),
                });
            }
        }
        if let Some(motor) = &self.motor {
            if wind.speed_kts() < motor.max_wind_kts {
                let (sog, cog) = PhysicsModel::over_ground(heading, motor.speed_kts, current);
                options.push(LegOption {
                    heading,
                    stw_kts: motor.speed_kts,
                    sog_kts: sog,
                    cog,
                    propulsion: Propulsion::Motor,
                });
            }
        }
        options
    }

    /// The fastest option through the water. Earlier sail plans win ties and
    /// sails win over the engine.
    pub fn best_option(
        &self,
        heading: f64,
        wind: &WindData,
        current: &CurrentData,
    ) -> Option<LegOption> {
        self.best_option_below(heading, wind, current, None)
    }

    /// Like [`best_option`](Self::best_option), ignoring options faster than `max_stw_kts`.
    pub fn best_option_below(
        &self,
        heading: f64,
        wind: &WindData,
        current: &CurrentData,
        max_stw_kts: Option<f64>,
    ) -> Option<LegOption> {
        self.options(heading, wind, current)
            .into_iter()
            .filter(|option| max_stw_kts.is_none_or(|max| option.stw_kts <= max))
            .fold(None, |best: Option<LegOption>, option| match best {
                Some(b) if b.stw_kts >= option.stw_kts => Some(b),
                _ => Some(option),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_polar() -> PolarData {
        // 0 at 0 TWS, 10 at 10 TWS, on every angle
        let speeds = vec![vec![0.0, 10.0], vec![0.0, 10.0]];
        PolarData::new(vec![0.0, 10.0], vec![0.0, 180.0], speeds).unwrap()
    }

    #[test]
    fn test_calculate_twa() {
        // TWD 0 (North), Heading 0 (North) -> TWA 0
        assert_eq!(PhysicsModel::calculate_twa(0.0, 0.0), 0.0);
        // TWD 0, Heading 90 (East) -> TWA 90
        assert_eq!(PhysicsModel::calculate_twa(0.0, 90.0), 90.0);
        // TWD 0, Heading 180 (South) -> TWA 180
        assert_eq!(PhysicsModel::calculate_twa(0.0, 180.0), 180.0);
        // TWD 0, Heading 270 (West) -> TWA 90 (symmetric)
        assert_eq!(PhysicsModel::calculate_twa(0.0, 270.0), 90.0);

        // TWD 180 (South), Heading 0 -> TWA 180
        assert_eq!(PhysicsModel::calculate_twa(180.0, 0.0), 180.0);
        // TWD 180, Heading 150 -> TWA 30
        assert_eq!(PhysicsModel::calculate_twa(180.0, 150.0), 30.0);
    }

    #[test]
    fn test_compute_vector_no_current() {
        let polar = linear_polar();
        let wind = WindData::from_knots(10.0, 0.0);
        let current = CurrentData::default();

        // Heading East (90)
        let (stw, sog, cog) = PhysicsModel::compute_vector(90.0, &wind, &current, &polar);
        assert!((stw - 10.0).abs() < 0.01);
        assert!((sog - 10.0).abs() < 0.01);
        assert!((cog - 90.0).abs() < 0.1);

        // Heading North (0)
        let (_, sog, cog) = PhysicsModel::compute_vector(0.0, &wind, &current, &polar);
        assert!((sog - 10.0).abs() < 0.01);
        assert!(cog.abs() < 0.1 || (cog - 360.0).abs() < 0.1);
    }

    #[test]
    fn test_compute_vector_with_current() {
        let polar = linear_polar();
        let wind = WindData::CALM;
        let current = CurrentData { u: 2.0, v: 0.0 }; // 2 m/s East current

        // No wind, so we just drift with current
        let (stw, sog, cog) = PhysicsModel::compute_vector(0.0, &wind, &current, &polar);
        assert_eq!(stw, 0.0);
        assert!((sog - 2.0 * MS_TO_KNOTS).abs() < 0.01);
        assert!((cog - 90.0).abs() < 0.1); // Course should be East
    }

    #[test]
    fn test_motor_only_below_wind_threshold() {
        let motor = MotorParameters { speed_kts: 5.0, max_wind_kts: 8.0 };
        let main = SailPlan { name: "main".into(), polar: linear_polar() };
        let boat = BoatModel::new(vec![main], Some(motor)).unwrap();
        let current = CurrentData::default();

        let light = WindData::from_knots(4.0, 0.0);
        let best = boat.best_option(90.0, &light, &current).unwrap();
        assert_eq!(best.propulsion, Propulsion::Motor);
        assert_eq!(boat.options(90.0, &light, &current).len(), 2);

        let fresh = WindData::from_knots(9.0, 0.0);
        let options = boat.options(90.0, &fresh, &current);
        assert_eq!(options.len(), 1);
        assert_eq!(options[0].propulsion, Propulsion::Sail(0));
        assert_eq!(boat.describe(Propulsion::Sail(0)), "main");
    }

    #[test]
    fn test_picks_fastest_sail_plan() {
        let angles = vec![0.0, 180.0];
        let slow = PolarData::new(vec![10.0], angles.clone(), vec![vec![3.0], vec![3.0]]).unwrap();
        let fast = PolarData::new(vec![10.0], angles, vec![vec![1.0], vec![6.0]]).unwrap();
        let boat = BoatModel::new(
            vec![
                SailPlan { name: "jib".into(), polar: slow },
                SailPlan { name: "spinnaker".into(), polar: fast },
            ],
            None,
        )
        .unwrap();
        let wind = WindData::from_knots(10.0, 0.0);
        let current = CurrentData::default();

        // Running downwind the spinnaker is faster
        let downwind = boat.best_option(180.0, &wind, &current).unwrap();
        assert_eq!(downwind.propulsion, Propulsion::Sail(1));
        // Close to the wind the jib is faster
        let upwind = boat.best_option(10.0, &wind, &current).unwrap();
        assert_eq!(upwind.propulsion, Propulsion::Sail(0));
        // A speed limit rules the spinnaker out
        let limited = boat.best_option_below(180.0, &wind, &current, Some(4.0)).unwrap();
        assert_eq!(limited.propulsion, Propulsion::Sail(0));
        assert!(boat.best_option_below(180.0, &wind, &current, Some(2.0)).is_none());
    }

    #[test]
    fn test_rejects_invalid_boat() {
        assert!(matches!(BoatModel::new(vec![], None), Err(ConfigurationError::NoSailPlan)));
        let broken = SailPlan { name: "broken".into(), polar: PolarData::default() };
        assert!(matches!(
            BoatModel::new(vec![broken], None),
            Err(ConfigurationError::InvalidPolar { .. })
        ));
    }
}
