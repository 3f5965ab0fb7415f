// av_core/src/config.rs

//! The full configuration surface of the autonomy core: staleness windows,
//! filter noise, trajectory limits, control gains, and safety thresholds.
//!
//! Every struct derives serde so the runtime can merge a TOML file over the
//! defaults. `Config::validate` runs before arming; any out-of-range value
//! is fatal and the system refuses to start the loop.

use crate::errors::ConfigError;
use crate::types::SensorId;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub sensors: SensorConfig,
    pub filter: FilterConfig,
    pub limits: TrajectoryLimits,
    pub gains: ControlGains,
    pub actuators: ActuatorLimits,
    pub safety: SafetyConfig,
    pub rates: TaskRates,
    /// Home position in the local world frame, meters. RETURN navigates here.
    pub home: [f64; 3],
    /// Mission waypoints, flown in order under NOMINAL operation.
    pub waypoints: Vec<[f64; 3]>,
}

/// Per-source nominal periods and the staleness rule. A source is STALE when
/// no sample arrived within `staleness_factor` times its nominal period.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub imu_period: f64,
    pub gps_period: f64,
    pub baro_period: f64,
    pub vision_period: f64,
    pub staleness_factor: f64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            imu_period: 0.02,
            gps_period: 0.2,
            baro_period: 0.05,
            vision_period: 0.1,
            staleness_factor: 3.0,
        }
    }
}

impl SensorConfig {
    pub fn nominal_period(&self, source: SensorId) -> f64 {
        match source {
            SensorId::Imu => self.imu_period,
            SensorId::Gps => self.gps_period,
            SensorId::Baro => self.baro_period,
            SensorId::VisionPose => self.vision_period,
        }
    }

    pub fn staleness_window(&self, source: SensorId) -> f64 {
        self.nominal_period(source) * self.staleness_factor
    }
}

/// Process and measurement noise of the error-state filter, plus the
/// uncertainty ceiling past which the estimate is declared invalid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Accelerometer noise density, m/s^2 (drives velocity process noise).
    pub accel_noise: f64,
    /// Gyro noise density, rad/s (drives attitude process noise).
    pub gyro_noise: f64,
    /// Residual position process noise, m.
    pub position_noise: f64,
    /// GPS position measurement std dev, m (used when the sample carries no
    /// covariance of its own).
    pub gps_position_noise: f64,
    /// Barometer altitude measurement std dev, m.
    pub baro_altitude_noise: f64,
    /// Vision pose position measurement std dev, m.
    pub vision_position_noise: f64,
    /// Vision pose orientation measurement std dev, rad.
    pub vision_orientation_noise: f64,
    /// Initial covariance of every error-state axis.
    pub initial_covariance: f64,
    /// Validity ceiling on the position covariance trace, m^2.
    pub position_variance_ceiling: f64,
    pub gravity: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            accel_noise: 0.35,
            gyro_noise: 0.02,
            position_noise: 0.05,
            gps_position_noise: 1.5,
            baro_altitude_noise: 0.8,
            vision_position_noise: 0.3,
            vision_orientation_noise: 0.05,
            initial_covariance: 1.0,
            position_variance_ceiling: 25.0,
            gravity: 9.81,
        }
    }
}

/// Dynamic limits the planner must respect, plus horizon bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrajectoryLimits {
    pub max_velocity: f64,
    pub max_acceleration: f64,
    pub max_jerk: f64,
    pub min_horizon: f64,
    pub max_horizon: f64,
    /// Sample spacing along the generated trajectory, seconds.
    pub sample_step: f64,
    /// A waypoint closer than this is considered reached.
    pub acceptance_radius: f64,
}

impl Default for TrajectoryLimits {
    fn default() -> Self {
        Self {
            max_velocity: 8.0,
            max_acceleration: 4.0,
            max_jerk: 10.0,
            min_horizon: 1.0,
            max_horizon: 5.0,
            sample_step: 0.1,
            acceptance_radius: 3.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Clamp on the absolute value of the integrator, per axis.
    pub integrator_limit: f64,
}

impl Default for PidGains {
    fn default() -> Self {
        Self {
            kp: 2.0,
            ki: 0.1,
            kd: 0.0,
            integrator_limit: 2.0,
        }
    }
}

/// Gains per cascade level: position -> velocity -> attitude -> rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlGains {
    /// Outer position loop P gain (velocity setpoint per meter of error).
    pub position_p: f64,
    /// Velocity loop PID, producing an acceleration command.
    pub velocity: PidGains,
    /// Attitude loop P gain (body rate per radian of attitude error).
    pub attitude_p: f64,
    /// Maximum commanded tilt away from vertical, rad.
    pub max_tilt: f64,
    /// Normalized thrust that balances gravity in hover.
    pub hover_thrust: f64,
    /// Reusing a reference or estimate older than this raises the staleness
    /// flag on the control output.
    pub reference_timeout: f64,
}

impl Default for ControlGains {
    fn default() -> Self {
        Self {
            position_p: 1.0,
            velocity: PidGains::default(),
            attitude_p: 6.0,
            max_tilt: 0.5,
            hover_thrust: 0.5,
            reference_timeout: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorLimits {
    pub min_thrust: f64,
    pub max_thrust: f64,
    /// Body rate clamp per axis, rad/s.
    pub max_rate: f64,
}

impl Default for ActuatorLimits {
    fn default() -> Self {
        Self {
            min_thrust: 0.0,
            max_thrust: 1.0,
            max_rate: 3.0,
        }
    }
}

/// Thresholds the safety supervisor evaluates every tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Battery state-of-charge reserve, 0..1. At or below this, RETURN.
    pub battery_reserve: f64,
    /// Horizontal geofence radius around the origin, meters.
    pub geofence_radius: f64,
    /// Altitude ceiling, meters.
    pub max_altitude: f64,
    /// Mission link heartbeat timeout, seconds.
    pub link_timeout: f64,
    /// Minimum time a recovered condition must hold before DEGRADED clears.
    pub debounce: f64,
    /// Consecutive infeasible plans before HOLD.
    pub infeasible_limit: u32,
    /// DEGRADED persisting past this long is an unrecoverable estimator
    /// failure and forces DISARMED.
    pub max_degraded: f64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            battery_reserve: 0.20,
            geofence_radius: 500.0,
            max_altitude: 120.0,
            link_timeout: 5.0,
            debounce: 2.0,
            infeasible_limit: 5,
            max_degraded: 30.0,
        }
    }
}

/// Periodic task rates, Hz. The hierarchy is ingest fastest, inner control
/// next, outer control and planning slower, supervision at estimator rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskRates {
    pub ingest_hz: f64,
    pub estimator_hz: f64,
    pub inner_hz: f64,
    pub outer_hz: f64,
    pub planner_hz: f64,
}

impl Default for TaskRates {
    fn default() -> Self {
        Self {
            ingest_hz: 200.0,
            estimator_hz: 100.0,
            inner_hz: 100.0,
            outer_hz: 25.0,
            planner_hz: 10.0,
        }
    }
}

impl TaskRates {
    pub fn estimator_period(&self) -> f64 {
        1.0 / self.estimator_hz
    }
}

impl Config {
    pub fn home_position(&self) -> Vector3<f64> {
        Vector3::new(self.home[0], self.home[1], self.home[2])
    }

    /// Rejects unsafe parameters before arming. The process must refuse to
    /// run the loop when this fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positives: [(&'static str, f64); 22] = [
            ("sensors.imu_period", self.sensors.imu_period),
            ("sensors.gps_period", self.sensors.gps_period),
            ("sensors.baro_period", self.sensors.baro_period),
            ("sensors.vision_period", self.sensors.vision_period),
            ("filter.accel_noise", self.filter.accel_noise),
            ("filter.gyro_noise", self.filter.gyro_noise),
            ("filter.initial_covariance", self.filter.initial_covariance),
            (
                "filter.position_variance_ceiling",
                self.filter.position_variance_ceiling,
            ),
            ("filter.gravity", self.filter.gravity),
            ("limits.max_velocity", self.limits.max_velocity),
            ("limits.max_acceleration", self.limits.max_acceleration),
            ("limits.max_jerk", self.limits.max_jerk),
            ("limits.min_horizon", self.limits.min_horizon),
            ("limits.sample_step", self.limits.sample_step),
            ("limits.acceptance_radius", self.limits.acceptance_radius),
            ("safety.geofence_radius", self.safety.geofence_radius),
            ("safety.max_altitude", self.safety.max_altitude),
            ("safety.link_timeout", self.safety.link_timeout),
            ("safety.debounce", self.safety.debounce),
            ("safety.max_degraded", self.safety.max_degraded),
            ("actuators.max_rate", self.actuators.max_rate),
            ("gains.reference_timeout", self.gains.reference_timeout),
        ];
        for (field, value) in positives {
            if !(value > 0.0) || !value.is_finite() {
                return Err(ConfigError::NonPositive { field, value });
            }
        }

        for (field, value) in [
            ("rates.ingest_hz", self.rates.ingest_hz),
            ("rates.estimator_hz", self.rates.estimator_hz),
            ("rates.inner_hz", self.rates.inner_hz),
            ("rates.outer_hz", self.rates.outer_hz),
            ("rates.planner_hz", self.rates.planner_hz),
        ] {
            if !(value > 0.0) || !value.is_finite() {
                return Err(ConfigError::NonPositive { field, value });
            }
        }

        if !(self.safety.battery_reserve > 0.0 && self.safety.battery_reserve < 1.0) {
            return Err(ConfigError::OutOfRange {
                field: "safety.battery_reserve",
                value: self.safety.battery_reserve,
                min: 0.0,
                max: 1.0,
            });
        }
        if !(self.gains.max_tilt > 0.0 && self.gains.max_tilt < std::f64::consts::FRAC_PI_2) {
            return Err(ConfigError::OutOfRange {
                field: "gains.max_tilt",
                value: self.gains.max_tilt,
                min: 0.0,
                max: std::f64::consts::FRAC_PI_2,
            });
        }
        if !(self.gains.hover_thrust > 0.0 && self.gains.hover_thrust < 1.0) {
            return Err(ConfigError::OutOfRange {
                field: "gains.hover_thrust",
                value: self.gains.hover_thrust,
                min: 0.0,
                max: 1.0,
            });
        }
        if self.sensors.staleness_factor < 1.0 {
            return Err(ConfigError::OutOfRange {
                field: "sensors.staleness_factor",
                value: self.sensors.staleness_factor,
                min: 1.0,
                max: f64::INFINITY,
            });
        }
        if self.limits.min_horizon > self.limits.max_horizon {
            return Err(ConfigError::InvertedBounds {
                lower: "limits.min_horizon",
                lower_value: self.limits.min_horizon,
                upper: "limits.max_horizon",
                upper_value: self.limits.max_horizon,
            });
        }
        if self.actuators.min_thrust >= self.actuators.max_thrust {
            return Err(ConfigError::InvertedBounds {
                lower: "actuators.min_thrust",
                lower_value: self.actuators.min_thrust,
                upper: "actuators.max_thrust",
                upper_value: self.actuators.max_thrust,
            });
        }
        Ok(())
    }
}
