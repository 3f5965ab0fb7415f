// av_core/src/errors.rs

use crate::types::SensorId;
use thiserror::Error;

/// The error taxonomy of the autonomy core.
///
/// Recovery placement: `SensorStale` is absorbed by ingest (the source is
/// excluded from fusion), `EstimateInvalid` by the control loop (reuse-last)
/// with escalation to the supervisor, `TargetInfeasible` by the planner
/// (clip to feasible) with escalation when persistent. `ActuatorSaturation`
/// is logged, never corrected. `LinkTimeout` and
/// `UnrecoverableEstimatorFailure` force a supervisor transition.
/// `ConfigInvalid` is fatal before the loop starts.
#[derive(Debug, Error)]
pub enum AvError {
    #[error("sensor {} stale for {age:.2}s", sensor.label())]
    SensorStale { sensor: SensorId, age: f64 },

    #[error("state estimate invalid at t={0:.2}s")]
    EstimateInvalid(f64),

    #[error("target infeasible: requested {requested:.1}m, clipped to {granted:.1}m")]
    TargetInfeasible { requested: f64, granted: f64 },

    #[error("actuator saturation on {axis}")]
    ActuatorSaturation { axis: &'static str },

    #[error("mission link silent for {0:.2}s")]
    LinkTimeout(f64),

    #[error("invalid configuration: {0}")]
    ConfigInvalid(#[from] ConfigError),

    #[error("unrecoverable estimator failure: degraded for {0:.2}s")]
    UnrecoverableEstimatorFailure(f64),
}

/// Out-of-range startup parameters. Any of these must refuse to arm.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be positive, got {value}")]
    NonPositive { field: &'static str, value: f64 },

    #[error("{field} must be within ({min}, {max}), got {value}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{lower} ({lower_value}) must not exceed {upper} ({upper_value})")]
    InvertedBounds {
        lower: &'static str,
        lower_value: f64,
        upper: &'static str,
        upper_value: f64,
    },
}
