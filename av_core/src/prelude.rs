// av_core/src/prelude.rs

pub use crate::config::Config;
pub use crate::control::{AttitudeSetpoint, InnerLoop, OuterLoop};
pub use crate::errors::{AvError, ConfigError};
pub use crate::estimation::{eskf::ErrorStateKf, Estimator};
pub use crate::ingest::{StaleSource, SyncSet, Synchronizer};
pub use crate::planning::{Mission, PlanOutcome, Planner};
pub use crate::safety::{
    OverrideCommand, SafetyInputs, Supervisor, TargetSelection, Transition, Watchdog,
};
pub use crate::telemetry::{StateSummary, TelemetryEvent};
pub use crate::types::{
    ControlCommand, SafetyState, SamplePayload, SensorId, SensorSample, StateEstimate, Trajectory,
    TrajectoryPoint,
};
