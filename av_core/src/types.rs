// av_core/src/types.rs

use nalgebra::{Matrix3, SMatrix, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Covariance of the 9-dimensional error state
/// (position, velocity, attitude error), in that block order.
pub type Covariance9 = SMatrix<f64, 9, 9>;

// --- Core Identifiers ---

/// The fixed set of supported sensor modalities. The measurement model per
/// modality is fixed at configuration time, so this is a closed enum rather
/// than open-ended dynamic dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorId {
    Imu,
    Gps,
    Baro,
    VisionPose,
}

impl SensorId {
    pub const ALL: [SensorId; 4] = [
        SensorId::Imu,
        SensorId::Gps,
        SensorId::Baro,
        SensorId::VisionPose,
    ];

    /// Stable index into fixed per-source storage.
    pub fn index(self) -> usize {
        match self {
            SensorId::Imu => 0,
            SensorId::Gps => 1,
            SensorId::Baro => 2,
            SensorId::VisionPose => 3,
        }
    }

    /// Sources without which the estimator cannot hold a trustworthy state.
    /// Losing one of these is reported to the safety supervisor.
    pub fn is_critical(self) -> bool {
        matches!(self, SensorId::Imu | SensorId::Gps)
    }

    pub fn label(self) -> &'static str {
        match self {
            SensorId::Imu => "imu",
            SensorId::Gps => "gps",
            SensorId::Baro => "baro",
            SensorId::VisionPose => "vision_pose",
        }
    }
}

// --- Sensor Data ---

/// Modality-specific measurement payload. Vector quantities are expressed in
/// the local world frame (z up) unless noted; IMU quantities are body-frame.
#[derive(Debug, Clone)]
pub enum SamplePayload {
    Imu {
        /// Specific force, body frame, m/s^2. At rest this reads +g on z.
        accel: Vector3<f64>,
        /// Angular rate, body frame, rad/s.
        gyro: Vector3<f64>,
    },
    Gps {
        /// Position in the local world frame, meters.
        position: Vector3<f64>,
        /// Per-sample covariance when the receiver provides one; otherwise
        /// the configured fixed noise model applies.
        covariance: Option<Matrix3<f64>>,
    },
    Baro {
        /// Altitude above the local origin, meters.
        altitude: f64,
    },
    VisionPose {
        position: Vector3<f64>,
        orientation: UnitQuaternion<f64>,
    },
}

impl SamplePayload {
    pub fn source(&self) -> SensorId {
        match self {
            SamplePayload::Imu { .. } => SensorId::Imu,
            SamplePayload::Gps { .. } => SensorId::Gps,
            SamplePayload::Baro { .. } => SensorId::Baro,
            SamplePayload::VisionPose { .. } => SensorId::VisionPose,
        }
    }
}

/// A single timestamped reading from one source. Immutable once produced:
/// created by an ingest adapter, consumed once by the synchronizer.
#[derive(Debug, Clone)]
pub struct SensorSample {
    pub source: SensorId,
    /// Monotonic clock, seconds.
    pub timestamp: f64,
    pub payload: SamplePayload,
    pub seq: u64,
}

// --- Estimator Output ---

/// An immutable snapshot of the fused vehicle state, published once per
/// estimator cycle.
///
/// Invariants: `covariance` is symmetric positive semi-definite and
/// `orientation` is normalized; both are re-enforced after every filter
/// update. Consumers must check `valid` before acting on the estimate.
#[derive(Debug, Clone)]
pub struct StateEstimate {
    pub timestamp: f64,
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
    pub covariance: Covariance9,
    pub valid: bool,
}

impl StateEstimate {
    /// A zeroed estimate at the origin with a scaled-identity covariance.
    pub fn initial(timestamp: f64, initial_covariance: f64) -> Self {
        Self {
            timestamp,
            position: Vector3::zeros(),
            velocity: Vector3::zeros(),
            orientation: UnitQuaternion::identity(),
            covariance: Covariance9::identity() * initial_covariance,
            valid: true,
        }
    }

    /// Trace of the position block of the covariance. This is the scalar the
    /// validity ceiling is compared against.
    pub fn position_variance(&self) -> f64 {
        self.covariance[(0, 0)] + self.covariance[(1, 1)] + self.covariance[(2, 2)]
    }

    /// True when every component of the estimate is finite.
    pub fn is_finite(&self) -> bool {
        self.position.iter().all(|v| v.is_finite())
            && self.velocity.iter().all(|v| v.is_finite())
            && self.orientation.coords.iter().all(|v| v.is_finite())
            && self.covariance.iter().all(|v| v.is_finite())
    }
}

// --- Trajectory ---

/// One reference sample along a planned trajectory.
#[derive(Debug, Clone, Copy)]
pub struct TrajectoryPoint {
    /// Absolute monotonic time this sample applies to.
    pub t: f64,
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
    pub acceleration: Vector3<f64>,
}

/// A short-horizon reference trajectory. Regenerated every planning cycle;
/// sample times are strictly increasing over the horizon.
#[derive(Debug, Clone)]
pub struct Trajectory {
    pub points: Vec<TrajectoryPoint>,
    /// The (possibly clipped) endpoint this trajectory actually reaches.
    pub target: Vector3<f64>,
    /// Set when the requested target was not reachable within dynamic
    /// limits and the trajectory was clipped to the nearest feasible point.
    pub infeasible: bool,
}

impl Trajectory {
    pub fn start_time(&self) -> Option<f64> {
        self.points.first().map(|p| p.t)
    }

    pub fn end_time(&self) -> Option<f64> {
        self.points.last().map(|p| p.t)
    }

    /// Linearly interpolated reference at time `t`, clamped to the
    /// trajectory endpoints. `None` only for an empty trajectory.
    pub fn sample_at(&self, t: f64) -> Option<TrajectoryPoint> {
        let first = self.points.first()?;
        let last = self.points.last()?;
        if t <= first.t {
            return Some(*first);
        }
        if t >= last.t {
            return Some(*last);
        }
        let idx = self.points.partition_point(|p| p.t <= t);
        let a = &self.points[idx - 1];
        let b = &self.points[idx];
        let span = b.t - a.t;
        if span <= f64::EPSILON {
            return Some(*a);
        }
        let alpha = (t - a.t) / span;
        Some(TrajectoryPoint {
            t,
            position: a.position.lerp(&b.position, alpha),
            velocity: a.velocity.lerp(&b.velocity, alpha),
            acceleration: a.acceleration.lerp(&b.acceleration, alpha),
        })
    }
}

// --- Actuator Command ---

/// Actuator setpoints produced once per inner control tick. The driver must
/// honor `valid`: an invalid command means hold the previous safe command.
#[derive(Debug, Clone, Copy)]
pub struct ControlCommand {
    pub timestamp: f64,
    /// Normalized collective thrust, 0..1.
    pub thrust: f64,
    /// Body rate setpoints (roll, pitch, yaw), rad/s.
    pub body_rates: Vector3<f64>,
    pub valid: bool,
}

impl ControlCommand {
    /// The safe-stop pattern commanded on disarm and during shutdown.
    pub fn safe_stop(timestamp: f64) -> Self {
        Self {
            timestamp,
            thrust: 0.0,
            body_rates: Vector3::zeros(),
            valid: true,
        }
    }
}

// --- Safety State ---

/// The process-wide flight safety state. Owned by the safety supervisor;
/// the transition function is the only permitted mutation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SafetyState {
    Nominal,
    Degraded,
    Hold,
    Return,
    Land,
    Disarmed,
}

impl SafetyState {
    /// DISARMED is terminal: no outgoing transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, SafetyState::Disarmed)
    }

    pub fn label(self) -> &'static str {
        match self {
            SafetyState::Nominal => "NOMINAL",
            SafetyState::Degraded => "DEGRADED",
            SafetyState::Hold => "HOLD",
            SafetyState::Return => "RETURN",
            SafetyState::Land => "LAND",
            SafetyState::Disarmed => "DISARMED",
        }
    }
}

impl std::fmt::Display for SafetyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
