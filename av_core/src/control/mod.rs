// av_core/src/control/mod.rs

//! Cascaded position -> velocity -> attitude -> rate control.
//!
//! The outer loop tracks the active trajectory sample and produces an
//! attitude/thrust setpoint; the inner loop turns that into body-rate and
//! thrust commands at a faster rate. Neither loop ever blocks on a fresh
//! input: each reuses the last valid reference or estimate and raises a
//! staleness flag once reuse exceeds the configured bound. Every tick
//! produces a command.

pub mod pid;

use nalgebra::{UnitQuaternion, Vector3};

use crate::config::{ActuatorLimits, ControlGains, TrajectoryLimits};
use crate::control::pid::Pid;
use crate::types::{ControlCommand, StateEstimate, TrajectoryPoint};

/// Attitude/thrust setpoint handed from the outer to the inner loop.
#[derive(Debug, Clone, Copy)]
pub struct AttitudeSetpoint {
    pub timestamp: f64,
    pub orientation: UnitQuaternion<f64>,
    /// Normalized collective thrust, 0..1 (pre actuator clamp).
    pub thrust: f64,
}

impl AttitudeSetpoint {
    pub fn level(timestamp: f64, thrust: f64) -> Self {
        Self {
            timestamp,
            orientation: UnitQuaternion::identity(),
            thrust,
        }
    }
}

/// Output of one outer-loop tick. Saturations are reported, not hidden:
/// sustained clamping is itself a safety signal.
#[derive(Debug, Clone)]
pub struct OuterOutput {
    pub setpoint: AttitudeSetpoint,
    pub saturated: Vec<&'static str>,
    /// True when the loop ran on a reference older than the reuse bound.
    pub reference_stale: bool,
}

/// Position and velocity loops. Holds the last reference so a missing or
/// late trajectory never stalls the cascade.
pub struct OuterLoop {
    gains: ControlGains,
    limits: TrajectoryLimits,
    velocity_pid: Pid,
    gravity: f64,
    last_reference: Option<TrajectoryPoint>,
}

impl OuterLoop {
    pub fn new(gains: ControlGains, limits: TrajectoryLimits, gravity: f64) -> Self {
        let velocity_pid = Pid::new(gains.velocity);
        Self {
            gains,
            limits,
            velocity_pid,
            gravity,
            last_reference: None,
        }
    }

    pub fn reset(&mut self) {
        self.velocity_pid.reset();
        self.last_reference = None;
    }

    /// One outer tick. `reference` is the freshest trajectory sample, if
    /// any; with none available the last one is reused.
    pub fn step(
        &mut self,
        estimate: &StateEstimate,
        reference: Option<&TrajectoryPoint>,
        now: f64,
        dt: f64,
    ) -> OuterOutput {
        let mut saturated = Vec::new();

        if let Some(point) = reference {
            self.last_reference = Some(*point);
        }
        let reference = match &self.last_reference {
            Some(point) => *point,
            // Never flown a reference yet: hold level at hover thrust.
            None => {
                return OuterOutput {
                    setpoint: AttitudeSetpoint::level(now, self.gains.hover_thrust),
                    saturated,
                    reference_stale: true,
                }
            }
        };
        // Staleness keys off the sample's own time. A trajectory past its
        // end keeps yielding the clamped endpoint, which must age out like
        // any other reused reference.
        let reference_stale = now - reference.t > self.gains.reference_timeout;

        // Position loop: P on position error, plus the reference velocity
        // as feedforward, clamped to the velocity limit.
        let mut velocity_sp =
            reference.velocity + (reference.position - estimate.position) * self.gains.position_p;
        if velocity_sp.norm() > self.limits.max_velocity {
            velocity_sp = velocity_sp.normalize() * self.limits.max_velocity;
            saturated.push("velocity");
        }

        // Velocity loop: PID to an acceleration command, reference
        // acceleration as feedforward.
        let accel_cmd = reference.acceleration
            + self.velocity_pid.update(velocity_sp - estimate.velocity, dt);

        // Desired specific force, gravity compensated.
        let force = accel_cmd + Vector3::new(0.0, 0.0, self.gravity);
        let setpoint = self.force_to_attitude(force, now, &mut saturated);

        OuterOutput {
            setpoint,
            saturated,
            reference_stale,
        }
    }

    /// Maps a world-frame specific-force demand to a tilt quaternion and a
    /// normalized thrust, clamping the tilt to the configured maximum.
    fn force_to_attitude(
        &self,
        force: Vector3<f64>,
        now: f64,
        saturated: &mut Vec<&'static str>,
    ) -> AttitudeSetpoint {
        let magnitude = force.norm();
        if magnitude < 1e-6 {
            return AttitudeSetpoint::level(now, 0.0);
        }

        let up = Vector3::z();
        let direction = force / magnitude;
        let mut orientation = UnitQuaternion::rotation_between(&up, &direction)
            .unwrap_or_else(|| UnitQuaternion::from_axis_angle(&Vector3::x_axis(), std::f64::consts::PI));

        let tilt = orientation.angle();
        if tilt > self.gains.max_tilt {
            orientation = UnitQuaternion::from_scaled_axis(
                orientation.scaled_axis() * (self.gains.max_tilt / tilt),
            );
            saturated.push("tilt");
        }

        let thrust = self.gains.hover_thrust * magnitude / self.gravity;
        AttitudeSetpoint {
            timestamp: now,
            orientation,
            thrust,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InnerOutput {
    pub command: ControlCommand,
    pub saturated: Vec<&'static str>,
    pub setpoint_stale: bool,
}

/// Attitude/rate loop. Runs faster than the outer loop and clamps its
/// output to the actuator limits.
pub struct InnerLoop {
    gains: ControlGains,
    limits: ActuatorLimits,
    last_setpoint: Option<AttitudeSetpoint>,
}

impl InnerLoop {
    pub fn new(gains: ControlGains, limits: ActuatorLimits) -> Self {
        Self {
            gains,
            limits,
            last_setpoint: None,
        }
    }

    /// One inner tick. Produces a command unconditionally; an invalid
    /// estimate yields a command with `valid = false`, which the actuator
    /// driver answers by holding its previous safe command.
    pub fn step(
        &mut self,
        estimate: &StateEstimate,
        setpoint: Option<&AttitudeSetpoint>,
        now: f64,
    ) -> InnerOutput {
        let mut saturated = Vec::new();

        if let Some(sp) = setpoint {
            self.last_setpoint = Some(*sp);
        }
        let setpoint = match &self.last_setpoint {
            Some(sp) => *sp,
            None => {
                return InnerOutput {
                    command: ControlCommand {
                        timestamp: now,
                        thrust: self.gains.hover_thrust,
                        body_rates: Vector3::zeros(),
                        valid: estimate.valid,
                    },
                    saturated,
                    setpoint_stale: true,
                }
            }
        };
        let setpoint_stale = now - setpoint.timestamp > self.gains.reference_timeout;

        // Attitude error as a body-frame rotation vector, P to body rates.
        let error = (estimate.orientation.inverse() * setpoint.orientation).scaled_axis();
        let mut rates = error * self.gains.attitude_p;
        for (axis, label) in [(0, "roll_rate"), (1, "pitch_rate"), (2, "yaw_rate")] {
            if rates[axis].abs() > self.limits.max_rate {
                rates[axis] = rates[axis].clamp(-self.limits.max_rate, self.limits.max_rate);
                saturated.push(label);
            }
        }

        let mut thrust = setpoint.thrust;
        if thrust > self.limits.max_thrust || thrust < self.limits.min_thrust {
            thrust = thrust.clamp(self.limits.min_thrust, self.limits.max_thrust);
            saturated.push("thrust");
        }

        InnerOutput {
            command: ControlCommand {
                timestamp: now,
                thrust,
                body_rates: rates,
                valid: estimate.valid,
            },
            saturated,
            setpoint_stale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterConfig;
    use approx::assert_abs_diff_eq;

    fn estimate_at(position: Vector3<f64>) -> StateEstimate {
        let mut est = StateEstimate::initial(0.0, 1.0);
        est.position = position;
        est
    }

    fn hover_reference(t: f64) -> TrajectoryPoint {
        TrajectoryPoint {
            t,
            position: Vector3::zeros(),
            velocity: Vector3::zeros(),
            acceleration: Vector3::zeros(),
        }
    }

    fn outer() -> OuterLoop {
        OuterLoop::new(
            ControlGains::default(),
            TrajectoryLimits::default(),
            FilterConfig::default().gravity,
        )
    }

    fn inner() -> InnerLoop {
        InnerLoop::new(ControlGains::default(), ActuatorLimits::default())
    }

    #[test]
    fn hover_at_reference_commands_hover_thrust_level() {
        let mut loop_ = outer();
        let out = loop_.step(&estimate_at(Vector3::zeros()), Some(&hover_reference(0.0)), 0.0, 0.04);
        assert!(out.saturated.is_empty());
        assert!(!out.reference_stale);
        assert_abs_diff_eq!(out.setpoint.thrust, 0.5, epsilon = 1e-6);
        assert!(out.setpoint.orientation.angle() < 1e-9);
    }

    #[test]
    fn large_position_error_saturates_velocity_and_tilt() {
        let mut loop_ = outer();
        let out = loop_.step(
            &estimate_at(Vector3::new(100.0, 0.0, 0.0)),
            Some(&hover_reference(0.0)),
            0.0,
            0.04,
        );
        assert!(out.saturated.contains(&"velocity"));
        let gains = ControlGains::default();
        assert!(out.setpoint.orientation.angle() <= gains.max_tilt + 1e-9);
    }

    #[test]
    fn missing_reference_is_reused_and_flagged_after_timeout() {
        let mut loop_ = outer();
        let est = estimate_at(Vector3::zeros());
        loop_.step(&est, Some(&hover_reference(0.0)), 0.0, 0.04);

        let out = loop_.step(&est, None, 0.1, 0.04);
        assert!(!out.reference_stale);

        // Past the reuse bound the staleness flag must be raised, but a
        // setpoint is still produced.
        let out = loop_.step(&est, None, 1.0, 0.04);
        assert!(out.reference_stale);
    }

    #[test]
    fn clamped_endpoint_reference_ages_out() {
        let mut loop_ = outer();
        let est = estimate_at(Vector3::zeros());
        let end = hover_reference(2.0);
        let out = loop_.step(&est, Some(&end), 2.0, 0.04);
        assert!(!out.reference_stale);

        // The same endpoint keeps arriving once the trajectory is over; the
        // flag must still raise when its time falls behind the bound.
        let out = loop_.step(&est, Some(&end), 3.0, 0.04);
        assert!(out.reference_stale);
    }

    #[test]
    fn inner_loop_clamps_rates_and_reports_saturation() {
        let mut loop_ = inner();
        let sp = AttitudeSetpoint {
            timestamp: 0.0,
            orientation: UnitQuaternion::from_euler_angles(1.4, 0.0, 0.0),
            thrust: 0.5,
        };
        let out = loop_.step(&estimate_at(Vector3::zeros()), Some(&sp), 0.0);
        assert!(out.saturated.contains(&"roll_rate"));
        let limits = ActuatorLimits::default();
        assert!(out.command.body_rates.amax() <= limits.max_rate + 1e-12);
    }

    #[test]
    fn inner_loop_clamps_thrust() {
        let mut loop_ = inner();
        let sp = AttitudeSetpoint::level(0.0, 2.0);
        let out = loop_.step(&estimate_at(Vector3::zeros()), Some(&sp), 0.0);
        assert!(out.saturated.contains(&"thrust"));
        assert_abs_diff_eq!(out.command.thrust, 1.0);
    }

    #[test]
    fn invalid_estimate_yields_invalid_command() {
        let mut loop_ = inner();
        let mut est = estimate_at(Vector3::zeros());
        est.valid = false;
        let out = loop_.step(&est, Some(&AttitudeSetpoint::level(0.0, 0.5)), 0.0);
        assert!(!out.command.valid);
    }

    #[test]
    fn every_tick_produces_a_command_without_any_setpoint() {
        let mut loop_ = inner();
        let out = loop_.step(&estimate_at(Vector3::zeros()), None, 0.0);
        assert!(out.setpoint_stale);
        assert_abs_diff_eq!(out.command.thrust, 0.5);
    }
}
