// av_core/src/telemetry.rs

//! Telemetry events for the ground-station uplink. Every safety transition
//! and every escalated error is reported with state, reason, and timestamp;
//! the wire format is the communication collaborator's concern.

use crate::errors::AvError;
use crate::types::{SafetyState, SensorId, StateEstimate};

#[derive(Debug, Clone)]
pub enum TelemetryEvent {
    SafetyTransition {
        from: SafetyState,
        to: SafetyState,
        reason: &'static str,
        timestamp: f64,
    },
    SensorStale {
        source: SensorId,
        timestamp: f64,
    },
    EstimateInvalid {
        timestamp: f64,
    },
    TargetInfeasible {
        requested: f64,
        granted: f64,
        timestamp: f64,
    },
    ActuatorSaturation {
        axis: &'static str,
        timestamp: f64,
    },
    LinkTimeout {
        silence: f64,
        timestamp: f64,
    },
    ReferenceStale {
        age_bound: f64,
        timestamp: f64,
    },
}

impl TelemetryEvent {
    /// Wire rendering of an escalated error. Pre-arm errors never reach the
    /// uplink, and an unrecoverable estimator failure is reported through
    /// the safety transition it forces.
    pub fn from_error(error: &AvError, timestamp: f64) -> Option<Self> {
        match error {
            AvError::SensorStale { sensor, .. } => Some(TelemetryEvent::SensorStale {
                source: *sensor,
                timestamp,
            }),
            AvError::EstimateInvalid(_) => Some(TelemetryEvent::EstimateInvalid { timestamp }),
            AvError::TargetInfeasible { requested, granted } => {
                Some(TelemetryEvent::TargetInfeasible {
                    requested: *requested,
                    granted: *granted,
                    timestamp,
                })
            }
            AvError::ActuatorSaturation { axis } => Some(TelemetryEvent::ActuatorSaturation {
                axis: *axis,
                timestamp,
            }),
            AvError::LinkTimeout(silence) => Some(TelemetryEvent::LinkTimeout {
                silence: *silence,
                timestamp,
            }),
            AvError::ConfigInvalid(_) | AvError::UnrecoverableEstimatorFailure(_) => None,
        }
    }
}

impl std::fmt::Display for TelemetryEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TelemetryEvent::SafetyTransition {
                from,
                to,
                reason,
                timestamp,
            } => write!(f, "[{timestamp:.3}] safety {from} -> {to}: {reason}"),
            TelemetryEvent::SensorStale { source, timestamp } => {
                write!(f, "[{timestamp:.3}] sensor {} stale", source.label())
            }
            TelemetryEvent::EstimateInvalid { timestamp } => {
                write!(f, "[{timestamp:.3}] state estimate invalid")
            }
            TelemetryEvent::TargetInfeasible {
                requested,
                granted,
                timestamp,
            } => write!(
                f,
                "[{timestamp:.3}] target infeasible: {requested:.1}m requested, {granted:.1}m granted"
            ),
            TelemetryEvent::ActuatorSaturation { axis, timestamp } => {
                write!(f, "[{timestamp:.3}] actuator saturation: {axis}")
            }
            TelemetryEvent::LinkTimeout { silence, timestamp } => {
                write!(f, "[{timestamp:.3}] mission link silent for {silence:.1}s")
            }
            TelemetryEvent::ReferenceStale {
                age_bound,
                timestamp,
            } => write!(
                f,
                "[{timestamp:.3}] control reference reused past {age_bound:.1}s bound"
            ),
        }
    }
}

/// Compact state summary for the uplink: safety state plus the headline
/// numbers of the current estimate.
#[derive(Debug, Clone)]
pub struct StateSummary {
    pub timestamp: f64,
    pub safety: SafetyState,
    pub position: [f64; 3],
    pub velocity: [f64; 3],
    pub estimate_valid: bool,
}

impl StateSummary {
    pub fn new(safety: SafetyState, estimate: &StateEstimate) -> Self {
        Self {
            timestamp: estimate.timestamp,
            safety,
            position: estimate.position.into(),
            velocity: estimate.velocity.into(),
            estimate_valid: estimate.valid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ConfigError;
    use nalgebra::Vector3;

    #[test]
    fn escalated_errors_map_to_wire_events() {
        let error = AvError::SensorStale {
            sensor: SensorId::Gps,
            age: 0.7,
        };
        match TelemetryEvent::from_error(&error, 3.0) {
            Some(TelemetryEvent::SensorStale { source, timestamp }) => {
                assert_eq!(source, SensorId::Gps);
                assert_eq!(timestamp, 3.0);
            }
            other => panic!("unexpected event {other:?}"),
        }

        let error = AvError::TargetInfeasible {
            requested: 40.0,
            granted: 20.0,
        };
        match TelemetryEvent::from_error(&error, 4.0) {
            Some(TelemetryEvent::TargetInfeasible {
                requested, granted, ..
            }) => {
                assert_eq!(requested, 40.0);
                assert_eq!(granted, 20.0);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn pre_arm_errors_have_no_wire_form() {
        let error = AvError::from(ConfigError::NonPositive {
            field: "rates.inner_hz",
            value: -1.0,
        });
        assert!(error.to_string().contains("invalid configuration"));
        assert!(TelemetryEvent::from_error(&error, 0.0).is_none());
    }

    #[test]
    fn summary_copies_the_estimate_headline() {
        let mut estimate = StateEstimate::initial(2.5, 1.0);
        estimate.position = Vector3::new(1.0, 2.0, 3.0);
        estimate.valid = false;
        let summary = StateSummary::new(SafetyState::Degraded, &estimate);
        assert_eq!(summary.timestamp, 2.5);
        assert_eq!(summary.safety, SafetyState::Degraded);
        assert_eq!(summary.position, [1.0, 2.0, 3.0]);
        assert!(!summary.estimate_valid);
    }

    #[test]
    fn transition_event_renders_state_reason_and_time() {
        let event = TelemetryEvent::SafetyTransition {
            from: SafetyState::Nominal,
            to: SafetyState::Return,
            reason: "battery below reserve",
            timestamp: 12.5,
        };
        let text = event.to_string();
        assert!(text.contains("NOMINAL"));
        assert!(text.contains("RETURN"));
        assert!(text.contains("battery below reserve"));
        assert!(text.contains("12.5"));
    }
}
