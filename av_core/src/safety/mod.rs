// av_core/src/safety/mod.rs

//! Safety supervision state machine.
//!
//! The supervisor owns the single process-wide [`SafetyState`]; the
//! transition function evaluated once per tick is the only mutation path.
//! Transitions are a deterministic function of (previous state, estimator
//! validity, battery level, geofence status, link status, external
//! command): severity is evaluated top-down so the same inputs always yield
//! the same next state, and DISARMED has no outgoing transitions.

use nalgebra::Vector3;

use crate::config::SafetyConfig;
use crate::types::{SafetyState, StateEstimate};

/// Supervisor-level override from the mission authority link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideCommand {
    Return,
    Land,
    Disarm,
}

/// Everything the transition function looks at, gathered once per tick.
#[derive(Debug, Clone)]
pub struct SafetyInputs {
    pub now: f64,
    pub estimate_valid: bool,
    /// A critical sensor source (IMU, GPS) is currently stale.
    pub critical_sensor_stale: bool,
    /// The planner's report from this cycle: `Some(true)` for a clipped,
    /// infeasible plan, `Some(false)` for a clean one, `None` when no plan
    /// was produced this tick.
    pub target_infeasible: Option<bool>,
    /// The mission-link watchdog has not timed out.
    pub link_ok: bool,
    /// Battery state of charge, 0..1.
    pub battery_soc: f64,
    pub geofence_violated: bool,
    /// A valid estimate exists to navigate home with.
    pub navigation_available: bool,
    /// Current estimated position, used to anchor failsafe targets.
    pub position: Option<Vector3<f64>>,
    pub command: Option<OverrideCommand>,
}

/// One accepted state transition, reported on telemetry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub from: SafetyState,
    pub to: SafetyState,
    pub reason: &'static str,
    pub timestamp: f64,
}

/// What the control loop should track this cycle. `Mission` passes the
/// planner's trajectory through unmodified; `Failsafe` substitutes a
/// supervisor-chosen target; `SafeStop` forces the safe-stop actuator
/// pattern.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TargetSelection {
    Mission,
    Failsafe(Vector3<f64>),
    SafeStop,
}

/// Single-source heartbeat watchdog for the mission authority link.
#[derive(Debug, Clone)]
pub struct Watchdog {
    timeout: f64,
    last_seen: f64,
}

impl Watchdog {
    pub fn new(timeout: f64, now: f64) -> Self {
        Self {
            timeout,
            last_seen: now,
        }
    }

    pub fn kick(&mut self, now: f64) {
        self.last_seen = now;
    }

    pub fn silence(&self, now: f64) -> f64 {
        now - self.last_seen
    }

    pub fn timed_out(&self, now: f64) -> bool {
        self.silence(now) > self.timeout
    }
}

pub struct Supervisor {
    config: SafetyConfig,
    state: SafetyState,
    home: Vector3<f64>,
    /// When the conditions for NOMINAL were last restored, for debouncing.
    recovered_since: Option<f64>,
    /// When DEGRADED was entered.
    degraded_since: Option<f64>,
    /// Consecutive planning cycles reporting an infeasible target.
    infeasible_streak: u32,
    /// Position captured on entering HOLD or LAND.
    anchor: Option<Vector3<f64>>,
}

impl Supervisor {
    pub fn new(config: SafetyConfig, home: Vector3<f64>) -> Self {
        Self {
            config,
            state: SafetyState::Nominal,
            home,
            recovered_since: None,
            degraded_since: None,
            infeasible_streak: 0,
            anchor: None,
        }
    }

    pub fn state(&self) -> SafetyState {
        self.state
    }

    /// Evaluates the transition rules once. Returns the accepted transition,
    /// if any; the internal state is already advanced when it returns.
    pub fn step(&mut self, inputs: &SafetyInputs) -> Option<Transition> {
        if self.state.is_terminal() {
            return None;
        }

        match inputs.target_infeasible {
            Some(true) => self.infeasible_streak = self.infeasible_streak.saturating_add(1),
            Some(false) => self.infeasible_streak = 0,
            None => {}
        }

        let (next, reason) = self.evaluate(inputs);
        if next == self.state {
            return None;
        }

        let transition = Transition {
            from: self.state,
            to: next,
            reason,
            timestamp: inputs.now,
        };
        self.apply(next, inputs);
        Some(transition)
    }

    /// The pure decision: most severe conditions first, so evaluation order
    /// is the documented precedence DISARM > LAND > RETURN > HOLD >
    /// DEGRADED > NOMINAL.
    fn evaluate(&self, inputs: &SafetyInputs) -> (SafetyState, &'static str) {
        let state = self.state;
        let healthy = inputs.estimate_valid && !inputs.critical_sensor_stale;

        // DISARMED: explicit command, or DEGRADED past the maximum duration
        // (unrecoverable estimator failure).
        if inputs.command == Some(OverrideCommand::Disarm) {
            return (SafetyState::Disarmed, "disarm command");
        }
        if let Some(since) = self.degraded_since {
            if state == SafetyState::Degraded && inputs.now - since > self.config.max_degraded {
                return (SafetyState::Disarmed, "estimator failure exceeded max degraded duration");
            }
        }

        // LAND: geofence breach, explicit command, or RETURN without an
        // estimate to navigate home with. LAND only yields to DISARMED.
        if state == SafetyState::Land {
            return (state, "");
        }
        if inputs.geofence_violated {
            return (SafetyState::Land, "geofence violated");
        }
        if inputs.command == Some(OverrideCommand::Land) {
            return (SafetyState::Land, "land command");
        }
        if state == SafetyState::Return && !inputs.navigation_available {
            return (SafetyState::Land, "return infeasible without valid estimate");
        }
        if state == SafetyState::Degraded && !healthy && self.degraded_exceeded_debounce(inputs.now)
        {
            // Escalate a DEGRADED condition that refuses to recover.
            return if inputs.navigation_available {
                (SafetyState::Return, "degraded persisted past debounce")
            } else {
                (SafetyState::Land, "degraded persisted without navigation")
            };
        }

        // RETURN: battery at or below reserve, or explicit command.
        if state != SafetyState::Return {
            if inputs.battery_soc <= self.config.battery_reserve {
                return (SafetyState::Return, "battery below reserve");
            }
            if inputs.command == Some(OverrideCommand::Return) {
                return (SafetyState::Return, "return command");
            }
        }
        if state == SafetyState::Return {
            return (state, "");
        }

        // HOLD: persistent infeasibility or a lost mission link.
        if matches!(state, SafetyState::Nominal | SafetyState::Degraded) {
            if self.infeasible_streak >= self.config.infeasible_limit {
                return (SafetyState::Hold, "target persistently infeasible");
            }
            if !inputs.link_ok {
                return (SafetyState::Hold, "mission link lost");
            }
        }
        if state == SafetyState::Hold {
            return (state, "");
        }

        // DEGRADED and the debounced recovery back to NOMINAL.
        match state {
            SafetyState::Nominal if !healthy => {
                if inputs.estimate_valid {
                    (SafetyState::Degraded, "critical sensor stale")
                } else {
                    (SafetyState::Degraded, "estimate invalid")
                }
            }
            SafetyState::Degraded if healthy => match self.recovered_since {
                Some(since) if inputs.now - since >= self.config.debounce => {
                    (SafetyState::Nominal, "recovery held through debounce")
                }
                _ => (state, ""),
            },
            _ => (state, ""),
        }
    }

    fn degraded_exceeded_debounce(&self, now: f64) -> bool {
        matches!(self.degraded_since, Some(since) if now - since > self.config.debounce)
    }

    fn apply(&mut self, next: SafetyState, inputs: &SafetyInputs) {
        match next {
            SafetyState::Degraded => {
                self.degraded_since = Some(inputs.now);
            }
            SafetyState::Hold | SafetyState::Land => {
                self.anchor = inputs.position;
            }
            _ => {}
        }
        if next != SafetyState::Degraded {
            self.degraded_since = None;
        }
        self.state = next;
    }

    /// Tracks how long healthy conditions have held, for the debounce on
    /// DEGRADED -> NOMINAL. Call once per tick before `step`.
    pub fn observe_health(&mut self, healthy: bool, now: f64) {
        if healthy {
            if self.recovered_since.is_none() {
                self.recovered_since = Some(now);
            }
        } else {
            self.recovered_since = None;
        }
    }

    /// The reference the control loop must track under the current state.
    /// Applied before the control loop consumes the planner's trajectory.
    pub fn target_selection(&self, estimate: &StateEstimate) -> TargetSelection {
        match self.state {
            SafetyState::Nominal | SafetyState::Degraded => TargetSelection::Mission,
            SafetyState::Hold => {
                TargetSelection::Failsafe(self.anchor.unwrap_or(estimate.position))
            }
            SafetyState::Return => TargetSelection::Failsafe(self.home),
            SafetyState::Land => {
                let anchor = self.anchor.unwrap_or(estimate.position);
                TargetSelection::Failsafe(Vector3::new(anchor.x, anchor.y, 0.0))
            }
            SafetyState::Disarmed => TargetSelection::SafeStop,
        }
    }
}
