// av_runtime/src/actuator.rs

//! Actuator output path. The driver is the one place where the command
//! validity flag is honored: an invalid command never reaches the hardware,
//! the last safe command is re-applied instead.

use av_core::types::ControlCommand;

use crate::sensors::{lock_vehicle, SharedVehicle};

pub trait Actuator: Send {
    fn apply(&mut self, command: &ControlCommand);
}

/// Applies commands to the mock vehicle, integrating at the inner-loop
/// period.
pub struct MockActuator {
    vehicle: SharedVehicle,
    dt: f64,
}

impl MockActuator {
    pub fn new(vehicle: SharedVehicle, dt: f64) -> Self {
        Self { vehicle, dt }
    }
}

impl Actuator for MockActuator {
    fn apply(&mut self, command: &ControlCommand) {
        lock_vehicle(&self.vehicle).apply_command(command, self.dt);
    }
}

/// Wraps an actuator with the hold-last-safe rule.
pub struct CommandDriver<A> {
    actuator: A,
    last_safe: ControlCommand,
}

impl<A: Actuator> CommandDriver<A> {
    pub fn new(actuator: A, now: f64) -> Self {
        Self {
            actuator,
            last_safe: ControlCommand::safe_stop(now),
        }
    }

    /// Applies `command` if it is valid, otherwise re-applies the last safe
    /// command. Returns whether the incoming command was applied.
    pub fn drive(&mut self, command: &ControlCommand) -> bool {
        if command.valid {
            self.last_safe = *command;
            self.actuator.apply(command);
            true
        } else {
            let held = self.last_safe;
            self.actuator.apply(&held);
            false
        }
    }

    /// Forces the safe-stop pattern, replacing the held command.
    pub fn safe_stop(&mut self, now: f64) {
        let command = ControlCommand::safe_stop(now);
        self.last_safe = command;
        self.actuator.apply(&command);
    }

    pub fn held(&self) -> &ControlCommand {
        &self.last_safe
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    struct Recorder {
        applied: Vec<ControlCommand>,
    }

    impl Actuator for Recorder {
        fn apply(&mut self, command: &ControlCommand) {
            self.applied.push(*command);
        }
    }

    fn command(thrust: f64, valid: bool) -> ControlCommand {
        ControlCommand {
            timestamp: 0.0,
            thrust,
            body_rates: Vector3::zeros(),
            valid,
        }
    }

    #[test]
    fn valid_commands_pass_through_and_become_the_held_command() {
        let mut driver = CommandDriver::new(Recorder { applied: vec![] }, 0.0);
        assert!(driver.drive(&command(0.6, true)));
        assert_eq!(driver.held().thrust, 0.6);
    }

    #[test]
    fn invalid_commands_are_replaced_by_the_last_safe_one() {
        let mut driver = CommandDriver::new(Recorder { applied: vec![] }, 0.0);
        driver.drive(&command(0.6, true));
        assert!(!driver.drive(&command(0.9, false)));

        let applied = &driver.actuator.applied;
        assert_eq!(applied.len(), 2);
        assert_eq!(applied[1].thrust, 0.6);
        assert_eq!(driver.held().thrust, 0.6);
    }

    #[test]
    fn safe_stop_replaces_the_held_command() {
        let mut driver = CommandDriver::new(Recorder { applied: vec![] }, 0.0);
        driver.drive(&command(0.6, true));
        driver.safe_stop(1.0);
        assert_eq!(driver.held().thrust, ControlCommand::safe_stop(1.0).thrust);
        assert!(!driver.drive(&command(0.9, false)));
        assert_eq!(driver.actuator.applied.last().unwrap().thrust, driver.held().thrust);
    }
}
