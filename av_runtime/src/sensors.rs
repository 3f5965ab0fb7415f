// av_runtime/src/sensors.rs

//! Mock sensor adapters and the small vehicle model behind them.
//!
//! The vehicle integrates the commands the actuator driver applies, and
//! each adapter samples it with additive noise at its nominal period. Real
//! hardware drivers would publish the same [`SensorSample`] values.

use std::sync::{Arc, Mutex, MutexGuard};

use nalgebra::{UnitQuaternion, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use av_core::config::Config;
use av_core::types::{ControlCommand, SamplePayload, SensorId, SensorSample};

/// Battery drain per second of flight, state-of-charge units.
const BATTERY_DRAIN_PER_S: f64 = 0.0005;

/// Rigid-body stand-in: body rates integrate directly into attitude and
/// normalized thrust maps through the hover point to lift.
pub struct MockVehicle {
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
    pub attitude: UnitQuaternion<f64>,
    accel_world: Vector3<f64>,
    battery_soc: f64,
    gravity: f64,
    hover_thrust: f64,
}

impl MockVehicle {
    pub fn new(config: &Config) -> Self {
        Self {
            position: config.home_position(),
            velocity: Vector3::zeros(),
            attitude: UnitQuaternion::identity(),
            accel_world: Vector3::zeros(),
            battery_soc: 1.0,
            gravity: config.filter.gravity,
            hover_thrust: config.gains.hover_thrust,
        }
    }

    pub fn apply_command(&mut self, command: &ControlCommand, dt: f64) {
        self.attitude *= UnitQuaternion::from_scaled_axis(command.body_rates * dt);
        let lift = self.gravity * command.thrust / self.hover_thrust;
        self.accel_world =
            self.attitude * Vector3::new(0.0, 0.0, lift) - Vector3::new(0.0, 0.0, self.gravity);
        self.position += self.velocity * dt + self.accel_world * (0.5 * dt * dt);
        self.velocity += self.accel_world * dt;
        self.battery_soc = (self.battery_soc - BATTERY_DRAIN_PER_S * dt).max(0.0);
    }

    pub fn battery_soc(&self) -> f64 {
        self.battery_soc
    }

    /// Specific force an IMU strapped to the body would report.
    pub fn specific_force(&self) -> Vector3<f64> {
        self.attitude.inverse() * (self.accel_world + Vector3::new(0.0, 0.0, self.gravity))
    }
}

pub type SharedVehicle = Arc<Mutex<MockVehicle>>;

pub fn lock_vehicle(vehicle: &SharedVehicle) -> MutexGuard<'_, MockVehicle> {
    vehicle.lock().unwrap_or_else(|e| e.into_inner())
}

/// Noise scales roughly matching a small consumer-grade sensor suite.
pub struct SensorRig {
    rng: StdRng,
    accel_noise: f64,
    gyro_noise: f64,
    gps_noise: f64,
    baro_noise: f64,
    vision_noise: f64,
    seq: u64,
}

impl SensorRig {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            accel_noise: 0.05,
            gyro_noise: 0.005,
            gps_noise: 0.4,
            baro_noise: 0.2,
            vision_noise: 0.05,
            seq: 0,
        }
    }

    /// Samples one source from the vehicle at `now`.
    pub fn sample(&mut self, source: SensorId, vehicle: &MockVehicle, now: f64) -> SensorSample {
        self.seq += 1;
        let payload = match source {
            SensorId::Imu => SamplePayload::Imu {
                accel: vehicle.specific_force() + self.noise3(self.accel_noise),
                gyro: self.noise3(self.gyro_noise),
            },
            SensorId::Gps => SamplePayload::Gps {
                position: vehicle.position + self.noise3(self.gps_noise),
                covariance: None,
            },
            SensorId::Baro => SamplePayload::Baro {
                altitude: vehicle.position.z + self.noise1(self.baro_noise),
            },
            SensorId::VisionPose => SamplePayload::VisionPose {
                position: vehicle.position + self.noise3(self.vision_noise),
                orientation: vehicle.attitude,
            },
        };
        SensorSample {
            source,
            timestamp: now,
            payload,
            seq: self.seq,
        }
    }

    fn noise1(&mut self, scale: f64) -> f64 {
        self.rng.gen_range(-scale..=scale)
    }

    fn noise3(&mut self, scale: f64) -> Vector3<f64> {
        Vector3::new(
            self.noise1(scale),
            self.noise1(scale),
            self.noise1(scale),
        )
    }
}

impl Default for SensorRig {
    fn default() -> Self {
        Self::new()
    }
}
