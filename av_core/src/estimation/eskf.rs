// av_core/src/estimation/eskf.rs

//! Error-state Kalman filter over {position, velocity, attitude error}.
//!
//! The nominal state carries the quaternion; the 9-dimensional error state
//! is estimated linearly and injected back after every correction. Updates
//! run in a fixed order so results are reproducible: IMU propagation first,
//! then absolute-position corrections (GPS, then barometer), then
//! orientation corrections (vision pose).

use nalgebra::{Matrix3, SMatrix, SVector, UnitQuaternion, Vector3};

use crate::config::FilterConfig;
use crate::estimation::Estimator;
use crate::ingest::SyncSet;
use crate::types::{Covariance9, SamplePayload, SensorId, StateEstimate};

fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

pub struct ErrorStateKf {
    config: FilterConfig,
    /// Current internal state; always propagated, even while invalid.
    state: StateEstimate,
    /// Snapshot from the last tick the filter was trustworthy. Returned
    /// with the invalid flag set instead of fabricating confidence.
    last_valid: StateEstimate,
    /// Additive process noise, applied as `Q * dt` during prediction.
    process_noise: Covariance9,
    /// Set on a non-finite state; the filter stays invalid from then on.
    failed: bool,
}

impl ErrorStateKf {
    pub fn new(config: FilterConfig, t0: f64) -> Self {
        let mut q = Covariance9::zeros();
        for i in 0..3 {
            q[(i, i)] = config.position_noise.powi(2);
            q[(i + 3, i + 3)] = config.accel_noise.powi(2);
            q[(i + 6, i + 6)] = config.gyro_noise.powi(2);
        }
        let state = StateEstimate::initial(t0, config.initial_covariance);
        Self {
            config,
            last_valid: state.clone(),
            state,
            process_noise: q,
            failed: false,
        }
    }

    /// Advances the nominal state and inflates the covariance. With IMU
    /// data this is strapdown propagation; without, the kinematic model
    /// coasts on the last velocity. Either way `P` grows monotonically
    /// until the next correction.
    fn predict(&mut self, imu: Option<(&Vector3<f64>, &Vector3<f64>)>, dt: f64) {
        if dt <= 0.0 {
            return;
        }

        let rot = self.state.orientation.to_rotation_matrix().into_inner();
        let accel_world = match imu {
            Some((accel, _)) => rot * accel - Vector3::new(0.0, 0.0, self.config.gravity),
            None => Vector3::zeros(),
        };

        self.state.position += self.state.velocity * dt + accel_world * (0.5 * dt * dt);
        self.state.velocity += accel_world * dt;
        if let Some((_, gyro)) = imu {
            self.state.orientation *= UnitQuaternion::from_scaled_axis(gyro * dt);
        }

        // F = I + df/dx * dt for the error state (pos, vel, attitude).
        let mut f = Covariance9::identity();
        f.fixed_view_mut::<3, 3>(0, 3)
            .copy_from(&(Matrix3::identity() * dt));
        if let Some((accel, _)) = imu {
            f.fixed_view_mut::<3, 3>(3, 6)
                .copy_from(&(-(rot * skew(accel)) * dt));
        }

        self.state.covariance =
            f * self.state.covariance * f.transpose() + self.process_noise * dt;
        self.enforce_invariants();
    }

    /// Kalman update for a 3-vector residual observing one error-state
    /// block directly (`offset` 0 for position, 6 for attitude).
    fn correct_block3(&mut self, offset: usize, y: Vector3<f64>, r: Matrix3<f64>) {
        let mut h = SMatrix::<f64, 3, 9>::zeros();
        h.fixed_view_mut::<3, 3>(0, offset)
            .copy_from(&Matrix3::identity());

        let s = h * self.state.covariance * h.transpose() + r;
        // A singular S means a redundant or degenerate measurement; skip
        // the update to keep the filter stable.
        if let Some(s_inv) = s.try_inverse() {
            let k = self.state.covariance * h.transpose() * s_inv;
            let dx: SVector<f64, 9> = k * y;
            self.inject(&dx);
            self.state.covariance = (Covariance9::identity() - k * h) * self.state.covariance;
            self.enforce_invariants();
        }
    }

    /// Scalar update observing one error-state component (baro altitude).
    fn correct_scalar(&mut self, index: usize, y: f64, r: f64) {
        let s = self.state.covariance[(index, index)] + r;
        if s <= 0.0 {
            return;
        }
        let k: SVector<f64, 9> = self.state.covariance.column(index) / s;
        let dx = k * y;
        self.inject(&dx);
        let mut h = SMatrix::<f64, 1, 9>::zeros();
        h[(0, index)] = 1.0;
        self.state.covariance = (Covariance9::identity() - k * h) * self.state.covariance;
        self.enforce_invariants();
    }

    /// Injects the estimated error into the nominal state. The attitude
    /// error is a world-frame rotation vector applied on the left.
    fn inject(&mut self, dx: &SVector<f64, 9>) {
        self.state.position += dx.fixed_rows::<3>(0).into_owned();
        self.state.velocity += dx.fixed_rows::<3>(3).into_owned();
        let dtheta: Vector3<f64> = dx.fixed_rows::<3>(6).into_owned();
        self.state.orientation =
            UnitQuaternion::from_scaled_axis(dtheta) * self.state.orientation;
    }

    /// Re-symmetrizes the covariance and renormalizes the quaternion to
    /// stop accumulated floating-point error from drifting the invariants.
    fn enforce_invariants(&mut self) {
        self.state.covariance = (self.state.covariance + self.state.covariance.transpose()) * 0.5;
        self.state.orientation.renormalize();
    }

    fn refresh_validity(&mut self, all_stale: bool) {
        if self.failed {
            self.state.valid = false;
            return;
        }
        if !self.state.is_finite() {
            self.failed = true;
            self.state.valid = false;
            return;
        }
        let inflated = self.state.position_variance() > self.config.position_variance_ceiling;
        self.state.valid = !inflated && !all_stale;
        if self.state.valid {
            self.last_valid = self.state.clone();
        }
    }

    fn published(&self) -> StateEstimate {
        if self.state.valid {
            self.state.clone()
        } else {
            let mut out = self.last_valid.clone();
            out.timestamp = self.state.timestamp;
            out.valid = false;
            out
        }
    }
}

impl Estimator for ErrorStateKf {
    fn step(&mut self, set: &SyncSet, now: f64) -> StateEstimate {
        let dt = now - self.state.timestamp;
        if dt <= 0.0 {
            return self.published();
        }
        if self.failed {
            self.state.timestamp = now;
            return self.published();
        }

        // 1. IMU propagation (model-only coasting when the IMU is stale).
        let imu = set.get(SensorId::Imu).and_then(|s| match &s.sample.payload {
            SamplePayload::Imu { accel, gyro } => Some((accel, gyro)),
            _ => None,
        });
        let imu = imu.map(|(a, g)| (*a, *g));
        self.predict(imu.as_ref().map(|(a, g)| (a, g)), dt);
        self.state.timestamp = now;

        // 2. Absolute position corrections: GPS, then barometer altitude.
        if let Some(synced) = set.get(SensorId::Gps) {
            if let SamplePayload::Gps {
                position,
                covariance,
            } = &synced.sample.payload
            {
                let r = covariance.unwrap_or_else(|| {
                    Matrix3::identity() * self.config.gps_position_noise.powi(2)
                });
                let y = position - self.state.position;
                self.correct_block3(0, y, r);
            }
        }
        if let Some(synced) = set.get(SensorId::Baro) {
            if let SamplePayload::Baro { altitude } = &synced.sample.payload {
                let y = altitude - self.state.position.z;
                self.correct_scalar(2, y, self.config.baro_altitude_noise.powi(2));
            }
        }

        // 3. Orientation corrections: vision pose (position, then attitude).
        if let Some(synced) = set.get(SensorId::VisionPose) {
            if let SamplePayload::VisionPose {
                position,
                orientation,
            } = &synced.sample.payload
            {
                let r_pos = Matrix3::identity() * self.config.vision_position_noise.powi(2);
                self.correct_block3(0, position - self.state.position, r_pos);
                let dtheta = (orientation * self.state.orientation.inverse()).scaled_axis();
                let r_att = Matrix3::identity() * self.config.vision_orientation_noise.powi(2);
                self.correct_block3(6, dtheta, r_att);
            }
        }

        let all_stale = set.stale_sources().len() == SensorId::ALL.len();
        self.refresh_validity(all_stale);
        self.published()
    }

    fn estimate(&self) -> StateEstimate {
        self.published()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SensorConfig;
    use crate::ingest::Synchronizer;
    use crate::types::SensorSample;
    use approx::assert_abs_diff_eq;
    use rand::Rng;
    use rand_chacha::rand_core::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn imu_sample(t: f64, accel: Vector3<f64>, gyro: Vector3<f64>, seq: u64) -> SensorSample {
        SensorSample {
            source: SensorId::Imu,
            timestamp: t,
            payload: SamplePayload::Imu { accel, gyro },
            seq,
        }
    }

    fn gps_sample(t: f64, position: Vector3<f64>, seq: u64) -> SensorSample {
        SensorSample {
            source: SensorId::Gps,
            timestamp: t,
            payload: SamplePayload::Gps {
                position,
                covariance: None,
            },
            seq,
        }
    }

    fn rest_imu(t: f64, seq: u64) -> SensorSample {
        imu_sample(t, Vector3::new(0.0, 0.0, 9.81), Vector3::zeros(), seq)
    }

    #[test]
    fn covariance_shrinks_on_correction_and_grows_on_prediction() {
        let mut sync = Synchronizer::new(SensorConfig::default());
        let mut kf = ErrorStateKf::new(FilterConfig::default(), 0.0);

        // Pure prediction: trace must not decrease.
        let mut prev = kf.estimate().position_variance();
        for i in 1..=10 {
            let t = i as f64 * 0.01;
            sync.push(rest_imu(t, i as u64));
            let est = kf.step(&sync.sample_at(t), t);
            assert!(est.position_variance() >= prev);
            prev = est.position_variance();
        }

        // A GPS correction must bring the trace down.
        let t = 0.11;
        sync.push(rest_imu(t, 100));
        sync.push(gps_sample(t, Vector3::zeros(), 0));
        let est = kf.step(&sync.sample_at(t), t);
        assert!(est.position_variance() < prev);
    }

    #[test]
    fn quaternion_stays_normalized_over_randomized_updates() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut sync = Synchronizer::new(SensorConfig::default());
        let mut kf = ErrorStateKf::new(FilterConfig::default(), 0.0);

        for i in 1..=10_000u64 {
            let t = i as f64 * 0.005;
            let accel = Vector3::new(
                rng.gen_range(-2.0..2.0),
                rng.gen_range(-2.0..2.0),
                9.81 + rng.gen_range(-2.0..2.0),
            );
            let gyro = Vector3::new(
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
            );
            sync.push(imu_sample(t, accel, gyro, i));
            if i % 20 == 0 {
                let pos = Vector3::new(
                    rng.gen_range(-50.0..50.0),
                    rng.gen_range(-50.0..50.0),
                    rng.gen_range(0.0..30.0),
                );
                sync.push(gps_sample(t, pos, i));
            }
            kf.step(&sync.sample_at(t), t);
            let norm = kf.state.orientation.as_ref().norm();
            assert_abs_diff_eq!(norm, 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn all_sources_stale_invalidates_within_one_tick() {
        let mut sync = Synchronizer::new(SensorConfig::default());
        let mut kf = ErrorStateKf::new(FilterConfig::default(), 0.0);

        let mut t = 0.0;
        for i in 1..=50u64 {
            t = i as f64 * 0.01;
            sync.push(rest_imu(t, i));
            sync.push(gps_sample(t, Vector3::zeros(), i));
            assert!(kf.step(&sync.sample_at(t), t).valid);
        }

        // Stop feeding everything. Once the longest staleness window has
        // elapsed, the very next tick must report an invalid estimate.
        let window = SensorConfig::default().staleness_window(SensorId::Gps);
        let t_next = t + window + 0.01;
        let est = kf.step(&sync.sample_at(t_next), t_next);
        assert!(!est.valid);
    }

    #[test]
    fn invalid_output_repeats_last_valid_kinematics() {
        let mut sync = Synchronizer::new(SensorConfig::default());
        let mut kf = ErrorStateKf::new(FilterConfig::default(), 0.0);

        let target = Vector3::new(3.0, -2.0, 10.0);
        let mut t = 0.0;
        for i in 1..=50u64 {
            t = i as f64 * 0.01;
            sync.push(rest_imu(t, i));
            sync.push(gps_sample(t, target, i));
            kf.step(&sync.sample_at(t), t);
        }
        let valid = kf.estimate();
        assert!(valid.valid);

        let t_next = t + 1.0;
        let est = kf.step(&sync.sample_at(t_next), t_next);
        assert!(!est.valid);
        assert_eq!(est.position, valid.position);
        assert_abs_diff_eq!(est.timestamp, t_next);
    }

    #[test]
    fn gps_corrections_pull_position_toward_fix() {
        let mut sync = Synchronizer::new(SensorConfig::default());
        let mut kf = ErrorStateKf::new(FilterConfig::default(), 0.0);

        let fix = Vector3::new(5.0, 1.0, 20.0);
        for i in 1..=400u64 {
            let t = i as f64 * 0.01;
            sync.push(rest_imu(t, i));
            sync.push(gps_sample(t, fix, i));
            kf.step(&sync.sample_at(t), t);
        }
        let est = kf.estimate();
        assert!((est.position - fix).norm() < 0.5, "drifted: {}", est.position);
    }
}
