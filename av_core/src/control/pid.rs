// av_core/src/control/pid.rs

use nalgebra::Vector3;

use crate::config::PidGains;

/// Stateful PID regulator over a 3-vector error, with per-axis integrator
/// clamping.
#[derive(Debug)]
pub struct Pid {
    gains: PidGains,
    integrator: Vector3<f64>,
    last_error: Option<Vector3<f64>>,
}

impl Pid {
    pub fn new(gains: PidGains) -> Self {
        Self {
            gains,
            integrator: Vector3::zeros(),
            last_error: None,
        }
    }

    pub fn reset(&mut self) {
        self.integrator = Vector3::zeros();
        self.last_error = None;
    }

    pub fn update(&mut self, error: Vector3<f64>, dt: f64) -> Vector3<f64> {
        if dt <= 0.0 {
            return Vector3::zeros();
        }

        self.integrator += error * dt;
        let limit = self.gains.integrator_limit;
        self.integrator = self.integrator.map(|v| v.clamp(-limit, limit));

        let derivative = match self.last_error {
            Some(last) => (error - last) / dt,
            None => Vector3::zeros(),
        };
        self.last_error = Some(error);

        error * self.gains.kp + self.integrator * self.gains.ki + derivative * self.gains.kd
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn gains() -> PidGains {
        PidGains {
            kp: 2.0,
            ki: 1.0,
            kd: 0.5,
            integrator_limit: 1.0,
        }
    }

    #[test]
    fn proportional_term_scales_error() {
        let mut pid = Pid::new(PidGains {
            ki: 0.0,
            kd: 0.0,
            ..gains()
        });
        let out = pid.update(Vector3::new(1.5, 0.0, -0.5), 0.01);
        assert_abs_diff_eq!(out.x, 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(out.z, -1.0, epsilon = 1e-12);
    }

    #[test]
    fn integrator_is_clamped() {
        let mut pid = Pid::new(PidGains {
            kp: 0.0,
            kd: 0.0,
            ..gains()
        });
        let mut out = Vector3::zeros();
        for _ in 0..1000 {
            out = pid.update(Vector3::new(10.0, 0.0, 0.0), 0.1);
        }
        // ki * integrator_limit.
        assert_abs_diff_eq!(out.x, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn zero_dt_produces_no_output() {
        let mut pid = Pid::new(gains());
        assert_eq!(pid.update(Vector3::new(1.0, 1.0, 1.0), 0.0), Vector3::zeros());
    }

    #[test]
    fn reset_clears_state() {
        let mut pid = Pid::new(gains());
        pid.update(Vector3::new(5.0, 5.0, 5.0), 0.1);
        pid.reset();
        let out = pid.update(Vector3::zeros(), 0.1);
        assert_eq!(out, Vector3::zeros());
    }
}
