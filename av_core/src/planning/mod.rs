// av_core/src/planning/mod.rs

//! Short-horizon trajectory planning.
//!
//! Each cycle, a quintic (minimum-jerk style) segment is fit from the seed
//! state to the target and sampled over a bounded horizon. Re-planning
//! seeds from the previous cycle's predicted state at the next tick, not
//! the raw instantaneous estimate, so consecutive plans join without
//! discontinuities.
//!
//! Precondition: the planner must not be asked for a plan while the state
//! estimate is invalid; callers skip the planning tick instead.

use nalgebra::Vector3;

use crate::config::TrajectoryLimits;
use crate::types::{StateEstimate, Trajectory, TrajectoryPoint};

/// A quintic polynomial per axis from (p0, v0, a0) at t=0 to (pf, 0, 0) at
/// t=T. Rest boundary conditions at the far end suit waypoint and hold
/// targets alike.
struct QuinticSegment {
    c0: Vector3<f64>,
    c1: Vector3<f64>,
    c2: Vector3<f64>,
    c3: Vector3<f64>,
    c4: Vector3<f64>,
    c5: Vector3<f64>,
    duration: f64,
}

impl QuinticSegment {
    fn fit(seed: &TrajectoryPoint, target: Vector3<f64>, duration: f64) -> Self {
        let t = duration;
        let t2 = t * t;
        let t3 = t2 * t;

        let c0 = seed.position;
        let c1 = seed.velocity;
        let c2 = seed.acceleration * 0.5;

        // Remaining displacement once the seed state has been accounted for.
        let d = target - c0 - c1 * t - c2 * t2;
        let dv = -c1 - seed.acceleration * t;
        let da = -seed.acceleration;

        let c3 = (d * 10.0 - dv * 4.0 * t + da * 0.5 * t2) / t3;
        let c4 = (d * -15.0 + dv * 7.0 * t - da * t2) / (t3 * t);
        let c5 = (d * 6.0 - dv * 3.0 * t + da * 0.5 * t2) / (t3 * t2);

        Self {
            c0,
            c1,
            c2,
            c3,
            c4,
            c5,
            duration,
        }
    }

    fn position(&self, t: f64) -> Vector3<f64> {
        self.c0
            + self.c1 * t
            + self.c2 * t.powi(2)
            + self.c3 * t.powi(3)
            + self.c4 * t.powi(4)
            + self.c5 * t.powi(5)
    }

    fn velocity(&self, t: f64) -> Vector3<f64> {
        self.c1
            + self.c2 * 2.0 * t
            + self.c3 * 3.0 * t.powi(2)
            + self.c4 * 4.0 * t.powi(3)
            + self.c5 * 5.0 * t.powi(4)
    }

    fn acceleration(&self, t: f64) -> Vector3<f64> {
        self.c2 * 2.0
            + self.c3 * 6.0 * t
            + self.c4 * 12.0 * t.powi(2)
            + self.c5 * 20.0 * t.powi(3)
    }

    fn jerk(&self, t: f64) -> Vector3<f64> {
        self.c3 * 6.0 + self.c4 * 24.0 * t + self.c5 * 60.0 * t.powi(2)
    }

    /// Peak velocity/acceleration/jerk norms over the sampled profile.
    fn peaks(&self, step: f64) -> (f64, f64, f64) {
        let (mut v, mut a, mut j) = (0.0f64, 0.0f64, 0.0f64);
        let mut t = 0.0;
        while t <= self.duration + 1e-9 {
            v = v.max(self.velocity(t).norm());
            a = a.max(self.acceleration(t).norm());
            j = j.max(self.jerk(t).norm());
            t += step;
        }
        (v, a, j)
    }
}

/// Outcome of one planning cycle. `infeasible` mirrors the trajectory flag
/// and carries the requested/granted distances for the telemetry report.
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub trajectory: Trajectory,
    pub infeasible: bool,
    pub requested_distance: f64,
    pub granted_distance: f64,
}

pub struct Planner {
    limits: TrajectoryLimits,
}

impl Planner {
    pub fn new(limits: TrajectoryLimits) -> Self {
        Self { limits }
    }

    /// The seed for the next planning cycle: the previous plan's predicted
    /// state at the next tick. Falls back to the current estimate on the
    /// first cycle or after a gap.
    pub fn seed_from(
        previous: Option<&Trajectory>,
        estimate: &StateEstimate,
        next_tick: f64,
    ) -> TrajectoryPoint {
        if let Some(traj) = previous {
            if let (Some(start), Some(end)) = (traj.start_time(), traj.end_time()) {
                if next_tick >= start && next_tick <= end {
                    if let Some(point) = traj.sample_at(next_tick) {
                        return point;
                    }
                }
            }
        }
        TrajectoryPoint {
            t: next_tick,
            position: estimate.position,
            velocity: estimate.velocity,
            acceleration: Vector3::zeros(),
        }
    }

    /// Plans a horizon-bounded trajectory from `seed` toward `target`,
    /// starting at `now`. A target unreachable within the dynamic limits is
    /// clipped to the nearest feasible point and reported, never an error.
    pub fn plan(&self, seed: &TrajectoryPoint, target: Vector3<f64>, now: f64) -> PlanOutcome {
        let requested = (target - seed.position).norm();
        // Horizon long enough that a rest-to-rest quintic over `requested`
        // meters stays inside each limit (peak velocity 15d/8T, peak
        // acceleration ~5.77d/T^2, peak jerk 60d/T^3), capped at the
        // configured maximum; targets needing more time get clipped below.
        let t_vel = 1.875 * requested / self.limits.max_velocity;
        let t_acc = (5.774 * requested / self.limits.max_acceleration).sqrt();
        let t_jerk = (60.0 * requested / self.limits.max_jerk).cbrt();
        let horizon = t_vel
            .max(t_acc)
            .max(t_jerk)
            .clamp(self.limits.min_horizon, self.limits.max_horizon);

        let mut goal = target;
        let mut infeasible = false;
        let mut segment = QuinticSegment::fit(seed, goal, horizon);

        // Clip by shrinking the commanded displacement until the sampled
        // profile respects every limit. Displacement scales the profile
        // nearly linearly for a fixed horizon, so this converges fast.
        for _ in 0..12 {
            let (v, a, j) = segment.peaks(self.limits.sample_step);
            let worst = (v / self.limits.max_velocity)
                .max(a / self.limits.max_acceleration)
                .max(j / self.limits.max_jerk);
            if worst <= 1.0 {
                break;
            }
            infeasible = true;
            let shrink = (1.0 / worst) * 0.9;
            goal = seed.position + (goal - seed.position) * shrink;
            segment = QuinticSegment::fit(seed, goal, horizon);
        }

        let mut points = Vec::new();
        let mut t = 0.0;
        while t < segment.duration {
            points.push(TrajectoryPoint {
                t: now + t,
                position: segment.position(t),
                velocity: segment.velocity(t),
                acceleration: segment.acceleration(t),
            });
            t += self.limits.sample_step;
        }
        points.push(TrajectoryPoint {
            t: now + segment.duration,
            position: segment.position(segment.duration),
            velocity: segment.velocity(segment.duration),
            acceleration: segment.acceleration(segment.duration),
        });

        let granted = (goal - seed.position).norm();
        PlanOutcome {
            trajectory: Trajectory {
                points,
                target: goal,
                infeasible,
            },
            infeasible,
            requested_distance: requested,
            granted_distance: granted,
        }
    }
}

/// An ordered list of mission waypoints with arrival handling.
#[derive(Debug, Clone)]
pub struct Mission {
    waypoints: Vec<Vector3<f64>>,
    index: usize,
    acceptance_radius: f64,
}

impl Mission {
    pub fn new(waypoints: Vec<Vector3<f64>>, acceptance_radius: f64) -> Self {
        Self {
            waypoints,
            index: 0,
            acceptance_radius,
        }
    }

    /// Advances past any waypoint within the acceptance radius and returns
    /// the active target, or `None` once the mission is complete.
    pub fn update(&mut self, position: &Vector3<f64>) -> Option<Vector3<f64>> {
        while let Some(wp) = self.waypoints.get(self.index) {
            if (wp - position).norm() <= self.acceptance_radius {
                self.index += 1;
            } else {
                return Some(*wp);
            }
        }
        None
    }

    pub fn current_target(&self) -> Option<Vector3<f64>> {
        self.waypoints.get(self.index).copied()
    }

    pub fn is_complete(&self) -> bool {
        self.index >= self.waypoints.len()
    }
}
