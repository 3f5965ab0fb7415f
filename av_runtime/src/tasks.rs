// av_runtime/src/tasks.rs

//! Periodic task wiring. Each pipeline stage runs on its own
//! `tokio::time::interval` with skipped (never bunched) missed ticks and
//! publishes into a latest-value cell; downstream stages read whatever is
//! freshest when their own tick fires. No stage ever blocks waiting for
//! another.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::Result;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use av_core::prelude::*;
use nalgebra::Vector3;

use crate::actuator::{CommandDriver, MockActuator};
use crate::cell::LatestCell;
use crate::sensors::{lock_vehicle, MockVehicle, SensorRig, SharedVehicle};

/// Monotonic mission clock, seconds since runtime start.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    start: Instant,
}

impl Clock {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

/// Supervisor verdict for the cycle: current state plus what the control
/// loops should track.
#[derive(Debug, Clone, Copy)]
pub struct Guidance {
    pub safety: SafetyState,
    pub target: TargetSelection,
    pub timestamp: f64,
}

/// The publish cells connecting the tasks. Each cell has a single writer.
/// Escalated errors go out as telemetry events on the uplink channel, which
/// the link task drains.
pub struct Cells {
    pub sync: Mutex<Synchronizer>,
    pub estimate: LatestCell<StateEstimate>,
    pub guidance: LatestCell<Guidance>,
    pub trajectory: LatestCell<Trajectory>,
    pub setpoint: LatestCell<AttitudeSetpoint>,
    pub plan_report: LatestCell<bool>,
    pub battery: LatestCell<f64>,
    pub summary: LatestCell<StateSummary>,
    pub uplink: mpsc::UnboundedSender<TelemetryEvent>,
}

impl Cells {
    pub fn new(config: &Config) -> (Self, mpsc::UnboundedReceiver<TelemetryEvent>) {
        let (uplink, uplink_rx) = mpsc::unbounded_channel();
        let cells = Self {
            sync: Mutex::new(Synchronizer::new(config.sensors.clone())),
            estimate: LatestCell::new(),
            guidance: LatestCell::new(),
            trajectory: LatestCell::new(),
            setpoint: LatestCell::new(),
            plan_report: LatestCell::new(),
            battery: LatestCell::new(),
            summary: LatestCell::new(),
            uplink,
        };
        (cells, uplink_rx)
    }

    /// Puts an escalated error on the uplink, when it has a wire form.
    fn report(&self, error: &AvError, now: f64) {
        if let Some(event) = TelemetryEvent::from_error(error, now) {
            let _ = self.uplink.send(event);
        }
    }
}

fn period(hz: f64) -> Duration {
    Duration::from_secs_f64(1.0 / hz)
}

fn skipping_interval(hz: f64) -> tokio::time::Interval {
    let mut ticker = interval(period(hz));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// Samples every mock sensor at its nominal period and pushes into the
/// synchronizer. Runs faster than the fastest sensor so jitter stays small.
pub async fn sensor_task(
    config: Config,
    cells: Arc<Cells>,
    vehicle: SharedVehicle,
    mut shutdown: watch::Receiver<bool>,
    clock: Clock,
) {
    let mut rig = SensorRig::new();
    let mut next_due = [0.0f64; SensorId::ALL.len()];
    let mut ticker = skipping_interval(config.rates.ingest_hz);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        let now = clock.now();
        for &source in SensorId::ALL.iter() {
            if now + 1e-9 < next_due[source.index()] {
                continue;
            }
            let sample = {
                let vehicle = lock_vehicle(&vehicle);
                rig.sample(source, &vehicle, now)
            };
            let mut sync = cells.sync.lock().unwrap_or_else(|e| e.into_inner());
            sync.push(sample);
            next_due[source.index()] = now + config.sensors.nominal_period(source);
        }
        cells.battery.publish(lock_vehicle(&vehicle).battery_soc());
    }
}

/// Estimator plus safety supervision. Co-locating the two keeps the
/// supervisor's view of validity and staleness exactly one tick fresh.
pub async fn estimator_task(
    config: Config,
    cells: Arc<Cells>,
    watchdog: Arc<Mutex<Watchdog>>,
    mut shutdown: watch::Receiver<bool>,
    clock: Clock,
) {
    let mut estimator = ErrorStateKf::new(config.filter.clone(), clock.now());
    let mut supervisor = Supervisor::new(config.safety.clone(), config.home_position());
    let mut ticker = skipping_interval(config.rates.estimator_hz);
    let mut last_report_version = 0u64;
    let mut was_invalid = false;
    let mut was_link_down = false;
    let mut stale_latch = [false; SensorId::ALL.len()];

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        let now = clock.now();
        let set = {
            let sync = cells.sync.lock().unwrap_or_else(|e| e.into_inner());
            sync.sample_at(now)
        };
        let mut stale_now = [false; SensorId::ALL.len()];
        for report in set.stale_sources() {
            stale_now[report.source.index()] = true;
            if !stale_latch[report.source.index()] {
                let error = report.to_error();
                warn!("{error}");
                cells.report(&error, now);
            }
        }
        stale_latch = stale_now;

        let estimate = estimator.step(&set, now);
        if !estimate.valid && !was_invalid {
            let error = AvError::EstimateInvalid(now);
            warn!("{error}");
            cells.report(&error, now);
        }
        was_invalid = !estimate.valid;
        cells.estimate.publish(estimate.clone());

        supervisor.observe_health(estimate.valid && !set.critical_stale(), now);

        // A plan report is consumed at most once: the version tells a fresh
        // publication apart from one already counted into the streak.
        let report = match cells.plan_report.read_versioned() {
            Some((flag, version)) if version != last_report_version => {
                last_report_version = version;
                Some(flag)
            }
            _ => None,
        };

        let (link_ok, silence) = {
            let watchdog = watchdog.lock().unwrap_or_else(|e| e.into_inner());
            (!watchdog.timed_out(now), watchdog.silence(now))
        };
        if !link_ok && !was_link_down {
            let error = AvError::LinkTimeout(silence);
            warn!("{error}");
            cells.report(&error, now);
        }
        was_link_down = !link_ok;

        let home = config.home_position();
        let geofence_violated = estimate.valid && {
            let offset = estimate.position - home;
            offset.xy().norm() > config.safety.geofence_radius
                || estimate.position.z > config.safety.max_altitude
        };

        let inputs = SafetyInputs {
            now,
            estimate_valid: estimate.valid,
            critical_sensor_stale: set.critical_stale(),
            target_infeasible: report,
            link_ok,
            battery_soc: cells.battery.read().unwrap_or(1.0),
            geofence_violated,
            navigation_available: !set.is_stale(SensorId::Gps),
            position: Some(estimate.position),
            command: None,
        };
        if let Some(transition) = supervisor.step(&inputs) {
            if transition.from == SafetyState::Degraded && transition.to == SafetyState::Disarmed {
                warn!(
                    "{}",
                    AvError::UnrecoverableEstimatorFailure(config.safety.max_degraded)
                );
            }
            let event = TelemetryEvent::SafetyTransition {
                from: transition.from,
                to: transition.to,
                reason: transition.reason,
                timestamp: transition.timestamp,
            };
            warn!("{event}");
            let _ = cells.uplink.send(event);
        }
        cells.guidance.publish(Guidance {
            safety: supervisor.state(),
            target: supervisor.target_selection(&estimate),
            timestamp: now,
        });
        cells
            .summary
            .publish(StateSummary::new(supervisor.state(), &estimate));
    }
}

/// Replans toward the active target at the planner rate. A failsafe target
/// from the supervisor replaces the mission waypoint transparently.
pub async fn planner_task(
    config: Config,
    cells: Arc<Cells>,
    mut shutdown: watch::Receiver<bool>,
    clock: Clock,
) {
    let planner = Planner::new(config.limits.clone());
    let waypoints = config
        .waypoints
        .iter()
        .map(|w| Vector3::from(*w))
        .collect();
    let mut mission = Mission::new(waypoints, config.limits.acceptance_radius);
    let mut trajectory: Option<Trajectory> = None;
    let plan_period = 1.0 / config.rates.planner_hz;
    let mut ticker = skipping_interval(config.rates.planner_hz);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        let now = clock.now();
        let Some(estimate) = cells.estimate.read() else {
            continue;
        };
        // Planning on extrapolated state is worse than coasting on the last
        // trajectory.
        if !estimate.valid {
            continue;
        }
        let Some(guidance) = cells.guidance.read() else {
            continue;
        };
        let target = match guidance.target {
            TargetSelection::Mission => mission.update(&estimate.position),
            TargetSelection::Failsafe(point) => Some(point),
            TargetSelection::SafeStop => None,
        };
        let Some(target) = target else {
            continue;
        };

        let seed = Planner::seed_from(trajectory.as_ref(), &estimate, now + plan_period);
        let outcome = planner.plan(&seed, target, now);
        if outcome.infeasible {
            let error = AvError::TargetInfeasible {
                requested: outcome.requested_distance,
                granted: outcome.granted_distance,
            };
            warn!("{error}");
            cells.report(&error, now);
        }
        cells.plan_report.publish(outcome.infeasible);
        cells.trajectory.publish(outcome.trajectory.clone());
        trajectory = Some(outcome.trajectory);
    }
}

/// Position and velocity loops at the outer rate.
pub async fn outer_task(
    config: Config,
    cells: Arc<Cells>,
    mut shutdown: watch::Receiver<bool>,
    clock: Clock,
) {
    let mut outer = OuterLoop::new(
        config.gains.clone(),
        config.limits.clone(),
        config.filter.gravity,
    );
    let dt = 1.0 / config.rates.outer_hz;
    let mut ticker = skipping_interval(config.rates.outer_hz);
    let mut was_stale = false;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        let now = clock.now();
        let Some(estimate) = cells.estimate.read() else {
            continue;
        };
        let reference = cells.trajectory.read().and_then(|t| t.sample_at(now));
        let out = outer.step(&estimate, reference.as_ref(), now, dt);
        if out.reference_stale && !was_stale {
            let event = TelemetryEvent::ReferenceStale {
                age_bound: config.gains.reference_timeout,
                timestamp: now,
            };
            warn!("{event}");
            let _ = cells.uplink.send(event);
        }
        was_stale = out.reference_stale;
        for axis in out.saturated {
            let error = AvError::ActuatorSaturation { axis };
            debug!("{error}");
            cells.report(&error, now);
        }
        cells.setpoint.publish(out.setpoint);
    }
}

/// Attitude loop and actuator output at the inner rate. This task owns the
/// command driver, so the safe-stop on shutdown is guaranteed to be the
/// last thing written to the actuators.
pub async fn inner_task(
    config: Config,
    cells: Arc<Cells>,
    vehicle: SharedVehicle,
    mut shutdown: watch::Receiver<bool>,
    clock: Clock,
) {
    let dt = 1.0 / config.rates.inner_hz;
    let mut inner = InnerLoop::new(config.gains.clone(), config.actuators.clone());
    let mut driver = CommandDriver::new(MockActuator::new(vehicle, dt), clock.now());
    let mut ticker = skipping_interval(config.rates.inner_hz);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        let now = clock.now();
        if let Some(guidance) = cells.guidance.read() {
            if matches!(guidance.target, TargetSelection::SafeStop) {
                driver.safe_stop(now);
                continue;
            }
        }
        let Some(estimate) = cells.estimate.read() else {
            continue;
        };
        let setpoint = cells.setpoint.read();
        let out = inner.step(&estimate, setpoint.as_ref(), now);
        driver.drive(&out.command);
    }
    driver.safe_stop(clock.now());
}

/// Mission-link stub. Kicks the watchdog, reports the per-tick state
/// summary at 1 Hz, and relays escalated telemetry events as they arrive;
/// going silent here is what trips the supervisor's link failsafe.
pub async fn link_task(
    cells: Arc<Cells>,
    mut uplink: mpsc::UnboundedReceiver<TelemetryEvent>,
    watchdog: Arc<Mutex<Watchdog>>,
    mut shutdown: watch::Receiver<bool>,
    clock: Clock,
) {
    let mut ticker = skipping_interval(1.0);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                watchdog
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .kick(clock.now());
                if let Some(summary) = cells.summary.read() {
                    info!(
                        safety = %summary.safety,
                        valid = summary.estimate_valid,
                        position = ?summary.position,
                        velocity = ?summary.velocity,
                        "uplink state"
                    );
                }
            }
            Some(event) = uplink.recv() => info!("uplink: {event}"),
            _ = shutdown.changed() => break,
        }
    }
}

/// Spawns the full pipeline and runs until ctrl-c or the optional duration
/// elapses. The actuators are left in the safe-stop pattern on exit.
pub async fn run(config: Config, duration: Option<f64>) -> Result<()> {
    let clock = Clock::start();
    let (cells, uplink_rx) = Cells::new(&config);
    let cells = Arc::new(cells);
    let vehicle: SharedVehicle = Arc::new(Mutex::new(MockVehicle::new(&config)));
    let watchdog = Arc::new(Mutex::new(Watchdog::new(
        config.safety.link_timeout,
        clock.now(),
    )));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    info!(
        waypoints = config.waypoints.len(),
        estimator_hz = config.rates.estimator_hz,
        inner_hz = config.rates.inner_hz,
        "starting autonomy pipeline"
    );

    let handles = vec![
        tokio::spawn(sensor_task(
            config.clone(),
            cells.clone(),
            vehicle.clone(),
            shutdown_rx.clone(),
            clock,
        )),
        tokio::spawn(estimator_task(
            config.clone(),
            cells.clone(),
            watchdog.clone(),
            shutdown_rx.clone(),
            clock,
        )),
        tokio::spawn(planner_task(
            config.clone(),
            cells.clone(),
            shutdown_rx.clone(),
            clock,
        )),
        tokio::spawn(outer_task(
            config.clone(),
            cells.clone(),
            shutdown_rx.clone(),
            clock,
        )),
        tokio::spawn(inner_task(
            config.clone(),
            cells.clone(),
            vehicle.clone(),
            shutdown_rx.clone(),
            clock,
        )),
        tokio::spawn(link_task(
            cells.clone(),
            uplink_rx,
            watchdog,
            shutdown_rx,
            clock,
        )),
    ];

    match duration {
        Some(secs) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs_f64(secs)) => {
                    info!(secs, "duration elapsed");
                }
                result = tokio::signal::ctrl_c() => result?,
            }
        }
        None => tokio::signal::ctrl_c().await?,
    }

    info!("shutting down, safe-stopping actuators");
    let _ = shutdown_tx.send(true);
    for handle in handles {
        let _ = handle.await;
    }

    let vehicle = lock_vehicle(&vehicle);
    info!(
        position = ?vehicle.position,
        battery = vehicle.battery_soc(),
        "pipeline stopped"
    );
    Ok(())
}
