// av_core/src/ingest/mod.rs

//! Sensor ingest and synchronization.
//!
//! Sources arrive at independent rates and jitter. The synchronizer keeps
//! the two most recent samples per source and, on each estimator tick,
//! produces the best-available set at the tick time: an exact or
//! interpolated sample per source, or a STALE report when nothing arrived
//! within the staleness window. Fully deterministic for a given input
//! stream and window.

use crate::config::SensorConfig;
use crate::errors::AvError;
use crate::types::{SamplePayload, SensorId, SensorSample};

/// How a per-source entry in a [`SyncSet`] was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    /// The buffered sample was used as-is.
    Fresh,
    /// The tick time fell between two buffered samples and the payload was
    /// interpolated (linear for vector quantities, slerp for orientation).
    Interpolated,
}

#[derive(Debug, Clone)]
pub struct SyncedSample {
    pub sample: SensorSample,
    pub status: SourceStatus,
}

/// One source excluded from fusion this tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StaleSource {
    pub source: SensorId,
    /// Seconds since the last accepted sample, or the tick time itself when
    /// the source has never produced one.
    pub age: f64,
}

impl StaleSource {
    pub fn to_error(self) -> AvError {
        AvError::SensorStale {
            sensor: self.source,
            age: self.age,
        }
    }
}

/// The synchronized set handed to the estimator each tick. Stale sources
/// carry no sample and are listed separately for the safety supervisor.
#[derive(Debug, Clone)]
pub struct SyncSet {
    pub timestamp: f64,
    entries: [Option<SyncedSample>; 4],
    stale: Vec<StaleSource>,
}

impl SyncSet {
    /// The synchronized sample for `source`, if it is not stale.
    pub fn get(&self, source: SensorId) -> Option<&SyncedSample> {
        self.entries[source.index()].as_ref()
    }

    /// Sources excluded from fusion this tick for lack of recent data.
    pub fn stale_sources(&self) -> &[StaleSource] {
        &self.stale
    }

    pub fn is_stale(&self, source: SensorId) -> bool {
        self.stale.iter().any(|s| s.source == source)
    }

    /// True when a critical source (IMU, GPS) is stale.
    pub fn critical_stale(&self) -> bool {
        self.stale.iter().any(|s| s.source.is_critical())
    }
}

#[derive(Debug, Default)]
struct SourceBuffer {
    latest: Option<SensorSample>,
    previous: Option<SensorSample>,
}

/// Buffers the most recent sample per source and answers synchronized
/// queries. Side effects are limited to internal buffer mutation.
#[derive(Debug)]
pub struct Synchronizer {
    config: SensorConfig,
    buffers: [SourceBuffer; 4],
    dropped_out_of_order: u64,
}

impl Synchronizer {
    pub fn new(config: SensorConfig) -> Self {
        Self {
            config,
            buffers: Default::default(),
            dropped_out_of_order: 0,
        }
    }

    /// Accepts one sample. Samples older than the buffered latest for their
    /// source are dropped so interpolation time never moves backwards.
    pub fn push(&mut self, sample: SensorSample) {
        let buffer = &mut self.buffers[sample.source.index()];
        if let Some(latest) = &buffer.latest {
            if sample.timestamp <= latest.timestamp {
                self.dropped_out_of_order += 1;
                return;
            }
        }
        buffer.previous = buffer.latest.take();
        buffer.latest = Some(sample);
    }

    pub fn dropped_out_of_order(&self) -> u64 {
        self.dropped_out_of_order
    }

    /// The best-available synchronized set at time `t`.
    pub fn sample_at(&self, t: f64) -> SyncSet {
        let mut entries: [Option<SyncedSample>; 4] = Default::default();
        let mut stale = Vec::new();

        for source in SensorId::ALL {
            let buffer = &self.buffers[source.index()];
            let window = self.config.staleness_window(source);
            match &buffer.latest {
                Some(latest) if t - latest.timestamp <= window => {
                    entries[source.index()] = Some(self.synchronize(buffer, latest, t));
                }
                Some(latest) => stale.push(StaleSource {
                    source,
                    age: t - latest.timestamp,
                }),
                None => stale.push(StaleSource { source, age: t }),
            }
        }

        SyncSet {
            timestamp: t,
            entries,
            stale,
        }
    }

    fn synchronize(&self, buffer: &SourceBuffer, latest: &SensorSample, t: f64) -> SyncedSample {
        // Interpolate only when the tick falls strictly inside the buffered
        // pair; at or past the latest sample, use it unmodified.
        if t < latest.timestamp {
            if let Some(previous) = &buffer.previous {
                if t > previous.timestamp {
                    let span = latest.timestamp - previous.timestamp;
                    let alpha = (t - previous.timestamp) / span;
                    return SyncedSample {
                        sample: SensorSample {
                            source: latest.source,
                            timestamp: t,
                            payload: interpolate_payload(&previous.payload, &latest.payload, alpha),
                            seq: latest.seq,
                        },
                        status: SourceStatus::Interpolated,
                    };
                }
            }
        }
        SyncedSample {
            sample: latest.clone(),
            status: SourceStatus::Fresh,
        }
    }
}

/// Linear interpolation for position/velocity-like quantities, spherical
/// interpolation for orientation.
fn interpolate_payload(a: &SamplePayload, b: &SamplePayload, alpha: f64) -> SamplePayload {
    match (a, b) {
        (
            SamplePayload::Imu {
                accel: aa,
                gyro: ga,
            },
            SamplePayload::Imu {
                accel: ab,
                gyro: gb,
            },
        ) => SamplePayload::Imu {
            accel: aa.lerp(ab, alpha),
            gyro: ga.lerp(gb, alpha),
        },
        (
            SamplePayload::Gps {
                position: pa,
                covariance,
            },
            SamplePayload::Gps { position: pb, .. },
        ) => SamplePayload::Gps {
            position: pa.lerp(pb, alpha),
            covariance: *covariance,
        },
        (SamplePayload::Baro { altitude: za }, SamplePayload::Baro { altitude: zb }) => {
            SamplePayload::Baro {
                altitude: za + (zb - za) * alpha,
            }
        }
        (
            SamplePayload::VisionPose {
                position: pa,
                orientation: qa,
            },
            SamplePayload::VisionPose {
                position: pb,
                orientation: qb,
            },
        ) => SamplePayload::VisionPose {
            position: pa.lerp(pb, alpha),
            orientation: qa.slerp(qb, alpha),
        },
        // Mismatched payloads cannot come from one source; keep the newer.
        _ => b.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::{UnitQuaternion, Vector3};

    fn gps_sample(t: f64, x: f64, seq: u64) -> SensorSample {
        SensorSample {
            source: SensorId::Gps,
            timestamp: t,
            payload: SamplePayload::Gps {
                position: Vector3::new(x, 0.0, 0.0),
                covariance: None,
            },
            seq,
        }
    }

    fn sync() -> Synchronizer {
        Synchronizer::new(SensorConfig::default())
    }

    #[test]
    fn source_without_samples_is_stale() {
        let s = sync();
        let set = s.sample_at(1.0);
        assert!(set.is_stale(SensorId::Gps));
        assert!(set.critical_stale());
        assert!(set.get(SensorId::Gps).is_none());
    }

    #[test]
    fn source_goes_stale_after_three_nominal_periods() {
        let mut s = sync();
        s.push(gps_sample(1.0, 0.0, 0));
        // Window for GPS is 0.2 * 3 = 0.6 s.
        assert!(!s.sample_at(1.59).is_stale(SensorId::Gps));
        assert!(s.sample_at(1.61).is_stale(SensorId::Gps));
    }

    #[test]
    fn stale_report_carries_the_sample_age() {
        let mut s = sync();
        s.push(gps_sample(1.0, 0.0, 0));
        let set = s.sample_at(2.0);
        let report = set
            .stale_sources()
            .iter()
            .find(|r| r.source == SensorId::Gps)
            .unwrap();
        assert_abs_diff_eq!(report.age, 1.0);
        match report.to_error() {
            AvError::SensorStale { sensor, age } => {
                assert_eq!(sensor, SensorId::Gps);
                assert_abs_diff_eq!(age, 1.0);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn interpolates_between_buffered_samples() {
        let mut s = sync();
        s.push(gps_sample(1.0, 0.0, 0));
        s.push(gps_sample(1.1, 1.0, 1));
        let set = s.sample_at(1.05);
        let synced = set.get(SensorId::Gps).unwrap();
        assert_eq!(synced.status, SourceStatus::Interpolated);
        match &synced.sample.payload {
            SamplePayload::Gps { position, .. } => {
                assert_abs_diff_eq!(position.x, 0.5, epsilon = 1e-12)
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn tick_past_latest_uses_it_fresh() {
        let mut s = sync();
        s.push(gps_sample(1.0, 0.0, 0));
        s.push(gps_sample(1.1, 1.0, 1));
        let set = s.sample_at(1.2);
        let synced = set.get(SensorId::Gps).unwrap();
        assert_eq!(synced.status, SourceStatus::Fresh);
        assert_abs_diff_eq!(synced.sample.timestamp, 1.1);
    }

    #[test]
    fn out_of_order_samples_are_dropped() {
        let mut s = sync();
        s.push(gps_sample(2.0, 5.0, 1));
        s.push(gps_sample(1.0, 0.0, 0));
        assert_eq!(s.dropped_out_of_order(), 1);
        let set = s.sample_at(2.0);
        match &set.get(SensorId::Gps).unwrap().sample.payload {
            SamplePayload::Gps { position, .. } => assert_abs_diff_eq!(position.x, 5.0),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn orientation_is_slerped() {
        let mut s = sync();
        let q0 = UnitQuaternion::identity();
        let q1 = UnitQuaternion::from_euler_angles(0.0, 0.0, 1.0);
        s.push(SensorSample {
            source: SensorId::VisionPose,
            timestamp: 1.0,
            payload: SamplePayload::VisionPose {
                position: Vector3::zeros(),
                orientation: q0,
            },
            seq: 0,
        });
        s.push(SensorSample {
            source: SensorId::VisionPose,
            timestamp: 1.1,
            payload: SamplePayload::VisionPose {
                position: Vector3::zeros(),
                orientation: q1,
            },
            seq: 1,
        });
        let set = s.sample_at(1.05);
        match &set.get(SensorId::VisionPose).unwrap().sample.payload {
            SamplePayload::VisionPose { orientation, .. } => {
                assert_abs_diff_eq!(orientation.euler_angles().2, 0.5, epsilon = 1e-9);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn same_stream_yields_same_sets() {
        let build = || {
            let mut s = sync();
            for i in 0..20 {
                s.push(gps_sample(1.0 + i as f64 * 0.2, i as f64, i as u64));
            }
            s
        };
        let (a, b) = (build(), build());
        for tick in 0..40 {
            let t = 1.0 + tick as f64 * 0.11;
            let (sa, sb) = (a.sample_at(t), b.sample_at(t));
            assert_eq!(sa.stale_sources(), sb.stale_sources());
            match (sa.get(SensorId::Gps), sb.get(SensorId::Gps)) {
                (Some(x), Some(y)) => match (&x.sample.payload, &y.sample.payload) {
                    (
                        SamplePayload::Gps { position: px, .. },
                        SamplePayload::Gps { position: py, .. },
                    ) => assert_eq!(px, py),
                    _ => panic!("unexpected payloads"),
                },
                (None, None) => {}
                _ => panic!("divergent staleness"),
            }
        }
    }
}
