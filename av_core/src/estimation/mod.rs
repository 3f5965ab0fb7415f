// av_core/src/estimation/mod.rs

use crate::ingest::SyncSet;
use crate::types::StateEstimate;

/// The contract for any algorithm that performs the state-estimator role.
/// One call per estimator tick; the implementation interprets the
/// synchronized sensor set and returns the published snapshot.
pub trait Estimator: Send {
    /// Advances the filter to `now` with the synchronized set and returns
    /// the estimate to publish. Must never block and must produce an
    /// output every tick, valid or not.
    fn step(&mut self, set: &SyncSet, now: f64) -> StateEstimate;

    /// The most recently published snapshot.
    fn estimate(&self) -> StateEstimate;
}

pub mod eskf;
