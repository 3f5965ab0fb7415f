// av_runtime/src/lib.rs

//! Async runtime hosting the onboard autonomy pipeline: periodic tasks for
//! sensor ingest, state estimation, planning, and the two control loops,
//! connected by latest-value publish cells. Sensors and actuators are mock
//! adapters driving a small vehicle model; swapping in real drivers is a
//! matter of implementing the same traits.

pub mod actuator;
pub mod cell;
pub mod cli;
pub mod sensors;
pub mod settings;
pub mod tasks;

pub use tasks::run;
