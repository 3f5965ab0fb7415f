// av_core/src/lib.rs

// This file defines the public modules of the autonomy core library.
pub mod config;
pub mod control;
pub mod errors;
pub mod estimation;
pub mod ingest;
pub mod planning;
pub mod prelude;
pub mod safety;
pub mod telemetry;
pub mod types;
