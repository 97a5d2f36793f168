//! 🚚 lvx — split records out of a byte stream, fan them out to sinks,
//! keep the time-partitioned indices tidy. That's the whole job. 🦆

pub mod app_config;
pub mod common;
pub mod lifecycle;
pub mod splitter;
pub mod transport;

mod mux;
mod pipeline;
mod sinks;

pub use pipeline::{Pipeline, ShutdownOutcome, run};
