//! Metrics collection and export for buildcron.
//!
//! Wraps the `metrics` crate facade. With the `prometheus` feature the
//! recorder installed by [`init_metrics`] renders Prometheus text.
//!
//! ```rust,ignore
//! use buildcron_metrics::{counter, scheduler};
//!
//! counter!(scheduler::FIRES_TOTAL).increment(1);
//! ```

mod definitions;
mod recorder;

pub use {
    definitions::*,
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

pub use metrics::{counter, gauge, histogram};
