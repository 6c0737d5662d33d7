//! Metrics collection and export for courier.
//!
//! Component crates record through the `metrics` crate facade behind their
//! own `metrics` cargo feature. When the `prometheus` feature is enabled here,
//! metrics are exported in Prometheus text format.
//!
//! ```rust,ignore
//! use courier_metrics::{counter, delivery, labels};
//!
//! counter!(delivery::OUTCOMES_TOTAL, labels::CHANNEL => "live", labels::OUTCOME => "failed")
//!     .increment(1);
//! ```

mod definitions;
mod error;
mod recorder;

pub use {
    definitions::*,
    error::{Error, Result},
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
