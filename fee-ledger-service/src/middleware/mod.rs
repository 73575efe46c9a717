//! HTTP middleware for the health/metrics side port.

pub mod metrics;

pub use metrics::metrics_middleware;
