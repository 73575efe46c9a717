//! HTTP middleware for the health/metrics side port.

pub mod tracing;
