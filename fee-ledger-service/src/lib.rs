//! Fee Ledger Service - school fee payments recorded against fee schedules,
//! with per-payer settled totals that never exceed the amount due.

pub mod config;
pub mod error;
pub mod grpc;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;
