//! Services module for fee-ledger-service.

pub mod database;
pub mod ledger;
pub mod metrics;
pub mod reconcile;

pub use database::Database;
pub use metrics::{get_metrics, init_metrics};
pub use reconcile::{PaymentChange, ReconcileOptions, ReconcileReport, Reconciler};
