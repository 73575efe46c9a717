//! Payer model.
//!
//! Payers are owned by the school's user management; this service only keeps
//! enough of them to validate payment references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Payer {
    pub payer_id: Uuid,
    pub tenant_id: Uuid,
    pub display_name: String,
    pub cohort_label: String,
    pub created_utc: DateTime<Utc>,
}

/// Input for registering a payer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterPayer {
    pub tenant_id: Uuid,
    pub display_name: String,
    pub cohort_label: String,
}
