//! Payment record model.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// How a payment was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    BankTransfer,
    Online,
    Cheque,
}

impl PaymentMethod {
    /// Convert from proto enum value.
    pub fn from_proto(value: i32) -> Option<Self> {
        match value {
            1 => Some(Self::Cash),
            2 => Some(Self::Card),
            3 => Some(Self::BankTransfer),
            4 => Some(Self::Online),
            5 => Some(Self::Cheque),
            _ => None,
        }
    }

    /// Convert to proto enum value.
    pub fn to_proto(self) -> i32 {
        match self {
            Self::Cash => 1,
            Self::Card => 2,
            Self::BankTransfer => 3,
            Self::Online => 4,
            Self::Cheque => 5,
        }
    }

    /// Get string representation for database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cash => "cash",
            Self::Card => "card",
            Self::BankTransfer => "bank_transfer",
            Self::Online => "online",
            Self::Cheque => "cheque",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cash" => Some(Self::Cash),
            "card" => Some(Self::Card),
            "bank_transfer" => Some(Self::BankTransfer),
            "online" => Some(Self::Online),
            "cheque" => Some(Self::Cheque),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Settlement status of a payment attempt. Only `Paid` counts toward the
/// settled total of a ledger group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Paid,
    Pending,
    Failed,
}

impl PaymentStatus {
    /// Convert from proto enum value.
    pub fn from_proto(value: i32) -> Option<Self> {
        match value {
            1 => Some(Self::Paid),
            2 => Some(Self::Pending),
            3 => Some(Self::Failed),
            _ => None,
        }
    }

    /// Convert to proto enum value.
    pub fn to_proto(self) -> i32 {
        match self {
            Self::Paid => 1,
            Self::Pending => 2,
            Self::Failed => 3,
        }
    }

    /// Get string representation for database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paid => "paid",
            Self::Pending => "pending",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "paid" => Some(Self::Paid),
            "pending" => Some(Self::Pending),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Stored payment record. `total_amount` and `remaining_amount` are derived
/// by the ledger engine and never accepted from callers.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub payment_id: Uuid,
    pub tenant_id: Uuid,
    pub payer_id: Uuid,
    pub schedule_id: Uuid,
    pub amount_paid: Decimal,
    pub total_amount: Decimal,
    pub remaining_amount: Decimal,
    pub payment_date: NaiveDate,
    pub method: String,
    pub transaction_id: Option<String>,
    pub status: String,
    pub remarks: String,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl PaymentRecord {
    pub fn parsed_status(&self) -> Option<PaymentStatus> {
        PaymentStatus::parse(&self.status)
    }

    pub fn parsed_method(&self) -> Option<PaymentMethod> {
        PaymentMethod::parse(&self.method)
    }
}

/// Candidate payment submitted for recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPayment {
    pub tenant_id: Uuid,
    pub payer_id: Uuid,
    pub schedule_id: Uuid,
    pub amount_paid: Decimal,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub remarks: String,
    pub payment_date: NaiveDate,
}

/// Caller-supplied fields of an in-place payment update. The ledger group
/// and transaction id of a record never change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentUpdate {
    pub amount_paid: Decimal,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub remarks: String,
    pub payment_date: Option<NaiveDate>,
}

/// Live balance of one ledger group, computed from the current sibling set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerBalance {
    pub payer_id: Uuid,
    pub schedule_id: Uuid,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub pending_amount: Decimal,
    pub remaining_amount: Decimal,
}
