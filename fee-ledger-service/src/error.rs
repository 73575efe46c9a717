//! Domain errors raised by the fee ledger.

use rust_decimal::Decimal;
use service_core::error::AppError;
use service_core::grpc::IntoStatus;
use thiserror::Error;
use tonic::Status;
use uuid::Uuid;

/// gRPC metadata keys carrying the figures behind an overpayment rejection.
pub const ALREADY_PAID_KEY: &str = "x-already-paid";
pub const CURRENT_CONTRIBUTION_KEY: &str = "x-current-contribution";
pub const TOTAL_AMOUNT_KEY: &str = "x-total-amount";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{0} not found")]
    NotFound(String),

    #[error(
        "Overpayment: already paid {already_paid} plus this payment {current_contribution} exceeds amount due {total_amount}"
    )]
    Overpayment {
        already_paid: Decimal,
        current_contribution: Decimal,
        total_amount: Decimal,
    },

    #[error("Transaction id '{0}' has already been recorded")]
    DuplicateTransactionId(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Fee schedule {0} is archived")]
    ScheduleArchived(Uuid),

    #[error("Fee schedule {0} already has payments; its amount cannot change")]
    ScheduleInUse(Uuid),

    #[error(transparent)]
    App(#[from] AppError),
}

impl LedgerError {
    /// Short label used for error metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Overpayment { .. } => "overpayment",
            Self::DuplicateTransactionId(_) => "duplicate_transaction_id",
            Self::InvalidAmount(_) => "invalid_amount",
            Self::ScheduleArchived(_) => "schedule_archived",
            Self::ScheduleInUse(_) => "schedule_in_use",
            Self::App(_) => "internal",
        }
    }
}

impl From<LedgerError> for Status {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound(_) => Status::not_found(err.to_string()),
            LedgerError::Overpayment {
                already_paid,
                current_contribution,
                total_amount,
            } => {
                let mut status = Status::failed_precondition(err.to_string());
                let metadata = status.metadata_mut();
                for (key, value) in [
                    (ALREADY_PAID_KEY, already_paid),
                    (CURRENT_CONTRIBUTION_KEY, current_contribution),
                    (TOTAL_AMOUNT_KEY, total_amount),
                ] {
                    if let Ok(value) = value.to_string().parse() {
                        metadata.insert(key, value);
                    }
                }
                status
            }
            LedgerError::DuplicateTransactionId(_) => Status::already_exists(err.to_string()),
            LedgerError::InvalidAmount(_) => Status::invalid_argument(err.to_string()),
            LedgerError::ScheduleArchived(_) | LedgerError::ScheduleInUse(_) => {
                Status::failed_precondition(err.to_string())
            }
            LedgerError::App(app) => app.into_status(),
        }
    }
}

/// Wrap a sqlx error as an infrastructure failure.
pub(crate) fn db_error(context: &str, err: sqlx::Error) -> LedgerError {
    LedgerError::App(AppError::DatabaseError(anyhow::anyhow!(
        "{}: {}",
        context,
        err
    )))
}
