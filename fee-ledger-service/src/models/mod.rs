//! Domain models for fee-ledger-service.

mod payer;
mod payment;
mod schedule;

pub use payer::{Payer, RegisterPayer};
pub use payment::{
    LedgerBalance, NewPayment, PaymentMethod, PaymentRecord, PaymentStatus, PaymentUpdate,
};
pub use schedule::{
    BillingFrequency, CreateFeeSchedule, FeeCategory, FeeSchedule, ScheduleFilter,
    UpdateFeeSchedule,
};
