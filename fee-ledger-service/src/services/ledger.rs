//! Ledger arithmetic: settled totals, overpayment checks and derived fields.
//!
//! Everything here is pure so that live writes and the reconciliation sweep
//! share exactly one definition of `total_amount` and `remaining_amount`.
//! Callers are responsible for reading `already_paid` under the ledger group
//! lock.

use crate::error::LedgerError;
use crate::models::PaymentStatus;
use rust_decimal::Decimal;
use std::str::FromStr;

/// Amounts are stored as NUMERIC(14, 2).
pub const AMOUNT_SCALE: u32 = 2;

/// Exclusive upper bound of a NUMERIC(14, 2) column.
const AMOUNT_LIMIT: Decimal = Decimal::from_parts(3_567_587_328, 232, 0, false, 0);

/// Derived fields for one payment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Derivation {
    pub total_amount: Decimal,
    pub already_paid: Decimal,
    pub current_contribution: Decimal,
    pub remaining_amount: Decimal,
}

/// What a record adds to its group's settled total.
pub fn contribution(status: PaymentStatus, amount_paid: Decimal) -> Decimal {
    match status {
        PaymentStatus::Paid => amount_paid,
        PaymentStatus::Pending | PaymentStatus::Failed => Decimal::ZERO,
    }
}

/// Compute derived fields without judging whether the group is overpaid.
///
/// Used by reconciliation, which must not reject historical data.
pub fn derive(
    total_amount: Decimal,
    already_paid: Decimal,
    status: PaymentStatus,
    amount_paid: Decimal,
) -> Derivation {
    let current_contribution = contribution(status, amount_paid);
    let remaining_amount =
        (total_amount - already_paid - current_contribution).max(Decimal::ZERO);

    Derivation {
        total_amount,
        already_paid,
        current_contribution,
        remaining_amount,
    }
}

/// Compute derived fields for a new payment, rejecting it if the group's
/// settled total would exceed the amount due.
pub fn settle(
    total_amount: Decimal,
    already_paid: Decimal,
    status: PaymentStatus,
    amount_paid: Decimal,
) -> Result<Derivation, LedgerError> {
    resettle(total_amount, already_paid, Decimal::ZERO, status, amount_paid)
}

/// Compute derived fields for a rewritten payment whose previous
/// contribution to the group was `previous_contribution`.
///
/// A write is rejected only if it leaves the group above the amount due and
/// raises the settled total. Pending and failed records contribute nothing,
/// so they are always accepted, and lowering a paid record in a group that
/// is already over its schedule amount is allowed.
pub fn resettle(
    total_amount: Decimal,
    already_paid: Decimal,
    previous_contribution: Decimal,
    status: PaymentStatus,
    amount_paid: Decimal,
) -> Result<Derivation, LedgerError> {
    let derivation = derive(total_amount, already_paid, status, amount_paid);
    let settled = derivation.already_paid + derivation.current_contribution;

    if settled > derivation.total_amount && settled > already_paid + previous_contribution {
        return Err(LedgerError::Overpayment {
            already_paid: derivation.already_paid,
            current_contribution: derivation.current_contribution,
            total_amount: derivation.total_amount,
        });
    }

    Ok(derivation)
}

/// Parse and validate a caller-supplied monetary amount.
pub fn parse_amount(raw: &str) -> Result<Decimal, LedgerError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::InvalidAmount("amount is required".to_string()));
    }

    let amount = Decimal::from_str(trimmed)
        .map_err(|_| LedgerError::InvalidAmount(format!("'{}' is not a number", trimmed)))?;

    validate_amount(amount)
}

/// Check that an amount is non-negative and fits the storage precision.
pub fn validate_amount(amount: Decimal) -> Result<Decimal, LedgerError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(LedgerError::InvalidAmount(format!(
            "{} is negative",
            amount
        )));
    }

    if amount.normalize().scale() > AMOUNT_SCALE {
        return Err(LedgerError::InvalidAmount(format!(
            "{} has more than {} decimal places",
            amount, AMOUNT_SCALE
        )));
    }

    if amount >= AMOUNT_LIMIT {
        return Err(LedgerError::InvalidAmount(format!(
            "{} exceeds the maximum storable amount",
            amount
        )));
    }

    Ok(amount.abs())
}
