//! Batch reconciliation of stored derived fields.
//!
//! Walks every payment record in creation order, recomputes `total_amount`
//! and `remaining_amount` from the current schedule amount and the group's
//! settled total, and rewrites records that drifted. Records whose schedule
//! or payer no longer resolves are logged and skipped.
//!
//! Live runs commit one transaction per batch while holding the locks of
//! every ledger group touched by the batch. Dry runs read the whole ledger
//! from a single read-only snapshot and roll it back.

use crate::error::{db_error, LedgerError};
use crate::models::PaymentStatus;
use crate::services::database::{Database, GroupKey, SweepRow};
use crate::services::ledger;
use crate::services::metrics::record_reconciliation;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub const DEFAULT_BATCH_SIZE: i64 = 200;
pub const MAX_BATCH_SIZE: i64 = 5000;

/// Options for one reconciliation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOptions {
    pub batch_size: i64,
    pub dry_run: bool,
}

impl ReconcileOptions {
    /// Non-positive batch sizes fall back to the default; oversized ones are capped.
    pub fn new(batch_size: i64, dry_run: bool) -> Self {
        let batch_size = if batch_size <= 0 {
            DEFAULT_BATCH_SIZE
        } else {
            batch_size.min(MAX_BATCH_SIZE)
        };
        Self {
            batch_size,
            dry_run,
        }
    }
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE, false)
    }
}

/// A record whose derived fields differ from their recomputed values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentChange {
    pub payment_id: Uuid,
    pub old_total_amount: Decimal,
    pub new_total_amount: Decimal,
    pub old_remaining_amount: Decimal,
    pub new_remaining_amount: Decimal,
}

/// Outcome of a reconciliation run. In dry-run mode `updated` counts the
/// records that would have been rewritten and `changes` lists them; live
/// runs log applied changes per batch and return counts only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub dry_run: bool,
    pub reviewed: u64,
    pub updated: u64,
    pub skipped: u64,
    pub changes: Vec<PaymentChange>,
}

impl ReconcileReport {
    fn absorb(&mut self, batch: BatchReview) {
        self.reviewed += batch.reviewed;
        self.skipped += batch.skipped;
        self.updated += batch.changes.len() as u64;
        if self.dry_run {
            self.changes.extend(batch.changes);
        }
    }
}

impl fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = if self.dry_run { "would update" } else { "updated" };
        write!(
            f,
            "reviewed {} payment records, {} {}, skipped {}",
            self.reviewed, verb, self.updated, self.skipped
        )
    }
}

/// Result of reviewing one batch against a set of group totals.
#[derive(Debug, Default)]
struct BatchReview {
    reviewed: u64,
    skipped: u64,
    changes: Vec<PaymentChange>,
}

/// Groups in `rows` that can be recomputed, deduplicated and sorted.
fn resolvable_groups(rows: &[SweepRow]) -> Vec<GroupKey> {
    rows.iter()
        .filter(|row| row.is_resolvable())
        .map(SweepRow::group)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Recompute one record. Returns `None` when it cannot be resolved.
fn recompute(row: &SweepRow, group_paid: &HashMap<GroupKey, Decimal>) -> Option<ledger::Derivation> {
    let schedule_amount = row.schedule_amount?;
    if !row.payer_present {
        return None;
    }
    let status = PaymentStatus::parse(&row.status)?;

    let group_total = group_paid.get(&row.group()).copied().unwrap_or(Decimal::ZERO);
    let already_paid = group_total - ledger::contribution(status, row.amount_paid);

    Some(ledger::derive(schedule_amount, already_paid, status, row.amount_paid))
}

/// Compare each row's stored derived fields against their recomputed values.
fn review_batch(rows: &[SweepRow], group_paid: &HashMap<GroupKey, Decimal>) -> BatchReview {
    let mut review = BatchReview::default();

    for row in rows {
        review.reviewed += 1;

        let Some(derived) = recompute(row, group_paid) else {
            warn!(
                payment_id = %row.payment_id,
                payer_id = %row.payer_id,
                schedule_id = %row.schedule_id,
                schedule_present = row.schedule_amount.is_some(),
                payer_present = row.payer_present,
                status = %row.status,
                "Skipping unresolvable payment record"
            );
            review.skipped += 1;
            continue;
        };

        if derived.total_amount != row.total_amount
            || derived.remaining_amount != row.remaining_amount
        {
            review.changes.push(PaymentChange {
                payment_id: row.payment_id,
                old_total_amount: row.total_amount,
                new_total_amount: derived.total_amount,
                old_remaining_amount: row.remaining_amount,
                new_remaining_amount: derived.remaining_amount,
            });
        }
    }

    review
}

fn cursor_after(rows: &[SweepRow]) -> Option<(DateTime<Utc>, Uuid)> {
    rows.last().map(|row| (row.created_utc, row.payment_id))
}

/// Runs reconciliation sweeps against the ledger database.
#[derive(Clone)]
pub struct Reconciler {
    db: Arc<Database>,
}

impl Reconciler {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Run one full sweep over all payment records.
    #[instrument(skip(self), fields(dry_run = options.dry_run, batch_size = options.batch_size))]
    pub async fn run(&self, options: ReconcileOptions) -> Result<ReconcileReport, LedgerError> {
        info!("Starting reconciliation");

        let report = if options.dry_run {
            self.run_dry(options.batch_size).await?
        } else {
            self.run_live(options.batch_size).await?
        };

        info!(
            reviewed = report.reviewed,
            updated = report.updated,
            skipped = report.skipped,
            "Reconciliation finished"
        );

        Ok(report)
    }

    async fn run_dry(&self, batch_size: i64) -> Result<ReconcileReport, LedgerError> {
        let mut report = ReconcileReport {
            dry_run: true,
            ..Default::default()
        };

        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to open snapshot", e))?;

        let mut cursor = None;
        loop {
            let page = Database::sweep_page(&mut tx, cursor, batch_size).await?;
            if page.is_empty() {
                break;
            }
            cursor = cursor_after(&page);

            let groups = resolvable_groups(&page);
            let totals = Database::group_paid_totals(&mut tx, &groups).await?;
            let review = review_batch(&page, &totals);

            record_reconciliation(
                "dry_run",
                review.reviewed,
                review.changes.len() as u64,
                review.skipped,
            );
            report.absorb(review);

            if (page.len() as i64) < batch_size {
                break;
            }
        }

        tx.rollback()
            .await
            .map_err(|e| db_error("Failed to release snapshot", e))?;

        Ok(report)
    }

    async fn run_live(&self, batch_size: i64) -> Result<ReconcileReport, LedgerError> {
        let mut report = ReconcileReport::default();
        let mut cursor = None;

        loop {
            let mut tx = self
                .db
                .pool()
                .begin()
                .await
                .map_err(|e| db_error("Failed to begin transaction", e))?;

            let page = Database::sweep_page(&mut tx, cursor, batch_size).await?;
            if page.is_empty() {
                tx.rollback()
                    .await
                    .map_err(|e| db_error("Failed to end transaction", e))?;
                break;
            }
            cursor = cursor_after(&page);
            let full_page = page.len() as i64 == batch_size;

            let groups = resolvable_groups(&page);
            Database::lock_groups(&mut tx, &groups).await?;

            // Re-read under the group locks; writers may have committed since the page read.
            let ids: Vec<Uuid> = page.iter().map(|row| row.payment_id).collect();
            let rows = Database::sweep_rows(&mut tx, &ids).await?;
            let totals = Database::group_paid_totals(&mut tx, &groups).await?;
            let mut review = review_batch(&rows, &totals);
            review.reviewed += (page.len() - rows.len()) as u64;

            for change in &review.changes {
                Database::write_derived(
                    &mut tx,
                    change.payment_id,
                    change.new_total_amount,
                    change.new_remaining_amount,
                )
                .await?;
            }

            tx.commit()
                .await
                .map_err(|e| db_error("Failed to commit transaction", e))?;

            for change in &review.changes {
                info!(
                    payment_id = %change.payment_id,
                    old_total_amount = %change.old_total_amount,
                    new_total_amount = %change.new_total_amount,
                    old_remaining_amount = %change.old_remaining_amount,
                    new_remaining_amount = %change.new_remaining_amount,
                    "Payment record reconciled"
                );
            }

            info!(
                reviewed = review.reviewed,
                updated = review.changes.len(),
                skipped = review.skipped,
                "Reconciliation batch committed"
            );

            record_reconciliation(
                "live",
                review.reviewed,
                review.changes.len() as u64,
                review.skipped,
            );
            report.absorb(review);

            if !full_page {
                break;
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn row(
        payer_id: Uuid,
        schedule_id: Uuid,
        amount_paid: Decimal,
        status: &str,
        stored: (Decimal, Decimal),
        schedule_amount: Option<Decimal>,
    ) -> SweepRow {
        SweepRow {
            payment_id: Uuid::new_v4(),
            payer_id,
            schedule_id,
            amount_paid,
            status: status.to_string(),
            total_amount: stored.0,
            remaining_amount: stored.1,
            created_utc: Utc::now(),
            schedule_amount,
            payer_present: true,
        }
    }

    fn totals_of(rows: &[SweepRow]) -> HashMap<GroupKey, Decimal> {
        let mut totals = HashMap::new();
        for r in rows.iter().filter(|r| r.status == "paid") {
            *totals.entry(r.group()).or_insert(Decimal::ZERO) += r.amount_paid;
        }
        totals
    }

    #[test]
    fn options_fall_back_to_defaults() {
        assert_eq!(ReconcileOptions::new(0, true).batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(ReconcileOptions::new(-5, false).batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(ReconcileOptions::new(1_000_000, false).batch_size, MAX_BATCH_SIZE);
        assert_eq!(ReconcileOptions::new(50, false).batch_size, 50);
    }

    #[test]
    fn consistent_records_produce_no_changes() {
        let (payer, schedule) = (Uuid::new_v4(), Uuid::new_v4());
        let rows = vec![
            row(payer, schedule, dec!(3000.00), "paid", (dec!(5000.00), dec!(0.00)), Some(dec!(5000.00))),
            row(payer, schedule, dec!(2000.00), "paid", (dec!(5000.00), dec!(0.00)), Some(dec!(5000.00))),
        ];

        let review = review_batch(&rows, &totals_of(&rows));
        assert_eq!(review.reviewed, 2);
        assert!(review.changes.is_empty());
    }

    #[test]
    fn schedule_change_is_propagated_to_every_record() {
        let (payer, schedule) = (Uuid::new_v4(), Uuid::new_v4());
        // Stored against a 5000.00 schedule which now reads 6000.00.
        let rows = vec![
            row(payer, schedule, dec!(3000.00), "paid", (dec!(5000.00), dec!(2000.00)), Some(dec!(6000.00))),
            row(payer, schedule, dec!(500.00), "pending", (dec!(5000.00), dec!(2000.00)), Some(dec!(6000.00))),
        ];

        let review = review_batch(&rows, &totals_of(&rows));
        assert_eq!(review.changes.len(), 2);
        for change in &review.changes {
            assert_eq!(change.new_total_amount, dec!(6000.00));
            assert_eq!(change.new_remaining_amount, dec!(3000.00));
        }
    }

    #[test]
    fn applying_changes_makes_the_next_review_idempotent() {
        let (payer, schedule) = (Uuid::new_v4(), Uuid::new_v4());
        let mut rows = vec![
            row(payer, schedule, dec!(1000.00), "paid", (dec!(1.00), dec!(1.00)), Some(dec!(4000.00))),
            row(payer, schedule, dec!(1000.00), "failed", (dec!(1.00), dec!(1.00)), Some(dec!(4000.00))),
        ];
        let totals = totals_of(&rows);

        let first = review_batch(&rows, &totals);
        assert_eq!(first.changes.len(), 2);
        for change in first.changes {
            let r = rows.iter_mut().find(|r| r.payment_id == change.payment_id).unwrap();
            r.total_amount = change.new_total_amount;
            r.remaining_amount = change.new_remaining_amount;
        }

        let second = review_batch(&rows, &totals);
        assert!(second.changes.is_empty());
        assert_eq!(second.reviewed, 2);
    }

    #[test]
    fn over_settled_groups_floor_at_zero_instead_of_failing() {
        let (payer, schedule) = (Uuid::new_v4(), Uuid::new_v4());
        let rows = vec![
            row(payer, schedule, dec!(3000.00), "paid", (dec!(5000.00), dec!(0.00)), Some(dec!(1000.00))),
            row(payer, schedule, dec!(2000.00), "paid", (dec!(5000.00), dec!(0.00)), Some(dec!(1000.00))),
        ];

        let review = review_batch(&rows, &totals_of(&rows));
        assert_eq!(review.changes.len(), 2);
        assert!(review
            .changes
            .iter()
            .all(|c| c.new_remaining_amount == Decimal::ZERO && c.new_total_amount == dec!(1000.00)));
    }

    #[test]
    fn dangling_references_are_skipped() {
        let (payer, schedule) = (Uuid::new_v4(), Uuid::new_v4());
        let orphan = row(payer, schedule, dec!(10.00), "paid", (dec!(5.00), dec!(5.00)), None);
        let mut payerless = row(payer, schedule, dec!(10.00), "paid", (dec!(5.00), dec!(5.00)), Some(dec!(100.00)));
        payerless.payer_present = false;
        let rows = vec![orphan, payerless];

        let review = review_batch(&rows, &totals_of(&rows));
        assert_eq!(review.reviewed, 2);
        assert_eq!(review.skipped, 2);
        assert!(review.changes.is_empty());
        assert!(resolvable_groups(&rows).is_empty());
    }

    #[test]
    fn resolvable_groups_are_sorted_and_unique() {
        let schedule = Uuid::new_v4();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let rows = vec![
            row(b, schedule, dec!(1.00), "paid", (dec!(1.00), dec!(0.00)), Some(dec!(1.00))),
            row(a, schedule, dec!(1.00), "paid", (dec!(1.00), dec!(0.00)), Some(dec!(1.00))),
            row(b, schedule, dec!(1.00), "pending", (dec!(1.00), dec!(0.00)), Some(dec!(1.00))),
        ];

        let groups = resolvable_groups(&rows);
        assert_eq!(groups.len(), 2);
        assert!(groups[0] < groups[1]);
    }

    #[test]
    fn live_reports_keep_counts_only() {
        let schedule = Uuid::new_v4();
        let rows = vec![
            row(Uuid::new_v4(), schedule, dec!(100.00), "paid", (dec!(900.00), dec!(0.00)), Some(dec!(1000.00))),
        ];
        let totals = HashMap::from([((rows[0].payer_id, schedule), dec!(100.00))]);

        let mut live = ReconcileReport::default();
        live.absorb(review_batch(&rows, &totals));
        live.absorb(review_batch(&rows, &totals));
        assert_eq!(live.updated, 2);
        assert!(live.changes.is_empty());

        let mut dry = ReconcileReport {
            dry_run: true,
            ..Default::default()
        };
        dry.absorb(review_batch(&rows, &totals));
        assert_eq!(dry.updated, 1);
        assert_eq!(dry.changes.len(), 1);
        assert_eq!(dry.changes[0].new_remaining_amount, dec!(900.00));
    }

    #[test]
    fn report_summary_reflects_mode() {
        let mut report = ReconcileReport {
            dry_run: true,
            reviewed: 10,
            updated: 3,
            skipped: 1,
            changes: Vec::new(),
        };
        assert_eq!(report.to_string(), "reviewed 10 payment records, would update 3, skipped 1");
        report.dry_run = false;
        assert_eq!(report.to_string(), "reviewed 10 payment records, updated 3, skipped 1");
    }
}
