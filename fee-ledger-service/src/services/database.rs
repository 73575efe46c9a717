//! Database service for fee-ledger-service.
//!
//! Every write to a ledger group runs inside one transaction that holds the
//! group's row in `ledger_groups` with `FOR UPDATE`. Reading the settled total
//! and writing the new record therefore happen atomically with respect to all
//! other writers of the same `(payer, schedule)` pair.

use crate::error::{db_error, LedgerError};
use crate::models::{
    CreateFeeSchedule, FeeSchedule, LedgerBalance, NewPayment, Payer, PaymentRecord,
    PaymentUpdate, RegisterPayer, ScheduleFilter, UpdateFeeSchedule,
};
use crate::services::ledger;
use crate::services::metrics::DB_QUERY_DURATION;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// Name of the unique constraint on `payment_records.transaction_id`.
const TRANSACTION_ID_CONSTRAINT: &str = "payment_records_transaction_id_key";

/// Ledger group key: `(payer_id, schedule_id)`.
pub type GroupKey = (Uuid, Uuid);

/// A payment record as seen by the reconciliation sweep, joined with the
/// current schedule amount. `schedule_amount` is `None` when the schedule
/// reference cannot be resolved.
#[derive(Debug, Clone, FromRow)]
pub struct SweepRow {
    pub payment_id: Uuid,
    pub payer_id: Uuid,
    pub schedule_id: Uuid,
    pub amount_paid: Decimal,
    pub status: String,
    pub total_amount: Decimal,
    pub remaining_amount: Decimal,
    pub created_utc: DateTime<Utc>,
    pub schedule_amount: Option<Decimal>,
    pub payer_present: bool,
}

impl SweepRow {
    pub fn group(&self) -> GroupKey {
        (self.payer_id, self.schedule_id)
    }

    /// Whether the record's references resolve well enough to recompute it.
    pub fn is_resolvable(&self) -> bool {
        self.schedule_amount.is_some() && self.payer_present
    }
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "fee-ledger-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Payer Operations
    // -------------------------------------------------------------------------

    /// Register a payer.
    #[instrument(skip(self, input), fields(tenant_id = %input.tenant_id))]
    pub async fn register_payer(&self, input: &RegisterPayer) -> Result<Payer, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["register_payer"])
            .start_timer();

        let payer = sqlx::query_as::<_, Payer>(
            r#"
            INSERT INTO payers (payer_id, tenant_id, display_name, cohort_label)
            VALUES ($1, $2, $3, $4)
            RETURNING payer_id, tenant_id, display_name, cohort_label, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.tenant_id)
        .bind(&input.display_name)
        .bind(&input.cohort_label)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to register payer: {}", e)))?;

        timer.observe_duration();

        info!(payer_id = %payer.payer_id, "Payer registered");

        Ok(payer)
    }

    /// Get a payer by ID for a specific tenant.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, payer_id = %payer_id))]
    pub async fn get_payer(
        &self,
        tenant_id: Uuid,
        payer_id: Uuid,
    ) -> Result<Option<Payer>, AppError> {
        sqlx::query_as::<_, Payer>(
            r#"
            SELECT payer_id, tenant_id, display_name, cohort_label, created_utc
            FROM payers
            WHERE tenant_id = $1 AND payer_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(payer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get payer: {}", e)))
    }

    // -------------------------------------------------------------------------
    // Fee Schedule Operations
    // -------------------------------------------------------------------------

    /// Create a fee schedule.
    #[instrument(skip(self, input), fields(tenant_id = %input.tenant_id, cohort = %input.cohort_label))]
    pub async fn create_schedule(&self, input: &CreateFeeSchedule) -> Result<FeeSchedule, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_schedule"])
            .start_timer();

        let schedule = sqlx::query_as::<_, FeeSchedule>(
            r#"
            INSERT INTO fee_schedules (schedule_id, tenant_id, cohort_label, category, amount, frequency, description)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING schedule_id, tenant_id, cohort_label, category, amount, frequency, description, created_utc, updated_utc, archived_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.tenant_id)
        .bind(&input.cohort_label)
        .bind(input.category.as_str())
        .bind(input.amount)
        .bind(input.frequency.as_str())
        .bind(&input.description)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to create fee schedule: {}", e))
        })?;

        timer.observe_duration();

        info!(
            schedule_id = %schedule.schedule_id,
            category = %schedule.category,
            amount = %schedule.amount,
            "Fee schedule created"
        );

        Ok(schedule)
    }

    /// Get a fee schedule by ID for a specific tenant.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, schedule_id = %schedule_id))]
    pub async fn get_schedule(
        &self,
        tenant_id: Uuid,
        schedule_id: Uuid,
    ) -> Result<Option<FeeSchedule>, AppError> {
        sqlx::query_as::<_, FeeSchedule>(
            r#"
            SELECT schedule_id, tenant_id, cohort_label, category, amount, frequency, description, created_utc, updated_utc, archived_utc
            FROM fee_schedules
            WHERE tenant_id = $1 AND schedule_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(schedule_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get fee schedule: {}", e)))
    }

    /// List fee schedules for a tenant with optional filters.
    #[instrument(skip(self, filter), fields(tenant_id = %tenant_id))]
    pub async fn list_schedules(
        &self,
        tenant_id: Uuid,
        filter: &ScheduleFilter,
        page_size: i32,
        page_token: Option<Uuid>,
    ) -> Result<Vec<FeeSchedule>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_schedules"])
            .start_timer();

        let limit = page_size.clamp(1, 100) as i64;

        let schedules = sqlx::query_as::<_, FeeSchedule>(
            r#"
            SELECT schedule_id, tenant_id, cohort_label, category, amount, frequency, description, created_utc, updated_utc, archived_utc
            FROM fee_schedules
            WHERE tenant_id = $1
              AND ($2::varchar IS NULL OR cohort_label = $2)
              AND ($3::varchar IS NULL OR category = $3)
              AND ($4 OR archived_utc IS NULL)
              AND ($5::uuid IS NULL OR schedule_id > $5)
            ORDER BY schedule_id
            LIMIT $6
            "#,
        )
        .bind(tenant_id)
        .bind(filter.cohort_label.as_deref())
        .bind(filter.category.map(|c| c.as_str()))
        .bind(filter.include_archived)
        .bind(page_token)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list fee schedules: {}", e))
        })?;

        timer.observe_duration();

        Ok(schedules)
    }

    /// Update a fee schedule's description and, while no payment references
    /// it, its amount.
    #[instrument(skip(self, update), fields(tenant_id = %tenant_id, schedule_id = %schedule_id))]
    pub async fn update_schedule(
        &self,
        tenant_id: Uuid,
        schedule_id: Uuid,
        update: &UpdateFeeSchedule,
    ) -> Result<FeeSchedule, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_schedule"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        let current = sqlx::query_as::<_, FeeSchedule>(
            r#"
            SELECT schedule_id, tenant_id, cohort_label, category, amount, frequency, description, created_utc, updated_utc, archived_utc
            FROM fee_schedules
            WHERE tenant_id = $1 AND schedule_id = $2
            FOR UPDATE
            "#,
        )
        .bind(tenant_id)
        .bind(schedule_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to lock fee schedule", e))?
        .ok_or_else(|| LedgerError::NotFound(format!("Fee schedule {}", schedule_id)))?;

        if let Some(amount) = update.amount {
            if amount != current.amount {
                let referenced: bool = sqlx::query_scalar(
                    "SELECT EXISTS (SELECT 1 FROM payment_records WHERE schedule_id = $1)",
                )
                .bind(schedule_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| db_error("Failed to check schedule usage", e))?;

                if referenced {
                    return Err(LedgerError::ScheduleInUse(schedule_id));
                }
            }
        }

        let schedule = sqlx::query_as::<_, FeeSchedule>(
            r#"
            UPDATE fee_schedules
            SET amount = COALESCE($3, amount),
                description = COALESCE($4, description),
                updated_utc = NOW()
            WHERE tenant_id = $1 AND schedule_id = $2
            RETURNING schedule_id, tenant_id, cohort_label, category, amount, frequency, description, created_utc, updated_utc, archived_utc
            "#,
        )
        .bind(tenant_id)
        .bind(schedule_id)
        .bind(update.amount)
        .bind(update.description.as_deref())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to update fee schedule", e))?;

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit transaction", e))?;

        timer.observe_duration();

        info!(schedule_id = %schedule_id, amount = %schedule.amount, "Fee schedule updated");

        Ok(schedule)
    }

    /// Archive a fee schedule. Archiving is idempotent and keeps all payment
    /// history intact.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, schedule_id = %schedule_id))]
    pub async fn archive_schedule(
        &self,
        tenant_id: Uuid,
        schedule_id: Uuid,
    ) -> Result<FeeSchedule, LedgerError> {
        let schedule = sqlx::query_as::<_, FeeSchedule>(
            r#"
            UPDATE fee_schedules
            SET archived_utc = COALESCE(archived_utc, NOW()),
                updated_utc = NOW()
            WHERE tenant_id = $1 AND schedule_id = $2
            RETURNING schedule_id, tenant_id, cohort_label, category, amount, frequency, description, created_utc, updated_utc, archived_utc
            "#,
        )
        .bind(tenant_id)
        .bind(schedule_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to archive fee schedule", e))?
        .ok_or_else(|| LedgerError::NotFound(format!("Fee schedule {}", schedule_id)))?;

        info!(schedule_id = %schedule_id, "Fee schedule archived");

        Ok(schedule)
    }

    // -------------------------------------------------------------------------
    // Payment Operations
    // -------------------------------------------------------------------------

    /// Record a new payment against a ledger group.
    ///
    /// Resolves the schedule amount, sums the group's other `paid` records,
    /// rejects overpayment and inserts the record with derived fields, all
    /// under the group lock.
    #[instrument(
        skip(self, input),
        fields(tenant_id = %input.tenant_id, payer_id = %input.payer_id, schedule_id = %input.schedule_id)
    )]
    pub async fn record_payment(&self, input: &NewPayment) -> Result<PaymentRecord, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_payment"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        if !Self::payer_exists(&mut tx, input.tenant_id, input.payer_id).await? {
            return Err(LedgerError::NotFound(format!("Payer {}", input.payer_id)));
        }

        let schedule = Self::share_schedule(&mut tx, input.tenant_id, input.schedule_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("Fee schedule {}", input.schedule_id)))?;

        if schedule.is_archived() {
            return Err(LedgerError::ScheduleArchived(schedule.schedule_id));
        }

        Self::lock_group(&mut tx, input.payer_id, input.schedule_id).await?;

        let already_paid =
            Self::paid_total(&mut tx, input.payer_id, input.schedule_id, None).await?;
        let derivation = ledger::settle(schedule.amount, already_paid, input.status, input.amount_paid)?;

        let payment = sqlx::query_as::<_, PaymentRecord>(
            r#"
            INSERT INTO payment_records (payment_id, tenant_id, payer_id, schedule_id, amount_paid, total_amount, remaining_amount, payment_date, method, transaction_id, status, remarks)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING payment_id, tenant_id, payer_id, schedule_id, amount_paid, total_amount, remaining_amount, payment_date, method, transaction_id, status, remarks, created_utc, updated_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.tenant_id)
        .bind(input.payer_id)
        .bind(input.schedule_id)
        .bind(input.amount_paid)
        .bind(derivation.total_amount)
        .bind(derivation.remaining_amount)
        .bind(input.payment_date)
        .bind(input.method.as_str())
        .bind(input.transaction_id.as_deref())
        .bind(input.status.as_str())
        .bind(&input.remarks)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err)
                if db_err.is_unique_violation()
                    && db_err.constraint() == Some(TRANSACTION_ID_CONSTRAINT) =>
            {
                LedgerError::DuplicateTransactionId(
                    input.transaction_id.clone().unwrap_or_default(),
                )
            }
            _ => db_error("Failed to insert payment", e),
        })?;

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit transaction", e))?;

        timer.observe_duration();

        info!(
            payment_id = %payment.payment_id,
            status = %payment.status,
            amount_paid = %payment.amount_paid,
            already_paid = %derivation.already_paid,
            remaining_amount = %payment.remaining_amount,
            "Payment recorded"
        );

        Ok(payment)
    }

    /// Update a payment in place. The record's own prior amount is excluded
    /// from the group's settled total before re-validating.
    #[instrument(skip(self, update), fields(tenant_id = %tenant_id, payment_id = %payment_id))]
    pub async fn update_payment(
        &self,
        tenant_id: Uuid,
        payment_id: Uuid,
        update: &PaymentUpdate,
    ) -> Result<PaymentRecord, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_payment"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        let existing = Self::fetch_payment(&mut tx, tenant_id, payment_id, false)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("Payment {}", payment_id)))?;

        let schedule = Self::share_schedule(&mut tx, tenant_id, existing.schedule_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("Fee schedule {}", existing.schedule_id)))?;

        Self::lock_group(&mut tx, existing.payer_id, existing.schedule_id).await?;

        // Re-read under the group lock; a concurrent delete may have won.
        let existing = Self::fetch_payment(&mut tx, tenant_id, payment_id, true)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("Payment {}", payment_id)))?;

        let already_paid = Self::paid_total(
            &mut tx,
            existing.payer_id,
            existing.schedule_id,
            Some(payment_id),
        )
        .await?;
        let previous = existing
            .parsed_status()
            .map(|status| ledger::contribution(status, existing.amount_paid))
            .unwrap_or(Decimal::ZERO);
        let derivation = ledger::resettle(
            schedule.amount,
            already_paid,
            previous,
            update.status,
            update.amount_paid,
        )?;

        let payment = sqlx::query_as::<_, PaymentRecord>(
            r#"
            UPDATE payment_records
            SET amount_paid = $3,
                total_amount = $4,
                remaining_amount = $5,
                payment_date = $6,
                method = $7,
                status = $8,
                remarks = $9,
                updated_utc = NOW()
            WHERE tenant_id = $1 AND payment_id = $2
            RETURNING payment_id, tenant_id, payer_id, schedule_id, amount_paid, total_amount, remaining_amount, payment_date, method, transaction_id, status, remarks, created_utc, updated_utc
            "#,
        )
        .bind(tenant_id)
        .bind(payment_id)
        .bind(update.amount_paid)
        .bind(derivation.total_amount)
        .bind(derivation.remaining_amount)
        .bind(update.payment_date.unwrap_or(existing.payment_date))
        .bind(update.method.as_str())
        .bind(update.status.as_str())
        .bind(&update.remarks)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to update payment", e))?;

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit transaction", e))?;

        timer.observe_duration();

        info!(
            payment_id = %payment_id,
            status = %payment.status,
            amount_paid = %payment.amount_paid,
            remaining_amount = %payment.remaining_amount,
            "Payment updated"
        );

        Ok(payment)
    }

    /// Get a payment by ID for a specific tenant.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, payment_id = %payment_id))]
    pub async fn get_payment(
        &self,
        tenant_id: Uuid,
        payment_id: Uuid,
    ) -> Result<Option<PaymentRecord>, LedgerError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| db_error("Failed to acquire connection", e))?;
        Self::fetch_payment(&mut conn, tenant_id, payment_id, false).await
    }

    /// List a payer's payments in creation order, optionally for one schedule.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, payer_id = %payer_id))]
    pub async fn list_payer_payments(
        &self,
        tenant_id: Uuid,
        payer_id: Uuid,
        schedule_id: Option<Uuid>,
        page_size: i32,
        page_token: Option<Uuid>,
    ) -> Result<Vec<PaymentRecord>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_payer_payments"])
            .start_timer();

        let limit = page_size.clamp(1, 100) as i64;

        let payments = sqlx::query_as::<_, PaymentRecord>(
            r#"
            SELECT payment_id, tenant_id, payer_id, schedule_id, amount_paid, total_amount, remaining_amount, payment_date, method, transaction_id, status, remarks, created_utc, updated_utc
            FROM payment_records
            WHERE tenant_id = $1
              AND payer_id = $2
              AND ($3::uuid IS NULL OR schedule_id = $3)
              AND ($4::uuid IS NULL OR (created_utc, payment_id) > (
                    SELECT created_utc, payment_id FROM payment_records WHERE payment_id = $4
                  ))
            ORDER BY created_utc, payment_id
            LIMIT $5
            "#,
        )
        .bind(tenant_id)
        .bind(payer_id)
        .bind(schedule_id)
        .bind(page_token)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list payments: {}", e)))?;

        timer.observe_duration();

        Ok(payments)
    }

    /// Hard-delete a payment. Sibling records keep their stored derived
    /// values until their next save or reconciliation.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, payment_id = %payment_id))]
    pub async fn delete_payment(&self, tenant_id: Uuid, payment_id: Uuid) -> Result<bool, LedgerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        let Some(existing) = Self::fetch_payment(&mut tx, tenant_id, payment_id, false).await? else {
            return Ok(false);
        };

        Self::lock_group(&mut tx, existing.payer_id, existing.schedule_id).await?;

        let deleted = sqlx::query("DELETE FROM payment_records WHERE tenant_id = $1 AND payment_id = $2")
            .bind(tenant_id)
            .bind(payment_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to delete payment", e))?
            .rows_affected()
            > 0;

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit transaction", e))?;

        if deleted {
            info!(payment_id = %payment_id, "Payment deleted");
        }

        Ok(deleted)
    }

    /// Compute a ledger group's balance from its current records.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, payer_id = %payer_id, schedule_id = %schedule_id))]
    pub async fn ledger_balance(
        &self,
        tenant_id: Uuid,
        payer_id: Uuid,
        schedule_id: Uuid,
    ) -> Result<LedgerBalance, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["ledger_balance"])
            .start_timer();

        if self.get_payer(tenant_id, payer_id).await?.is_none() {
            return Err(LedgerError::NotFound(format!("Payer {}", payer_id)));
        }

        let schedule = self
            .get_schedule(tenant_id, schedule_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("Fee schedule {}", schedule_id)))?;

        let (paid_amount, pending_amount): (Decimal, Decimal) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(amount_paid) FILTER (WHERE status = 'paid'), 0),
                   COALESCE(SUM(amount_paid) FILTER (WHERE status = 'pending'), 0)
            FROM payment_records
            WHERE tenant_id = $1 AND payer_id = $2 AND schedule_id = $3
            "#,
        )
        .bind(tenant_id)
        .bind(payer_id)
        .bind(schedule_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("Failed to compute ledger balance", e))?;

        timer.observe_duration();

        Ok(LedgerBalance {
            payer_id,
            schedule_id,
            total_amount: schedule.amount,
            paid_amount,
            pending_amount,
            remaining_amount: (schedule.amount - paid_amount).max(Decimal::ZERO),
        })
    }

    // -------------------------------------------------------------------------
    // Ledger Group Primitives
    // -------------------------------------------------------------------------

    async fn payer_exists(
        conn: &mut PgConnection,
        tenant_id: Uuid,
        payer_id: Uuid,
    ) -> Result<bool, LedgerError> {
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM payers WHERE tenant_id = $1 AND payer_id = $2)")
            .bind(tenant_id)
            .bind(payer_id)
            .fetch_one(conn)
            .await
            .map_err(|e| db_error("Failed to look up payer", e))
    }

    /// Read a schedule with a share lock so its amount cannot change until
    /// the surrounding transaction ends.
    async fn share_schedule(
        conn: &mut PgConnection,
        tenant_id: Uuid,
        schedule_id: Uuid,
    ) -> Result<Option<FeeSchedule>, LedgerError> {
        sqlx::query_as::<_, FeeSchedule>(
            r#"
            SELECT schedule_id, tenant_id, cohort_label, category, amount, frequency, description, created_utc, updated_utc, archived_utc
            FROM fee_schedules
            WHERE tenant_id = $1 AND schedule_id = $2
            FOR SHARE
            "#,
        )
        .bind(tenant_id)
        .bind(schedule_id)
        .fetch_optional(conn)
        .await
        .map_err(|e| db_error("Failed to read fee schedule", e))
    }

    async fn fetch_payment(
        conn: &mut PgConnection,
        tenant_id: Uuid,
        payment_id: Uuid,
        for_update: bool,
    ) -> Result<Option<PaymentRecord>, LedgerError> {
        let sql = if for_update {
            r#"
            SELECT payment_id, tenant_id, payer_id, schedule_id, amount_paid, total_amount, remaining_amount, payment_date, method, transaction_id, status, remarks, created_utc, updated_utc
            FROM payment_records
            WHERE tenant_id = $1 AND payment_id = $2
            FOR UPDATE
            "#
        } else {
            r#"
            SELECT payment_id, tenant_id, payer_id, schedule_id, amount_paid, total_amount, remaining_amount, payment_date, method, transaction_id, status, remarks, created_utc, updated_utc
            FROM payment_records
            WHERE tenant_id = $1 AND payment_id = $2
            "#
        };

        sqlx::query_as::<_, PaymentRecord>(sql)
            .bind(tenant_id)
            .bind(payment_id)
            .fetch_optional(conn)
            .await
            .map_err(|e| db_error("Failed to get payment", e))
    }

    /// Take the exclusive lock for one ledger group, creating its row on
    /// first use. Held until the surrounding transaction ends.
    pub async fn lock_group(
        conn: &mut PgConnection,
        payer_id: Uuid,
        schedule_id: Uuid,
    ) -> Result<(), LedgerError> {
        sqlx::query(
            "INSERT INTO ledger_groups (payer_id, schedule_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(payer_id)
        .bind(schedule_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| db_error("Failed to create ledger group", e))?;

        sqlx::query(
            "SELECT 1 FROM ledger_groups WHERE payer_id = $1 AND schedule_id = $2 FOR UPDATE",
        )
        .bind(payer_id)
        .bind(schedule_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| db_error("Failed to lock ledger group", e))?;

        Ok(())
    }

    /// Sum of `amount_paid` over the group's `paid` records, optionally
    /// excluding one record.
    pub async fn paid_total(
        conn: &mut PgConnection,
        payer_id: Uuid,
        schedule_id: Uuid,
        exclude: Option<Uuid>,
    ) -> Result<Decimal, LedgerError> {
        let total: Option<Decimal> = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(amount_paid), 0)
            FROM payment_records
            WHERE payer_id = $1
              AND schedule_id = $2
              AND status = 'paid'
              AND ($3::uuid IS NULL OR payment_id <> $3)
            "#,
        )
        .bind(payer_id)
        .bind(schedule_id)
        .bind(exclude)
        .fetch_one(conn)
        .await
        .map_err(|e| db_error("Failed to sum paid records", e))?;

        Ok(total.unwrap_or(Decimal::ZERO))
    }

    // -------------------------------------------------------------------------
    // Reconciliation Sweep Primitives
    // -------------------------------------------------------------------------

    /// Fetch the next page of payment records in creation order, strictly
    /// after `cursor`.
    pub async fn sweep_page(
        conn: &mut PgConnection,
        cursor: Option<(DateTime<Utc>, Uuid)>,
        limit: i64,
    ) -> Result<Vec<SweepRow>, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["sweep_page"])
            .start_timer();

        let rows = sqlx::query_as::<_, SweepRow>(
            r#"
            SELECT p.payment_id, p.payer_id, p.schedule_id, p.amount_paid, p.status,
                   p.total_amount, p.remaining_amount, p.created_utc,
                   s.amount AS schedule_amount,
                   (py.payer_id IS NOT NULL) AS payer_present
            FROM payment_records p
            LEFT JOIN fee_schedules s ON s.schedule_id = p.schedule_id
            LEFT JOIN payers py ON py.payer_id = p.payer_id
            WHERE ($1::timestamptz IS NULL OR (p.created_utc, p.payment_id) > ($1, $2::uuid))
            ORDER BY p.created_utc, p.payment_id
            LIMIT $3
            "#,
        )
        .bind(cursor.map(|(created, _)| created))
        .bind(cursor.map(|(_, id)| id))
        .bind(limit)
        .fetch_all(conn)
        .await
        .map_err(|e| db_error("Failed to read payment page", e))?;

        timer.observe_duration();

        Ok(rows)
    }

    /// Re-read specific sweep rows, in creation order.
    pub async fn sweep_rows(
        conn: &mut PgConnection,
        payment_ids: &[Uuid],
    ) -> Result<Vec<SweepRow>, LedgerError> {
        sqlx::query_as::<_, SweepRow>(
            r#"
            SELECT p.payment_id, p.payer_id, p.schedule_id, p.amount_paid, p.status,
                   p.total_amount, p.remaining_amount, p.created_utc,
                   s.amount AS schedule_amount,
                   (py.payer_id IS NOT NULL) AS payer_present
            FROM payment_records p
            LEFT JOIN fee_schedules s ON s.schedule_id = p.schedule_id
            LEFT JOIN payers py ON py.payer_id = p.payer_id
            WHERE p.payment_id = ANY($1)
            ORDER BY p.created_utc, p.payment_id
            "#,
        )
        .bind(payment_ids)
        .fetch_all(conn)
        .await
        .map_err(|e| db_error("Failed to re-read payment page", e))
    }

    /// Lock several ledger groups in a deterministic order.
    pub async fn lock_groups(conn: &mut PgConnection, groups: &[GroupKey]) -> Result<(), LedgerError> {
        if groups.is_empty() {
            return Ok(());
        }

        let mut sorted = groups.to_vec();
        sorted.sort();
        sorted.dedup();
        let (payer_ids, schedule_ids): (Vec<Uuid>, Vec<Uuid>) = sorted.into_iter().unzip();

        sqlx::query(
            r#"
            INSERT INTO ledger_groups (payer_id, schedule_id)
            SELECT * FROM UNNEST($1::uuid[], $2::uuid[])
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&payer_ids)
        .bind(&schedule_ids)
        .execute(&mut *conn)
        .await
        .map_err(|e| db_error("Failed to create ledger groups", e))?;

        sqlx::query(
            r#"
            SELECT 1 FROM ledger_groups
            WHERE (payer_id, schedule_id) IN (SELECT * FROM UNNEST($1::uuid[], $2::uuid[]))
            ORDER BY payer_id, schedule_id
            FOR UPDATE
            "#,
        )
        .bind(&payer_ids)
        .bind(&schedule_ids)
        .execute(&mut *conn)
        .await
        .map_err(|e| db_error("Failed to lock ledger groups", e))?;

        Ok(())
    }

    /// Settled (`paid`) totals for each of the given groups. Groups with no
    /// paid records are absent from the map.
    pub async fn group_paid_totals(
        conn: &mut PgConnection,
        groups: &[GroupKey],
    ) -> Result<HashMap<GroupKey, Decimal>, LedgerError> {
        if groups.is_empty() {
            return Ok(HashMap::new());
        }

        let (payer_ids, schedule_ids): (Vec<Uuid>, Vec<Uuid>) = groups.iter().copied().unzip();

        let rows: Vec<(Uuid, Uuid, Decimal)> = sqlx::query_as(
            r#"
            SELECT payer_id, schedule_id, COALESCE(SUM(amount_paid), 0)
            FROM payment_records
            WHERE status = 'paid'
              AND (payer_id, schedule_id) IN (SELECT * FROM UNNEST($1::uuid[], $2::uuid[]))
            GROUP BY payer_id, schedule_id
            "#,
        )
        .bind(&payer_ids)
        .bind(&schedule_ids)
        .fetch_all(conn)
        .await
        .map_err(|e| db_error("Failed to sum ledger groups", e))?;

        Ok(rows
            .into_iter()
            .map(|(payer_id, schedule_id, paid)| ((payer_id, schedule_id), paid))
            .collect())
    }

    /// Overwrite a record's derived fields.
    pub async fn write_derived(
        conn: &mut PgConnection,
        payment_id: Uuid,
        total_amount: Decimal,
        remaining_amount: Decimal,
    ) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            UPDATE payment_records
            SET total_amount = $2, remaining_amount = $3, updated_utc = NOW()
            WHERE payment_id = $1
            "#,
        )
        .bind(payment_id)
        .bind(total_amount)
        .bind(remaining_amount)
        .execute(conn)
        .await
        .map_err(|e| db_error("Failed to write derived fields", e))?;

        Ok(())
    }
}
