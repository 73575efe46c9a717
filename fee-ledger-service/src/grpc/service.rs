//! FeeLedgerService gRPC implementation.

use crate::error::LedgerError;
use crate::grpc::proto::{
    fee_ledger_service_server::FeeLedgerService, ArchiveFeeScheduleRequest,
    ArchiveFeeScheduleResponse, CreateFeeScheduleRequest, CreateFeeScheduleResponse,
    DeletePaymentRequest, DeletePaymentResponse, FeeCategory as ProtoFeeCategory,
    FeeSchedule as ProtoFeeSchedule, GetFeeScheduleRequest, GetFeeScheduleResponse,
    GetLedgerBalanceRequest, GetLedgerBalanceResponse, GetPayerRequest, GetPayerResponse,
    GetPaymentRequest, GetPaymentResponse, ListFeeSchedulesRequest, ListFeeSchedulesResponse,
    ListPayerPaymentsRequest, ListPayerPaymentsResponse, Payer as ProtoPayer,
    PaymentChange as ProtoPaymentChange, PaymentRecord as ProtoPaymentRecord,
    ReconcilePaymentsRequest, ReconcilePaymentsResponse, RecordPaymentRequest,
    RecordPaymentResponse, RegisterPayerRequest, RegisterPayerResponse, UpdateFeeScheduleRequest,
    UpdateFeeScheduleResponse, UpdatePaymentRequest, UpdatePaymentResponse,
};
use crate::models::{
    BillingFrequency, CreateFeeSchedule, FeeCategory, FeeSchedule, NewPayment, Payer,
    PaymentMethod, PaymentRecord, PaymentStatus, PaymentUpdate, RegisterPayer, ScheduleFilter,
    UpdateFeeSchedule,
};
use crate::services::ledger::parse_amount;
use crate::services::metrics::{
    record_grpc_request, record_rejection, GRPC_REQUEST_DURATION, PAYMENTS_RECORDED,
};
use crate::services::{Database, PaymentChange, ReconcileOptions, Reconciler};
use chrono::{DateTime, NaiveDate, Utc};
use prost_types::Timestamp;
use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

const DEFAULT_PAGE_SIZE: i32 = 20;

/// FeeLedgerService implementation.
pub struct FeeLedgerServiceImpl {
    db: Arc<Database>,
    reconciler: Reconciler,
    default_batch_size: i64,
}

impl FeeLedgerServiceImpl {
    /// Create a new FeeLedgerService instance.
    pub fn new(db: Arc<Database>, default_batch_size: i64) -> Self {
        Self {
            reconciler: Reconciler::new(db.clone()),
            db,
            default_batch_size,
        }
    }

    fn payer_to_proto(payer: &Payer) -> ProtoPayer {
        ProtoPayer {
            payer_id: payer.payer_id.to_string(),
            tenant_id: payer.tenant_id.to_string(),
            display_name: payer.display_name.clone(),
            cohort_label: payer.cohort_label.clone(),
            created_at: Some(to_timestamp(payer.created_utc)),
        }
    }

    fn schedule_to_proto(schedule: &FeeSchedule) -> ProtoFeeSchedule {
        ProtoFeeSchedule {
            schedule_id: schedule.schedule_id.to_string(),
            tenant_id: schedule.tenant_id.to_string(),
            cohort_label: schedule.cohort_label.clone(),
            category: schedule
                .parsed_category()
                .map(|c| c.to_proto())
                .unwrap_or(0),
            amount: schedule.amount.to_string(),
            frequency: schedule
                .parsed_frequency()
                .map(|f| f.to_proto())
                .unwrap_or(0),
            description: schedule.description.clone(),
            created_at: Some(to_timestamp(schedule.created_utc)),
            updated_at: Some(to_timestamp(schedule.updated_utc)),
            archived_at: schedule.archived_utc.map(to_timestamp),
        }
    }

    fn payment_to_proto(payment: &PaymentRecord) -> ProtoPaymentRecord {
        ProtoPaymentRecord {
            payment_id: payment.payment_id.to_string(),
            tenant_id: payment.tenant_id.to_string(),
            payer_id: payment.payer_id.to_string(),
            schedule_id: payment.schedule_id.to_string(),
            amount_paid: payment.amount_paid.to_string(),
            total_amount: payment.total_amount.to_string(),
            remaining_amount: payment.remaining_amount.to_string(),
            payment_date: payment.payment_date.to_string(),
            method: payment.parsed_method().map(|m| m.to_proto()).unwrap_or(0),
            transaction_id: payment.transaction_id.clone().unwrap_or_default(),
            status: payment.parsed_status().map(|s| s.to_proto()).unwrap_or(0),
            remarks: payment.remarks.clone(),
            created_at: Some(to_timestamp(payment.created_utc)),
            updated_at: Some(to_timestamp(payment.updated_utc)),
        }
    }

    fn change_to_proto(change: &PaymentChange) -> ProtoPaymentChange {
        ProtoPaymentChange {
            payment_id: change.payment_id.to_string(),
            old_total_amount: change.old_total_amount.to_string(),
            new_total_amount: change.new_total_amount.to_string(),
            old_remaining_amount: change.old_remaining_amount.to_string(),
            new_remaining_amount: change.new_remaining_amount.to_string(),
        }
    }
}

fn to_timestamp(dt: DateTime<Utc>) -> Timestamp {
    Timestamp {
        seconds: dt.timestamp(),
        nanos: dt.timestamp_subsec_nanos() as i32,
    }
}

fn invalid_argument(method: &str, message: impl Into<String>) -> Status {
    record_grpc_request(method, "invalid_argument");
    Status::invalid_argument(message)
}

fn parse_id(method: &str, field: &str, value: &str) -> Result<Uuid, Status> {
    Uuid::parse_str(value).map_err(|_| invalid_argument(method, format!("Invalid {} format", field)))
}

fn parse_optional_id(method: &str, field: &str, value: &str) -> Result<Option<Uuid>, Status> {
    if value.is_empty() {
        Ok(None)
    } else {
        parse_id(method, field, value).map(Some)
    }
}

fn parse_date(method: &str, value: &str) -> Result<Option<NaiveDate>, Status> {
    if value.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| invalid_argument(method, "payment_date must be YYYY-MM-DD"))
}

fn page_size_or_default(page_size: i32) -> i32 {
    if page_size <= 0 {
        DEFAULT_PAGE_SIZE
    } else {
        page_size.min(100)
    }
}

/// Log, count and convert a domain error.
fn reject(method: &str, err: LedgerError) -> Status {
    match &err {
        LedgerError::App(e) => error!(error = %e, method = method, "Request failed"),
        other => warn!(error = %other, kind = other.kind(), method = method, "Request rejected"),
    }
    record_grpc_request(method, err.kind());
    err.into()
}

/// Like [`reject`], additionally counting rejected payment writes.
fn reject_payment(method: &str, err: LedgerError) -> Status {
    if !matches!(err, LedgerError::App(_)) {
        record_rejection(err.kind());
    }
    reject(method, err)
}

#[tonic::async_trait]
impl FeeLedgerService for FeeLedgerServiceImpl {
    // -------------------------------------------------------------------------
    // Payers
    // -------------------------------------------------------------------------

    #[instrument(
        skip(self, request),
        fields(service = "fee-ledger-service", method = "RegisterPayer")
    )]
    async fn register_payer(
        &self,
        request: Request<RegisterPayerRequest>,
    ) -> Result<Response<RegisterPayerResponse>, Status> {
        const METHOD: &str = "RegisterPayer";
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&[METHOD])
            .start_timer();

        let req = request.into_inner();
        let tenant_id = parse_id(METHOD, "tenant_id", &req.tenant_id)?;

        if req.display_name.trim().is_empty() {
            return Err(invalid_argument(METHOD, "display_name is required"));
        }

        let input = RegisterPayer {
            tenant_id,
            display_name: req.display_name.trim().to_string(),
            cohort_label: req.cohort_label.trim().to_string(),
        };

        let payer = self
            .db
            .register_payer(&input)
            .await
            .map_err(|e| reject(METHOD, e.into()))?;

        record_grpc_request(METHOD, "ok");
        timer.observe_duration();

        Ok(Response::new(RegisterPayerResponse {
            payer: Some(Self::payer_to_proto(&payer)),
        }))
    }

    #[instrument(
        skip(self, request),
        fields(service = "fee-ledger-service", method = "GetPayer")
    )]
    async fn get_payer(
        &self,
        request: Request<GetPayerRequest>,
    ) -> Result<Response<GetPayerResponse>, Status> {
        const METHOD: &str = "GetPayer";
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&[METHOD])
            .start_timer();

        let req = request.into_inner();
        let tenant_id = parse_id(METHOD, "tenant_id", &req.tenant_id)?;
        let payer_id = parse_id(METHOD, "payer_id", &req.payer_id)?;

        let payer = self
            .db
            .get_payer(tenant_id, payer_id)
            .await
            .map_err(|e| reject(METHOD, e.into()))?
            .ok_or_else(|| reject(METHOD, LedgerError::NotFound(format!("Payer {}", payer_id))))?;

        record_grpc_request(METHOD, "ok");
        timer.observe_duration();

        Ok(Response::new(GetPayerResponse {
            payer: Some(Self::payer_to_proto(&payer)),
        }))
    }

    // -------------------------------------------------------------------------
    // Fee schedules
    // -------------------------------------------------------------------------

    #[instrument(
        skip(self, request),
        fields(service = "fee-ledger-service", method = "CreateFeeSchedule")
    )]
    async fn create_fee_schedule(
        &self,
        request: Request<CreateFeeScheduleRequest>,
    ) -> Result<Response<CreateFeeScheduleResponse>, Status> {
        const METHOD: &str = "CreateFeeSchedule";
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&[METHOD])
            .start_timer();

        let req = request.into_inner();
        let tenant_id = parse_id(METHOD, "tenant_id", &req.tenant_id)?;

        let category = FeeCategory::from_proto(req.category)
            .ok_or_else(|| invalid_argument(METHOD, "Invalid category"))?;
        let frequency = BillingFrequency::from_proto(req.frequency)
            .ok_or_else(|| invalid_argument(METHOD, "Invalid frequency"))?;

        if req.cohort_label.trim().is_empty() || req.cohort_label.len() > 100 {
            return Err(invalid_argument(
                METHOD,
                "cohort_label must be between 1 and 100 characters",
            ));
        }

        let amount = parse_amount(&req.amount).map_err(|e| reject(METHOD, e))?;

        let input = CreateFeeSchedule {
            tenant_id,
            cohort_label: req.cohort_label.trim().to_string(),
            category,
            amount,
            frequency,
            description: req.description,
        };

        let schedule = self
            .db
            .create_schedule(&input)
            .await
            .map_err(|e| reject(METHOD, e.into()))?;

        record_grpc_request(METHOD, "ok");
        timer.observe_duration();

        Ok(Response::new(CreateFeeScheduleResponse {
            schedule: Some(Self::schedule_to_proto(&schedule)),
        }))
    }

    #[instrument(
        skip(self, request),
        fields(service = "fee-ledger-service", method = "GetFeeSchedule")
    )]
    async fn get_fee_schedule(
        &self,
        request: Request<GetFeeScheduleRequest>,
    ) -> Result<Response<GetFeeScheduleResponse>, Status> {
        const METHOD: &str = "GetFeeSchedule";
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&[METHOD])
            .start_timer();

        let req = request.into_inner();
        let tenant_id = parse_id(METHOD, "tenant_id", &req.tenant_id)?;
        let schedule_id = parse_id(METHOD, "schedule_id", &req.schedule_id)?;

        let schedule = self
            .db
            .get_schedule(tenant_id, schedule_id)
            .await
            .map_err(|e| reject(METHOD, e.into()))?
            .ok_or_else(|| {
                reject(
                    METHOD,
                    LedgerError::NotFound(format!("Fee schedule {}", schedule_id)),
                )
            })?;

        record_grpc_request(METHOD, "ok");
        timer.observe_duration();

        Ok(Response::new(GetFeeScheduleResponse {
            schedule: Some(Self::schedule_to_proto(&schedule)),
        }))
    }

    #[instrument(
        skip(self, request),
        fields(service = "fee-ledger-service", method = "ListFeeSchedules")
    )]
    async fn list_fee_schedules(
        &self,
        request: Request<ListFeeSchedulesRequest>,
    ) -> Result<Response<ListFeeSchedulesResponse>, Status> {
        const METHOD: &str = "ListFeeSchedules";
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&[METHOD])
            .start_timer();

        let req = request.into_inner();
        let tenant_id = parse_id(METHOD, "tenant_id", &req.tenant_id)?;
        let page_token = parse_optional_id(METHOD, "page_token", &req.page_token)?;

        let category = if req.category == ProtoFeeCategory::Unspecified as i32 {
            None
        } else {
            Some(
                FeeCategory::from_proto(req.category)
                    .ok_or_else(|| invalid_argument(METHOD, "Invalid category"))?,
            )
        };

        let filter = ScheduleFilter {
            cohort_label: Some(req.cohort_label.trim().to_string()).filter(|c| !c.is_empty()),
            category,
            include_archived: req.include_archived,
        };
        let page_size = page_size_or_default(req.page_size);

        let schedules = self
            .db
            .list_schedules(tenant_id, &filter, page_size, page_token)
            .await
            .map_err(|e| reject(METHOD, e.into()))?;

        record_grpc_request(METHOD, "ok");
        timer.observe_duration();

        let next_page_token = if schedules.len() == page_size as usize {
            schedules.last().map(|s| s.schedule_id.to_string())
        } else {
            None
        };

        Ok(Response::new(ListFeeSchedulesResponse {
            schedules: schedules.iter().map(Self::schedule_to_proto).collect(),
            next_page_token: next_page_token.unwrap_or_default(),
        }))
    }

    #[instrument(
        skip(self, request),
        fields(service = "fee-ledger-service", method = "UpdateFeeSchedule")
    )]
    async fn update_fee_schedule(
        &self,
        request: Request<UpdateFeeScheduleRequest>,
    ) -> Result<Response<UpdateFeeScheduleResponse>, Status> {
        const METHOD: &str = "UpdateFeeSchedule";
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&[METHOD])
            .start_timer();

        let req = request.into_inner();
        let tenant_id = parse_id(METHOD, "tenant_id", &req.tenant_id)?;
        let schedule_id = parse_id(METHOD, "schedule_id", &req.schedule_id)?;

        let amount = req
            .amount
            .as_deref()
            .map(parse_amount)
            .transpose()
            .map_err(|e| reject(METHOD, e))?;

        let update = UpdateFeeSchedule {
            amount,
            description: req.description,
        };

        let schedule = self
            .db
            .update_schedule(tenant_id, schedule_id, &update)
            .await
            .map_err(|e| reject(METHOD, e))?;

        record_grpc_request(METHOD, "ok");
        timer.observe_duration();

        Ok(Response::new(UpdateFeeScheduleResponse {
            schedule: Some(Self::schedule_to_proto(&schedule)),
        }))
    }

    #[instrument(
        skip(self, request),
        fields(service = "fee-ledger-service", method = "ArchiveFeeSchedule")
    )]
    async fn archive_fee_schedule(
        &self,
        request: Request<ArchiveFeeScheduleRequest>,
    ) -> Result<Response<ArchiveFeeScheduleResponse>, Status> {
        const METHOD: &str = "ArchiveFeeSchedule";
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&[METHOD])
            .start_timer();

        let req = request.into_inner();
        let tenant_id = parse_id(METHOD, "tenant_id", &req.tenant_id)?;
        let schedule_id = parse_id(METHOD, "schedule_id", &req.schedule_id)?;

        let schedule = self
            .db
            .archive_schedule(tenant_id, schedule_id)
            .await
            .map_err(|e| reject(METHOD, e))?;

        record_grpc_request(METHOD, "ok");
        timer.observe_duration();

        Ok(Response::new(ArchiveFeeScheduleResponse {
            schedule: Some(Self::schedule_to_proto(&schedule)),
        }))
    }

    // -------------------------------------------------------------------------
    // Payments
    // -------------------------------------------------------------------------

    #[instrument(
        skip(self, request),
        fields(service = "fee-ledger-service", method = "RecordPayment")
    )]
    async fn record_payment(
        &self,
        request: Request<RecordPaymentRequest>,
    ) -> Result<Response<RecordPaymentResponse>, Status> {
        const METHOD: &str = "RecordPayment";
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&[METHOD])
            .start_timer();

        let req = request.into_inner();
        let tenant_id = parse_id(METHOD, "tenant_id", &req.tenant_id)?;
        let payer_id = parse_id(METHOD, "payer_id", &req.payer_id)?;
        let schedule_id = parse_id(METHOD, "schedule_id", &req.schedule_id)?;

        let method = PaymentMethod::from_proto(req.method)
            .ok_or_else(|| invalid_argument(METHOD, "Invalid payment method"))?;
        let status = PaymentStatus::from_proto(req.status)
            .ok_or_else(|| invalid_argument(METHOD, "Invalid payment status"))?;
        let payment_date = parse_date(METHOD, &req.payment_date)?
            .unwrap_or_else(|| Utc::now().date_naive());

        let transaction_id = Some(req.transaction_id.trim().to_string()).filter(|t| !t.is_empty());
        if transaction_id.as_ref().is_some_and(|t| t.len() > 100) {
            return Err(invalid_argument(
                METHOD,
                "transaction_id must be at most 100 characters",
            ));
        }

        let amount_paid = parse_amount(&req.amount_paid).map_err(|e| reject_payment(METHOD, e))?;

        let input = NewPayment {
            tenant_id,
            payer_id,
            schedule_id,
            amount_paid,
            method,
            status,
            transaction_id,
            remarks: req.remarks,
            payment_date,
        };

        let payment = self
            .db
            .record_payment(&input)
            .await
            .map_err(|e| reject_payment(METHOD, e))?;

        record_grpc_request(METHOD, "ok");
        PAYMENTS_RECORDED
            .with_label_values(&["create", payment.status.as_str()])
            .inc();
        timer.observe_duration();

        info!(
            payment_id = %payment.payment_id,
            remaining_amount = %payment.remaining_amount,
            "Payment accepted"
        );

        Ok(Response::new(RecordPaymentResponse {
            payment: Some(Self::payment_to_proto(&payment)),
        }))
    }

    #[instrument(
        skip(self, request),
        fields(service = "fee-ledger-service", method = "UpdatePayment")
    )]
    async fn update_payment(
        &self,
        request: Request<UpdatePaymentRequest>,
    ) -> Result<Response<UpdatePaymentResponse>, Status> {
        const METHOD: &str = "UpdatePayment";
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&[METHOD])
            .start_timer();

        let req = request.into_inner();
        let tenant_id = parse_id(METHOD, "tenant_id", &req.tenant_id)?;
        let payment_id = parse_id(METHOD, "payment_id", &req.payment_id)?;

        let method = PaymentMethod::from_proto(req.method)
            .ok_or_else(|| invalid_argument(METHOD, "Invalid payment method"))?;
        let status = PaymentStatus::from_proto(req.status)
            .ok_or_else(|| invalid_argument(METHOD, "Invalid payment status"))?;
        let payment_date = parse_date(METHOD, &req.payment_date)?;

        let amount_paid = parse_amount(&req.amount_paid).map_err(|e| reject_payment(METHOD, e))?;

        let update = PaymentUpdate {
            amount_paid,
            method,
            status,
            remarks: req.remarks,
            payment_date,
        };

        let payment = self
            .db
            .update_payment(tenant_id, payment_id, &update)
            .await
            .map_err(|e| reject_payment(METHOD, e))?;

        record_grpc_request(METHOD, "ok");
        PAYMENTS_RECORDED
            .with_label_values(&["update", payment.status.as_str()])
            .inc();
        timer.observe_duration();

        Ok(Response::new(UpdatePaymentResponse {
            payment: Some(Self::payment_to_proto(&payment)),
        }))
    }

    #[instrument(
        skip(self, request),
        fields(service = "fee-ledger-service", method = "GetPayment")
    )]
    async fn get_payment(
        &self,
        request: Request<GetPaymentRequest>,
    ) -> Result<Response<GetPaymentResponse>, Status> {
        const METHOD: &str = "GetPayment";
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&[METHOD])
            .start_timer();

        let req = request.into_inner();
        let tenant_id = parse_id(METHOD, "tenant_id", &req.tenant_id)?;
        let payment_id = parse_id(METHOD, "payment_id", &req.payment_id)?;

        let payment = self
            .db
            .get_payment(tenant_id, payment_id)
            .await
            .map_err(|e| reject(METHOD, e))?
            .ok_or_else(|| {
                reject(
                    METHOD,
                    LedgerError::NotFound(format!("Payment {}", payment_id)),
                )
            })?;

        record_grpc_request(METHOD, "ok");
        timer.observe_duration();

        Ok(Response::new(GetPaymentResponse {
            payment: Some(Self::payment_to_proto(&payment)),
        }))
    }

    #[instrument(
        skip(self, request),
        fields(service = "fee-ledger-service", method = "ListPayerPayments")
    )]
    async fn list_payer_payments(
        &self,
        request: Request<ListPayerPaymentsRequest>,
    ) -> Result<Response<ListPayerPaymentsResponse>, Status> {
        const METHOD: &str = "ListPayerPayments";
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&[METHOD])
            .start_timer();

        let req = request.into_inner();
        let tenant_id = parse_id(METHOD, "tenant_id", &req.tenant_id)?;
        let payer_id = parse_id(METHOD, "payer_id", &req.payer_id)?;
        let schedule_id = parse_optional_id(METHOD, "schedule_id", &req.schedule_id)?;
        let page_token = parse_optional_id(METHOD, "page_token", &req.page_token)?;
        let page_size = page_size_or_default(req.page_size);

        let payments = self
            .db
            .list_payer_payments(tenant_id, payer_id, schedule_id, page_size, page_token)
            .await
            .map_err(|e| reject(METHOD, e.into()))?;

        record_grpc_request(METHOD, "ok");
        timer.observe_duration();

        let next_page_token = if payments.len() == page_size as usize {
            payments.last().map(|p| p.payment_id.to_string())
        } else {
            None
        };

        Ok(Response::new(ListPayerPaymentsResponse {
            payments: payments.iter().map(Self::payment_to_proto).collect(),
            next_page_token: next_page_token.unwrap_or_default(),
        }))
    }

    #[instrument(
        skip(self, request),
        fields(service = "fee-ledger-service", method = "DeletePayment")
    )]
    async fn delete_payment(
        &self,
        request: Request<DeletePaymentRequest>,
    ) -> Result<Response<DeletePaymentResponse>, Status> {
        const METHOD: &str = "DeletePayment";
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&[METHOD])
            .start_timer();

        let req = request.into_inner();
        let tenant_id = parse_id(METHOD, "tenant_id", &req.tenant_id)?;
        let payment_id = parse_id(METHOD, "payment_id", &req.payment_id)?;

        let deleted = self
            .db
            .delete_payment(tenant_id, payment_id)
            .await
            .map_err(|e| reject(METHOD, e))?;

        if !deleted {
            return Err(reject(
                METHOD,
                LedgerError::NotFound(format!("Payment {}", payment_id)),
            ));
        }

        record_grpc_request(METHOD, "ok");
        timer.observe_duration();

        Ok(Response::new(DeletePaymentResponse { deleted }))
    }

    #[instrument(
        skip(self, request),
        fields(service = "fee-ledger-service", method = "GetLedgerBalance")
    )]
    async fn get_ledger_balance(
        &self,
        request: Request<GetLedgerBalanceRequest>,
    ) -> Result<Response<GetLedgerBalanceResponse>, Status> {
        const METHOD: &str = "GetLedgerBalance";
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&[METHOD])
            .start_timer();

        let req = request.into_inner();
        let tenant_id = parse_id(METHOD, "tenant_id", &req.tenant_id)?;
        let payer_id = parse_id(METHOD, "payer_id", &req.payer_id)?;
        let schedule_id = parse_id(METHOD, "schedule_id", &req.schedule_id)?;

        let balance = self
            .db
            .ledger_balance(tenant_id, payer_id, schedule_id)
            .await
            .map_err(|e| reject(METHOD, e))?;

        record_grpc_request(METHOD, "ok");
        timer.observe_duration();

        Ok(Response::new(GetLedgerBalanceResponse {
            payer_id: balance.payer_id.to_string(),
            schedule_id: balance.schedule_id.to_string(),
            total_amount: balance.total_amount.to_string(),
            paid_amount: balance.paid_amount.to_string(),
            pending_amount: balance.pending_amount.to_string(),
            remaining_amount: balance.remaining_amount.to_string(),
        }))
    }

    // -------------------------------------------------------------------------
    // Reconciliation
    // -------------------------------------------------------------------------

    #[instrument(
        skip(self, request),
        fields(service = "fee-ledger-service", method = "ReconcilePayments")
    )]
    async fn reconcile_payments(
        &self,
        request: Request<ReconcilePaymentsRequest>,
    ) -> Result<Response<ReconcilePaymentsResponse>, Status> {
        const METHOD: &str = "ReconcilePayments";
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&[METHOD])
            .start_timer();

        let req = request.into_inner();

        if req.batch_size < 0 {
            return Err(invalid_argument(METHOD, "batch_size must not be negative"));
        }
        let batch_size = if req.batch_size == 0 {
            self.default_batch_size
        } else {
            i64::from(req.batch_size)
        };

        let report = self
            .reconciler
            .run(ReconcileOptions::new(batch_size, req.dry_run))
            .await
            .map_err(|e| reject(METHOD, e))?;

        record_grpc_request(METHOD, "ok");
        timer.observe_duration();

        Ok(Response::new(ReconcilePaymentsResponse {
            dry_run: report.dry_run,
            reviewed: report.reviewed as i64,
            updated: report.updated as i64,
            skipped: report.skipped as i64,
            changes: report.changes.iter().map(Self::change_to_proto).collect(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_defaults_and_caps() {
        assert_eq!(page_size_or_default(0), DEFAULT_PAGE_SIZE);
        assert_eq!(page_size_or_default(-3), DEFAULT_PAGE_SIZE);
        assert_eq!(page_size_or_default(7), 7);
        assert_eq!(page_size_or_default(1000), 100);
    }

    #[test]
    fn payment_date_accepts_iso_dates_only() {
        assert_eq!(parse_date("Test", "").unwrap(), None);
        assert_eq!(
            parse_date("Test", "2025-04-01").unwrap(),
            NaiveDate::from_ymd_opt(2025, 4, 1)
        );
        let err = parse_date("Test", "01/04/2025").unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }

    #[test]
    fn malformed_ids_are_invalid_arguments() {
        let err = parse_id("Test", "payer_id", "not-a-uuid").unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
        assert!(err.message().contains("payer_id"));
        assert_eq!(parse_optional_id("Test", "schedule_id", "").unwrap(), None);
    }
}
