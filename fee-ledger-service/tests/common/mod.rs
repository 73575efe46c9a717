//! Common test utilities for fee-ledger-service integration tests.

#![allow(dead_code)]

use fee_ledger_service::config::{DatabaseConfig, FeeLedgerConfig, ReconcileConfig};
use fee_ledger_service::grpc::proto::{
    fee_ledger_service_client::FeeLedgerServiceClient, BillingFrequency as ProtoFrequency,
    CreateFeeScheduleRequest, FeeCategory as ProtoCategory, FeeSchedule, Payer,
    PaymentMethod as ProtoMethod, PaymentRecord, PaymentStatus as ProtoStatus,
    RecordPaymentRequest, RegisterPayerRequest,
};
use fee_ledger_service::services::Database;
use fee_ledger_service::startup::Application;
use rust_decimal::Decimal;
use service_core::config::Config as CommonConfig;
use std::str::FromStr;
use std::sync::{Arc, Once};
use tonic::transport::Channel;
use tonic::Status;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,fee_ledger_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

fn test_config() -> FeeLedgerConfig {
    let database_url = std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must point at a disposable Postgres database");

    FeeLedgerConfig {
        common: CommonConfig { port: 0 },
        service_name: "fee-ledger-service-test".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: database_url,
            max_connections: 5,
            min_connections: 1,
        },
        reconcile: ReconcileConfig::default(),
    }
}

/// Test application wrapper.
pub struct TestApp {
    pub client: FeeLedgerServiceClient<Channel>,
    pub tenant_id: Uuid,
    pub db: Arc<Database>,
    pub http_port: u16,
}

/// Spawn a test application with a fresh tenant ID.
pub async fn spawn_app() -> TestApp {
    init_tracing();

    let app = Application::build(test_config())
        .await
        .expect("Failed to build application");

    let http_port = app.http_port();
    let grpc_addr = format!("http://127.0.0.1:{}", app.grpc_port());
    let db = app.db();

    tokio::spawn(async move {
        app.run_until_stopped().await.ok();
    });

    // Wait for server to be ready with retry
    let client = {
        let mut attempts = 0;
        loop {
            match FeeLedgerServiceClient::connect(grpc_addr.clone()).await {
                Ok(client) => break client,
                Err(_) if attempts < 20 => {
                    attempts += 1;
                    tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
                }
                Err(e) => panic!("Failed to connect gRPC client after 20 attempts: {}", e),
            }
        }
    };

    TestApp {
        client,
        tenant_id: Uuid::new_v4(),
        db,
        http_port,
    }
}

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).expect("valid decimal")
}

impl TestApp {
    pub async fn register_payer(&mut self, name: &str) -> Payer {
        self.client
            .register_payer(RegisterPayerRequest {
                tenant_id: self.tenant_id.to_string(),
                display_name: name.to_string(),
                cohort_label: "Grade 5".to_string(),
            })
            .await
            .expect("Failed to register payer")
            .into_inner()
            .payer
            .expect("payer in response")
    }

    pub async fn create_schedule(&mut self, amount: &str) -> FeeSchedule {
        self.client
            .create_fee_schedule(CreateFeeScheduleRequest {
                tenant_id: self.tenant_id.to_string(),
                cohort_label: "Grade 5".to_string(),
                category: ProtoCategory::Tuition as i32,
                amount: amount.to_string(),
                frequency: ProtoFrequency::Monthly as i32,
                description: "Tuition".to_string(),
            })
            .await
            .expect("Failed to create fee schedule")
            .into_inner()
            .schedule
            .expect("schedule in response")
    }

    pub fn payment_request(
        &self,
        payer_id: &str,
        schedule_id: &str,
        amount: &str,
        status: ProtoStatus,
    ) -> RecordPaymentRequest {
        RecordPaymentRequest {
            tenant_id: self.tenant_id.to_string(),
            payer_id: payer_id.to_string(),
            schedule_id: schedule_id.to_string(),
            amount_paid: amount.to_string(),
            method: ProtoMethod::BankTransfer as i32,
            status: status as i32,
            transaction_id: String::new(),
            remarks: String::new(),
            payment_date: "2025-04-01".to_string(),
        }
    }

    pub async fn try_pay(
        &mut self,
        payer_id: &str,
        schedule_id: &str,
        amount: &str,
        status: ProtoStatus,
    ) -> Result<PaymentRecord, Status> {
        let request = self.payment_request(payer_id, schedule_id, amount, status);
        self.client
            .record_payment(request)
            .await
            .map(|r| r.into_inner().payment.expect("payment in response"))
    }

    pub async fn pay(&mut self, payer_id: &str, schedule_id: &str, amount: &str) -> PaymentRecord {
        self.try_pay(payer_id, schedule_id, amount, ProtoStatus::Paid)
            .await
            .expect("Failed to record payment")
    }
}
