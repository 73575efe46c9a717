//! Reconciliation integration tests.
//!
//! A sweep covers every tenant's records, so these tests run serially and
//! only assert on the records they created.

mod common;

use common::{dec, spawn_app, TestApp};
use fee_ledger_service::grpc::proto::{
    GetPaymentRequest, PaymentRecord, PaymentStatus as ProtoStatus, ReconcilePaymentsRequest,
    ReconcilePaymentsResponse,
};
use fee_ledger_service::services::{ReconcileOptions, Reconciler};
use serial_test::serial;
use uuid::Uuid;

/// Change a schedule amount behind the service's back, as a manual fix-up would.
async fn drift_schedule(app: &TestApp, schedule_id: &str, amount: &str) {
    sqlx::query("UPDATE fee_schedules SET amount = $2::numeric WHERE schedule_id = $1")
        .bind(Uuid::parse_str(schedule_id).unwrap())
        .bind(amount)
        .execute(app.db.pool())
        .await
        .unwrap();
}

async fn reconcile(app: &mut TestApp, dry_run: bool) -> ReconcilePaymentsResponse {
    app.client
        .reconcile_payments(ReconcilePaymentsRequest {
            dry_run,
            batch_size: 2,
        })
        .await
        .unwrap()
        .into_inner()
}

async fn fetch(app: &mut TestApp, payment_id: &str) -> PaymentRecord {
    app.client
        .get_payment(GetPaymentRequest {
            tenant_id: app.tenant_id.to_string(),
            payment_id: payment_id.to_string(),
        })
        .await
        .unwrap()
        .into_inner()
        .payment
        .unwrap()
}

fn touches(report: &ReconcilePaymentsResponse, payment_id: &str) -> bool {
    report.changes.iter().any(|c| c.payment_id == payment_id)
}

#[tokio::test]
#[serial]
async fn live_run_repairs_drift_and_second_run_is_a_no_op() {
    let mut app = spawn_app().await;
    let payer = app.register_payer("Nora").await;
    let schedule = app.create_schedule("5000.00").await;

    let first = app.pay(&payer.payer_id, &schedule.schedule_id, "3000.00").await;
    let second = app.pay(&payer.payer_id, &schedule.schedule_id, "1000.00").await;
    let pending = app
        .try_pay(&payer.payer_id, &schedule.schedule_id, "500.00", ProtoStatus::Pending)
        .await
        .unwrap();

    // The first record was stored before the second existed.
    assert_eq!(dec(&first.remaining_amount), dec("2000.00"));

    drift_schedule(&app, &schedule.schedule_id, "6000.00").await;

    let preview = reconcile(&mut app, true).await;
    for id in [&first.payment_id, &second.payment_id, &pending.payment_id] {
        assert!(touches(&preview, id));
    }

    let report = reconcile(&mut app, false).await;
    assert!(!report.dry_run);
    assert!(report.reviewed >= 3);
    assert!(report.updated >= 3);
    // Live runs return counts; applied changes go to the log.
    assert!(report.changes.is_empty());

    // Each paid record excludes only itself; the pending record excludes nothing.
    let first = fetch(&mut app, &first.payment_id).await;
    assert_eq!(dec(&first.total_amount), dec("6000.00"));
    assert_eq!(dec(&first.remaining_amount), dec("2000.00"));
    let pending = fetch(&mut app, &pending.payment_id).await;
    assert_eq!(dec(&pending.remaining_amount), dec("2000.00"));

    reconcile(&mut app, false).await;
    let unchanged = fetch(&mut app, &first.payment_id).await;
    assert_eq!(unchanged.updated_at, first.updated_at);

    let again = reconcile(&mut app, true).await;
    assert!(!touches(&again, &first.payment_id));
    assert!(!touches(&again, &second.payment_id));
    assert!(!touches(&again, &pending.payment_id));
}

#[tokio::test]
#[serial]
async fn dry_run_reports_without_writing() {
    let mut app = spawn_app().await;
    let payer = app.register_payer("Omar").await;
    let schedule = app.create_schedule("1000.00").await;
    let payment = app.pay(&payer.payer_id, &schedule.schedule_id, "400.00").await;

    drift_schedule(&app, &schedule.schedule_id, "1200.00").await;

    let report = reconcile(&mut app, true).await;
    assert!(report.dry_run);
    let change = report
        .changes
        .iter()
        .find(|c| c.payment_id == payment.payment_id)
        .expect("drifted record reported");
    assert_eq!(dec(&change.old_total_amount), dec("1000.00"));
    assert_eq!(dec(&change.new_total_amount), dec("1200.00"));
    assert_eq!(dec(&change.new_remaining_amount), dec("800.00"));

    let stored = fetch(&mut app, &payment.payment_id).await;
    assert_eq!(dec(&stored.total_amount), dec("1000.00"));
    assert_eq!(stored.updated_at, payment.updated_at);

    // Still pending after a dry run.
    let report = reconcile(&mut app, true).await;
    assert!(touches(&report, &payment.payment_id));
}

#[tokio::test]
#[serial]
async fn deleting_a_sibling_is_converged_by_reconciliation() {
    let mut app = spawn_app().await;
    let payer = app.register_payer("Pia").await;
    let schedule = app.create_schedule("900.00").await;

    let kept = app.pay(&payer.payer_id, &schedule.schedule_id, "300.00").await;
    let removed = app.pay(&payer.payer_id, &schedule.schedule_id, "300.00").await;
    assert_eq!(dec(&removed.remaining_amount), dec("300.00"));

    app.client
        .delete_payment(fee_ledger_service::grpc::proto::DeletePaymentRequest {
            tenant_id: app.tenant_id.to_string(),
            payment_id: removed.payment_id.clone(),
        })
        .await
        .unwrap();

    let reconciler = Reconciler::new(app.db.clone());
    let preview = reconciler.run(ReconcileOptions::new(50, true)).await.unwrap();
    assert!(preview
        .changes
        .iter()
        .any(|c| c.payment_id.to_string() == kept.payment_id));

    let report = reconciler.run(ReconcileOptions::new(50, false)).await.unwrap();
    assert!(report.updated >= 1);

    let kept = fetch(&mut app, &kept.payment_id).await;
    assert_eq!(dec(&kept.remaining_amount), dec("600.00"));

    let report = reconciler.run(ReconcileOptions::new(50, true)).await.unwrap();
    assert!(!report
        .changes
        .iter()
        .any(|c| c.payment_id.to_string() == kept.payment_id));
}
