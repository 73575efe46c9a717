//! Fee schedule catalog and payer registry integration tests.

mod common;

use common::{dec, spawn_app};
use fee_ledger_service::grpc::proto::{
    ArchiveFeeScheduleRequest, BillingFrequency as ProtoFrequency, CreateFeeScheduleRequest,
    FeeCategory as ProtoCategory, GetFeeScheduleRequest, GetPayerRequest, ListFeeSchedulesRequest,
    UpdateFeeScheduleRequest,
};
use tonic::Code;
use uuid::Uuid;

#[tokio::test]
async fn create_and_get_schedule() {
    let mut app = spawn_app().await;
    let created = app.create_schedule("5000.00").await;

    assert_eq!(dec(&created.amount), dec("5000.00"));
    assert_eq!(created.category, ProtoCategory::Tuition as i32);
    assert_eq!(created.frequency, ProtoFrequency::Monthly as i32);
    assert!(created.archived_at.is_none());

    let fetched = app
        .client
        .get_fee_schedule(GetFeeScheduleRequest {
            tenant_id: app.tenant_id.to_string(),
            schedule_id: created.schedule_id.clone(),
        })
        .await
        .unwrap()
        .into_inner()
        .schedule
        .unwrap();
    assert_eq!(fetched.schedule_id, created.schedule_id);
    assert_eq!(fetched.cohort_label, "Grade 5");
}

#[tokio::test]
async fn schedule_requires_category_frequency_and_valid_amount() {
    let mut app = spawn_app().await;

    let base = CreateFeeScheduleRequest {
        tenant_id: app.tenant_id.to_string(),
        cohort_label: "Grade 1".to_string(),
        category: ProtoCategory::Library as i32,
        amount: "250.00".to_string(),
        frequency: ProtoFrequency::Annually as i32,
        description: String::new(),
    };

    let mut no_category = base.clone();
    no_category.category = ProtoCategory::Unspecified as i32;
    let mut no_frequency = base.clone();
    no_frequency.frequency = ProtoFrequency::Unspecified as i32;
    let mut negative = base.clone();
    negative.amount = "-250.00".to_string();

    for request in [no_category, no_frequency, negative] {
        let err = app.client.create_fee_schedule(request).await.unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    assert!(app.client.create_fee_schedule(base).await.is_ok());
}

#[tokio::test]
async fn list_filters_by_category_and_hides_archived() {
    let mut app = spawn_app().await;
    let tuition = app.create_schedule("5000.00").await;

    let transport = app
        .client
        .create_fee_schedule(CreateFeeScheduleRequest {
            tenant_id: app.tenant_id.to_string(),
            cohort_label: "Grade 5".to_string(),
            category: ProtoCategory::Transport as i32,
            amount: "800.00".to_string(),
            frequency: ProtoFrequency::Quarterly as i32,
            description: "Bus".to_string(),
        })
        .await
        .unwrap()
        .into_inner()
        .schedule
        .unwrap();

    let tenant_id = app.tenant_id;
    let list = |category: ProtoCategory, include_archived: bool| ListFeeSchedulesRequest {
        tenant_id: tenant_id.to_string(),
        cohort_label: "Grade 5".to_string(),
        category: category as i32,
        include_archived,
        page_size: 0,
        page_token: String::new(),
    };

    let only_transport = app
        .client
        .list_fee_schedules(list(ProtoCategory::Transport, false))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(only_transport.schedules.len(), 1);
    assert_eq!(only_transport.schedules[0].schedule_id, transport.schedule_id);

    app.client
        .archive_fee_schedule(ArchiveFeeScheduleRequest {
            tenant_id: app.tenant_id.to_string(),
            schedule_id: tuition.schedule_id.clone(),
        })
        .await
        .unwrap();

    let active = app
        .client
        .list_fee_schedules(list(ProtoCategory::Unspecified, false))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(active.schedules.len(), 1);

    let all = app
        .client
        .list_fee_schedules(list(ProtoCategory::Unspecified, true))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(all.schedules.len(), 2);
    assert!(all
        .schedules
        .iter()
        .any(|s| s.schedule_id == tuition.schedule_id && s.archived_at.is_some()));
}

#[tokio::test]
async fn amount_is_editable_only_until_first_payment() {
    let mut app = spawn_app().await;
    let payer = app.register_payer("Lena").await;
    let schedule = app.create_schedule("5000.00").await;

    let tenant_id = app.tenant_id;
    let update = |amount: Option<&str>, description: Option<&str>| UpdateFeeScheduleRequest {
        tenant_id: tenant_id.to_string(),
        schedule_id: schedule.schedule_id.clone(),
        amount: amount.map(str::to_string),
        description: description.map(str::to_string),
    };

    let raised = app
        .client
        .update_fee_schedule(update(Some("5500.00"), None))
        .await
        .unwrap()
        .into_inner()
        .schedule
        .unwrap();
    assert_eq!(dec(&raised.amount), dec("5500.00"));

    app.pay(&payer.payer_id, &schedule.schedule_id, "500.00").await;

    let err = app
        .client
        .update_fee_schedule(update(Some("6000.00"), None))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::FailedPrecondition);

    let described = app
        .client
        .update_fee_schedule(update(Some("5500.00"), Some("Term 1 tuition")))
        .await
        .unwrap()
        .into_inner()
        .schedule
        .unwrap();
    assert_eq!(described.description, "Term 1 tuition");
    assert_eq!(dec(&described.amount), dec("5500.00"));
}

#[tokio::test]
async fn archive_is_idempotent_and_scoped_to_tenant() {
    let mut app = spawn_app().await;
    let schedule = app.create_schedule("100.00").await;

    let archive = |tenant_id: String| ArchiveFeeScheduleRequest {
        tenant_id,
        schedule_id: schedule.schedule_id.clone(),
    };

    let err = app
        .client
        .archive_fee_schedule(archive(Uuid::new_v4().to_string()))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);

    let first = app
        .client
        .archive_fee_schedule(archive(app.tenant_id.to_string()))
        .await
        .unwrap()
        .into_inner()
        .schedule
        .unwrap();
    let second = app
        .client
        .archive_fee_schedule(archive(app.tenant_id.to_string()))
        .await
        .unwrap()
        .into_inner()
        .schedule
        .unwrap();
    assert_eq!(first.archived_at, second.archived_at);
}

#[tokio::test]
async fn payers_are_registered_and_fetched() {
    let mut app = spawn_app().await;
    let payer = app.register_payer("Mina").await;

    let fetched = app
        .client
        .get_payer(GetPayerRequest {
            tenant_id: app.tenant_id.to_string(),
            payer_id: payer.payer_id.clone(),
        })
        .await
        .unwrap()
        .into_inner()
        .payer
        .unwrap();
    assert_eq!(fetched.display_name, "Mina");

    let err = app
        .client
        .get_payer(GetPayerRequest {
            tenant_id: app.tenant_id.to_string(),
            payer_id: "not-a-uuid".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
}
