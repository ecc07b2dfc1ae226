use std::sync::Arc;

use chrono::{Duration, Utc};

use escalator_dispatcher::EscalationScheduler;
use escalator_domain::entities::EscalationStatus;
use escalator_domain::repositories::EscalationRepository;
use escalator_testing_utils::{
    owner, ContactBuilder, EscalationBuilder, PolicyBuilder, TaskBuilder, MockStore,
};

fn scheduler_with_store() -> (EscalationScheduler, MockStore) {
    let store = MockStore::new();
    let scheduler = EscalationScheduler::new(Arc::new(store.clone()), Arc::new(store.clone()));
    (scheduler, store)
}

#[tokio::test]
async fn test_schedules_escalation_for_overdue_task() {
    let (scheduler, store) = scheduler_with_store();
    let now = Utc::now();
    let due_at = now - Duration::minutes(90);

    store.insert_owner(owner(1));
    store.insert_task(TaskBuilder::new().with_id(1).with_due_at(due_at).build());
    store.insert_contact(ContactBuilder::new().with_id(1).build());
    store.insert_policy(
        PolicyBuilder::new()
            .with_id(1)
            .with_task_id(1)
            .with_minutes_after_due(60)
            .build(),
    );

    let summary = scheduler.scan_and_schedule(now).await.unwrap();

    assert_eq!(summary.overdue_tasks_checked, 1);
    assert_eq!(summary.escalations_scheduled, 1);
    assert!(summary.errors.is_empty());

    let scheduled = &summary.scheduled[0];
    assert_eq!(scheduled.policy_id, 1);
    assert_eq!(scheduled.minutes_overdue, 90);
    assert_eq!(scheduled.scheduled_for, due_at + Duration::minutes(60));

    let record = store.escalation(scheduled.escalation_id).unwrap();
    assert_eq!(record.status, EscalationStatus::Pending);
    assert_eq!(record.scheduled_for, due_at + Duration::minutes(60));
}

#[tokio::test]
async fn test_threshold_not_reached_creates_nothing() {
    let (scheduler, store) = scheduler_with_store();
    let now = Utc::now();
    // 逾期59分钟，策略要求60分钟
    let due_at = now - Duration::minutes(59);

    store.insert_owner(owner(1));
    store.insert_task(TaskBuilder::new().with_id(1).with_due_at(due_at).build());
    store.insert_contact(ContactBuilder::new().with_id(1).build());
    store.insert_policy(
        PolicyBuilder::new()
            .with_id(1)
            .with_task_id(1)
            .with_minutes_after_due(60)
            .build(),
    );

    let summary = scheduler.scan_and_schedule(now).await.unwrap();

    assert_eq!(summary.overdue_tasks_checked, 1);
    assert_eq!(summary.escalations_scheduled, 0);
    assert_eq!(store.escalation_count(), 0);

    // 到达阈值后同一次配置可以调度
    let summary = scheduler
        .scan_and_schedule(now + Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(summary.escalations_scheduled, 1);
    assert_eq!(summary.scheduled[0].scheduled_for, due_at + Duration::minutes(60));
}

#[tokio::test]
async fn test_scheduling_is_idempotent() {
    let (scheduler, store) = scheduler_with_store();
    let now = Utc::now();

    store.insert_owner(owner(1));
    store.insert_task(
        TaskBuilder::new()
            .with_id(1)
            .with_due_at(now - Duration::hours(3))
            .build(),
    );
    store.insert_contact(ContactBuilder::new().with_id(1).build());
    store.insert_policy(
        PolicyBuilder::new()
            .with_id(1)
            .with_task_id(1)
            .with_minutes_after_due(0)
            .build(),
    );

    let first = scheduler.scan_and_schedule(now).await.unwrap();
    let second = scheduler.scan_and_schedule(now).await.unwrap();

    assert_eq!(first.escalations_scheduled, 1);
    assert_eq!(second.escalations_scheduled, 0);
    assert!(second.errors.is_empty());
    assert_eq!(store.escalation_count(), 1);
}

#[tokio::test]
async fn test_existing_record_skipped_regardless_of_status() {
    let (scheduler, store) = scheduler_with_store();
    let now = Utc::now();

    store.insert_owner(owner(1));
    store.insert_task(
        TaskBuilder::new()
            .with_id(1)
            .with_due_at(now - Duration::hours(3))
            .build(),
    );
    store.insert_contact(ContactBuilder::new().with_id(1).build());
    store.insert_policy(
        PolicyBuilder::new()
            .with_id(1)
            .with_task_id(1)
            .with_minutes_after_due(0)
            .build(),
    );

    // 该策略已有一条失败终态的记录
    store
        .create(
            &EscalationBuilder::new()
                .with_policy_id(1)
                .with_status(EscalationStatus::Failed)
                .build(),
        )
        .await
        .unwrap();

    let summary = scheduler.scan_and_schedule(now).await.unwrap();
    assert_eq!(summary.escalations_scheduled, 0);
    assert!(summary.errors.is_empty());
    assert_eq!(store.escalation_count(), 1);
}

#[tokio::test]
async fn test_unverified_contact_is_skipped() {
    let (scheduler, store) = scheduler_with_store();
    let now = Utc::now();

    store.insert_owner(owner(1));
    store.insert_task(
        TaskBuilder::new()
            .with_id(1)
            .with_due_at(now - Duration::hours(1))
            .build(),
    );
    store.insert_contact(ContactBuilder::new().with_id(1).unverified().build());
    store.insert_policy(
        PolicyBuilder::new()
            .with_id(1)
            .with_task_id(1)
            .with_minutes_after_due(0)
            .build(),
    );

    let summary = scheduler.scan_and_schedule(now).await.unwrap();
    assert_eq!(summary.escalations_scheduled, 0);
    assert!(summary.errors.is_empty());
    assert_eq!(store.escalation_count(), 0);
}

#[tokio::test]
async fn test_custom_template_is_rendered() {
    let (scheduler, store) = scheduler_with_store();
    let now = Utc::now();

    store.insert_owner(owner(1));
    store.insert_task(
        TaskBuilder::new()
            .with_id(1)
            .with_title("Report")
            .with_due_at(now - Duration::hours(2))
            .build(),
    );
    store.insert_contact(ContactBuilder::new().with_id(1).with_name("Sam").build());
    store.insert_policy(
        PolicyBuilder::new()
            .with_id(1)
            .with_task_id(1)
            .with_minutes_after_due(0)
            .with_template("Hi {{contactName}}, task {{taskTitle}} is late")
            .build(),
    );

    let summary = scheduler.scan_and_schedule(now).await.unwrap();
    let record = store.escalation(summary.scheduled[0].escalation_id).unwrap();
    assert_eq!(record.message_content, "Hi Sam, task Report is late");
}

#[tokio::test]
async fn test_multiple_levels_scheduled_independently() {
    let (scheduler, store) = scheduler_with_store();
    let now = Utc::now();

    store.insert_owner(owner(1));
    store.insert_task(
        TaskBuilder::new()
            .with_id(1)
            .with_due_at(now - Duration::minutes(70))
            .build(),
    );
    store.insert_contact(ContactBuilder::new().with_id(1).build());
    store.insert_contact(ContactBuilder::new().with_id(2).with_email("two@example.com").build());
    // 级别1已到阈值，级别2还差50分钟
    store.insert_policy(
        PolicyBuilder::new()
            .with_id(1)
            .with_task_id(1)
            .with_level(1)
            .with_minutes_after_due(30)
            .with_contact_id(1)
            .build(),
    );
    store.insert_policy(
        PolicyBuilder::new()
            .with_id(2)
            .with_task_id(1)
            .with_level(2)
            .with_minutes_after_due(120)
            .with_contact_id(2)
            .build(),
    );

    let summary = scheduler.scan_and_schedule(now).await.unwrap();
    assert_eq!(summary.escalations_scheduled, 1);
    assert_eq!(summary.scheduled[0].level, 1);

    let later = scheduler
        .scan_and_schedule(now + Duration::minutes(60))
        .await
        .unwrap();
    assert_eq!(later.escalations_scheduled, 1);
    assert_eq!(later.scheduled[0].level, 2);
    assert_eq!(store.escalation_count(), 2);
}
