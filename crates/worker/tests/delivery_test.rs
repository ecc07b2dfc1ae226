use std::sync::Arc;

use chrono::{Duration, Utc};

use escalator_domain::entities::{DeliveryReceipt, EscalationStatus, TaskStatus};
use escalator_domain::messages::ShameMessageGenerator;
use escalator_domain::repositories::EscalationRepository;
use escalator_domain::state::EscalationStateManager;
use escalator_testing_utils::{
    owner, ContactBuilder, EscalationBuilder, MockNotifier, MockStore, PolicyBuilder, TaskBuilder,
};
use escalator_worker::{DeliveryOutcomeStatus, DeliveryWorker};

struct Fixture {
    store: MockStore,
    notifier: Arc<MockNotifier>,
    worker: DeliveryWorker,
}

fn fixture(notifier: MockNotifier) -> Fixture {
    let store = MockStore::new();
    let notifier = Arc::new(notifier);
    let state = Arc::new(EscalationStateManager::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        None,
    ));
    let worker = DeliveryWorker::new(
        Arc::new(store.clone()),
        state,
        notifier.clone(),
        Arc::new(ShameMessageGenerator::with_seed(42)),
        "AccountaList <noreply@accountalist.com>".to_string(),
    );
    Fixture {
        store,
        notifier,
        worker,
    }
}

/// 准备一条到期的pending升级记录，返回记录ID
async fn seed_due_escalation(store: &MockStore, policy_id: i64, level: i32) -> i64 {
    store.insert_owner(owner(1));
    store.insert_task(
        TaskBuilder::new()
            .with_id(1)
            .with_title("Quarterly report")
            .with_due_at(Utc::now() - Duration::hours(2))
            .build(),
    );
    store.insert_contact(ContactBuilder::new().with_id(1).build());
    store.insert_policy(
        PolicyBuilder::new()
            .with_id(policy_id)
            .with_task_id(1)
            .with_level(level)
            .with_contact_id(1)
            .build(),
    );
    store
        .create(
            &EscalationBuilder::new()
                .with_policy_id(policy_id)
                .with_scheduled_for(Utc::now() - Duration::minutes(10))
                .build(),
        )
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn test_successful_delivery_marks_sent() {
    let f = fixture(MockNotifier::succeeding());
    let id = seed_due_escalation(&f.store, 1, 2).await;

    let summary = f.worker.process_due(Utc::now()).await.unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.delivered, 1);
    assert_eq!(summary.failed, 0);
    assert!(summary.errors.is_empty());

    let record = f.store.escalation(id).unwrap();
    assert_eq!(record.status, EscalationStatus::Sent);
    assert!(record.sent_at.is_some());
    match record.receipt.unwrap() {
        DeliveryReceipt::Sent(r) => {
            assert_eq!(r.provider, "resend");
            assert!(r.provider_message_id.is_some());
        }
        other => panic!("expected sent receipt, got {other:?}"),
    }

    // 通知带齐关联标签
    let messages = f.notifier.sent_messages();
    assert_eq!(messages.len(), 1);
    let message = &messages[0];
    assert_eq!(message.to, "sam@example.com");
    assert!(message
        .tags
        .iter()
        .any(|t| t.name == "escalation_id" && t.value == id.to_string()));
    assert!(message.tags.iter().any(|t| t.name == "level" && t.value == "2"));
}

#[tokio::test]
async fn test_completed_task_cancels_without_notifying() {
    let f = fixture(MockNotifier::succeeding());
    let id = seed_due_escalation(&f.store, 1, 1).await;
    f.store.set_task_status(1, TaskStatus::Completed);

    let summary = f.worker.process_due(Utc::now()).await.unwrap();

    assert_eq!(summary.cancelled, 1);
    assert_eq!(summary.delivered, 0);
    assert_eq!(f.notifier.sent_count(), 0);

    let record = f.store.escalation(id).unwrap();
    assert_eq!(record.status, EscalationStatus::Cancelled);
    match record.receipt.unwrap() {
        DeliveryReceipt::Cancelled(r) => {
            assert_eq!(r.reason, "task_completed");
            assert!(r.metadata.is_some());
        }
        other => panic!("expected cancelled receipt, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unverified_contact_fails_terminally() {
    let f = fixture(MockNotifier::succeeding());
    let id = seed_due_escalation(&f.store, 1, 1).await;
    // 策略创建后联系人撤回了验证
    f.store
        .insert_contact(ContactBuilder::new().with_id(1).unverified().build());

    let summary = f.worker.process_due(Utc::now()).await.unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.retrying, 0);
    assert_eq!(f.notifier.sent_count(), 0);
    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].final_failure);

    let record = f.store.escalation(id).unwrap();
    assert_eq!(record.status, EscalationStatus::Failed);
}

#[tokio::test]
async fn test_retryable_failure_schedules_retry() {
    let f = fixture(MockNotifier::failing_with("network connection refused"));
    let id = seed_due_escalation(&f.store, 1, 1).await;
    let now = Utc::now();

    let summary = f.worker.process_due(now).await.unwrap();

    assert_eq!(summary.retrying, 1);
    assert_eq!(summary.failed, 0);
    let outcome = &summary.outcomes[0];
    assert_eq!(outcome.status, DeliveryOutcomeStatus::Retrying);
    assert_eq!(outcome.reason.as_deref(), Some("network_error"));
    assert_eq!(outcome.retry_count, Some(1));

    let record = f.store.escalation(id).unwrap();
    assert_eq!(record.status, EscalationStatus::Retrying);
    // 第一次重试退避5分钟
    assert_eq!(record.scheduled_for, outcome.next_retry_at.unwrap());
    assert!(record.scheduled_for >= now + Duration::minutes(4));
}

#[tokio::test]
async fn test_invalid_email_fails_on_first_attempt() {
    let f = fixture(MockNotifier::failing_with("invalid email address"));
    let id = seed_due_escalation(&f.store, 1, 1).await;

    let summary = f.worker.process_due(Utc::now()).await.unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.retrying, 0);
    let outcome = &summary.outcomes[0];
    assert_eq!(outcome.reason.as_deref(), Some("email_invalid"));
    assert_eq!(outcome.will_retry, Some(false));

    let record = f.store.escalation(id).unwrap();
    assert_eq!(record.status, EscalationStatus::Failed);
    match record.receipt.unwrap() {
        DeliveryReceipt::Failure(fr) => {
            assert!(fr.final_failure);
            assert!(!fr.max_retries_exceeded);
        }
        other => panic!("expected failure receipt, got {other:?}"),
    }
}

#[tokio::test]
async fn test_failure_on_one_record_does_not_block_batch() {
    let f = fixture(MockNotifier::failing_first(1, "server error from api"));
    let now = Utc::now();

    f.store.insert_owner(owner(1));
    f.store.insert_task(
        TaskBuilder::new()
            .with_id(1)
            .with_due_at(now - Duration::hours(2))
            .build(),
    );
    f.store.insert_contact(ContactBuilder::new().with_id(1).build());
    f.store.insert_policy(
        PolicyBuilder::new()
            .with_id(1)
            .with_task_id(1)
            .with_level(1)
            .build(),
    );
    f.store.insert_policy(
        PolicyBuilder::new()
            .with_id(2)
            .with_task_id(1)
            .with_level(2)
            .build(),
    );

    // 先到期的记录吃掉第一次失败，后到期的照常投递
    let first = f
        .store
        .create(
            &EscalationBuilder::new()
                .with_policy_id(1)
                .with_scheduled_for(now - Duration::minutes(30))
                .build(),
        )
        .await
        .unwrap()
        .id;
    let second = f
        .store
        .create(
            &EscalationBuilder::new()
                .with_policy_id(2)
                .with_scheduled_for(now - Duration::minutes(5))
                .build(),
        )
        .await
        .unwrap()
        .id;

    let summary = f.worker.process_due(now).await.unwrap();

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.retrying, 1);
    assert_eq!(summary.delivered, 1);
    assert_eq!(
        f.store.escalation(first).unwrap().status,
        EscalationStatus::Retrying
    );
    assert_eq!(
        f.store.escalation(second).unwrap().status,
        EscalationStatus::Sent
    );
}

#[tokio::test]
async fn test_records_not_yet_due_are_left_alone() {
    let f = fixture(MockNotifier::succeeding());
    let now = Utc::now();

    f.store.insert_owner(owner(1));
    f.store.insert_task(
        TaskBuilder::new()
            .with_id(1)
            .with_due_at(now - Duration::hours(1))
            .build(),
    );
    f.store.insert_contact(ContactBuilder::new().with_id(1).build());
    f.store
        .insert_policy(PolicyBuilder::new().with_id(1).with_task_id(1).build());

    f.store
        .create(
            &EscalationBuilder::new()
                .with_policy_id(1)
                .with_scheduled_for(now + Duration::minutes(30))
                .build(),
        )
        .await
        .unwrap();

    let summary = f.worker.process_due(now).await.unwrap();
    assert_eq!(summary.processed, 0);
    assert_eq!(f.notifier.sent_count(), 0);
}
