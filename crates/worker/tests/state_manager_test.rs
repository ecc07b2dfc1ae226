use std::sync::Arc;

use chrono::{Duration, Utc};

use escalator_domain::entities::{
    DeliveryReceipt, EngagementUpdate, EscalationStatus, SentReceipt,
};
use escalator_domain::repositories::EscalationRepository;
use escalator_domain::state::EscalationStateManager;
use escalator_domain::FailureReason;
use escalator_testing_utils::{
    owner, ContactBuilder, EscalationBuilder, PolicyBuilder, TaskBuilder, MockStore,
};

fn state_with_store() -> (EscalationStateManager, MockStore) {
    let store = MockStore::new();
    let state =
        EscalationStateManager::new(Arc::new(store.clone()), Arc::new(store.clone()), None);
    (state, store)
}

async fn seed_pending_escalation(store: &MockStore) -> i64 {
    store
        .create(&EscalationBuilder::new().with_policy_id(1).build())
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn test_retry_backoff_sequence_then_final_failure() {
    let (state, store) = state_with_store();
    let id = seed_pending_escalation(&store).await;

    // 连续三次可重试失败: 退避 5 / 15 / 45 分钟
    for (attempt, expected_delay) in [(1, 5), (2, 15), (3, 45)] {
        let decision = state
            .handle_failure(id, FailureReason::NetworkError, Some("connection reset".into()))
            .await
            .unwrap();
        assert!(decision.will_retry, "attempt {attempt} should retry");
        assert_eq!(decision.retry_count, attempt);
        assert_eq!(decision.delay_minutes, Some(expected_delay));
        assert!(decision.next_retry_at.is_some());

        let record = store.escalation(id).unwrap();
        assert_eq!(record.status, EscalationStatus::Retrying);
        assert_eq!(record.retry_count(), attempt);
        assert_eq!(record.scheduled_for, decision.next_retry_at.unwrap());
    }

    // 第四次失败耗尽重试，进入失败终态
    let decision = state
        .handle_failure(id, FailureReason::NetworkError, Some("connection reset".into()))
        .await
        .unwrap();
    assert!(!decision.will_retry);
    assert!(decision.final_failure);
    assert_eq!(decision.retry_count, 4);
    assert!(decision.next_retry_at.is_none());

    let record = store.escalation(id).unwrap();
    assert_eq!(record.status, EscalationStatus::Failed);
    match record.receipt.unwrap() {
        DeliveryReceipt::Failure(f) => {
            assert!(f.final_failure);
            assert!(f.max_retries_exceeded);
            assert_eq!(f.retries, 4);
            assert!(f.next_retry_at.is_none());
        }
        other => panic!("expected failure receipt, got {other:?}"),
    }
}

#[tokio::test]
async fn test_non_retryable_reason_short_circuits() {
    let (state, store) = state_with_store();
    let id = seed_pending_escalation(&store).await;

    let decision = state
        .handle_failure(id, FailureReason::EmailInvalid, Some("invalid email".into()))
        .await
        .unwrap();

    assert!(!decision.will_retry);
    assert!(decision.final_failure);
    assert_eq!(decision.retry_count, 1);

    let record = store.escalation(id).unwrap();
    assert_eq!(record.status, EscalationStatus::Failed);
    match record.receipt.unwrap() {
        DeliveryReceipt::Failure(f) => {
            assert!(f.final_failure);
            // 第一次失败即终止，不是重试耗尽
            assert!(!f.max_retries_exceeded);
            assert_eq!(f.reason, FailureReason::EmailInvalid);
        }
        other => panic!("expected failure receipt, got {other:?}"),
    }
}

#[tokio::test]
async fn test_mark_sent_stamps_receipt() {
    let (state, store) = state_with_store();
    let id = seed_pending_escalation(&store).await;
    let sent_at = Utc::now();

    let updated = state
        .mark_sent(
            id,
            SentReceipt {
                provider: "resend".to_string(),
                provider_message_id: Some("msg-1".to_string()),
                raw_response: Some(serde_json::json!({ "id": "msg-1" })),
                sent_at,
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.status, EscalationStatus::Sent);
    assert_eq!(updated.sent_at, Some(sent_at));
    match updated.receipt.unwrap() {
        DeliveryReceipt::Sent(r) => {
            assert_eq!(r.provider_message_id.as_deref(), Some("msg-1"));
        }
        other => panic!("expected sent receipt, got {other:?}"),
    }
}

#[tokio::test]
async fn test_mark_sent_rejected_on_terminal_record() {
    let (state, store) = state_with_store();
    let id = seed_pending_escalation(&store).await;

    state
        .cancel(id, "task_completed", None)
        .await
        .unwrap();

    let err = state
        .mark_sent(
            id,
            SentReceipt {
                provider: "resend".to_string(),
                provider_message_id: None,
                raw_response: None,
                sent_at: Utc::now(),
            },
        )
        .await
        .unwrap_err();

    assert!(err.is_invalid_transition());
    // 记录保持不变
    let record = store.escalation(id).unwrap();
    assert_eq!(record.status, EscalationStatus::Cancelled);
    assert!(record.sent_at.is_none());
}

#[tokio::test]
async fn test_cancel_records_reason_and_metadata() {
    let (state, store) = state_with_store();
    let id = seed_pending_escalation(&store).await;

    let metadata = serde_json::json!({ "completed_at": "2026-08-01T00:00:00Z" });
    let cancelled = state
        .cancel(id, "task_completed", Some(metadata.clone()))
        .await
        .unwrap();

    assert_eq!(cancelled.status, EscalationStatus::Cancelled);
    match cancelled.receipt.unwrap() {
        DeliveryReceipt::Cancelled(r) => {
            assert_eq!(r.reason, "task_completed");
            assert_eq!(r.metadata, Some(metadata));
        }
        other => panic!("expected cancelled receipt, got {other:?}"),
    }
}

#[tokio::test]
async fn test_cancel_for_task_skips_terminal_records() {
    let (state, store) = state_with_store();
    let now = Utc::now();

    store.insert_owner(owner(1));
    store.insert_task(TaskBuilder::new().with_id(1).with_due_at(now).build());
    store.insert_contact(ContactBuilder::new().with_id(1).build());
    store.insert_policy(PolicyBuilder::new().with_id(1).with_task_id(1).with_level(1).build());
    store.insert_policy(PolicyBuilder::new().with_id(2).with_task_id(1).with_level(2).build());
    store.insert_policy(PolicyBuilder::new().with_id(3).with_task_id(1).with_level(3).build());

    let pending = store
        .create(&EscalationBuilder::new().with_policy_id(1).build())
        .await
        .unwrap()
        .id;
    let retrying = store
        .create(
            &EscalationBuilder::new()
                .with_policy_id(2)
                .with_status(EscalationStatus::Retrying)
                .build(),
        )
        .await
        .unwrap()
        .id;
    let failed = store
        .create(
            &EscalationBuilder::new()
                .with_policy_id(3)
                .with_status(EscalationStatus::Failed)
                .build(),
        )
        .await
        .unwrap()
        .id;

    let cancelled = state.cancel_for_task(1, "task_completed").await.unwrap();

    assert_eq!(cancelled.len(), 2);
    assert!(cancelled.contains(&pending));
    assert!(cancelled.contains(&retrying));
    assert_eq!(
        store.escalation(pending).unwrap().status,
        EscalationStatus::Cancelled
    );
    assert_eq!(
        store.escalation(retrying).unwrap().status,
        EscalationStatus::Cancelled
    );
    assert_eq!(
        store.escalation(failed).unwrap().status,
        EscalationStatus::Failed
    );
}

#[tokio::test]
async fn test_record_engagement_merges_incrementally() {
    let (state, store) = state_with_store();
    let id = seed_pending_escalation(&store).await;
    let delivered_at = Utc::now() - Duration::minutes(10);
    let opened_at = Utc::now();

    state
        .record_engagement(
            id,
            EngagementUpdate {
                delivered_at: Some(delivered_at),
                ..EngagementUpdate::default()
            },
        )
        .await
        .unwrap();

    let merged = state
        .record_engagement(
            id,
            EngagementUpdate {
                opened_at: Some(opened_at),
                ..EngagementUpdate::default()
            },
        )
        .await
        .unwrap();

    // 先到的送达时间不被后续合并覆盖
    assert_eq!(merged.delivered_at, Some(delivered_at));
    assert_eq!(merged.opened_at, Some(opened_at));
    assert!(merged.clicked_at.is_none());
}

#[tokio::test]
async fn test_record_engagement_unknown_escalation() {
    let (state, _store) = state_with_store();

    let err = state
        .record_engagement(999, EngagementUpdate::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        escalator_errors::EscalatorError::EscalationNotFound { id: 999 }
    ));
}
