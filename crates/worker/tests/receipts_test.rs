use std::sync::Arc;

use chrono::Utc;

use escalator_domain::entities::{EscalationStatus, SentReceipt};
use escalator_domain::events::{ReceiptEvent, ReceiptEventKind};
use escalator_domain::repositories::EscalationRepository;
use escalator_domain::state::EscalationStateManager;
use escalator_testing_utils::{EscalationBuilder, MockStore};
use escalator_worker::ReceiptIngestor;

fn ingestor_with_store() -> (ReceiptIngestor, Arc<EscalationStateManager>, MockStore) {
    let store = MockStore::new();
    let state = Arc::new(EscalationStateManager::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        None,
    ));
    let ingestor = ReceiptIngestor::new(Arc::new(store.clone()), state.clone());
    (ingestor, state, store)
}

async fn seed_escalation(store: &MockStore, status: EscalationStatus) -> i64 {
    store
        .create(
            &EscalationBuilder::new()
                .with_policy_id(1)
                .with_status(status)
                .build(),
        )
        .await
        .unwrap()
        .id
}

fn event(kind: ReceiptEventKind, escalation_id: i64, payload: serde_json::Value) -> ReceiptEvent {
    ReceiptEvent {
        kind,
        escalation_id,
        timestamp: Utc::now(),
        provider_payload: payload,
    }
}

#[tokio::test]
async fn test_sent_event_promotes_pending_record() {
    let (ingestor, _state, store) = ingestor_with_store();
    let id = seed_escalation(&store, EscalationStatus::Pending).await;

    let outcome = ingestor
        .ingest(&event(
            ReceiptEventKind::Sent,
            id,
            serde_json::json!({ "email_id": "msg-7" }),
        ))
        .await
        .unwrap();

    assert!(outcome.processed);
    assert_eq!(outcome.action, "marked_sent");

    let record = store.escalation(id).unwrap();
    assert_eq!(record.status, EscalationStatus::Sent);
}

#[tokio::test]
async fn test_sent_event_ignored_on_already_sent_record() {
    let (ingestor, state, store) = ingestor_with_store();
    let id = seed_escalation(&store, EscalationStatus::Pending).await;
    state
        .mark_sent(
            id,
            SentReceipt {
                provider: "resend".to_string(),
                provider_message_id: Some("msg-1".to_string()),
                raw_response: None,
                sent_at: Utc::now(),
            },
        )
        .await
        .unwrap();

    let outcome = ingestor
        .ingest(&event(ReceiptEventKind::Sent, id, serde_json::json!({})))
        .await
        .unwrap();

    assert!(!outcome.processed);
    assert_eq!(outcome.action, "sent_event_ignored");
}

#[tokio::test]
async fn test_delivered_and_opened_merge_engagement() {
    let (ingestor, _state, store) = ingestor_with_store();
    let id = seed_escalation(&store, EscalationStatus::Sent).await;

    ingestor
        .ingest(&event(
            ReceiptEventKind::Delivered,
            id,
            serde_json::json!({ "email_id": "msg-1" }),
        ))
        .await
        .unwrap();
    ingestor
        .ingest(&event(ReceiptEventKind::Opened, id, serde_json::json!({})))
        .await
        .unwrap();

    let engagement = store.engagement(id).unwrap();
    assert!(engagement.delivered_at.is_some());
    assert!(engagement.opened_at.is_some());
    assert!(engagement.clicked_at.is_none());
    // 参与度不改状态
    assert_eq!(store.escalation(id).unwrap().status, EscalationStatus::Sent);
}

#[tokio::test]
async fn test_clicked_event_records_url() {
    let (ingestor, _state, store) = ingestor_with_store();
    let id = seed_escalation(&store, EscalationStatus::Sent).await;

    let outcome = ingestor
        .ingest(&event(
            ReceiptEventKind::Clicked,
            id,
            serde_json::json!({ "click": { "link": "https://accountalist.com/receipts" } }),
        ))
        .await
        .unwrap();

    assert!(outcome.processed);
    let engagement = store.engagement(id).unwrap();
    assert_eq!(
        engagement.click_url.as_deref(),
        Some("https://accountalist.com/receipts")
    );
    assert!(engagement.clicked_at.is_some());
}

#[tokio::test]
async fn test_bounce_fails_pending_record() {
    let (ingestor, _state, store) = ingestor_with_store();
    let id = seed_escalation(&store, EscalationStatus::Pending).await;

    let outcome = ingestor
        .ingest(&event(
            ReceiptEventKind::Bounced,
            id,
            serde_json::json!({ "bounce": { "message": "mailbox does not exist" } }),
        ))
        .await
        .unwrap();

    assert!(outcome.processed);
    assert_eq!(outcome.action, "bounced_failed");
    // 退信不可重试，直接终态
    assert_eq!(store.escalation(id).unwrap().status, EscalationStatus::Failed);
}

#[tokio::test]
async fn test_bounce_after_sent_is_rejected_not_fatal() {
    let (ingestor, _state, store) = ingestor_with_store();
    let id = seed_escalation(&store, EscalationStatus::Sent).await;

    let outcome = ingestor
        .ingest(&event(
            ReceiptEventKind::Bounced,
            id,
            serde_json::json!({ "reason": "late bounce" }),
        ))
        .await
        .unwrap();

    assert!(!outcome.processed);
    assert_eq!(outcome.action, "transition_rejected");
    assert_eq!(store.escalation(id).unwrap().status, EscalationStatus::Sent);
}

#[tokio::test]
async fn test_complaint_recorded_as_engagement_only() {
    let (ingestor, _state, store) = ingestor_with_store();
    let id = seed_escalation(&store, EscalationStatus::Sent).await;

    let outcome = ingestor
        .ingest(&event(
            ReceiptEventKind::Complained,
            id,
            serde_json::json!({ "complaint": "spam" }),
        ))
        .await
        .unwrap();

    assert!(outcome.processed);
    assert_eq!(outcome.action, "complaint_recorded");
    let engagement = store.engagement(id).unwrap();
    assert!(engagement.complained_at.is_some());
    assert_eq!(store.escalation(id).unwrap().status, EscalationStatus::Sent);
}

#[tokio::test]
async fn test_unknown_escalation_id_errors() {
    let (ingestor, _state, _store) = ingestor_with_store();

    let err = ingestor
        .ingest(&event(ReceiptEventKind::Opened, 404, serde_json::json!({})))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        escalator_errors::EscalatorError::EscalationNotFound { id: 404 }
    ));
}
