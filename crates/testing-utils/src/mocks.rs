//! Mock implementations of the repository and notifier traits
//!
//! `MockStore` is a single in-memory fake backing all three repository
//! traits, so joined queries see one consistent data set. Cloning shares
//! the underlying state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use escalator_domain::entities::{
    Contact, Engagement, EngagementUpdate, Escalation, EscalationPolicy, EscalationStatus, Owner,
    Task, TaskStatus,
};
use escalator_domain::ports::{NotificationMessage, Notifier, NotifierReceipt};
use escalator_domain::repositories::{
    DueEscalation, EngagementRepository, EscalationRepository, OverdueTask, PolicyWithContact,
    TaskRepository,
};
use escalator_errors::{EscalatorError, EscalatorResult};

#[derive(Default)]
struct StoreInner {
    tasks: HashMap<i64, Task>,
    owners: HashMap<i64, Owner>,
    contacts: HashMap<i64, Contact>,
    policies: HashMap<i64, EscalationPolicy>,
    escalations: HashMap<i64, Escalation>,
    engagements: HashMap<i64, Engagement>,
    next_escalation_id: i64,
}

#[derive(Clone)]
pub struct MockStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner {
                next_escalation_id: 1,
                ..StoreInner::default()
            })),
        }
    }

    pub fn insert_owner(&self, owner: Owner) {
        self.inner.lock().unwrap().owners.insert(owner.id, owner);
    }

    pub fn insert_task(&self, task: Task) {
        self.inner.lock().unwrap().tasks.insert(task.id, task);
    }

    pub fn insert_contact(&self, contact: Contact) {
        self.inner
            .lock()
            .unwrap()
            .contacts
            .insert(contact.id, contact);
    }

    pub fn insert_policy(&self, policy: EscalationPolicy) {
        self.inner
            .lock()
            .unwrap()
            .policies
            .insert(policy.id, policy);
    }

    pub fn set_task_status(&self, task_id: i64, status: TaskStatus) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(task) = inner.tasks.get_mut(&task_id) {
            task.status = status;
            if status == TaskStatus::Completed {
                task.completed_at = Some(Utc::now());
            }
        }
    }

    pub fn escalation(&self, id: i64) -> Option<Escalation> {
        self.inner.lock().unwrap().escalations.get(&id).cloned()
    }

    pub fn escalation_count(&self) -> usize {
        self.inner.lock().unwrap().escalations.len()
    }

    pub fn engagement(&self, escalation_id: i64) -> Option<Engagement> {
        self.inner
            .lock()
            .unwrap()
            .engagements
            .get(&escalation_id)
            .cloned()
    }
}

#[async_trait]
impl TaskRepository for MockStore {
    async fn get_by_id(&self, id: i64) -> EscalatorResult<Option<Task>> {
        Ok(self.inner.lock().unwrap().tasks.get(&id).cloned())
    }

    async fn get_overdue_with_policies(
        &self,
        now: DateTime<Utc>,
    ) -> EscalatorResult<Vec<OverdueTask>> {
        let inner = self.inner.lock().unwrap();
        let mut overdue: Vec<OverdueTask> = inner
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending && t.due_at < now)
            .filter_map(|task| {
                let owner = inner.owners.get(&task.owner_id)?.clone();
                let policies = inner
                    .policies
                    .values()
                    .filter(|p| p.task_id == task.id)
                    .filter_map(|policy| {
                        let contact = inner.contacts.get(&policy.contact_id)?.clone();
                        Some(PolicyWithContact {
                            policy: policy.clone(),
                            contact,
                        })
                    })
                    .collect();
                Some(OverdueTask {
                    task: task.clone(),
                    owner,
                    policies,
                })
            })
            .collect();
        overdue.sort_by_key(|o| o.task.due_at);
        Ok(overdue)
    }
}

#[async_trait]
impl EscalationRepository for MockStore {
    async fn create(&self, escalation: &Escalation) -> EscalatorResult<Escalation> {
        let mut inner = self.inner.lock().unwrap();

        if inner
            .escalations
            .values()
            .any(|e| e.policy_id == escalation.policy_id)
        {
            return Err(EscalatorError::EscalationExists {
                policy_id: escalation.policy_id,
            });
        }

        let mut created = escalation.clone();
        created.id = inner.next_escalation_id;
        inner.next_escalation_id += 1;
        inner.escalations.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> EscalatorResult<Option<Escalation>> {
        Ok(self.inner.lock().unwrap().escalations.get(&id).cloned())
    }

    async fn get_by_policy_id(&self, policy_id: i64) -> EscalatorResult<Option<Escalation>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .escalations
            .values()
            .find(|e| e.policy_id == policy_id)
            .cloned())
    }

    async fn get_due(&self, now: DateTime<Utc>) -> EscalatorResult<Vec<DueEscalation>> {
        let inner = self.inner.lock().unwrap();
        let mut due: Vec<DueEscalation> = inner
            .escalations
            .values()
            .filter(|e| {
                matches!(
                    e.status,
                    EscalationStatus::Pending | EscalationStatus::Retrying
                ) && e.scheduled_for <= now
            })
            .filter_map(|escalation| {
                let policy = inner.policies.get(&escalation.policy_id)?.clone();
                let contact = inner.contacts.get(&policy.contact_id)?.clone();
                let task = inner.tasks.get(&policy.task_id)?.clone();
                let owner = inner.owners.get(&task.owner_id)?.clone();
                Some(DueEscalation {
                    escalation: escalation.clone(),
                    policy,
                    contact,
                    task,
                    owner,
                })
            })
            .collect();
        due.sort_by_key(|d| d.escalation.scheduled_for);
        Ok(due)
    }

    async fn get_active_by_task_id(&self, task_id: i64) -> EscalatorResult<Vec<Escalation>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .escalations
            .values()
            .filter(|e| !e.status.is_terminal())
            .filter(|e| {
                inner
                    .policies
                    .get(&e.policy_id)
                    .map(|p| p.task_id == task_id)
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn transition(
        &self,
        escalation: &Escalation,
        expected: EscalationStatus,
    ) -> EscalatorResult<Escalation> {
        let mut inner = self.inner.lock().unwrap();
        let current = inner
            .escalations
            .get(&escalation.id)
            .ok_or(EscalatorError::EscalationNotFound { id: escalation.id })?;

        if current.status != expected {
            return Err(EscalatorError::InvalidTransition {
                id: escalation.id,
                from: current.status.to_string(),
                to: escalation.status.to_string(),
            });
        }

        inner.escalations.insert(escalation.id, escalation.clone());
        Ok(escalation.clone())
    }

    async fn count_by_status_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> EscalatorResult<Vec<(EscalationStatus, i64)>> {
        let inner = self.inner.lock().unwrap();
        let mut counts: HashMap<EscalationStatus, i64> = HashMap::new();
        for escalation in inner.escalations.values() {
            if escalation.created_at >= cutoff {
                *counts.entry(escalation.status).or_insert(0) += 1;
            }
        }
        Ok(counts.into_iter().collect())
    }
}

#[async_trait]
impl EngagementRepository for MockStore {
    async fn get_by_escalation_id(
        &self,
        escalation_id: i64,
    ) -> EscalatorResult<Option<Engagement>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .engagements
            .get(&escalation_id)
            .cloned())
    }

    async fn merge(
        &self,
        escalation_id: i64,
        update: &EngagementUpdate,
    ) -> EscalatorResult<Engagement> {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();
        let engagement = inner
            .engagements
            .entry(escalation_id)
            .or_insert_with(|| Engagement {
                escalation_id,
                delivered_at: None,
                opened_at: None,
                clicked_at: None,
                click_url: None,
                complained_at: None,
                provider_payload: None,
                updated_at: now,
            });

        if update.delivered_at.is_some() {
            engagement.delivered_at = update.delivered_at;
        }
        if update.opened_at.is_some() {
            engagement.opened_at = update.opened_at;
        }
        if update.clicked_at.is_some() {
            engagement.clicked_at = update.clicked_at;
        }
        if update.click_url.is_some() {
            engagement.click_url = update.click_url.clone();
        }
        if update.complained_at.is_some() {
            engagement.complained_at = update.complained_at;
        }
        if update.provider_payload.is_some() {
            engagement.provider_payload = update.provider_payload.clone();
        }
        engagement.updated_at = now;

        Ok(engagement.clone())
    }
}

enum NotifierBehavior {
    Succeed,
    Fail(String),
    FailFirst(usize, String),
}

/// Programmable notifier double recording every message it receives
pub struct MockNotifier {
    behavior: Mutex<NotifierBehavior>,
    sent: Mutex<Vec<NotificationMessage>>,
    attempts: Mutex<usize>,
}

impl MockNotifier {
    pub fn succeeding() -> Self {
        Self {
            behavior: Mutex::new(NotifierBehavior::Succeed),
            sent: Mutex::new(Vec::new()),
            attempts: Mutex::new(0),
        }
    }

    pub fn failing_with<S: Into<String>>(error: S) -> Self {
        Self {
            behavior: Mutex::new(NotifierBehavior::Fail(error.into())),
            sent: Mutex::new(Vec::new()),
            attempts: Mutex::new(0),
        }
    }

    /// Fails the first `n` sends with `error`, then succeeds
    pub fn failing_first<S: Into<String>>(n: usize, error: S) -> Self {
        Self {
            behavior: Mutex::new(NotifierBehavior::FailFirst(n, error.into())),
            sent: Mutex::new(Vec::new()),
            attempts: Mutex::new(0),
        }
    }

    pub fn sent_messages(&self) -> Vec<NotificationMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn attempt_count(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send(&self, message: &NotificationMessage) -> EscalatorResult<NotifierReceipt> {
        let mut attempts = self.attempts.lock().unwrap();
        *attempts += 1;
        let attempt = *attempts;
        drop(attempts);

        let behavior = self.behavior.lock().unwrap();
        match &*behavior {
            NotifierBehavior::Fail(error) => Err(EscalatorError::Notifier(error.clone())),
            NotifierBehavior::FailFirst(n, error) if attempt <= *n => {
                Err(EscalatorError::Notifier(error.clone()))
            }
            _ => {
                self.sent.lock().unwrap().push(message.clone());
                Ok(NotifierReceipt {
                    provider_message_id: Some(format!("mock-message-{attempt}")),
                    raw_response: Some(serde_json::json!({ "id": attempt })),
                })
            }
        }
    }
}
