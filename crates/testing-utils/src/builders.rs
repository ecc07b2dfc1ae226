//! Test data builders with sensible defaults and easy customization

use chrono::{DateTime, Duration, Utc};

use escalator_domain::entities::{
    Contact, Escalation, EscalationPolicy, EscalationStatus, Owner, Task, TaskPriority, TaskStatus,
};

pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            task: Task {
                id: 1,
                owner_id: 1,
                title: "test_task".to_string(),
                due_at: now - Duration::hours(2),
                priority: TaskPriority::Medium,
                status: TaskStatus::Pending,
                completed_at: None,
                created_at: now - Duration::days(1),
                updated_at: now,
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.task.id = id;
        self
    }

    pub fn with_owner_id(mut self, owner_id: i64) -> Self {
        self.task.owner_id = owner_id;
        self
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.task.title = title.to_string();
        self
    }

    pub fn with_due_at(mut self, due_at: DateTime<Utc>) -> Self {
        self.task.due_at = due_at;
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.task.priority = priority;
        self
    }

    pub fn completed(mut self) -> Self {
        self.task.status = TaskStatus::Completed;
        self.task.completed_at = Some(Utc::now());
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub fn owner(id: i64) -> Owner {
    Owner {
        id,
        email: format!("owner{id}@example.com"),
        full_name: Some(format!("Owner {id}")),
    }
}

pub struct ContactBuilder {
    contact: Contact,
}

impl ContactBuilder {
    pub fn new() -> Self {
        Self {
            contact: Contact {
                id: 1,
                owner_id: 1,
                name: "Sam".to_string(),
                email: "sam@example.com".to_string(),
                relationship: Some("friend".to_string()),
                verified: true,
                created_at: Utc::now(),
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.contact.id = id;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.contact.name = name.to_string();
        self
    }

    pub fn with_email(mut self, email: &str) -> Self {
        self.contact.email = email.to_string();
        self
    }

    pub fn unverified(mut self) -> Self {
        self.contact.verified = false;
        self
    }

    pub fn build(self) -> Contact {
        self.contact
    }
}

impl Default for ContactBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct PolicyBuilder {
    policy: EscalationPolicy,
}

impl PolicyBuilder {
    pub fn new() -> Self {
        Self {
            policy: EscalationPolicy {
                id: 1,
                task_id: 1,
                level: 1,
                minutes_after_due: 0,
                contact_id: 1,
                message_template: None,
                created_at: Utc::now(),
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.policy.id = id;
        self
    }

    pub fn with_task_id(mut self, task_id: i64) -> Self {
        self.policy.task_id = task_id;
        self
    }

    pub fn with_level(mut self, level: i32) -> Self {
        self.policy.level = level;
        self
    }

    pub fn with_minutes_after_due(mut self, minutes: i32) -> Self {
        self.policy.minutes_after_due = minutes;
        self
    }

    pub fn with_contact_id(mut self, contact_id: i64) -> Self {
        self.policy.contact_id = contact_id;
        self
    }

    pub fn with_template(mut self, template: &str) -> Self {
        self.policy.message_template = Some(template.to_string());
        self
    }

    pub fn build(self) -> EscalationPolicy {
        self.policy
    }
}

impl Default for PolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct EscalationBuilder {
    escalation: Escalation,
}

impl EscalationBuilder {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            escalation: Escalation {
                id: 0,
                policy_id: 1,
                status: EscalationStatus::Pending,
                scheduled_for: now - Duration::minutes(5),
                message_content: "test escalation message".to_string(),
                sent_at: None,
                receipt: None,
                created_at: now,
                updated_at: now,
            },
        }
    }

    pub fn with_policy_id(mut self, policy_id: i64) -> Self {
        self.escalation.policy_id = policy_id;
        self
    }

    pub fn with_status(mut self, status: EscalationStatus) -> Self {
        self.escalation.status = status;
        self
    }

    pub fn with_scheduled_for(mut self, scheduled_for: DateTime<Utc>) -> Self {
        self.escalation.scheduled_for = scheduled_for;
        self
    }

    pub fn with_message(mut self, message: &str) -> Self {
        self.escalation.message_content = message.to_string();
        self
    }

    pub fn build(self) -> Escalation {
        self.escalation
    }
}

impl Default for EscalationBuilder {
    fn default() -> Self {
        Self::new()
    }
}
