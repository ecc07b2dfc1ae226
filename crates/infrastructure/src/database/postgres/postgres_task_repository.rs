use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::debug;

use escalator_domain::entities::{Contact, EscalationPolicy, Owner, Task};
use escalator_domain::repositories::{OverdueTask, PolicyWithContact, TaskRepository};
use escalator_errors::{EscalatorError, EscalatorResult};

pub struct PostgresTaskRepository {
    pool: PgPool,
}

impl PostgresTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &sqlx::postgres::PgRow) -> EscalatorResult<Task> {
        Ok(Task {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            title: row.try_get("title")?,
            due_at: row.try_get("due_at")?,
            priority: row.try_get("priority")?,
            status: row.try_get("status")?,
            completed_at: row.try_get("completed_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_owner(row: &sqlx::postgres::PgRow) -> EscalatorResult<Owner> {
        Ok(Owner {
            id: row.try_get("owner_id")?,
            email: row.try_get("owner_email")?,
            full_name: row.try_get("owner_full_name")?,
        })
    }
}

#[async_trait]
impl TaskRepository for PostgresTaskRepository {
    async fn get_by_id(&self, id: i64) -> EscalatorResult<Option<Task>> {
        let row = sqlx::query(
            "SELECT id, owner_id, title, due_at, priority, status, completed_at, created_at, updated_at
             FROM tasks WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(EscalatorError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_task(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_overdue_with_policies(
        &self,
        now: DateTime<Utc>,
    ) -> EscalatorResult<Vec<OverdueTask>> {
        let task_rows = sqlx::query(
            r#"
            SELECT t.id, t.owner_id, t.title, t.due_at, t.priority, t.status, t.completed_at,
                   t.created_at, t.updated_at,
                   u.email AS owner_email, u.full_name AS owner_full_name
            FROM tasks t
            JOIN users u ON u.id = t.owner_id
            WHERE t.status = 'pending' AND t.due_at < $1
            ORDER BY t.due_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(EscalatorError::Database)?;

        let mut overdue: Vec<OverdueTask> = Vec::with_capacity(task_rows.len());
        let mut index_by_task: HashMap<i64, usize> = HashMap::new();
        for row in &task_rows {
            let task = Self::row_to_task(row)?;
            let owner = Self::row_to_owner(row)?;
            index_by_task.insert(task.id, overdue.len());
            overdue.push(OverdueTask {
                task,
                owner,
                policies: Vec::new(),
            });
        }

        if overdue.is_empty() {
            return Ok(overdue);
        }

        let task_ids: Vec<i64> = overdue.iter().map(|o| o.task.id).collect();
        let policy_rows = sqlx::query(
            r#"
            SELECT p.id AS policy_id, p.task_id, p.level, p.minutes_after_due, p.contact_id,
                   p.message_template, p.created_at AS policy_created_at,
                   c.id AS c_id, c.owner_id AS c_owner_id, c.name AS c_name, c.email AS c_email,
                   c.relationship AS c_relationship, c.verified AS c_verified,
                   c.created_at AS c_created_at
            FROM escalation_policies p
            JOIN contacts c ON c.id = p.contact_id
            WHERE p.task_id = ANY($1)
            ORDER BY p.task_id, p.level
            "#,
        )
        .bind(&task_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(EscalatorError::Database)?;

        for row in &policy_rows {
            let policy = EscalationPolicy {
                id: row.try_get("policy_id")?,
                task_id: row.try_get("task_id")?,
                level: row.try_get("level")?,
                minutes_after_due: row.try_get("minutes_after_due")?,
                contact_id: row.try_get("contact_id")?,
                message_template: row.try_get("message_template")?,
                created_at: row.try_get("policy_created_at")?,
            };
            let contact = Contact {
                id: row.try_get("c_id")?,
                owner_id: row.try_get("c_owner_id")?,
                name: row.try_get("c_name")?,
                email: row.try_get("c_email")?,
                relationship: row.try_get("c_relationship")?,
                verified: row.try_get("c_verified")?,
                created_at: row.try_get("c_created_at")?,
            };
            if let Some(&index) = index_by_task.get(&policy.task_id) {
                overdue[index]
                    .policies
                    .push(PolicyWithContact { policy, contact });
            }
        }

        debug!("查询到 {} 个逾期任务", overdue.len());
        Ok(overdue)
    }
}
