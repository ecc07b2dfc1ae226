use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::debug;

use escalator_domain::entities::{
    Contact, DeliveryReceipt, Escalation, EscalationPolicy, EscalationStatus, Owner, Task,
};
use escalator_domain::repositories::{DueEscalation, EscalationRepository};
use escalator_errors::{EscalatorError, EscalatorResult};

pub struct PostgresEscalationRepository {
    pool: PgPool,
}

impl PostgresEscalationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_escalation(row: &sqlx::postgres::PgRow) -> EscalatorResult<Escalation> {
        let receipt: Option<serde_json::Value> = row.try_get("delivery_receipt")?;
        let receipt: Option<DeliveryReceipt> = match receipt {
            Some(value) => Some(
                serde_json::from_value(value)
                    .map_err(|e| EscalatorError::Serialization(e.to_string()))?,
            ),
            None => None,
        };

        Ok(Escalation {
            id: row.try_get("id")?,
            policy_id: row.try_get("policy_id")?,
            status: row.try_get("status")?,
            scheduled_for: row.try_get("scheduled_for")?,
            message_content: row.try_get("message_content")?,
            sent_at: row.try_get("sent_at")?,
            receipt,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn receipt_to_value(
        receipt: &Option<DeliveryReceipt>,
    ) -> EscalatorResult<Option<serde_json::Value>> {
        match receipt {
            Some(receipt) => serde_json::to_value(receipt)
                .map(Some)
                .map_err(|e| EscalatorError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }
}

const ESCALATION_COLUMNS: &str = "id, policy_id, status, scheduled_for, message_content, \
                                  sent_at, delivery_receipt, created_at, updated_at";

#[async_trait]
impl EscalationRepository for PostgresEscalationRepository {
    async fn create(&self, escalation: &Escalation) -> EscalatorResult<Escalation> {
        let receipt = Self::receipt_to_value(&escalation.receipt)?;
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO escalations (policy_id, status, scheduled_for, message_content,
                                     sent_at, delivery_receipt)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {ESCALATION_COLUMNS}
            "#,
        ))
        .bind(escalation.policy_id)
        .bind(escalation.status)
        .bind(escalation.scheduled_for)
        .bind(&escalation.message_content)
        .bind(escalation.sent_at)
        .bind(receipt)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            // policy_id唯一约束是并发调度下的幂等兜底
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                EscalatorError::EscalationExists {
                    policy_id: escalation.policy_id,
                }
            }
            _ => EscalatorError::Database(e),
        })?;

        let created = Self::row_to_escalation(&row)?;
        debug!(
            escalation_id = created.id,
            policy_id = created.policy_id,
            "创建升级记录成功"
        );
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> EscalatorResult<Option<Escalation>> {
        let row = sqlx::query(&format!(
            "SELECT {ESCALATION_COLUMNS} FROM escalations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(EscalatorError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_escalation(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_by_policy_id(&self, policy_id: i64) -> EscalatorResult<Option<Escalation>> {
        let row = sqlx::query(&format!(
            "SELECT {ESCALATION_COLUMNS} FROM escalations WHERE policy_id = $1"
        ))
        .bind(policy_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(EscalatorError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_escalation(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_due(&self, now: DateTime<Utc>) -> EscalatorResult<Vec<DueEscalation>> {
        let rows = sqlx::query(
            r#"
            SELECT e.id, e.policy_id, e.status, e.scheduled_for, e.message_content,
                   e.sent_at, e.delivery_receipt, e.created_at, e.updated_at,
                   p.task_id AS p_task_id, p.level AS p_level,
                   p.minutes_after_due AS p_minutes_after_due, p.contact_id AS p_contact_id,
                   p.message_template AS p_message_template, p.created_at AS p_created_at,
                   c.id AS c_id, c.owner_id AS c_owner_id, c.name AS c_name, c.email AS c_email,
                   c.relationship AS c_relationship, c.verified AS c_verified,
                   c.created_at AS c_created_at,
                   t.id AS t_id, t.owner_id AS t_owner_id, t.title AS t_title,
                   t.due_at AS t_due_at, t.priority AS t_priority, t.status AS t_status,
                   t.completed_at AS t_completed_at, t.created_at AS t_created_at,
                   t.updated_at AS t_updated_at,
                   u.email AS u_email, u.full_name AS u_full_name
            FROM escalations e
            JOIN escalation_policies p ON p.id = e.policy_id
            JOIN contacts c ON c.id = p.contact_id
            JOIN tasks t ON t.id = p.task_id
            JOIN users u ON u.id = t.owner_id
            WHERE e.status IN ('pending', 'retrying') AND e.scheduled_for <= $1
            ORDER BY e.scheduled_for ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(EscalatorError::Database)?;

        let mut due = Vec::with_capacity(rows.len());
        for row in &rows {
            let escalation = Self::row_to_escalation(row)?;
            let policy = EscalationPolicy {
                id: escalation.policy_id,
                task_id: row.try_get("p_task_id")?,
                level: row.try_get("p_level")?,
                minutes_after_due: row.try_get("p_minutes_after_due")?,
                contact_id: row.try_get("p_contact_id")?,
                message_template: row.try_get("p_message_template")?,
                created_at: row.try_get("p_created_at")?,
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
            let task = Task {
                id: row.try_get("t_id")?,
                owner_id: row.try_get("t_owner_id")?,
                title: row.try_get("t_title")?,
                due_at: row.try_get("t_due_at")?,
                priority: row.try_get("t_priority")?,
                status: row.try_get("t_status")?,
                completed_at: row.try_get("t_completed_at")?,
                created_at: row.try_get("t_created_at")?,
                updated_at: row.try_get("t_updated_at")?,
            };
            let owner = Owner {
                id: task.owner_id,
                email: row.try_get("u_email")?,
                full_name: row.try_get("u_full_name")?,
            };
            due.push(DueEscalation {
                escalation,
                policy,
                contact,
                task,
                owner,
            });
        }

        debug!("查询到 {} 条到期升级记录", due.len());
        Ok(due)
    }

    async fn get_active_by_task_id(&self, task_id: i64) -> EscalatorResult<Vec<Escalation>> {
        let rows = sqlx::query(
            r#"
            SELECT e.id, e.policy_id, e.status, e.scheduled_for, e.message_content,
                   e.sent_at, e.delivery_receipt, e.created_at, e.updated_at
            FROM escalations e
            JOIN escalation_policies p ON p.id = e.policy_id
            WHERE p.task_id = $1 AND e.status NOT IN ('failed', 'cancelled')
            "#,
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .map_err(EscalatorError::Database)?;

        rows.iter().map(Self::row_to_escalation).collect()
    }

    async fn transition(
        &self,
        escalation: &Escalation,
        expected: EscalationStatus,
    ) -> EscalatorResult<Escalation> {
        let receipt = Self::receipt_to_value(&escalation.receipt)?;
        // 带状态前置条件的更新，两个并发转换只有一个能赢
        let row = sqlx::query(&format!(
            r#"
            UPDATE escalations
            SET status = $2, scheduled_for = $3, sent_at = $4, delivery_receipt = $5,
                updated_at = $6
            WHERE id = $1 AND status = $7
            RETURNING {ESCALATION_COLUMNS}
            "#,
        ))
        .bind(escalation.id)
        .bind(escalation.status)
        .bind(escalation.scheduled_for)
        .bind(escalation.sent_at)
        .bind(receipt)
        .bind(escalation.updated_at)
        .bind(expected)
        .fetch_optional(&self.pool)
        .await
        .map_err(EscalatorError::Database)?;

        match row {
            Some(row) => Self::row_to_escalation(&row),
            None => match self.get_by_id(escalation.id).await? {
                Some(current) => Err(EscalatorError::InvalidTransition {
                    id: escalation.id,
                    from: current.status.to_string(),
                    to: escalation.status.to_string(),
                }),
                None => Err(EscalatorError::EscalationNotFound { id: escalation.id }),
            },
        }
    }

    async fn count_by_status_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> EscalatorResult<Vec<(EscalationStatus, i64)>> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM escalations
             WHERE created_at >= $1 GROUP BY status",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(EscalatorError::Database)?;

        rows.iter()
            .map(|row| {
                let status: EscalationStatus = row.try_get("status")?;
                let count: i64 = row.try_get("count")?;
                Ok((status, count))
            })
            .collect()
    }
}
