use async_trait::async_trait;
use sqlx::{PgPool, Row};

use escalator_domain::entities::{Engagement, EngagementUpdate};
use escalator_domain::repositories::EngagementRepository;
use escalator_errors::{EscalatorError, EscalatorResult};

pub struct PostgresEngagementRepository {
    pool: PgPool,
}

impl PostgresEngagementRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_engagement(row: &sqlx::postgres::PgRow) -> EscalatorResult<Engagement> {
        Ok(Engagement {
            escalation_id: row.try_get("escalation_id")?,
            delivered_at: row.try_get("delivered_at")?,
            opened_at: row.try_get("opened_at")?,
            clicked_at: row.try_get("clicked_at")?,
            click_url: row.try_get("click_url")?,
            complained_at: row.try_get("complained_at")?,
            provider_payload: row.try_get("provider_payload")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl EngagementRepository for PostgresEngagementRepository {
    async fn get_by_escalation_id(
        &self,
        escalation_id: i64,
    ) -> EscalatorResult<Option<Engagement>> {
        let row = sqlx::query(
            "SELECT escalation_id, delivered_at, opened_at, clicked_at, click_url,
                    complained_at, provider_payload, updated_at
             FROM escalation_engagements WHERE escalation_id = $1",
        )
        .bind(escalation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(EscalatorError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_engagement(&row)?)),
            None => Ok(None),
        }
    }

    async fn merge(
        &self,
        escalation_id: i64,
        update: &EngagementUpdate,
    ) -> EscalatorResult<Engagement> {
        // COALESCE合并: 增量中的Some覆盖，None保留已有值
        let row = sqlx::query(
            r#"
            INSERT INTO escalation_engagements
                (escalation_id, delivered_at, opened_at, clicked_at, click_url,
                 complained_at, provider_payload, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            ON CONFLICT (escalation_id) DO UPDATE SET
                delivered_at = COALESCE(EXCLUDED.delivered_at, escalation_engagements.delivered_at),
                opened_at = COALESCE(EXCLUDED.opened_at, escalation_engagements.opened_at),
                clicked_at = COALESCE(EXCLUDED.clicked_at, escalation_engagements.clicked_at),
                click_url = COALESCE(EXCLUDED.click_url, escalation_engagements.click_url),
                complained_at = COALESCE(EXCLUDED.complained_at, escalation_engagements.complained_at),
                provider_payload = COALESCE(EXCLUDED.provider_payload, escalation_engagements.provider_payload),
                updated_at = NOW()
            RETURNING escalation_id, delivered_at, opened_at, clicked_at, click_url,
                      complained_at, provider_payload, updated_at
            "#,
        )
        .bind(escalation_id)
        .bind(update.delivered_at)
        .bind(update.opened_at)
        .bind(update.clicked_at)
        .bind(&update.click_url)
        .bind(update.complained_at)
        .bind(&update.provider_payload)
        .fetch_one(&self.pool)
        .await
        .map_err(EscalatorError::Database)?;

        Self::row_to_engagement(&row)
    }
}
