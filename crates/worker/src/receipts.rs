//! 回执接收器
//!
//! 消费邮件服务商的异步投递事件并折入升级记录：发送/送达确认、
//! 退信转失败、打开与点击记为参与度。事件的升级记录ID已在上游
//! 从邮件标签中还原。

use std::sync::Arc;

use escalator_domain::entities::{EngagementUpdate, EscalationStatus, SentReceipt};
use escalator_domain::events::{ReceiptEvent, ReceiptEventKind};
use escalator_domain::repositories::EscalationRepository;
use escalator_domain::state::EscalationStateManager;
use escalator_domain::FailureReason;
use escalator_errors::{EscalatorError, EscalatorResult};
use serde::Serialize;
use tracing::{info, warn};

const PROVIDER: &str = "resend";

/// 单个事件的处理结果
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub escalation_id: i64,
    pub processed: bool,
    pub action: &'static str,
}

pub struct ReceiptIngestor {
    escalation_repo: Arc<dyn EscalationRepository>,
    state: Arc<EscalationStateManager>,
}

impl ReceiptIngestor {
    pub fn new(
        escalation_repo: Arc<dyn EscalationRepository>,
        state: Arc<EscalationStateManager>,
    ) -> Self {
        Self {
            escalation_repo,
            state,
        }
    }

    pub async fn ingest(&self, event: &ReceiptEvent) -> EscalatorResult<IngestOutcome> {
        let id = event.escalation_id;
        match event.kind {
            ReceiptEventKind::Sent => self.handle_sent(event).await,
            ReceiptEventKind::Delivered => {
                self.merge_engagement(
                    id,
                    EngagementUpdate {
                        delivered_at: Some(event.timestamp),
                        provider_payload: Some(event.provider_payload.clone()),
                        ..EngagementUpdate::default()
                    },
                    "delivery_confirmed",
                )
                .await
            }
            ReceiptEventKind::Bounced => self.handle_bounced(event).await,
            ReceiptEventKind::Complained => {
                // 联系人投诉标记属于外部职责，这里只留档参与度
                self.merge_engagement(
                    id,
                    EngagementUpdate {
                        complained_at: Some(event.timestamp),
                        provider_payload: Some(event.provider_payload.clone()),
                        ..EngagementUpdate::default()
                    },
                    "complaint_recorded",
                )
                .await
            }
            ReceiptEventKind::Opened => {
                self.merge_engagement(
                    id,
                    EngagementUpdate {
                        opened_at: Some(event.timestamp),
                        ..EngagementUpdate::default()
                    },
                    "open_recorded",
                )
                .await
            }
            ReceiptEventKind::Clicked => {
                let click_url = event.provider_payload["click"]["link"]
                    .as_str()
                    .map(String::from);
                self.merge_engagement(
                    id,
                    EngagementUpdate {
                        clicked_at: Some(event.timestamp),
                        click_url,
                        ..EngagementUpdate::default()
                    },
                    "click_recorded",
                )
                .await
            }
        }
    }

    /// 发送确认：仅在记录仍处于pending/retrying时补转sent，
    /// 其余状态下是迟到事件，忽略
    async fn handle_sent(&self, event: &ReceiptEvent) -> EscalatorResult<IngestOutcome> {
        let id = event.escalation_id;
        let escalation = self
            .escalation_repo
            .get_by_id(id)
            .await?
            .ok_or(EscalatorError::EscalationNotFound { id })?;

        if !matches!(
            escalation.status,
            EscalationStatus::Pending | EscalationStatus::Retrying
        ) {
            return Ok(IngestOutcome {
                escalation_id: id,
                processed: false,
                action: "sent_event_ignored",
            });
        }

        let provider_message_id = event.provider_payload["email_id"]
            .as_str()
            .map(String::from);
        self.state
            .mark_sent(
                id,
                SentReceipt {
                    provider: PROVIDER.to_string(),
                    provider_message_id,
                    raw_response: Some(event.provider_payload.clone()),
                    sent_at: event.timestamp,
                },
            )
            .await?;
        info!(escalation_id = id, "通过webhook确认升级记录已发送");
        Ok(IngestOutcome {
            escalation_id: id,
            processed: true,
            action: "marked_sent",
        })
    }

    /// 退信视作邮箱无效的终态失败。已发送记录上的迟到退信
    /// 无法再转换状态，只告警留痕
    async fn handle_bounced(&self, event: &ReceiptEvent) -> EscalatorResult<IngestOutcome> {
        let id = event.escalation_id;
        let bounce_reason = event.provider_payload["bounce"]["message"]
            .as_str()
            .or_else(|| event.provider_payload["reason"].as_str())
            .unwrap_or("unknown_bounce")
            .to_string();

        match self
            .state
            .handle_failure(id, FailureReason::EmailInvalid, Some(bounce_reason.clone()))
            .await
        {
            Ok(_) => {
                info!(escalation_id = id, "升级记录因退信转为失败: {bounce_reason}");
                Ok(IngestOutcome {
                    escalation_id: id,
                    processed: true,
                    action: "bounced_failed",
                })
            }
            Err(e) if e.is_invalid_transition() => {
                warn!(escalation_id = id, "退信事件到达时记录已无法转换: {e}");
                Ok(IngestOutcome {
                    escalation_id: id,
                    processed: false,
                    action: "transition_rejected",
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn merge_engagement(
        &self,
        id: i64,
        update: EngagementUpdate,
        action: &'static str,
    ) -> EscalatorResult<IngestOutcome> {
        self.state.record_engagement(id, update).await?;
        info!(escalation_id = id, action, "参与度事件已合并");
        Ok(IngestOutcome {
            escalation_id: id,
            processed: true,
            action,
        })
    }
}
