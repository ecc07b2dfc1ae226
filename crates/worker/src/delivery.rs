//! 升级投递器
//!
//! 处理所有到期的pending/retrying升级记录：投递前复查任务与联系人
//! 状态，调用通知端口，并把结果交给状态管理器完成转换。单条记录的
//! 任何异常都被隔离，不会阻断批次中的后续记录。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use escalator_domain::entities::SentReceipt;
use escalator_domain::messages::{render_email_html, MessageContext, ShameMessageGenerator};
use escalator_domain::ports::{NotificationMessage, NotificationTag, Notifier};
use escalator_domain::repositories::{DueEscalation, EscalationRepository};
use escalator_domain::state::EscalationStateManager;
use escalator_domain::FailureReason;
use escalator_errors::EscalatorResult;
use serde::Serialize;
use tracing::{error, info, warn};

const PROVIDER: &str = "resend";

/// 一次投递运行的汇总结果
#[derive(Debug, Clone, Serialize)]
pub struct DeliverySummary {
    pub processed: usize,
    pub delivered: usize,
    pub cancelled: usize,
    pub failed: usize,
    pub retrying: usize,
    pub outcomes: Vec<DeliveryOutcome>,
    pub errors: Vec<DeliveryItemError>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcomeStatus {
    Sent,
    Cancelled,
    Retrying,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryOutcome {
    pub escalation_id: i64,
    pub status: DeliveryOutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub will_retry: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<i32>,
}

/// 终态失败与异常的明细
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryItemError {
    pub escalation_id: i64,
    pub error: String,
    pub final_failure: bool,
}

pub struct DeliveryWorker {
    escalation_repo: Arc<dyn EscalationRepository>,
    state: Arc<EscalationStateManager>,
    notifier: Arc<dyn Notifier>,
    generator: Arc<ShameMessageGenerator>,
    from_address: String,
}

impl DeliveryWorker {
    pub fn new(
        escalation_repo: Arc<dyn EscalationRepository>,
        state: Arc<EscalationStateManager>,
        notifier: Arc<dyn Notifier>,
        generator: Arc<ShameMessageGenerator>,
        from_address: String,
    ) -> Self {
        Self {
            escalation_repo,
            state,
            notifier,
            generator,
            from_address,
        }
    }

    /// 处理所有到期记录并返回汇总。整批只在查询失败时抛出，
    /// 单条记录的失败折入汇总
    pub async fn process_due(&self, now: DateTime<Utc>) -> EscalatorResult<DeliverySummary> {
        let due = self.escalation_repo.get_due(now).await?;
        info!("发现 {} 条到期升级记录待投递", due.len());

        let mut outcomes = Vec::new();
        let mut errors = Vec::new();

        for item in &due {
            match self.process_one(item, now).await {
                Ok(outcome) => {
                    if outcome.status == DeliveryOutcomeStatus::Failed {
                        errors.push(DeliveryItemError {
                            escalation_id: outcome.escalation_id,
                            error: outcome
                                .reason
                                .clone()
                                .unwrap_or_else(|| "unknown".to_string()),
                            final_failure: true,
                        });
                    }
                    outcomes.push(outcome);
                }
                Err(e) => {
                    error!(
                        escalation_id = item.escalation.id,
                        "处理升级记录时发生意外错误: {e}"
                    );
                    // 兜底折算成unknown_error失败，绝不中断批次
                    let decision = self
                        .state
                        .handle_failure(
                            item.escalation.id,
                            FailureReason::UnknownError,
                            Some(e.to_string()),
                        )
                        .await;
                    let (status, will_retry, next_retry_at, retry_count) = match decision {
                        Ok(d) if d.will_retry => (
                            DeliveryOutcomeStatus::Retrying,
                            Some(true),
                            d.next_retry_at,
                            Some(d.retry_count),
                        ),
                        Ok(d) => (
                            DeliveryOutcomeStatus::Failed,
                            Some(false),
                            None,
                            Some(d.retry_count),
                        ),
                        Err(inner) => {
                            warn!(
                                escalation_id = item.escalation.id,
                                "记录兜底失败状态时再次出错: {inner}"
                            );
                            (DeliveryOutcomeStatus::Failed, None, None, None)
                        }
                    };
                    outcomes.push(DeliveryOutcome {
                        escalation_id: item.escalation.id,
                        status,
                        contact_email: None,
                        message_id: None,
                        level: Some(item.policy.level),
                        reason: Some(FailureReason::UnknownError.to_string()),
                        will_retry,
                        next_retry_at,
                        retry_count,
                    });
                    errors.push(DeliveryItemError {
                        escalation_id: item.escalation.id,
                        error: e.to_string(),
                        final_failure: !matches!(status, DeliveryOutcomeStatus::Retrying),
                    });
                }
            }
        }

        let summary = DeliverySummary {
            processed: due.len(),
            delivered: count(&outcomes, DeliveryOutcomeStatus::Sent),
            cancelled: count(&outcomes, DeliveryOutcomeStatus::Cancelled),
            failed: count(&outcomes, DeliveryOutcomeStatus::Failed),
            retrying: count(&outcomes, DeliveryOutcomeStatus::Retrying),
            outcomes,
            errors,
            timestamp: now,
        };

        info!(
            "投递完成: 处理 {} 条，成功 {}，取消 {}，重试 {}，失败 {}",
            summary.processed,
            summary.delivered,
            summary.cancelled,
            summary.retrying,
            summary.failed
        );
        Ok(summary)
    }

    async fn process_one(
        &self,
        item: &DueEscalation,
        now: DateTime<Utc>,
    ) -> EscalatorResult<DeliveryOutcome> {
        let escalation_id = item.escalation.id;

        // 任务已完成的记录取消优先，不发送任何通知
        if item.task.is_completed() {
            let metadata = serde_json::json!({ "completed_at": item.task.completed_at });
            self.state
                .cancel(escalation_id, "task_completed", Some(metadata))
                .await?;
            info!(escalation_id, task_id = item.task.id, "任务已完成，升级记录取消");
            return Ok(DeliveryOutcome {
                escalation_id,
                status: DeliveryOutcomeStatus::Cancelled,
                contact_email: None,
                message_id: None,
                level: Some(item.policy.level),
                reason: Some("task_completed".to_string()),
                will_retry: None,
                next_retry_at: None,
                retry_count: None,
            });
        }

        // 验证状态是可变的，投递时刻重新校验
        if !item.contact.verified {
            let decision = self
                .state
                .handle_failure(
                    escalation_id,
                    FailureReason::ContactNotVerified,
                    Some(format!("联系人 {} 未验证", item.contact.id)),
                )
                .await?;
            warn!(escalation_id, contact_id = item.contact.id, "联系人未验证，投递失败");
            return Ok(DeliveryOutcome {
                escalation_id,
                status: DeliveryOutcomeStatus::Failed,
                contact_email: Some(item.contact.email.clone()),
                message_id: None,
                level: Some(item.policy.level),
                reason: Some(FailureReason::ContactNotVerified.to_string()),
                will_retry: Some(false),
                next_retry_at: None,
                retry_count: Some(decision.retry_count),
            });
        }

        let message = self.build_message(item, now);
        match self.notifier.send(&message).await {
            Ok(receipt) => {
                let provider_message_id = receipt.provider_message_id.clone();
                self.state
                    .mark_sent(
                        escalation_id,
                        SentReceipt {
                            provider: PROVIDER.to_string(),
                            provider_message_id: receipt.provider_message_id,
                            raw_response: receipt.raw_response,
                            sent_at: now,
                        },
                    )
                    .await?;
                info!(
                    escalation_id,
                    contact_email = %item.contact.email,
                    "升级通知已投递"
                );
                Ok(DeliveryOutcome {
                    escalation_id,
                    status: DeliveryOutcomeStatus::Sent,
                    contact_email: Some(item.contact.email.clone()),
                    message_id: provider_message_id,
                    level: Some(item.policy.level),
                    reason: None,
                    will_retry: None,
                    next_retry_at: None,
                    retry_count: None,
                })
            }
            Err(e) => {
                let error_message = e.to_string();
                let reason = FailureReason::classify(&error_message);
                let decision = self
                    .state
                    .handle_failure(escalation_id, reason, Some(error_message.clone()))
                    .await?;
                warn!(
                    escalation_id,
                    reason = %reason,
                    will_retry = decision.will_retry,
                    "升级通知投递失败: {error_message}"
                );
                Ok(DeliveryOutcome {
                    escalation_id,
                    status: if decision.will_retry {
                        DeliveryOutcomeStatus::Retrying
                    } else {
                        DeliveryOutcomeStatus::Failed
                    },
                    contact_email: Some(item.contact.email.clone()),
                    message_id: None,
                    level: Some(item.policy.level),
                    reason: Some(reason.to_string()),
                    will_retry: Some(decision.will_retry),
                    next_retry_at: decision.next_retry_at,
                    retry_count: Some(decision.retry_count),
                })
            }
        }
    }

    fn build_message(&self, item: &DueEscalation, now: DateTime<Utc>) -> NotificationMessage {
        let content = self.generator.generate(&MessageContext {
            level: item.policy.level,
            task_title: item.task.title.clone(),
            owner_name: item.owner.display_name().to_string(),
            owner_email: item.owner.email.clone(),
            contact_name: item.contact.name.clone(),
            due_date: item.task.due_at,
            overdue_minutes: item.task.minutes_overdue(now),
            relationship: item
                .contact
                .relationship
                .clone()
                .unwrap_or_else(|| "contact".to_string()),
            custom_message: item.escalation.message_content.clone(),
            variant: None,
        });
        let html = render_email_html(&content, &item.escalation.message_content);

        NotificationMessage {
            from: self.from_address.clone(),
            to: item.contact.email.clone(),
            subject: content.subject,
            html,
            // escalation_id标签是回执接收器回关联异步事件的纽带
            tags: vec![
                NotificationTag::new("type", "escalation"),
                NotificationTag::new("level", item.policy.level.to_string()),
                NotificationTag::new("task_id", item.task.id.to_string()),
                NotificationTag::new("escalation_id", item.escalation.id.to_string()),
                NotificationTag::new("owner_id", item.owner.id.to_string()),
            ],
        }
    }
}

fn count(outcomes: &[DeliveryOutcome], status: DeliveryOutcomeStatus) -> usize {
    outcomes.iter().filter(|o| o.status == status).count()
}
