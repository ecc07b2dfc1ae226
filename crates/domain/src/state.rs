//! 升级记录状态管理
//!
//! 状态管理器是升级记录状态转换的唯一入口，封装了转换合法性校验、
//! 指数退避重试决策与回执写入。调度器、投递器与回执接收器都通过它
//! 修改记录，自身绝不直接更新状态字段。

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use escalator_errors::{EscalatorError, EscalatorResult};
use serde::Serialize;
use tracing::{info, warn};

use crate::entities::{
    CancelledReceipt, DeliveryReceipt, Engagement, EngagementUpdate, Escalation, EscalationStatus,
    FailureReceipt, SentReceipt,
};
use crate::failure::FailureReason;
use crate::repositories::{EngagementRepository, EscalationRepository};

/// 重试退避配置
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 最大重试次数
    pub max_retries: i32,
    /// 基础重试间隔（分钟）
    pub base_delay_minutes: i64,
    /// 指数退避底数
    pub exponential_base: i64,
    /// 重试间隔上限（小时）
    pub max_delay_hours: i64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_minutes: 5, // 5分钟起步
            exponential_base: 3,   // 5min, 15min, 45min
            max_delay_hours: 24,
        }
    }
}

impl RetryConfig {
    /// 第retry_count次重试前的等待分钟数，封顶max_delay_hours
    pub fn retry_delay_minutes(&self, retry_count: i32) -> i64 {
        let exponent = (retry_count - 1).max(0) as u32;
        let delay = self.base_delay_minutes * self.exponential_base.pow(exponent);
        delay.min(self.max_delay_hours * 60)
    }
}

/// `handle_failure` 的裁决结果，调用方据此构造运行汇总
#[derive(Debug, Clone, Serialize)]
pub struct RetryDecision {
    pub will_retry: bool,
    pub retry_count: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub delay_minutes: Option<i64>,
    pub final_failure: bool,
}

pub struct EscalationStateManager {
    escalation_repo: Arc<dyn EscalationRepository>,
    engagement_repo: Arc<dyn EngagementRepository>,
    retry_config: RetryConfig,
}

impl EscalationStateManager {
    pub fn new(
        escalation_repo: Arc<dyn EscalationRepository>,
        engagement_repo: Arc<dyn EngagementRepository>,
        retry_config: Option<RetryConfig>,
    ) -> Self {
        Self {
            escalation_repo,
            engagement_repo,
            retry_config: retry_config.unwrap_or_default(),
        }
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry_config
    }

    async fn get_required(&self, id: i64) -> EscalatorResult<Escalation> {
        self.escalation_repo
            .get_by_id(id)
            .await?
            .ok_or(EscalatorError::EscalationNotFound { id })
    }

    /// 转换合法性校验。retrying记录再次失败后的重排是同状态改写，
    /// 不算状态转换，其余组合以转换表为准
    fn ensure_transition(
        escalation: &Escalation,
        next: EscalationStatus,
    ) -> EscalatorResult<()> {
        if escalation.status == next && next == EscalationStatus::Retrying {
            return Ok(());
        }
        if escalation.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(EscalatorError::InvalidTransition {
                id: escalation.id,
                from: escalation.status.to_string(),
                to: next.to_string(),
            })
        }
    }

    fn log_transition(id: i64, from: EscalationStatus, to: EscalationStatus, detail: &str) {
        info!(
            escalation_id = id,
            from = %from,
            to = %to,
            timestamp = %Utc::now().to_rfc3339(),
            "升级记录状态转换: {detail}"
        );
    }

    /// 标记投递成功，写入sent_at与服务商回执
    pub async fn mark_sent(&self, id: i64, receipt: SentReceipt) -> EscalatorResult<Escalation> {
        let escalation = self.get_required(id).await?;
        Self::ensure_transition(&escalation, EscalationStatus::Sent)?;

        let from = escalation.status;
        let mut updated = escalation;
        updated.status = EscalationStatus::Sent;
        updated.sent_at = Some(receipt.sent_at);
        updated.receipt = Some(DeliveryReceipt::Sent(receipt));
        updated.updated_at = Utc::now();

        let stored = self.escalation_repo.transition(&updated, from).await?;
        Self::log_transition(id, from, EscalationStatus::Sent, "投递成功");
        Ok(stored)
    }

    /// 处理一次投递失败：累加重试计数，决定重试还是终态失败。
    /// 决定重试时把scheduled_for改写到退避之后并转入retrying
    pub async fn handle_failure(
        &self,
        id: i64,
        reason: FailureReason,
        last_error: Option<String>,
    ) -> EscalatorResult<RetryDecision> {
        let escalation = self.get_required(id).await?;
        let from = escalation.status;
        let new_retry_count = escalation.retry_count() + 1;
        let now = Utc::now();

        if reason.is_retryable() && new_retry_count <= self.retry_config.max_retries {
            Self::ensure_transition(&escalation, EscalationStatus::Retrying)?;

            let delay_minutes = self.retry_config.retry_delay_minutes(new_retry_count);
            let next_retry_at = now + Duration::minutes(delay_minutes);

            let mut updated = escalation;
            updated.status = EscalationStatus::Retrying;
            updated.scheduled_for = next_retry_at;
            updated.receipt = Some(DeliveryReceipt::Failure(FailureReceipt {
                reason,
                retries: new_retry_count,
                last_error,
                next_retry_at: Some(next_retry_at),
                final_failure: false,
                max_retries_exceeded: false,
                failed_at: now,
            }));
            updated.updated_at = now;

            self.escalation_repo.transition(&updated, from).await?;
            Self::log_transition(id, from, EscalationStatus::Retrying, "投递失败，等待重试");
            info!(
                escalation_id = id,
                retry_count = new_retry_count,
                delay_minutes,
                reason = %reason,
                "升级记录将于 {} 重试", next_retry_at.to_rfc3339()
            );

            Ok(RetryDecision {
                will_retry: true,
                retry_count: new_retry_count,
                next_retry_at: Some(next_retry_at),
                delay_minutes: Some(delay_minutes),
                final_failure: false,
            })
        } else {
            Self::ensure_transition(&escalation, EscalationStatus::Failed)?;

            let max_retries_exceeded = new_retry_count > self.retry_config.max_retries;
            let mut updated = escalation;
            updated.status = EscalationStatus::Failed;
            updated.receipt = Some(DeliveryReceipt::Failure(FailureReceipt {
                reason,
                retries: new_retry_count,
                last_error,
                next_retry_at: None,
                final_failure: true,
                max_retries_exceeded,
                failed_at: now,
            }));
            updated.updated_at = now;

            self.escalation_repo.transition(&updated, from).await?;
            Self::log_transition(id, from, EscalationStatus::Failed, "投递最终失败");
            warn!(
                escalation_id = id,
                reason = %reason,
                retry_count = new_retry_count,
                max_retries_exceeded,
                "升级记录进入失败终态"
            );

            Ok(RetryDecision {
                will_retry: false,
                retry_count: new_retry_count,
                next_retry_at: None,
                delay_minutes: None,
                final_failure: true,
            })
        }
    }

    /// 取消升级记录，典型场景是任务在投递前已完成
    pub async fn cancel(
        &self,
        id: i64,
        reason: &str,
        metadata: Option<serde_json::Value>,
    ) -> EscalatorResult<Escalation> {
        let escalation = self.get_required(id).await?;
        Self::ensure_transition(&escalation, EscalationStatus::Cancelled)?;

        let from = escalation.status;
        let mut updated = escalation;
        updated.status = EscalationStatus::Cancelled;
        updated.receipt = Some(DeliveryReceipt::Cancelled(CancelledReceipt {
            reason: reason.to_string(),
            metadata,
            cancelled_at: Utc::now(),
        }));
        updated.updated_at = Utc::now();

        let stored = self.escalation_repo.transition(&updated, from).await?;
        Self::log_transition(id, from, EscalationStatus::Cancelled, reason);
        Ok(stored)
    }

    /// 任务完成或删除时由外部协作方调用，取消该任务下所有未到终态的
    /// 升级记录。单条取消失败不影响其余记录，返回成功取消的ID列表
    pub async fn cancel_for_task(
        &self,
        task_id: i64,
        reason: &str,
    ) -> EscalatorResult<Vec<i64>> {
        let active = self.escalation_repo.get_active_by_task_id(task_id).await?;
        let mut cancelled = Vec::new();

        for escalation in active {
            let metadata = Some(serde_json::json!({ "task_id": task_id }));
            match self.cancel(escalation.id, reason, metadata).await {
                Ok(_) => cancelled.push(escalation.id),
                Err(e) => {
                    warn!(
                        escalation_id = escalation.id,
                        task_id, "取消升级记录失败: {e}"
                    );
                }
            }
        }

        if !cancelled.is_empty() {
            info!(task_id, count = cancelled.len(), "已批量取消任务的升级记录");
        }
        Ok(cancelled)
    }

    /// 合并参与度事件（送达/打开/点击/投诉），不触发状态转换
    pub async fn record_engagement(
        &self,
        id: i64,
        update: EngagementUpdate,
    ) -> EscalatorResult<Engagement> {
        // 确认记录存在，避免为幽灵ID建参与度档案
        self.get_required(id).await?;
        self.engagement_repo.merge(id, &update).await
    }
}
