//! 升级调度器
//!
//! 周期性扫描逾期未完成的任务，为每条已达偏移阈值、联系人已验证的
//! 策略确保恰好存在一条升级记录。重复调用是幂等的：同一策略已存在
//! 记录时（无论其状态）直接跳过。

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use escalator_domain::messages::{render_policy_template, PolicyTemplateContext};
use escalator_domain::repositories::{
    EscalationRepository, OverdueTask, PolicyWithContact, TaskRepository,
};
use escalator_domain::Escalation;
use escalator_errors::{EscalatorError, EscalatorResult};
use serde::Serialize;
use tracing::{debug, error, info, warn};

/// 一次扫描的汇总结果，原样作为接口响应返回
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleSummary {
    pub overdue_tasks_checked: usize,
    pub escalations_scheduled: usize,
    pub scheduled: Vec<ScheduledEscalation>,
    pub errors: Vec<ScheduleItemError>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduledEscalation {
    pub escalation_id: i64,
    pub task_id: i64,
    pub policy_id: i64,
    pub level: i32,
    pub contact_email: String,
    pub scheduled_for: DateTime<Utc>,
    pub minutes_overdue: i64,
}

/// 单条策略/任务的失败，不中断批次
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleItemError {
    pub task_id: i64,
    pub policy_id: Option<i64>,
    pub error: String,
}

pub struct EscalationScheduler {
    task_repo: Arc<dyn TaskRepository>,
    escalation_repo: Arc<dyn EscalationRepository>,
}

impl EscalationScheduler {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        escalation_repo: Arc<dyn EscalationRepository>,
    ) -> Self {
        Self {
            task_repo,
            escalation_repo,
        }
    }

    /// 扫描逾期任务并调度升级。单项失败记入汇总，整批不抛出
    pub async fn scan_and_schedule(&self, now: DateTime<Utc>) -> EscalatorResult<ScheduleSummary> {
        info!("开始扫描逾期任务");
        let overdue_tasks = self.task_repo.get_overdue_with_policies(now).await?;
        info!("发现 {} 个逾期任务", overdue_tasks.len());

        let mut scheduled = Vec::new();
        let mut errors = Vec::new();

        for overdue in &overdue_tasks {
            self.schedule_task_policies(overdue, now, &mut scheduled, &mut errors)
                .await;
        }

        info!(
            "本次调度完成: 检查 {} 个任务，新建 {} 条升级记录，{} 个错误",
            overdue_tasks.len(),
            scheduled.len(),
            errors.len()
        );

        Ok(ScheduleSummary {
            overdue_tasks_checked: overdue_tasks.len(),
            escalations_scheduled: scheduled.len(),
            scheduled,
            errors,
            timestamp: now,
        })
    }

    async fn schedule_task_policies(
        &self,
        overdue: &OverdueTask,
        now: DateTime<Utc>,
        scheduled: &mut Vec<ScheduledEscalation>,
        errors: &mut Vec<ScheduleItemError>,
    ) {
        let task = &overdue.task;
        let minutes_overdue = task.minutes_overdue(now);

        for entry in &overdue.policies {
            let policy = &entry.policy;

            if !entry.contact.verified {
                debug!(
                    policy_id = policy.id,
                    "联系人 {} 未验证，跳过策略", entry.contact.id
                );
                continue;
            }

            // 阈值未到，留给后续扫描
            if minutes_overdue < policy.minutes_after_due as i64 {
                continue;
            }

            match self.ensure_escalation(overdue, entry, minutes_overdue).await {
                Ok(Some(escalation)) => {
                    info!(
                        escalation_id = escalation.id,
                        task_id = task.id,
                        level = policy.level,
                        "已为任务 \"{}\" 调度级别 {} 升级",
                        task.title,
                        policy.level
                    );
                    scheduled.push(ScheduledEscalation {
                        escalation_id: escalation.id,
                        task_id: task.id,
                        policy_id: policy.id,
                        level: policy.level,
                        contact_email: entry.contact.email.clone(),
                        scheduled_for: escalation.scheduled_for,
                        minutes_overdue,
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    error!(
                        task_id = task.id,
                        policy_id = policy.id,
                        "调度升级记录失败: {e}"
                    );
                    errors.push(ScheduleItemError {
                        task_id: task.id,
                        policy_id: Some(policy.id),
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    /// 为一条策略确保升级记录存在。已存在（含并发插入竞争）返回None
    async fn ensure_escalation(
        &self,
        overdue: &OverdueTask,
        entry: &PolicyWithContact,
        minutes_overdue: i64,
    ) -> EscalatorResult<Option<Escalation>> {
        let task = &overdue.task;
        let policy = &entry.policy;

        if let Some(existing) = self.escalation_repo.get_by_policy_id(policy.id).await? {
            debug!(
                policy_id = policy.id,
                escalation_id = existing.id,
                status = %existing.status,
                "策略已存在升级记录，跳过"
            );
            return Ok(None);
        }

        let scheduled_for = task.due_at + Duration::minutes(policy.minutes_after_due as i64);
        let message_content = render_policy_template(
            policy.message_template.as_deref(),
            &PolicyTemplateContext {
                contact_name: &entry.contact.name,
                owner_name: overdue.owner.display_name(),
                owner_email: &overdue.owner.email,
                task_title: &task.title,
                level: policy.level,
                due_date: task.due_at,
                minutes_overdue,
            },
        );

        let escalation = Escalation::new(policy.id, scheduled_for, message_content);
        match self.escalation_repo.create(&escalation).await {
            Ok(created) => Ok(Some(created)),
            // 与另一次调度并发竞争落败，对方已建档，幂等跳过
            Err(EscalatorError::EscalationExists { policy_id }) => {
                warn!(policy_id, "并发调度竞争，升级记录已由他方创建");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
