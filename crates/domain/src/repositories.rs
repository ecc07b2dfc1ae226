//! 数据仓储层接口定义
//!
//! 仓储以 `Arc<dyn …>` 显式注入到调度器、投递器和状态管理器中，
//! 测试用内存实现替换，不存在任何全局数据库句柄。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use escalator_errors::EscalatorResult;

use crate::entities::{
    Contact, Engagement, EngagementUpdate, Escalation, EscalationPolicy, EscalationStatus, Owner,
    Task,
};

/// 一条逾期任务及其升级上下文，调度器的扫描单元
#[derive(Debug, Clone)]
pub struct OverdueTask {
    pub task: Task,
    pub owner: Owner,
    pub policies: Vec<PolicyWithContact>,
}

#[derive(Debug, Clone)]
pub struct PolicyWithContact {
    pub policy: EscalationPolicy,
    pub contact: Contact,
}

/// 一条到期升级记录及其投递上下文，投递器的处理单元。
/// 任务与联系人均为投递时刻的最新状态，用于取消与重新校验。
#[derive(Debug, Clone)]
pub struct DueEscalation {
    pub escalation: Escalation,
    pub policy: EscalationPolicy,
    pub contact: Contact,
    pub task: Task,
    pub owner: Owner,
}

/// 任务仓储接口。本核心只读取任务，写入方在外部
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn get_by_id(&self, id: i64) -> EscalatorResult<Option<Task>>;

    /// 查询所有逾期且仍为pending的任务，连同其升级策略与联系人，
    /// 按due_at升序返回
    async fn get_overdue_with_policies(
        &self,
        now: DateTime<Utc>,
    ) -> EscalatorResult<Vec<OverdueTask>>;
}

/// 升级记录仓储接口
#[async_trait]
pub trait EscalationRepository: Send + Sync {
    /// 插入新记录并返回含数据库ID的实体。
    /// policy_id上的唯一约束被触发时返回 `EscalationExists`——
    /// 这是并发调度下的幂等兜底，调用方按跳过处理。
    async fn create(&self, escalation: &Escalation) -> EscalatorResult<Escalation>;

    async fn get_by_id(&self, id: i64) -> EscalatorResult<Option<Escalation>>;

    /// 按策略查找记录，不论其状态。调度器的幂等检查入口
    async fn get_by_policy_id(&self, policy_id: i64) -> EscalatorResult<Option<Escalation>>;

    /// 查询到期待投递的记录（status ∈ {pending, retrying} 且
    /// scheduled_for <= now），连同投递上下文，按scheduled_for升序
    async fn get_due(&self, now: DateTime<Utc>) -> EscalatorResult<Vec<DueEscalation>>;

    /// 某任务下所有尚未到达终态的记录，任务完成时批量取消用
    async fn get_active_by_task_id(&self, task_id: i64) -> EscalatorResult<Vec<Escalation>>;

    /// 乐观检查并更新：仅当记录当前状态仍为 `expected` 时写入。
    /// 并发转换竞争中落败的一方拿到 `InvalidTransition`
    async fn transition(
        &self,
        escalation: &Escalation,
        expected: EscalationStatus,
    ) -> EscalatorResult<Escalation>;

    /// 自cutoff以来各状态的记录数，用于统计汇总
    async fn count_by_status_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> EscalatorResult<Vec<(EscalationStatus, i64)>>;
}

/// 参与度子记录仓储接口
#[async_trait]
pub trait EngagementRepository: Send + Sync {
    async fn get_by_escalation_id(&self, escalation_id: i64)
        -> EscalatorResult<Option<Engagement>>;

    /// 合并一次参与度增量：不存在则建档，存在则Some字段覆盖
    async fn merge(
        &self,
        escalation_id: i64,
        update: &EngagementUpdate,
    ) -> EscalatorResult<Engagement>;
}
