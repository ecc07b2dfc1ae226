use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 用户任务，升级调度的触发源。
/// 任务的增删改由外部协作方负责，本核心只读取。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub owner_id: i64,
    pub title: String,
    pub due_at: DateTime<Utc>,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// 任务逾期分钟数（向下取整），未逾期时为负
    pub fn minutes_overdue(&self, now: DateTime<Utc>) -> i64 {
        (now - self.due_at).num_minutes()
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.status, TaskStatus::Completed)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
}

impl sqlx::Type<sqlx::Postgres> for TaskStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for TaskStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            _ => Err(format!("Invalid task status: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for TaskStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(s, buf)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskPriority {
    #[serde(rename = "low")]
    Low,
    #[serde(rename = "medium")]
    Medium,
    #[serde(rename = "high")]
    High,
}

impl sqlx::Type<sqlx::Postgres> for TaskPriority {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for TaskPriority {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        match s {
            "low" => Ok(TaskPriority::Low),
            "medium" => Ok(TaskPriority::Medium),
            "high" => Ok(TaskPriority::High),
            _ => Err(format!("Invalid task priority: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for TaskPriority {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        let s = match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
        };
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(s, buf)
    }
}

/// 任务所有者的档案信息，仅用于渲染通知内容
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Owner {
    pub id: i64,
    pub email: String,
    pub full_name: Option<String>,
}

impl Owner {
    /// 通知文案中使用的显示名，无姓名时回退到邮箱
    pub fn display_name(&self) -> &str {
        self.full_name.as_deref().unwrap_or(&self.email)
    }
}

/// 问责联系人。verified为false的联系人不参与升级投递
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub email: String,
    pub relationship: Option<String>,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

/// 升级策略: 任务 + 级别 -> 联系人 + 逾期偏移。
/// 创建后不可变，每个(task_id, level)至多一条。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationPolicy {
    pub id: i64,
    pub task_id: i64,
    pub level: i32,
    pub minutes_after_due: i32,
    pub contact_id: i64,
    pub message_template: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 升级记录状态机的状态集合
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EscalationStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "sent")]
    Sent,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "cancelled")]
    Cancelled,
    #[serde(rename = "retrying")]
    Retrying,
}

impl EscalationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationStatus::Pending => "pending",
            EscalationStatus::Sent => "sent",
            EscalationStatus::Failed => "failed",
            EscalationStatus::Cancelled => "cancelled",
            EscalationStatus::Retrying => "retrying",
        }
    }

    /// 终态没有出边，到达后记录不再变化
    pub fn is_terminal(&self) -> bool {
        matches!(self, EscalationStatus::Failed | EscalationStatus::Cancelled)
    }

    /// 状态转换表。sent -> cancelled 仅用于罕见的人工干预场景
    pub fn can_transition_to(&self, next: EscalationStatus) -> bool {
        use EscalationStatus::*;
        matches!(
            (self, next),
            (Pending, Sent)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Pending, Retrying)
                | (Retrying, Sent)
                | (Retrying, Failed)
                | (Retrying, Cancelled)
                | (Sent, Cancelled)
        )
    }
}

impl std::fmt::Display for EscalationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl sqlx::Type<sqlx::Postgres> for EscalationStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for EscalationStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        match s {
            "pending" => Ok(EscalationStatus::Pending),
            "sent" => Ok(EscalationStatus::Sent),
            "failed" => Ok(EscalationStatus::Failed),
            "cancelled" => Ok(EscalationStatus::Cancelled),
            "retrying" => Ok(EscalationStatus::Retrying),
            _ => Err(format!("Invalid escalation status: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for EscalationStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

/// 升级记录——本核心的中心实体。
///
/// 由调度器以pending状态创建，之后所有状态变更都经过状态管理器；
/// 到达终态后保留，任何组件都不会删除它。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escalation {
    pub id: i64,
    pub policy_id: i64,
    pub status: EscalationStatus,
    pub scheduled_for: DateTime<Utc>,
    pub message_content: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub receipt: Option<DeliveryReceipt>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Escalation {
    pub fn new(policy_id: i64, scheduled_for: DateTime<Utc>, message_content: String) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // 将由数据库生成
            policy_id,
            status: EscalationStatus::Pending,
            scheduled_for,
            message_content,
            sent_at: None,
            receipt: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 从回执中读取已累计的重试次数，尚未失败过的记录为0
    pub fn retry_count(&self) -> i32 {
        match &self.receipt {
            Some(DeliveryReceipt::Failure(f)) => f.retries,
            _ => 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// 投递回执，按所处状态划分的和类型。
/// 送达/打开/点击等参与度数据不在这里，见 [`Engagement`]。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeliveryReceipt {
    Sent(SentReceipt),
    Failure(FailureReceipt),
    Cancelled(CancelledReceipt),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SentReceipt {
    pub provider: String,
    pub provider_message_id: Option<String>,
    pub raw_response: Option<serde_json::Value>,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureReceipt {
    pub reason: crate::failure::FailureReason,
    pub retries: i32,
    pub last_error: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub final_failure: bool,
    pub max_retries_exceeded: bool,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CancelledReceipt {
    pub reason: String,
    pub metadata: Option<serde_json::Value>,
    pub cancelled_at: DateTime<Utc>,
}

/// 参与度子记录，以升级记录ID为主键单独存储。
/// 由回执事件增量合并而来，不参与状态机。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Engagement {
    pub escalation_id: i64,
    pub delivered_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub clicked_at: Option<DateTime<Utc>>,
    pub click_url: Option<String>,
    pub complained_at: Option<DateTime<Utc>>,
    pub provider_payload: Option<serde_json::Value>,
    pub updated_at: DateTime<Utc>,
}

/// 参与度合并增量，Some字段覆盖，None字段保留已有值
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngagementUpdate {
    pub delivered_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub clicked_at: Option<DateTime<Utc>>,
    pub click_url: Option<String>,
    pub complained_at: Option<DateTime<Utc>>,
    pub provider_payload: Option<serde_json::Value>,
}
