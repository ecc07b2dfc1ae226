use thiserror::Error;

#[derive(Debug, Error)]
pub enum EscalatorError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),
    #[error("任务未找到: {id}")]
    TaskNotFound { id: i64 },
    #[error("升级记录未找到: {id}")]
    EscalationNotFound { id: i64 },
    #[error("策略 {policy_id} 已存在升级记录")]
    EscalationExists { policy_id: i64 },
    #[error("无效的状态转换: 升级记录 {id} 不能从 {from} 转换到 {to}")]
    InvalidTransition { id: i64, from: String, to: String },
    #[error("通知发送失败: {0}")]
    Notifier(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type EscalatorResult<T> = Result<T, EscalatorError>;

impl EscalatorError {
    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::DatabaseOperation(msg.into())
    }
    pub fn escalation_not_found(id: i64) -> Self {
        Self::EscalationNotFound { id }
    }
    pub fn notifier_error<S: Into<String>>(msg: S) -> Self {
        Self::Notifier(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// 状态转换违规属于程序/数据错误，调用方需要与业务失败区分处理
    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, Self::InvalidTransition { .. })
    }
}
