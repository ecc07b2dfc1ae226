use async_trait::async_trait;
use escalator_errors::EscalatorResult;
use serde::{Deserialize, Serialize};

/// 外发通知能力的端口，对核心而言是黑盒。
/// 失败通过 `EscalatorError::Notifier` 返回，错误文本用于失败原因分类。
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &NotificationMessage) -> EscalatorResult<NotifierReceipt>;
}

/// 一封待发送的升级通知
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
    /// 关联标签，回执接收器靠其中的escalation_id把异步事件折回记录
    pub tags: Vec<NotificationTag>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationTag {
    pub name: String,
    pub value: String,
}

impl NotificationTag {
    pub fn new<N: Into<String>, V: Into<String>>(name: N, value: V) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// 服务商接受发送后的同步应答
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierReceipt {
    pub provider_message_id: Option<String>,
    pub raw_response: Option<serde_json::Value>,
}
