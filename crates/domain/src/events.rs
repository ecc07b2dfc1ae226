use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 来自邮件服务商的异步投递事件类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptEventKind {
    Sent,
    Delivered,
    Bounced,
    Complained,
    Opened,
    Clicked,
}

impl ReceiptEventKind {
    /// 解析服务商webhook的事件类型字段，如 "email.delivered"
    pub fn from_provider_type(provider_type: &str) -> Option<Self> {
        match provider_type {
            "email.sent" => Some(ReceiptEventKind::Sent),
            "email.delivered" => Some(ReceiptEventKind::Delivered),
            "email.bounced" => Some(ReceiptEventKind::Bounced),
            "email.complained" => Some(ReceiptEventKind::Complained),
            "email.opened" => Some(ReceiptEventKind::Opened),
            "email.clicked" => Some(ReceiptEventKind::Clicked),
            _ => None,
        }
    }
}

/// 已从webhook标签中还原出升级记录ID的回执事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptEvent {
    pub kind: ReceiptEventKind,
    pub escalation_id: i64,
    pub timestamp: DateTime<Utc>,
    pub provider_payload: serde_json::Value,
}
