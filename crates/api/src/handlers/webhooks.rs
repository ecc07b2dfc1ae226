//! Resend投递回执webhook
//!
//! 从事件标签中还原升级记录ID后交给回执接收器。没有关联标签的
//! 事件不是升级邮件，直接确认不处理。

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use escalator_domain::events::{ReceiptEvent, ReceiptEventKind};

use crate::error::ApiResult;
use crate::response::ApiResponse;
use crate::routes::AppState;

#[derive(Debug, Deserialize)]
pub struct ResendWebhook {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub processed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// POST /api/webhooks/resend
pub async fn resend_webhook(
    State(state): State<AppState>,
    Json(webhook): Json<ResendWebhook>,
) -> ApiResult<ApiResponse<WebhookAck>> {
    debug!(event_type = %webhook.event_type, "收到Resend webhook");

    let Some(kind) = ReceiptEventKind::from_provider_type(&webhook.event_type) else {
        info!(event_type = %webhook.event_type, "未处理的webhook事件类型");
        return Ok(ApiResponse::success(WebhookAck {
            processed: false,
            action: None,
            reason: Some("Unhandled webhook type".to_string()),
        }));
    };

    let Some(escalation_id) = escalation_id_from_tags(&webhook.data["tags"]) else {
        debug!("邮件标签中没有升级记录ID，不是升级邮件");
        return Ok(ApiResponse::success(WebhookAck {
            processed: false,
            action: None,
            reason: Some("Not an escalation email".to_string()),
        }));
    };

    let event = ReceiptEvent {
        kind,
        escalation_id,
        timestamp: Utc::now(),
        provider_payload: webhook.data,
    };
    let outcome = state.ingestor.ingest(&event).await?;

    Ok(ApiResponse::success_with_message(
        WebhookAck {
            processed: outcome.processed,
            action: Some(outcome.action.to_string()),
            reason: None,
        },
        "Webhook processed successfully".to_string(),
    ))
}

/// 从服务商的标签数组中取出escalation_id标签
fn escalation_id_from_tags(tags: &serde_json::Value) -> Option<i64> {
    tags.as_array()?
        .iter()
        .find(|tag| tag["name"].as_str() == Some("escalation_id"))
        .and_then(|tag| tag["value"].as_str())
        .and_then(|value| value.parse().ok())
}
