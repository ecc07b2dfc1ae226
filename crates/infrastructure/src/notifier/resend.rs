//! Resend邮件服务商客户端
//!
//! 实现 [`Notifier`] 端口。错误文本保留服务商原始信息，
//! 投递器按子串启发式对其分类决定重试策略。

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use escalator_domain::ports::{NotificationMessage, Notifier, NotifierReceipt};
use escalator_errors::{EscalatorError, EscalatorResult};

const RESEND_API_URL: &str = "https://api.resend.com/emails";

#[derive(Debug, Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
    tags: Vec<SendEmailTag<'a>>,
}

#[derive(Debug, Serialize)]
struct SendEmailTag<'a> {
    name: &'a str,
    value: &'a str,
}

pub struct ResendNotifier {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl ResendNotifier {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: RESEND_API_URL.to_string(),
        }
    }

    /// 指向自定义地址，测试替身服务用
    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
        }
    }
}

#[async_trait]
impl Notifier for ResendNotifier {
    async fn send(&self, message: &NotificationMessage) -> EscalatorResult<NotifierReceipt> {
        let request = SendEmailRequest {
            from: &message.from,
            to: &message.to,
            subject: &message.subject,
            html: &message.html,
            tags: message
                .tags
                .iter()
                .map(|t| SendEmailTag {
                    name: &t.name,
                    value: &t.value,
                })
                .collect(),
        };

        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| EscalatorError::Notifier(format!("network request failed: {e}")))?;

        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .unwrap_or_else(|_| serde_json::json!({}));

        if !status.is_success() {
            let provider_message = body["message"]
                .as_str()
                .or_else(|| body["error"].as_str())
                .unwrap_or("unknown provider error");
            warn!(status = %status, "Resend发送失败: {provider_message}");
            return Err(EscalatorError::Notifier(format!(
                "Resend API error ({status}): {provider_message}"
            )));
        }

        let provider_message_id = body["id"].as_str().map(String::from);
        debug!(message_id = ?provider_message_id, to = %message.to, "Resend接受发送请求");
        Ok(NotifierReceipt {
            provider_message_id,
            raw_response: Some(body),
        })
    }
}
