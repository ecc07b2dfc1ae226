use serde::{Deserialize, Serialize};

/// 投递失败原因分类
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    EmailInvalid,
    ContactNotVerified,
    TaskCompleted,
    ResendApiError,
    NetworkError,
    RateLimited,
    QuotaExceeded,
    UnknownError,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::EmailInvalid => "email_invalid",
            FailureReason::ContactNotVerified => "contact_not_verified",
            FailureReason::TaskCompleted => "task_completed",
            FailureReason::ResendApiError => "resend_api_error",
            FailureReason::NetworkError => "network_error",
            FailureReason::RateLimited => "rate_limited",
            FailureReason::QuotaExceeded => "quota_exceeded",
            FailureReason::UnknownError => "unknown_error",
        }
    }

    /// 不可重试的原因不论重试次数直接进入failed终态
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            FailureReason::EmailInvalid
                | FailureReason::ContactNotVerified
                | FailureReason::TaskCompleted
        )
    }

    /// 按有序子串匹配对原始错误信息分类
    pub fn classify(error_message: &str) -> Self {
        let message = error_message.to_lowercase();

        if message.contains("invalid email") || message.contains("bad email") {
            return FailureReason::EmailInvalid;
        }
        if message.contains("rate limit") || message.contains("too many requests") {
            return FailureReason::RateLimited;
        }
        if message.contains("quota") || message.contains("limit exceeded") {
            return FailureReason::QuotaExceeded;
        }
        if message.contains("network") || message.contains("connection") {
            return FailureReason::NetworkError;
        }
        if message.contains("api") || message.contains("server error") {
            return FailureReason::ResendApiError;
        }

        FailureReason::UnknownError
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
