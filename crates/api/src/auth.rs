//! 定时触发端点的鉴权
//!
//! 调度与投递端点只接受携带配置密钥的 `Authorization: Bearer` 请求，
//! 密钥缺失或不匹配一律401，且不产生任何副作用。

use axum::http::{header::AUTHORIZATION, HeaderMap};

pub const BEARER_PREFIX: &str = "Bearer ";

#[derive(Debug, PartialEq, Eq)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingToken => write!(f, "Missing cron secret"),
            AuthError::InvalidToken => write!(f, "Invalid cron secret"),
        }
    }
}

impl std::error::Error for AuthError {}

pub fn verify_cron_secret(headers: &HeaderMap, expected: &str) -> Result<(), AuthError> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(AuthError::MissingToken)?;

    let token = header
        .strip_prefix(BEARER_PREFIX)
        .ok_or(AuthError::InvalidToken)?;

    // 未配置密钥时所有请求都被拒绝
    if expected.is_empty() || token != expected {
        return Err(AuthError::InvalidToken);
    }
    Ok(())
}
