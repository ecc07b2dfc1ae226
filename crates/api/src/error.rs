use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use escalator_errors::EscalatorError;
use serde_json::json;

use crate::auth::AuthError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("升级系统错误: {0}")]
    Escalator(#[from] EscalatorError),

    #[error("认证错误: {0}")]
    Authentication(AuthError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("内部服务器错误: {0}")]
    Internal(String),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Authentication(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message, error_type) = match &self {
            ApiError::Authentication(err) => (
                StatusCode::UNAUTHORIZED,
                format!("未授权 - {err}"),
                "UNAUTHORIZED",
            ),
            ApiError::Escalator(EscalatorError::EscalationNotFound { id }) => (
                StatusCode::NOT_FOUND,
                format!("升级记录 ID {id} 不存在"),
                "ESCALATION_NOT_FOUND",
            ),
            ApiError::Escalator(EscalatorError::TaskNotFound { id }) => (
                StatusCode::NOT_FOUND,
                format!("任务 ID {id} 不存在"),
                "TASK_NOT_FOUND",
            ),
            // 状态转换违规是不变量破坏，区别于业务失败单独暴露
            ApiError::Escalator(err @ EscalatorError::InvalidTransition { .. }) => (
                StatusCode::CONFLICT,
                err.to_string(),
                "INVALID_TRANSITION",
            ),
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                format!("请求参数错误: {msg}"),
                "BAD_REQUEST",
            ),
            ApiError::Escalator(_) | ApiError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "系统内部错误".to_string(),
                "INTERNAL_ERROR",
            ),
        };

        let body = Json(json!({
            "error": {
                "message": error_message,
                "type": error_type,
                "code": status.as_u16(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_maps_to_401() {
        let error = ApiError::Authentication(AuthError::MissingToken);
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_not_found_maps_to_404() {
        let error = ApiError::Escalator(EscalatorError::EscalationNotFound { id: 9 });
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_invalid_transition_maps_to_409() {
        let error = ApiError::Escalator(EscalatorError::InvalidTransition {
            id: 1,
            from: "failed".to_string(),
            to: "sent".to_string(),
        });
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_database_error_maps_to_500() {
        let error = ApiError::Escalator(EscalatorError::Internal("boom".to_string()));
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
