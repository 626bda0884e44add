//! 统一错误模型
//! 定义所有错误类型和错误响应格式

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 登录表单中承载错误的字段
pub const LOGIN_FIELD: &str = "email";

pub const MSG_INVALID_CREDENTIALS: &str = "The provided credentials do not match our records.";
pub const MSG_ACCOUNT_DEACTIVATED: &str = "Your account has been deactivated.";

/// 绑定到某个表单字段的错误
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// 应用错误类型
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("Account deactivated")]
    AccountDeactivated,

    #[error("Access denied")]
    Forbidden,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    Validation(FieldError),

    #[error("Too many attempts, retry after {retry_after}s")]
    TooManyAttempts { field: String, retry_after: u64 },

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// 获取 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::AccountDeactivated | AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::TooManyAttempts { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Database(_) | AppError::Config(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// 获取用户友好的错误消息（不包含敏感信息）
    pub fn user_message(&self) -> String {
        match self {
            AppError::Unauthorized => "Unauthorized".to_string(),
            AppError::AccountDeactivated => "Account deactivated".to_string(),
            AppError::Forbidden => "Access denied".to_string(),
            AppError::BadRequest(msg) => msg.clone(),
            AppError::Validation(err) => err.message.clone(),
            AppError::TooManyAttempts { retry_after, .. } => throttle_message(*retry_after),
            AppError::Database(_) => "Database error occurred".to_string(),
            AppError::Config(_) => "Configuration error".to_string(),
            AppError::Internal(_) => "Internal server error".to_string(),
        }
    }

    /// 获取错误码
    pub fn code(&self) -> u16 {
        self.status_code().as_u16()
    }

    /// 面向表单的字段错误（仅用户可修正的错误才有）
    pub fn field_error(&self) -> Option<FieldError> {
        match self {
            AppError::Validation(err) => Some(err.clone()),
            AppError::TooManyAttempts { field, retry_after } => {
                Some(FieldError::new(field.clone(), throttle_message(*retry_after)))
            }
            _ => None,
        }
    }

    pub fn validation(field: &str, message: &str) -> Self {
        AppError::Validation(FieldError::new(field, message))
    }
}

/// 限流提示文案
pub fn throttle_message(retry_after: u64) -> String {
    format!(
        "Too many login attempts. Please try again in {} seconds.",
        retry_after
    )
}

/// 登录流程的结果错误
///
/// 前三种都挂在 `email` 字段上返回，调用方无法从文案区分"邮箱不存在"与"密码错误"。
#[derive(Debug, Error)]
pub enum LoginError {
    #[error("throttle exceeded, retry after {retry_after}s")]
    ThrottleExceeded { retry_after: u64 },

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("account deactivated")]
    AccountDeactivated,

    #[error("validation failed: {0}")]
    ValidationFailed(FieldError),

    #[error(transparent)]
    Backend(#[from] AppError),
}

impl From<LoginError> for AppError {
    fn from(err: LoginError) -> Self {
        match err {
            LoginError::ThrottleExceeded { retry_after } => AppError::TooManyAttempts {
                field: LOGIN_FIELD.to_string(),
                retry_after,
            },
            LoginError::InvalidCredentials => {
                AppError::validation(LOGIN_FIELD, MSG_INVALID_CREDENTIALS)
            }
            LoginError::AccountDeactivated => {
                AppError::validation(LOGIN_FIELD, MSG_ACCOUNT_DEACTIVATED)
            }
            LoginError::ValidationFailed(err) => AppError::Validation(err),
            LoginError::Backend(err) => err,
        }
    }
}

/// 错误响应 DTO
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
    pub request_id: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let request_id = uuid::Uuid::new_v4().to_string();

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: self.code(),
                field: self.field_error().map(|e| e.field),
                message: self.user_message(),
                request_id,
            },
        };

        // 用户可修正的错误只记 warn，其余记 error
        if status.is_server_error() {
            tracing::error!(
                code = self.code(),
                message = %self,
                request_id = %error_response.error.request_id,
                "Application error"
            );
        } else {
            tracing::warn!(
                code = self.code(),
                message = %self,
                request_id = %error_response.error.request_id,
                "Request rejected"
            );
        }

        let mut response = (status, Json(error_response)).into_response();
        if let AppError::TooManyAttempts { retry_after, .. } = &self {
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// 从 config::ConfigError 转换
impl From<config::ConfigError> for AppError {
    fn from(e: config::ConfigError) -> Self {
        AppError::Config(e.to_string())
    }
}

/// 从 validator 的校验错误转换，取第一个出错字段
impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
        fields.sort_by(|a, b| a.0.cmp(&b.0));

        match fields.into_iter().next() {
            Some((field, errs)) => {
                let message = errs
                    .first()
                    .and_then(|e| e.message.as_ref().map(|m| m.to_string()))
                    .unwrap_or_else(|| format!("The {} field is invalid.", field));
                AppError::Validation(FieldError::new(field.to_string(), message))
            }
            None => AppError::BadRequest("Invalid request".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(AppError::Unauthorized.code(), 401);
        assert_eq!(AppError::AccountDeactivated.code(), 403);
        assert_eq!(AppError::Forbidden.code(), 403);
        assert_eq!(AppError::validation("email", "bad").code(), 422);
        assert_eq!(
            AppError::TooManyAttempts {
                field: "email".to_string(),
                retry_after: 10
            }
            .code(),
            429
        );
    }

    #[test]
    fn test_user_message_no_sensitive_info() {
        let error = AppError::Database(sqlx::Error::RowNotFound);
        let message = error.user_message();
        assert_eq!(message, "Database error occurred");
        assert!(!message.contains("sqlx"));
    }

    #[test]
    fn test_login_errors_share_email_field() {
        let unknown: AppError = LoginError::InvalidCredentials.into();
        let deactivated: AppError = LoginError::AccountDeactivated.into();
        let throttled: AppError = LoginError::ThrottleExceeded { retry_after: 42 }.into();

        assert_eq!(unknown.field_error().unwrap().field, "email");
        assert_eq!(deactivated.field_error().unwrap().message, MSG_ACCOUNT_DEACTIVATED);
        assert_eq!(
            throttled.field_error().unwrap().message,
            "Too many login attempts. Please try again in 42 seconds."
        );
    }
}
