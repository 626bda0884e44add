//! Authentication-related models

use serde::{de, Deserialize, Deserializer, Serialize};
use std::fmt;
use validator::Validate;

use super::account::AccountResponse;

/// Login request
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(
        length(min = 1, message = "The email field is required."),
        email(message = "The email field must be a valid email address.")
    )]
    pub email: String,
    #[validate(length(min = 1, message = "The password field is required."))]
    pub password: String,
    #[serde(default, deserialize_with = "deserialize_checkbox")]
    pub remember: bool,
}

/// 复选框取值：JSON 布尔值，或表单提交的 `on` / `1` / `true` / `yes`
fn deserialize_checkbox<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    struct CheckboxVisitor;

    impl de::Visitor<'_> for CheckboxVisitor {
        type Value = bool;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a boolean or a checkbox value")
        }

        fn visit_bool<E: de::Error>(self, v: bool) -> Result<bool, E> {
            Ok(v)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<bool, E> {
            Ok(v != 0)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<bool, E> {
            Ok(v != 0)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<bool, E> {
            match v.trim().to_ascii_lowercase().as_str() {
                "on" | "1" | "true" | "yes" => Ok(true),
                "" | "off" | "0" | "false" | "no" => Ok(false),
                other => Err(E::invalid_value(de::Unexpected::Str(other), &self)),
            }
        }

        fn visit_unit<E: de::Error>(self) -> Result<bool, E> {
            Ok(false)
        }

        fn visit_none<E: de::Error>(self) -> Result<bool, E> {
            Ok(false)
        }
    }

    deserializer.deserialize_any(CheckboxVisitor)
}

/// Registration / account creation request
///
/// 只校验表单形状，密码强度由 `check_password_strength` 单独按顺序检查。
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 255, message = "The name field is required."))]
    pub name: String,
    #[validate(
        length(max = 255, message = "The email field must not be greater than 255 characters."),
        email(message = "The email field must be a valid email address.")
    )]
    pub email: String,
    pub password: String,
    /// 仅管理员创建接口使用
    #[serde(default)]
    pub role: Option<String>,
}

/// Successful login response for JSON clients
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub redirect: String,
    pub account: AccountResponse,
}

/// Server-driven page payload
#[derive(Debug, Serialize)]
pub struct Page {
    pub component: &'static str,
    pub props: serde_json::Value,
    pub url: String,
}
