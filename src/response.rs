//! 面向浏览器客户端的响应辅助：重定向、一次性错误提示、登录后跳转地址
//!
//! JSON 客户端直接拿到错误体；普通客户端被重定向回表单页，
//! 错误信息通过短期 Cookie 带过去，由页面接口读取后清除。

use crate::{
    auth::{guard::Realm, session::build_cookie},
    error::{AppError, FieldError},
};
use axum::{
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

pub const FLASH_COOKIE: &str = "flash_error";
const FLASH_MAX_AGE: i64 = 60;
const INTENDED_MAX_AGE: i64 = 600;

/// 303 重定向，附带若干 Set-Cookie
pub fn redirect(location: &str, cookies: Vec<HeaderValue>) -> Response {
    let mut response = StatusCode::SEE_OTHER.into_response();
    let headers = response.headers_mut();

    match HeaderValue::from_str(location) {
        Ok(value) => {
            headers.insert(header::LOCATION, value);
        }
        Err(_) => {
            headers.insert(header::LOCATION, HeaderValue::from_static("/"));
        }
    }
    for cookie in cookies {
        headers.append(header::SET_COOKIE, cookie);
    }

    response
}

/// 把字段错误写入一次性 Cookie
pub fn flash_cookie(error: &FieldError, secure: bool) -> Result<HeaderValue, AppError> {
    let json = serde_json::to_vec(error)
        .map_err(|e| AppError::Internal(format!("Failed to encode flash: {}", e)))?;
    build_cookie(FLASH_COOKIE, &URL_SAFE_NO_PAD.encode(json), FLASH_MAX_AGE, secure)
}

pub fn clear_flash_cookie(secure: bool) -> Result<HeaderValue, AppError> {
    build_cookie(FLASH_COOKIE, "", 0, secure)
}

/// 读取一次性错误提示
pub fn read_flash(headers: &HeaderMap) -> Option<FieldError> {
    let raw = crate::auth::session::cookie_value(headers, FLASH_COOKIE)?;
    let bytes = URL_SAFE_NO_PAD.decode(raw).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// 记录登录前的目标地址
pub fn intended_cookie(realm: Realm, path: &str, secure: bool) -> Result<HeaderValue, AppError> {
    build_cookie(
        realm.intended_cookie(),
        &URL_SAFE_NO_PAD.encode(path.as_bytes()),
        INTENDED_MAX_AGE,
        secure,
    )
}

pub fn clear_intended_cookie(realm: Realm, secure: bool) -> Result<HeaderValue, AppError> {
    build_cookie(realm.intended_cookie(), "", 0, secure)
}

/// 登录成功后的跳转地址，只接受本站内属于该领域的路径
pub fn intended_path(headers: &HeaderMap, realm: Realm) -> String {
    crate::auth::session::cookie_value(headers, realm.intended_cookie())
        .and_then(|raw| URL_SAFE_NO_PAD.decode(raw).ok())
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .filter(|path| is_local_path(path, realm))
        .unwrap_or_else(|| realm.home_path().to_string())
}

fn is_local_path(path: &str, realm: Realm) -> bool {
    if !path.starts_with('/') || path.starts_with("//") || path.contains('\\') {
        return false;
    }
    match realm {
        Realm::Admin => path == "/admin" || path.starts_with("/admin/"),
        Realm::User => !path.starts_with("/admin"),
    }
}

/// 表单请求失败：JSON 客户端返回错误体，其余重定向回表单页并带上提示
pub fn reject_form(wants_json: bool, back: &str, err: AppError, secure: bool) -> Response {
    let field_error = match err.field_error() {
        Some(field_error) if !wants_json => field_error,
        _ => return err.into_response(),
    };

    tracing::debug!(
        back,
        field = %field_error.field,
        "Redirecting back with flash error"
    );

    match flash_cookie(&field_error, secure) {
        Ok(cookie) => redirect(back, vec![cookie]),
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with_cookie(cookie: &HeaderValue) -> HeaderMap {
        // Set-Cookie 的第一段即 name=value
        let pair = cookie.to_str().unwrap().split(';').next().unwrap().to_string();
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, pair.parse().unwrap());
        headers
    }

    #[test]
    fn test_flash_round_trip() {
        let error = FieldError::new("email", "Your account has been deactivated.");
        let cookie = flash_cookie(&error, false).unwrap();

        assert_eq!(read_flash(&headers_with_cookie(&cookie)), Some(error));
    }

    #[test]
    fn test_intended_path_defaults_to_home() {
        assert_eq!(intended_path(&HeaderMap::new(), Realm::Admin), "/admin/dashboard");
    }

    #[test]
    fn test_intended_path_rejects_foreign_targets() {
        for target in ["//evil.example.com", "https://evil.example.com", "/dashboard"] {
            let cookie = intended_cookie(Realm::Admin, target, false).unwrap();
            assert_eq!(
                intended_path(&headers_with_cookie(&cookie), Realm::Admin),
                "/admin/dashboard"
            );
        }

        let cookie = intended_cookie(Realm::Admin, "/admin/templates?page=2", false).unwrap();
        assert_eq!(
            intended_path(&headers_with_cookie(&cookie), Realm::Admin),
            "/admin/templates?page=2"
        );
    }

    #[test]
    fn test_reject_form_redirects_browsers() {
        let response = reject_form(
            false,
            Realm::Admin.login_path(),
            AppError::validation("email", "bad"),
            false,
        );
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/admin/login");
        assert!(response.headers().contains_key(header::SET_COOKIE));
    }

    #[test]
    fn test_reject_form_json_and_server_errors_are_not_redirected() {
        let response = reject_form(true, "/admin/login", AppError::validation("email", "bad"), false);
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let response = reject_form(false, "/admin/login", AppError::Internal("x".into()), false);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
