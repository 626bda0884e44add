//! 会话认证中间件
//!
//! 受保护路由在进入 handler 之前先解析领域会话 Cookie，并重新检查账户状态。

use crate::{
    auth::{guard::Realm, session::cookie_value},
    error::{AppError, FieldError, LOGIN_FIELD, MSG_ACCOUNT_DEACTIVATED},
    middleware::{AppState, RequestContext},
    models::Account,
    response::{flash_cookie, intended_cookie, redirect},
};
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

/// 认证上下文（附加到请求扩展）
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub account: Account,
    pub session_id: String,
    pub realm: Realm,
}

// 实现 FromRequestParts 以便在 handler 中直接提取 AuthContext
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or(AppError::Unauthorized)
    }
}

/// 管理后台路由：必须持有有效的管理员会话
pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    req: Request,
    next: Next,
) -> Response {
    require_realm(Realm::Admin, state, ctx, req, next).await
}

/// 前台用户路由
pub async fn require_user(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    req: Request,
    next: Next,
) -> Response {
    require_realm(Realm::User, state, ctx, req, next).await
}

async fn require_realm(
    realm: Realm,
    state: Arc<AppState>,
    ctx: RequestContext,
    mut req: Request,
    next: Next,
) -> Response {
    let guard = state.auth(realm).guard();

    let result = match cookie_value(req.headers(), realm.cookie_name()) {
        Some(token) => guard.authenticate(&token).await,
        None => Err(AppError::Unauthorized),
    };

    match result {
        Ok((account, session)) => {
            req.extensions_mut().insert(AuthContext {
                account,
                session_id: session.id,
                realm,
            });
            next.run(req).await
        }
        Err(err) => {
            let remember_target = req.method() == Method::GET;
            let target = req
                .uri()
                .path_and_query()
                .map(|p| p.as_str().to_string())
                .unwrap_or_else(|| realm.home_path().to_string());
            unauthenticated(&state, realm, &ctx, err, remember_target.then_some(target))
        }
    }
}

/// 未通过认证时的响应
///
/// JSON 客户端：401 Unauthorized / 403 Account deactivated；
/// 其余客户端重定向到登录页。两种情况都清除会话 Cookie。
fn unauthenticated(
    state: &AppState,
    realm: Realm,
    ctx: &RequestContext,
    err: AppError,
    target: Option<String>,
) -> Response {
    let secure = state.config.security.secure_cookies;
    let mut cookies: Vec<HeaderValue> = Vec::new();

    match &err {
        AppError::Unauthorized => {
            if !ctx.wants_json {
                if let Some(path) = target.as_deref() {
                    cookies.extend(intended_cookie(realm, path, secure).ok());
                }
            }
        }
        AppError::AccountDeactivated => {
            if !ctx.wants_json {
                let flash = FieldError::new(LOGIN_FIELD, MSG_ACCOUNT_DEACTIVATED);
                cookies.extend(flash_cookie(&flash, secure).ok());
            }
        }
        // 后端错误照常返回
        _ => return err.into_response(),
    }
    cookies.extend(state.sessions.clear_cookie(realm).ok());

    if ctx.wants_json {
        let mut response = err.into_response();
        for cookie in cookies {
            response.headers_mut().append(header::SET_COOKIE, cookie);
        }
        response
    } else {
        redirect(realm.login_path(), cookies)
    }
}
