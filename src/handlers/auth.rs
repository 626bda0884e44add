//! 认证相关的 HTTP 处理器
//!
//! 管理后台登录页、登录、登出。普通用户领域复用这里的领域无关部分。

use crate::{
    auth::{guard::Realm, middleware::AuthContext, session::cookie_value, IssuedSession},
    error::AppError,
    middleware::{AppState, Payload, RequestContext},
    models::{AccountResponse, LoginRequest, LoginResponse, Page},
    response::{
        clear_flash_cookie, clear_intended_cookie, intended_path, read_flash, redirect,
        reject_form,
    },
};
use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// GET /admin/login
pub async fn show_login(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    login_page(&state, Realm::Admin, "Admin/Auth/Login", &headers).await
}

/// POST /admin/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    headers: HeaderMap,
    Payload(req): Payload<LoginRequest>,
) -> Response {
    attempt_login(&state, Realm::Admin, &ctx, &headers, req).await
}

/// POST /admin/logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    auth: AuthContext,
) -> Response {
    end_session(&state, &ctx, &auth)
}

/// GET /admin/me
pub async fn me(auth: AuthContext) -> Json<AccountResponse> {
    Json(auth.account.into())
}

/// GET /admin/dashboard
pub async fn dashboard(auth: AuthContext) -> Json<Page> {
    Json(Page {
        component: "Admin/Dashboard",
        props: json!({ "admin": AccountResponse::from(auth.account) }),
        url: Realm::Admin.home_path().to_string(),
    })
}

/// 登录页数据，读取并清除上一次重定向留下的错误提示。
/// 已登录时直接跳转到首页。
pub(crate) async fn login_page(
    state: &AppState,
    realm: Realm,
    component: &'static str,
    headers: &HeaderMap,
) -> Response {
    if let Some(token) = cookie_value(headers, realm.cookie_name()) {
        if state.auth(realm).guard().authenticate(&token).await.is_ok() {
            return redirect(realm.home_path(), Vec::new());
        }
    }

    form_page(state, component, realm.login_path(), headers)
}

/// 表单页数据：`{errors}` 取自一次性错误提示，读取后清除
pub(crate) fn form_page(
    state: &AppState,
    component: &'static str,
    url: &str,
    headers: &HeaderMap,
) -> Response {
    let mut errors = Map::new();
    let flash = read_flash(headers);
    if let Some(flash) = &flash {
        errors.insert(flash.field.clone(), Value::String(flash.message.clone()));
    }

    let page = Page {
        component,
        props: json!({ "errors": errors }),
        url: url.to_string(),
    };

    let mut response = Json(page).into_response();
    if flash.is_some() {
        if let Ok(cookie) = clear_flash_cookie(state.config.security.secure_cookies) {
            response.headers_mut().append(header::SET_COOKIE, cookie);
        }
    }
    response
}

/// 执行登录并按客户端类型返回结果
pub(crate) async fn attempt_login(
    state: &AppState,
    realm: Realm,
    ctx: &RequestContext,
    headers: &HeaderMap,
    req: LoginRequest,
) -> Response {
    let secure = state.config.security.secure_cookies;
    let client_ip = ctx.client_ip.to_string();

    let outcome = match state.auth(realm).login(&req, &client_ip).await {
        Ok(outcome) => outcome,
        Err(err) => {
            return reject_form(ctx.wants_json, realm.login_path(), AppError::from(err), secure)
        }
    };

    let cookies = match login_cookies(state, realm, &outcome.session) {
        Ok(cookies) => cookies,
        Err(e) => {
            // 会话已签发但无法下发，撤销
            state.sessions.invalidate(&outcome.session.id);
            return e.into_response();
        }
    };
    let target = intended_path(headers, realm);

    if ctx.wants_json {
        let mut response = Json(LoginResponse {
            redirect: target,
            account: outcome.account.into(),
        })
        .into_response();
        for cookie in cookies {
            response.headers_mut().append(header::SET_COOKIE, cookie);
        }
        response
    } else {
        redirect(&target, cookies)
    }
}

pub(crate) fn login_cookies(
    state: &AppState,
    realm: Realm,
    session: &IssuedSession,
) -> Result<Vec<HeaderValue>, AppError> {
    let secure = state.config.security.secure_cookies;
    Ok(vec![
        state.sessions.cookie(session)?,
        clear_intended_cookie(realm, secure)?,
    ])
}

/// 注销当前会话并回到登录页
pub(crate) fn end_session(state: &AppState, ctx: &RequestContext, auth: &AuthContext) -> Response {
    state.auth(auth.realm).logout(&auth.session_id);

    let cookies: Vec<HeaderValue> = state.sessions.clear_cookie(auth.realm).into_iter().collect();
    let login_path = auth.realm.login_path();

    if ctx.wants_json {
        let mut response = Json(json!({ "redirect": login_path })).into_response();
        for cookie in cookies {
            response.headers_mut().append(header::SET_COOKIE, cookie);
        }
        response
    } else {
        redirect(login_path, cookies)
    }
}
