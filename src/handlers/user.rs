//! 前台用户领域：注册、登录、登出

use crate::{
    auth::{guard::Realm, middleware::AuthContext},
    handlers::auth::{attempt_login, end_session, form_page, login_cookies, login_page},
    middleware::{AppState, Payload, RequestContext},
    models::{AccountResponse, LoginRequest, LoginResponse, Page, RegisterRequest, Role},
    response::{redirect, reject_form},
};
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;

const REGISTER_PATH: &str = "/register";

/// GET /login
pub async fn show_login(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    login_page(&state, Realm::User, "Auth/Login", &headers).await
}

/// POST /login
pub async fn login(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    headers: HeaderMap,
    Payload(req): Payload<LoginRequest>,
) -> Response {
    attempt_login(&state, Realm::User, &ctx, &headers, req).await
}

/// GET /register
pub async fn show_register(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    form_page(&state, "Auth/Register", REGISTER_PATH, &headers)
}

/// POST /register
/// 注册成功后直接登录
pub async fn register(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Payload(mut req): Payload<RegisterRequest>,
) -> Response {
    let secure = state.config.security.secure_cookies;

    // 前台注册不接受角色参数
    req.role = None;

    let account = match state.auth(Realm::User).register(req, Role::User).await {
        Ok(account) => account,
        Err(err) => return reject_form(ctx.wants_json, REGISTER_PATH, err, secure),
    };

    let client_ip = ctx.client_ip.to_string();
    let session = match state
        .sessions
        .establish(Realm::User, account.id, false, &client_ip)
    {
        Ok(session) => session,
        Err(e) => return e.into_response(),
    };
    let cookies = match login_cookies(&state, Realm::User, &session) {
        Ok(cookies) => cookies,
        Err(e) => {
            state.sessions.invalidate(&session.id);
            return e.into_response();
        }
    };

    let target = Realm::User.home_path();
    if ctx.wants_json {
        let mut response = (
            StatusCode::CREATED,
            Json(LoginResponse {
                redirect: target.to_string(),
                account: account.into(),
            }),
        )
            .into_response();
        for cookie in cookies {
            response.headers_mut().append(header::SET_COOKIE, cookie);
        }
        response
    } else {
        redirect(target, cookies)
    }
}

/// POST /logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    auth: AuthContext,
) -> Response {
    end_session(&state, &ctx, &auth)
}

/// GET /me
pub async fn me(auth: AuthContext) -> Json<AccountResponse> {
    Json(auth.account.into())
}

/// GET /dashboard
pub async fn dashboard(auth: AuthContext) -> Json<Page> {
    Json(Page {
        component: "Dashboard",
        props: json!({ "user": AccountResponse::from(auth.account) }),
        url: Realm::User.home_path().to_string(),
    })
}
