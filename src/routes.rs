//! 路由注册
//! 创建所有路由并应用中间件

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

use crate::{auth, handlers, middleware::AppState};

/// 登录 / 注册表单都很小
const MAX_BODY_BYTES: usize = 64 * 1024;

/// 创建应用路由
pub fn create_router(state: Arc<AppState>) -> Router {
    // 公开端点（健康检查）
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check));

    // 访客路由
    let guest_routes = Router::new()
        .route(
            "/admin/login",
            get(handlers::auth::show_login).post(handlers::auth::login),
        )
        .route(
            "/login",
            get(handlers::user::show_login).post(handlers::user::login),
        )
        .route(
            "/register",
            get(handlers::user::show_register).post(handlers::user::register),
        );

    // 管理后台（每个请求都重新检查账户状态）
    let admin_routes = Router::new()
        .route("/admin/logout", post(handlers::auth::logout))
        .route("/admin/me", get(handlers::auth::me))
        .route("/admin/dashboard", get(handlers::auth::dashboard))
        .route("/admin/admins", post(handlers::admin::create_admin))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::middleware::require_admin,
        ));

    // 前台用户
    let user_routes = Router::new()
        .route("/logout", post(handlers::user::logout))
        .route("/me", get(handlers::user::me))
        .route("/dashboard", get(handlers::user::dashboard))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::middleware::require_user,
        ));

    // 组合所有路由
    Router::new()
        .merge(public_routes)
        .merge(guest_routes)
        .merge(admin_routes)
        .merge(user_routes)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(axum::middleware::from_fn(crate::middleware::request_tracking_middleware))
        .with_state(state)
}
