//! HTTP 中间件
//! 应用状态、请求追踪、客户端 IP 提取

use axum::{
    extract::{ConnectInfo, FromRequest, FromRequestParts, Request},
    http::{header, request::Parts, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
    Form, Json,
};
use serde::de::DeserializeOwned;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    auth::{
        guard::{Realm, SessionGuard},
        password::PasswordHasher,
        session::{SessionManager, SessionStore},
        throttle::{AttemptThrottle, Clock, ThrottleStore},
    },
    config::AppConfig,
    error::AppError,
    repository::AccountStore,
    services::AuthService,
};

/// 应用状态
///
/// 两个认证领域各有一个 `AuthService`，共享密码哈希器和会话表。
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    /// 未配置数据库（内存模式）时为 None
    pub db: Option<sqlx::PgPool>,
    pub admin_auth: Arc<AuthService>,
    pub user_auth: Arc<AuthService>,
    pub sessions: Arc<SessionManager>,
}

/// 构建 `AppState` 所需的存储
pub struct Stores {
    pub admins: Arc<dyn AccountStore>,
    pub users: Arc<dyn AccountStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub throttle: Arc<dyn ThrottleStore>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        db: Option<sqlx::PgPool>,
        stores: Stores,
    ) -> Result<Self, AppError> {
        let hasher = Arc::new(PasswordHasher::from_config(&config.security)?);
        let sessions = Arc::new(SessionManager::from_config(
            &config.security,
            stores.sessions,
        )?);

        let build = |realm: Realm, accounts: Arc<dyn AccountStore>| {
            let guard = Arc::new(SessionGuard::new(
                realm,
                accounts,
                sessions.clone(),
                hasher.clone(),
            ));
            let throttle = AttemptThrottle::new(
                stores.throttle.clone(),
                stores.clock.clone(),
                config.security.login_max_attempts,
                config.security.login_decay_secs,
            );
            Arc::new(AuthService::new(guard, throttle, hasher.clone()))
        };

        let admin_auth = build(Realm::Admin, stores.admins);
        let user_auth = build(Realm::User, stores.users);

        Ok(Self {
            config,
            db,
            admin_auth,
            user_auth,
            sessions,
        })
    }

    pub fn auth(&self, realm: Realm) -> &AuthService {
        match realm {
            Realm::Admin => &self.admin_auth,
            Realm::User => &self.user_auth,
        }
    }
}

/// 请求追踪中间件
/// 为每个请求生成 trace_id 和 request_id，并记录指标
pub async fn request_tracking_middleware(req: Request, next: Next) -> Response {
    let trace_id = extract_or_generate_trace_id(req.headers());
    let request_id = Uuid::new_v4().to_string();

    let method = req.method().to_string();
    let uri = req.uri().path().to_string();

    let span = tracing::info_span!(
        "http_request",
        trace_id = %trace_id,
        request_id = %request_id,
        method = %method,
        uri = %uri,
    );

    async move {
        let start = Instant::now();

        let mut response = next.run(req).await;

        let elapsed = start.elapsed();

        // 指标标签只使用静态字符串
        let status = response.status().as_u16();
        let method_name = match method.as_str() {
            "GET" => "GET",
            "POST" => "POST",
            "PUT" => "PUT",
            "DELETE" => "DELETE",
            "PATCH" => "PATCH",
            _ => "UNKNOWN",
        };
        let status_class = match status {
            200..=299 => "2xx",
            300..=399 => "3xx",
            401 => "401",
            403 => "403",
            422 => "422",
            429 => "429",
            400..=499 => "4xx",
            _ => "5xx",
        };

        metrics::counter!("http_requests_total", "method" => method_name, "status" => status_class)
            .increment(1);
        metrics::histogram!("http_request_duration_seconds").record(elapsed.as_secs_f64());

        tracing::info!(
            method = %method,
            uri = %uri,
            status = status,
            elapsed_ms = elapsed.as_millis(),
            "Request completed"
        );

        if let Ok(value) = HeaderValue::from_str(&trace_id) {
            response.headers_mut().insert("x-trace-id", value);
        }
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert("x-request-id", value);
        }

        response
    }
    .instrument(span)
    .await
}

/// 从请求头中提取或生成 trace_id
fn extract_or_generate_trace_id(headers: &HeaderMap) -> String {
    headers
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// 获取客户端 IP 地址
/// 信任代理时优先读取代理头，否则使用连接地址
pub fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>, trust_proxy: bool) -> IpAddr {
    if trust_proxy {
        // X-Forwarded-For 可能包含多个 IP，取第一个
        if let Some(addr) = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .and_then(|s| s.trim().parse::<IpAddr>().ok())
        {
            return addr;
        }

        if let Some(addr) = headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<IpAddr>().ok())
        {
            return addr;
        }
    }

    if let Some(addr) = peer {
        return addr;
    }

    tracing::debug!("Could not determine client IP, using loopback address");
    IpAddr::V4(std::net::Ipv4Addr::LOCALHOST)
}

/// 客户端是否期望 JSON 响应（否则使用重定向）
pub fn wants_json(headers: &HeaderMap) -> bool {
    let accepts_json = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.contains("application/json"))
        .unwrap_or(false);

    let is_ajax = headers
        .get("x-requested-with")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.eq_ignore_ascii_case("XMLHttpRequest"))
        .unwrap_or(false);

    accepts_json || is_ajax
}

/// 请求上下文：客户端 IP 与响应偏好
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub client_ip: IpAddr,
    pub wants_json: bool,
}

impl FromRequestParts<Arc<AppState>> for RequestContext {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        Ok(RequestContext {
            client_ip: client_ip(&parts.headers, peer, state.config.security.trust_proxy),
            wants_json: wants_json(&parts.headers),
        })
    }
}

/// 表单载荷：JSON 请求体或 `application/x-www-form-urlencoded`
#[derive(Debug)]
pub struct Payload<T>(pub T);

impl<S, T> FromRequest<S> for Payload<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.starts_with("application/json"))
            .unwrap_or(false);

        if is_json {
            let Json(value) = Json::<T>::from_request(req, state)
                .await
                .map_err(|e| AppError::BadRequest(e.body_text()))?;
            Ok(Payload(value))
        } else {
            let Form(value) = Form::<T>::from_request(req, state)
                .await
                .map_err(|e| AppError::BadRequest(e.body_text()))?;
            Ok(Payload(value))
        }
    }
}
