//! 测试公共模块
//! 内存存储 + 手动时钟构建的应用，以及请求 / 响应辅助函数

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Request, Response},
    Router,
};
use chrono::Utc;
use http_body_util::BodyExt;
use secrecy::Secret;
use std::sync::Arc;
use template_admin::{
    auth::{throttle::ManualClock, InMemorySessionStore, InMemoryThrottleStore, PasswordHasher},
    config::{AppConfig, DatabaseConfig, LoggingConfig, SecurityConfig, ServerConfig},
    middleware::{AppState, Stores},
    models::{Account, NewAccount, Role},
    repository::{AccountStore, InMemoryAccountStore},
    routes,
};

pub const ADMIN_EMAIL: &str = "admin@example.com";
pub const ADMIN_PASSWORD: &str = "Templ4te-Admin!";
pub const CLIENT_IP: &str = "203.0.113.7";

/// 创建测试配置（低成本哈希参数，信任代理头）
pub fn create_test_config() -> AppConfig {
    AppConfig {
        server: ServerConfig {
            addr: "127.0.0.1:0".to_string(),
            graceful_shutdown_timeout_secs: 5,
        },
        database: DatabaseConfig {
            url: None,
            max_connections: 5,
            min_connections: 1,
            acquire_timeout_secs: 5,
            idle_timeout_secs: 300,
            max_lifetime_secs: 1800,
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
            format: "pretty".to_string(),
        },
        security: SecurityConfig {
            session_secret: Secret::new("test-secret-key-for-testing-only-min-32-chars".to_string()),
            session_lifetime_secs: 3600,
            remember_lifetime_secs: 86400,
            login_max_attempts: 5,
            login_decay_secs: 300,
            hash_memory_kib: 1024,
            hash_iterations: 1,
            hash_parallelism: 1,
            trust_proxy: true,
            secure_cookies: false,
        },
    }
}

pub struct TestApp {
    pub state: Arc<AppState>,
    pub admins: Arc<InMemoryAccountStore>,
    pub users: Arc<InMemoryAccountStore>,
    pub sessions: Arc<InMemorySessionStore>,
    pub clock: Arc<ManualClock>,
    pub hasher: PasswordHasher,
}

impl TestApp {
    pub fn new() -> Self {
        let config = create_test_config();
        let admins = Arc::new(InMemoryAccountStore::new());
        let users = Arc::new(InMemoryAccountStore::new());
        let sessions = Arc::new(InMemorySessionStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));

        let stores = Stores {
            admins: admins.clone(),
            users: users.clone(),
            sessions: sessions.clone(),
            throttle: Arc::new(InMemoryThrottleStore::new()),
            clock: clock.clone(),
        };
        let hasher = PasswordHasher::from_config(&config.security).unwrap();
        let state = Arc::new(AppState::new(config, None, stores).unwrap());

        Self {
            state,
            admins,
            users,
            sessions,
            clock,
            hasher,
        }
    }

    pub fn router(&self) -> Router {
        routes::create_router(self.state.clone())
    }

    pub async fn seed_admin(&self, email: &str, password: &str, role: Role) -> Account {
        seed(self.admins.as_ref(), &self.hasher, email, password, role).await
    }

    pub async fn seed_user(&self, email: &str, password: &str) -> Account {
        seed(self.users.as_ref(), &self.hasher, email, password, Role::User).await
    }

    pub async fn deactivate_admin(&self, account: &Account) {
        assert!(self.admins.set_active(account.id, false).await.unwrap());
    }
}

async fn seed(
    store: &dyn AccountStore,
    hasher: &PasswordHasher,
    email: &str,
    password: &str,
    role: Role,
) -> Account {
    store
        .create(NewAccount {
            name: "Test Account".to_string(),
            email: email.to_string(),
            password_hash: hasher.hash(password).unwrap(),
            role,
        })
        .await
        .unwrap()
}

/// JSON 登录请求
pub fn json_login(path: &str, email: &str, password: &str, ip: &str) -> Request<Body> {
    let body = serde_json::json!({ "email": email, "password": password });
    Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::ACCEPT, "application/json")
        .header("x-forwarded-for", ip)
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// 浏览器表单登录请求
pub fn form_login(path: &str, email: &str, password: &str, ip: &str) -> Request<Body> {
    let body = format!(
        "email={}&password={}",
        email.replace('@', "%40"),
        password.replace('!', "%21")
    );
    form_post(path, body, ip)
}

/// 任意表单 POST
pub fn form_post(path: &str, body: String, ip: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .header("x-forwarded-for", ip)
        .body(Body::from(body))
        .unwrap()
}

/// 携带 Cookie 的请求
pub fn with_cookie(method: &str, path: &str, cookie: &str, json: bool) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(path)
        .header(header::COOKIE, cookie)
        .header("x-forwarded-for", CLIENT_IP);
    if json {
        builder = builder.header(header::ACCEPT, "application/json");
    }
    builder.body(Body::empty()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// 从 Set-Cookie 中取出指定 Cookie 的 `name=value`（值为空时视为清除）
pub fn set_cookie<B>(response: &Response<B>, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .find(|pair| {
            pair.split_once('=')
                .map(|(k, v)| k == name && !v.is_empty())
                .unwrap_or(false)
        })
        .map(|pair| pair.to_string())
}

/// 指定 Cookie 的 Max-Age
pub fn cookie_max_age<B>(response: &Response<B>, name: &str) -> Option<i64> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with(&format!("{}=", name)))?
        .split(';')
        .filter_map(|attr| attr.trim().strip_prefix("Max-Age="))
        .find_map(|v| v.parse().ok())
}

pub fn location<B>(response: &Response<B>) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}
