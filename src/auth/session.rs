//! 服务端会话
//!
//! Cookie 中只携带 HS256 签名的会话令牌（会话 ID + 领域 + 过期时间），
//! 会话本身登记在服务端会话表中，表键为会话 ID 的 SHA-256，
//! 因此注销、强制下线都能立即生效。

use crate::{auth::guard::Realm, config::SecurityConfig, error::AppError};
use axum::http::{header, HeaderMap, HeaderValue};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

/// 会话令牌 claims
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionClaims {
    /// 会话 ID
    pub sid: String,
    /// Subject (account ID)
    pub sub: String,
    /// admin / user
    pub realm: String,
    pub iat: i64,
    pub exp: i64,
}

/// 会话表中的记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub account_id: Uuid,
    pub realm: Realm,
    pub remember: bool,
    pub ip_address: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// 已签发的会话（ID 只在签发时以明文出现）
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub id: String,
    pub token: String,
    pub record: SessionRecord,
}

/// 解析 Cookie 得到的有效会话
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub id: String,
    pub record: SessionRecord,
}

/// 会话存储
pub trait SessionStore: Send + Sync {
    fn insert(&self, id_hash: String, record: SessionRecord);
    fn get(&self, id_hash: &str) -> Option<SessionRecord>;
    fn remove(&self, id_hash: &str) -> Option<SessionRecord>;
    fn purge_expired(&self, now: DateTime<Utc>) -> usize;
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, SessionRecord>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl SessionStore for InMemorySessionStore {
    fn insert(&self, id_hash: String, record: SessionRecord) {
        self.sessions.insert(id_hash, record);
    }

    fn get(&self, id_hash: &str) -> Option<SessionRecord> {
        self.sessions.get(id_hash).map(|r| r.clone())
    }

    fn remove(&self, id_hash: &str) -> Option<SessionRecord> {
        self.sessions.remove(id_hash).map(|(_, r)| r)
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, r| r.expires_at > now);
        before.saturating_sub(self.sessions.len())
    }
}

/// 会话管理：签发、解析、轮换、注销
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    lifetime_secs: u64,
    remember_lifetime_secs: u64,
    secure_cookies: bool,
}

impl SessionManager {
    pub fn from_config(
        config: &SecurityConfig,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self, AppError> {
        let secret = config.session_secret.expose_secret();

        // HS256 至少 32 字节
        if secret.len() < 32 {
            return Err(AppError::Config(
                "Session secret too short (min 32 chars)".to_string(),
            ));
        }

        Ok(Self {
            store,
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            lifetime_secs: config.session_lifetime_secs,
            remember_lifetime_secs: config.remember_lifetime_secs,
            secure_cookies: config.secure_cookies,
        })
    }

    /// 为账户建立会话
    pub fn establish(
        &self,
        realm: Realm,
        account_id: Uuid,
        remember: bool,
        ip_address: &str,
    ) -> Result<IssuedSession, AppError> {
        let now = Utc::now();
        let lifetime = if remember {
            self.remember_lifetime_secs
        } else {
            self.lifetime_secs
        };

        let record = SessionRecord {
            account_id,
            realm,
            remember,
            ip_address: ip_address.to_string(),
            created_at: now,
            expires_at: now + Duration::seconds(lifetime as i64),
        };

        self.issue(record)
    }

    /// 开始一个待确认的会话，未 `commit` 即丢弃时自动注销
    pub fn begin(
        &self,
        realm: Realm,
        account_id: Uuid,
        remember: bool,
        ip_address: &str,
    ) -> Result<PendingSession<'_>, AppError> {
        let issued = self.establish(realm, account_id, remember, ip_address)?;
        Ok(PendingSession {
            manager: self,
            session: Some(issued),
        })
    }

    /// 注销会话
    pub fn invalidate(&self, id: &str) -> bool {
        self.store.remove(&hash_session_id(id)).is_some()
    }

    /// 轮换会话 ID，旧 ID 立即失效
    pub fn regenerate_id(&self, id: &str) -> Result<IssuedSession, AppError> {
        let record = self
            .store
            .remove(&hash_session_id(id))
            .ok_or(AppError::Unauthorized)?;

        self.issue(record)
    }

    /// 从令牌解析出当前领域的有效会话
    pub fn resolve(&self, realm: Realm, token: &str) -> Result<ActiveSession, AppError> {
        let claims = decode::<SessionClaims>(
            token,
            &self.decoding_key,
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|e| {
            tracing::debug!("Session token validation failed: {:?}", e);
            AppError::Unauthorized
        })?
        .claims;

        if claims.realm != realm.as_str() {
            tracing::debug!(
                expected = realm.as_str(),
                got = %claims.realm,
                "Session realm mismatch"
            );
            return Err(AppError::Unauthorized);
        }

        let record = self
            .store
            .get(&hash_session_id(&claims.sid))
            .ok_or(AppError::Unauthorized)?;

        if record.expires_at <= Utc::now() || record.realm != realm {
            self.store.remove(&hash_session_id(&claims.sid));
            return Err(AppError::Unauthorized);
        }

        Ok(ActiveSession {
            id: claims.sid,
            record,
        })
    }

    pub fn purge_expired(&self) -> usize {
        self.store.purge_expired(Utc::now())
    }

    /// 设置会话 Cookie
    pub fn cookie(&self, session: &IssuedSession) -> Result<HeaderValue, AppError> {
        let max_age = (session.record.expires_at - Utc::now()).num_seconds().max(0);
        build_cookie(
            session.record.realm.cookie_name(),
            &session.token,
            max_age,
            self.secure_cookies,
        )
    }

    /// 清除会话 Cookie
    pub fn clear_cookie(&self, realm: Realm) -> Result<HeaderValue, AppError> {
        build_cookie(realm.cookie_name(), "", 0, self.secure_cookies)
    }

    fn issue(&self, record: SessionRecord) -> Result<IssuedSession, AppError> {
        let id = generate_session_id();

        let claims = SessionClaims {
            sid: id.clone(),
            sub: record.account_id.to_string(),
            realm: record.realm.as_str().to_string(),
            iat: record.created_at.timestamp(),
            exp: record.expires_at.timestamp(),
        };

        let token = encode(&Header::default(), &claims, &self.encoding_key).map_err(|e| {
            tracing::error!("Failed to encode session token: {:?}", e);
            AppError::Internal(format!("Failed to encode session token: {}", e))
        })?;

        self.store.insert(hash_session_id(&id), record.clone());

        Ok(IssuedSession { id, token, record })
    }
}

/// 待确认的会话
///
/// 登录流程在账户状态检查之前就建立会话；若检查拒绝（或任何提前返回），
/// 守卫被丢弃时会话随之注销。
pub struct PendingSession<'a> {
    manager: &'a SessionManager,
    session: Option<IssuedSession>,
}

impl PendingSession<'_> {
    /// 确认会话，同时轮换会话 ID
    pub fn commit(mut self) -> Result<IssuedSession, AppError> {
        let pending = self.session.take().ok_or(AppError::Unauthorized)?;
        match self.manager.regenerate_id(&pending.id) {
            Ok(issued) => Ok(issued),
            Err(e) => {
                self.manager.invalidate(&pending.id);
                Err(e)
            }
        }
    }
}

impl Drop for PendingSession<'_> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.manager.invalidate(&session.id);
            tracing::debug!(
                realm = session.record.realm.as_str(),
                account_id = %session.record.account_id,
                "Pending session discarded"
            );
        }
    }
}

/// 会话 ID 的存储形式
pub fn hash_session_id(id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn generate_session_id() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(40)
        .map(char::from)
        .collect()
}

/// 构造 Set-Cookie 头
pub fn build_cookie(
    name: &str,
    value: &str,
    max_age: i64,
    secure: bool,
) -> Result<HeaderValue, AppError> {
    let mut cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        name, value, max_age
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
        .map_err(|e| AppError::Internal(format!("Invalid cookie value: {}", e)))
}

/// 从 Cookie 头中读取指定名称的值
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|s| s.split(';'))
        .filter_map(|pair| {
            let (k, v) = pair.trim().split_once('=')?;
            (k == name && !v.is_empty()).then(|| v.to_string())
        })
        .next()
}
