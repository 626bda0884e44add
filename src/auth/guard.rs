//! 认证守卫
//!
//! 每个认证领域（管理员 / 普通用户）一个守卫，各自拥有独立的账户表、
//! 会话 Cookie 和限流命名空间。守卫负责凭据校验和账户状态检查，
//! 登录流程的编排在 `services::auth_service` 中。

use crate::{
    auth::{
        password::PasswordHasher,
        session::{ActiveSession, SessionManager},
        throttle::{ADMIN_LOGIN_NAMESPACE, USER_LOGIN_NAMESPACE},
    },
    error::AppError,
    models::Account,
    repository::AccountStore,
};
use async_trait::async_trait;
use std::sync::Arc;

/// 认证领域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Realm {
    Admin,
    User,
}

impl Realm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Realm::Admin => "admin",
            Realm::User => "user",
        }
    }

    pub fn cookie_name(&self) -> &'static str {
        match self {
            Realm::Admin => "admin_session",
            Realm::User => "user_session",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            Realm::Admin => "admins",
            Realm::User => "users",
        }
    }

    pub fn throttle_namespace(&self) -> &'static str {
        match self {
            Realm::Admin => ADMIN_LOGIN_NAMESPACE,
            Realm::User => USER_LOGIN_NAMESPACE,
        }
    }

    pub fn login_path(&self) -> &'static str {
        match self {
            Realm::Admin => "/admin/login",
            Realm::User => "/login",
        }
    }

    /// 登录成功后的默认落地页
    pub fn home_path(&self) -> &'static str {
        match self {
            Realm::Admin => "/admin/dashboard",
            Realm::User => "/dashboard",
        }
    }

    /// 记录登录前原始目标地址的 Cookie
    pub fn intended_cookie(&self) -> &'static str {
        match self {
            Realm::Admin => "admin_intended",
            Realm::User => "user_intended",
        }
    }
}

/// 账户状态检查拒绝原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Deactivated,
}

impl Rejection {
    pub fn reason(&self) -> &'static str {
        match self {
            Rejection::Deactivated => "deactivated",
        }
    }
}

#[async_trait]
pub trait AuthGuard: Send + Sync {
    fn realm(&self) -> Realm;

    fn accounts(&self) -> &dyn AccountStore;

    fn sessions(&self) -> &SessionManager;

    /// 凭据校验：邮箱精确匹配且密码哈希校验通过才返回账户。
    /// 邮箱不存在与密码错误对调用方不可区分。
    async fn verify(&self, email: &str, password: &str) -> Result<Option<Account>, AppError>;

    /// 账户状态检查
    fn admit(&self, account: &Account) -> Result<(), Rejection>;

    /// 按会话令牌解析当前账户，每个请求都会重新检查账户状态。
    /// 账户已停用或已删除时会话立即注销。
    async fn authenticate(&self, token: &str) -> Result<(Account, ActiveSession), AppError>;
}

/// 基于服务端会话的守卫
pub struct SessionGuard {
    realm: Realm,
    accounts: Arc<dyn AccountStore>,
    sessions: Arc<SessionManager>,
    hasher: Arc<PasswordHasher>,
}

impl SessionGuard {
    pub fn new(
        realm: Realm,
        accounts: Arc<dyn AccountStore>,
        sessions: Arc<SessionManager>,
        hasher: Arc<PasswordHasher>,
    ) -> Self {
        Self {
            realm,
            accounts,
            sessions,
            hasher,
        }
    }
}

#[async_trait]
impl AuthGuard for SessionGuard {
    fn realm(&self) -> Realm {
        self.realm
    }

    fn accounts(&self) -> &dyn AccountStore {
        self.accounts.as_ref()
    }

    fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    async fn verify(&self, email: &str, password: &str) -> Result<Option<Account>, AppError> {
        match self.accounts.find_by_email(email).await? {
            Some(account) => {
                let matched = self
                    .hasher
                    .spawn_verify(password, Some(&account.password_hash))
                    .await?;
                Ok(matched.then_some(account))
            }
            None => {
                self.hasher.spawn_verify(password, None).await?;
                Ok(None)
            }
        }
    }

    fn admit(&self, account: &Account) -> Result<(), Rejection> {
        if account.is_active {
            Ok(())
        } else {
            Err(Rejection::Deactivated)
        }
    }

    async fn authenticate(&self, token: &str) -> Result<(Account, ActiveSession), AppError> {
        let session = self.sessions.resolve(self.realm, token)?;

        let account = match self.accounts.find_by_id(session.record.account_id).await? {
            Some(account) => account,
            None => {
                self.sessions.invalidate(&session.id);
                tracing::warn!(
                    realm = self.realm.as_str(),
                    account_id = %session.record.account_id,
                    "Session refers to a missing account, invalidated"
                );
                return Err(AppError::Unauthorized);
            }
        };

        if let Err(rejection) = self.admit(&account) {
            self.sessions.invalidate(&session.id);
            tracing::warn!(
                realm = self.realm.as_str(),
                account_id = %account.id,
                reason = rejection.reason(),
                "Session invalidated by account state"
            );
            return Err(AppError::AccountDeactivated);
        }

        Ok((account, session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::session::InMemorySessionStore,
        config::SecurityConfig,
        models::{NewAccount, Role},
        repository::InMemoryAccountStore,
    };
    use secrecy::Secret;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn security() -> SecurityConfig {
        SecurityConfig {
            session_secret: Secret::new("test_secret_key_32_characters_long!".to_string()),
            session_lifetime_secs: 3600,
            remember_lifetime_secs: 86400,
            login_max_attempts: 5,
            login_decay_secs: 300,
            hash_memory_kib: 1024,
            hash_iterations: 1,
            hash_parallelism: 1,
            trust_proxy: false,
            secure_cookies: false,
        }
    }

    async fn guard_with_admin(password: &str) -> (SessionGuard, Account) {
        let config = security();
        let hasher = Arc::new(PasswordHasher::from_config(&config).unwrap());
        let accounts = Arc::new(InMemoryAccountStore::new());
        let account = accounts
            .create(NewAccount {
                name: "Admin".to_string(),
                email: "admin@example.com".to_string(),
                password_hash: hasher.hash(password).unwrap(),
                role: Role::Admin,
            })
            .await
            .unwrap();
        let sessions = Arc::new(
            SessionManager::from_config(&config, Arc::new(InMemorySessionStore::new())).unwrap(),
        );

        (
            SessionGuard::new(Realm::Admin, accounts, sessions, hasher),
            account,
        )
    }

    #[tokio::test]
    async fn test_verify_matches_only_correct_password() {
        let (guard, account) = guard_with_admin("rightpass").await;

        let found = guard.verify("admin@example.com", "rightpass").await.unwrap();
        assert_eq!(found.map(|a| a.id), Some(account.id));

        assert!(guard.verify("admin@example.com", "wrongpass").await.unwrap().is_none());
        assert!(guard.verify("unknown@x.com", "anything").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_admit_rejects_inactive() {
        let (guard, mut account) = guard_with_admin("rightpass").await;

        assert_eq!(guard.admit(&account), Ok(()));
        account.is_active = false;
        assert_eq!(guard.admit(&account), Err(Rejection::Deactivated));
        assert_eq!(Rejection::Deactivated.reason(), "deactivated");
    }

    #[tokio::test]
    async fn test_authenticate_invalidates_deactivated_session() {
        let (guard, account) = guard_with_admin("rightpass").await;
        let issued = guard
            .sessions()
            .establish(Realm::Admin, account.id, false, "127.0.0.1")
            .unwrap();

        assert!(guard.authenticate(&issued.token).await.is_ok());

        guard.accounts().set_active(account.id, false).await.unwrap();
        let err = guard.authenticate(&issued.token).await.unwrap_err();
        assert!(matches!(err, AppError::AccountDeactivated));

        // 重新启用后旧会话也不再有效
        guard.accounts().set_active(account.id, true).await.unwrap();
        let err = guard.authenticate(&issued.token).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));
    }

    #[tokio::test]
    async fn test_verify_yields_to_other_tasks() {
        let (guard, account) = guard_with_admin("rightpass").await;

        // 单线程运行时：哈希校验若在当前线程执行，计数任务在校验结束前不会被调度
        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = {
            let ticks = ticks.clone();
            tokio::spawn(async move {
                loop {
                    ticks.fetch_add(1, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                }
            })
        };

        let found = guard.verify("admin@example.com", "rightpass").await.unwrap();
        assert_eq!(found.map(|a| a.id), Some(account.id));
        assert!(ticks.load(Ordering::SeqCst) > 0);

        let missing = guard.verify("nobody@example.com", "rightpass").await.unwrap();
        assert!(missing.is_none());

        ticker.abort();
    }

    #[test]
    fn test_realm_namespaces_are_distinct() {
        assert_ne!(Realm::Admin.cookie_name(), Realm::User.cookie_name());
        assert_ne!(Realm::Admin.table(), Realm::User.table());
        assert_ne!(
            Realm::Admin.throttle_namespace(),
            Realm::User.throttle_namespace()
        );
    }
}
