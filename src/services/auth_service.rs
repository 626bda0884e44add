//! 认证服务：登录、登出、注册
//!
//! 登录顺序：表单校验 → 失败限流 → 凭据校验 → 账户状态检查 → 建立会话。
//! 任一步骤都可以提前返回面向用户的拒绝。

use crate::{
    auth::{
        guard::AuthGuard, password::PasswordHasher, session::IssuedSession,
        strength::check_password_strength, throttle::throttle_key, AttemptThrottle,
    },
    error::{AppError, LoginError},
    models::{Account, LoginRequest, NewAccount, RegisterRequest, Role},
};
use chrono::Utc;
use std::sync::Arc;
use validator::Validate;

/// 登录成功的结果
#[derive(Debug)]
pub struct LoginOutcome {
    pub account: Account,
    pub session: IssuedSession,
}

pub struct AuthService {
    guard: Arc<dyn AuthGuard>,
    throttle: AttemptThrottle,
    hasher: Arc<PasswordHasher>,
}

impl AuthService {
    pub fn new(
        guard: Arc<dyn AuthGuard>,
        throttle: AttemptThrottle,
        hasher: Arc<PasswordHasher>,
    ) -> Self {
        Self {
            guard,
            throttle,
            hasher,
        }
    }

    pub fn guard(&self) -> &dyn AuthGuard {
        self.guard.as_ref()
    }

    pub fn throttle(&self) -> &AttemptThrottle {
        &self.throttle
    }

    /// 登录
    pub async fn login(
        &self,
        req: &LoginRequest,
        client_ip: &str,
    ) -> Result<LoginOutcome, LoginError> {
        let realm = self.guard.realm();

        // 表单形状错误不计入失败次数
        if let Err(errors) = req.validate() {
            return Err(match AppError::from(errors) {
                AppError::Validation(field) => LoginError::ValidationFailed(field),
                other => LoginError::Backend(other),
            });
        }

        // 检查速率限制（同时占用一次尝试机会）
        let key = throttle_key(realm.throttle_namespace(), client_ip);
        let attempts = match self.throttle.reserve(&key) {
            Ok(attempts) => attempts,
            Err(retry_after) => {
                tracing::warn!(
                    realm = realm.as_str(),
                    %client_ip,
                    retry_after,
                    "Login throttled"
                );
                record_outcome(realm.as_str(), "throttled");
                return Err(LoginError::ThrottleExceeded { retry_after });
            }
        };

        // 校验凭据
        let account = match self.guard.verify(&req.email, &req.password).await? {
            Some(account) => account,
            None => {
                tracing::info!(
                    realm = realm.as_str(),
                    %client_ip,
                    attempts,
                    max_attempts = self.throttle.max_attempts(),
                    "Login failed: invalid credentials"
                );
                record_outcome(realm.as_str(), "invalid_credentials");
                return Err(LoginError::InvalidCredentials);
            }
        };

        // 凭据正确即清除失败计数
        self.throttle.clear(&key);

        // 会话先行建立，后续任一步失败时由守卫自动注销
        let pending = self
            .guard
            .sessions()
            .begin(realm, account.id, req.remember, client_ip)?;

        // 检查账户状态
        if let Err(rejection) = self.guard.admit(&account) {
            tracing::warn!(
                realm = realm.as_str(),
                account_id = %account.id,
                %client_ip,
                reason = rejection.reason(),
                "Login rejected by account state"
            );
            record_outcome(realm.as_str(), "deactivated");
            return Err(LoginError::AccountDeactivated);
        }

        let now = Utc::now();
        self.guard
            .accounts()
            .record_login(account.id, now, client_ip)
            .await?;

        let session = pending.commit()?;

        tracing::info!(
            realm = realm.as_str(),
            account_id = %account.id,
            %client_ip,
            remember = req.remember,
            "Login succeeded"
        );
        record_outcome(realm.as_str(), "success");

        let mut account = account;
        account.last_login_at = Some(now);
        account.last_login_ip = Some(client_ip.to_string());

        Ok(LoginOutcome { account, session })
    }

    /// 登出
    pub fn logout(&self, session_id: &str) -> bool {
        let removed = self.guard.sessions().invalidate(session_id);
        tracing::info!(
            realm = self.guard.realm().as_str(),
            removed,
            "Logout"
        );
        removed
    }

    /// 注册 / 创建账户
    pub async fn register(&self, req: RegisterRequest, role: Role) -> Result<Account, AppError> {
        req.validate()?;

        check_password_strength(&req.password)
            .map_err(|e| AppError::Validation(e.into_field_error("password")))?;

        let password_hash = self.hasher.spawn_hash(&req.password).await?;

        let account = self
            .guard
            .accounts()
            .create(NewAccount {
                name: req.name,
                email: req.email,
                password_hash,
                role,
            })
            .await?;

        tracing::info!(
            realm = self.guard.realm().as_str(),
            account_id = %account.id,
            role = %account.role,
            "Account created"
        );

        Ok(account)
    }
}

fn record_outcome(realm: &'static str, outcome: &'static str) {
    metrics::counter!("auth_login_attempts_total", "realm" => realm, "outcome" => outcome)
        .increment(1);
}
