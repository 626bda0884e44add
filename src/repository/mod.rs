//! Account repository layer
//!
//! 每个认证领域对应一个 `AccountStore`：Postgres 实现用于部署，内存实现用于测试和本地调试。

pub mod account_repo;
pub mod memory;

pub use account_repo::AccountRepository;
pub use memory::InMemoryAccountStore;

use crate::{
    error::AppError,
    models::{Account, NewAccount},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub const MSG_EMAIL_TAKEN: &str = "The email has already been taken.";

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// 按邮箱精确查找（区分大小写）
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, AppError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, AppError>;

    /// 创建账户，邮箱重复时返回 `email` 字段的校验错误
    async fn create(&self, account: NewAccount) -> Result<Account, AppError>;

    /// 登录成功后记录时间和来源 IP
    async fn record_login(&self, id: Uuid, at: DateTime<Utc>, ip: &str) -> Result<(), AppError>;

    /// 启用 / 停用账户
    async fn set_active(&self, id: Uuid, is_active: bool) -> Result<bool, AppError>;
}
