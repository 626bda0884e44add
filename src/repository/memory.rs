//! 内存账户表

use super::{AccountStore, MSG_EMAIL_TAKEN};
use crate::{
    error::AppError,
    models::{Account, NewAccount},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use uuid::Uuid;

/// 以邮箱为键，插入时借助 entry 保证邮箱唯一
#[derive(Default)]
pub struct InMemoryAccountStore {
    accounts: DashMap<String, Account>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn get(&self, email: &str) -> Option<Account> {
        self.accounts.get(email).map(|a| a.clone())
    }

    fn email_of(&self, id: Uuid) -> Option<String> {
        self.accounts
            .iter()
            .find(|entry| entry.value().id == id)
            .map(|entry| entry.key().clone())
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, AppError> {
        Ok(self.accounts.get(email).map(|a| a.clone()))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, AppError> {
        Ok(self
            .accounts
            .iter()
            .find(|entry| entry.value().id == id)
            .map(|entry| entry.value().clone()))
    }

    async fn create(&self, account: NewAccount) -> Result<Account, AppError> {
        match self.accounts.entry(account.email.clone()) {
            Entry::Occupied(_) => Err(AppError::validation("email", MSG_EMAIL_TAKEN)),
            Entry::Vacant(slot) => {
                let now = Utc::now();
                let created = Account {
                    id: Uuid::new_v4(),
                    name: account.name,
                    email: account.email,
                    password_hash: account.password_hash,
                    role: account.role.as_str().to_string(),
                    is_active: true,
                    last_login_at: None,
                    last_login_ip: None,
                    created_at: now,
                    updated_at: now,
                };
                slot.insert(created.clone());
                Ok(created)
            }
        }
    }

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>, ip: &str) -> Result<(), AppError> {
        if let Some(email) = self.email_of(id) {
            if let Some(mut account) = self.accounts.get_mut(&email) {
                account.last_login_at = Some(at);
                account.last_login_ip = Some(ip.to_string());
                account.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn set_active(&self, id: Uuid, is_active: bool) -> Result<bool, AppError> {
        let Some(email) = self.email_of(id) else {
            return Ok(false);
        };
        match self.accounts.get_mut(&email) {
            Some(mut account) => {
                account.is_active = is_active;
                account.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
