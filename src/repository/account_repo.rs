//! Account repository (数据库访问层)

use super::{AccountStore, MSG_EMAIL_TAKEN};
use crate::{
    auth::guard::Realm,
    error::AppError,
    models::{Account, NewAccount},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Postgres 账户表，表名由领域决定（admins / users）
pub struct AccountRepository {
    db: PgPool,
    realm: Realm,
}

impl AccountRepository {
    pub fn new(db: PgPool, realm: Realm) -> Self {
        Self { db, realm }
    }

    fn table(&self) -> &'static str {
        self.realm.table()
    }
}

#[async_trait]
impl AccountStore for AccountRepository {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, AppError> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT * FROM {} WHERE email = $1",
            self.table()
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await?;

        Ok(account)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, AppError> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT * FROM {} WHERE id = $1",
            self.table()
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        Ok(account)
    }

    async fn create(&self, account: NewAccount) -> Result<Account, AppError> {
        let result = sqlx::query_as::<_, Account>(&format!(
            r#"
            INSERT INTO {} (id, name, email, password_hash, role)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
            self.table()
        ))
        .bind(Uuid::new_v4())
        .bind(&account.name)
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(account.role.as_str())
        .fetch_one(&self.db)
        .await;

        match result {
            Ok(created) => Ok(created),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(AppError::validation("email", MSG_EMAIL_TAKEN))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>, ip: &str) -> Result<(), AppError> {
        sqlx::query(&format!(
            r#"
            UPDATE {}
            SET
                last_login_at = $2,
                last_login_ip = $3,
                updated_at = NOW()
            WHERE id = $1
            "#,
            self.table()
        ))
        .bind(id)
        .bind(at)
        .bind(ip)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn set_active(&self, id: Uuid, is_active: bool) -> Result<bool, AppError> {
        let result = sqlx::query(&format!(
            "UPDATE {} SET is_active = $2, updated_at = NOW() WHERE id = $1",
            self.table()
        ))
        .bind(id)
        .bind(is_active)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
