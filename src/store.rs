use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;

/// Account record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub age: Option<i32>,
    pub is_active: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Fields required to insert a new account. The id and timestamps are
/// assigned by the store.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub age: Option<i32>,
}

/// Partial update: `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct AccountPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub age: Option<i32>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("email already taken")]
    DuplicateEmail,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Persistence contract for account records.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn create(&self, draft: NewAccount) -> Result<Account, StoreError>;
    async fn find_by_id(&self, id: i64) -> Result<Option<Account>, StoreError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;
    /// Returns `None` when no account with `id` exists.
    async fn update(&self, id: i64, patch: AccountPatch) -> Result<Option<Account>, StoreError>;
    async fn delete(&self, id: i64) -> Result<(), StoreError>;
    async fn count(&self) -> Result<i64, StoreError>;
    async fn count_active(&self) -> Result<i64, StoreError>;
    /// Accounts in insertion order. Negative `offset`/`limit` clamp to zero.
    async fn list(&self, offset: i64, limit: i64) -> Result<Vec<Account>, StoreError>;
}

#[derive(Clone)]
pub struct PgAccountStore {
    db: PgPool,
}

impl PgAccountStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn map_insert_err(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::DuplicateEmail,
        _ => StoreError::Database(e),
    }
}

const ACCOUNT_COLUMNS: &str = "id, name, email, password_hash, age, is_active, created_at, updated_at";

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn create(&self, draft: NewAccount) -> Result<Account, StoreError> {
        let account = sqlx::query_as::<_, Account>(&format!(
            r#"
            INSERT INTO accounts (name, email, password_hash, age)
            VALUES ($1, $2, $3, $4)
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(&draft.name)
        .bind(&draft.email)
        .bind(&draft.password_hash)
        .bind(draft.age)
        .fetch_one(&self.db)
        .await
        .map_err(map_insert_err)?;
        Ok(account)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Account>, StoreError> {
        let account = sqlx::query_as::<_, Account>(&format!(
            r#"SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"#
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(account)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let account = sqlx::query_as::<_, Account>(&format!(
            r#"SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = $1"#
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(account)
    }

    async fn update(&self, id: i64, patch: AccountPatch) -> Result<Option<Account>, StoreError> {
        let account = sqlx::query_as::<_, Account>(&format!(
            r#"
            UPDATE accounts
            SET name          = COALESCE($2, name),
                email         = COALESCE($3, email),
                password_hash = COALESCE($4, password_hash),
                age           = COALESCE($5, age),
                updated_at    = now()
            WHERE id = $1
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(patch.name)
        .bind(patch.email)
        .bind(patch.password_hash)
        .bind(patch.age)
        .fetch_optional(&self.db)
        .await
        .map_err(map_insert_err)?;
        Ok(account)
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn count(&self) -> Result<i64, StoreError> {
        let n = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM accounts")
            .fetch_one(&self.db)
            .await?;
        Ok(n)
    }

    async fn count_active(&self) -> Result<i64, StoreError> {
        let n = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM accounts WHERE is_active")
            .fetch_one(&self.db)
            .await?;
        Ok(n)
    }

    async fn list(&self, offset: i64, limit: i64) -> Result<Vec<Account>, StoreError> {
        let rows = sqlx::query_as::<_, Account>(&format!(
            r#"SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY id LIMIT $1 OFFSET $2"#
        ))
        .bind(limit.max(0))
        .bind(offset.max(0))
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }
}
