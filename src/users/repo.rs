use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::repo_types::{NewUser, ProfileChanges, Role, User, UserRow};

const USER_COLUMNS: &str =
    "id, username, email, password, role, avatar_url, created_at, updated_at";

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("email already in use")]
    EmailTaken,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Persistence seam for user records.
///
/// Implementations must reject a second row with the same email atomically
/// (`RepoError::EmailTaken`), including on `update_profile`.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn insert(&self, new: NewUser) -> Result<User, RepoError>;
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    async fn list(&self) -> anyhow::Result<Vec<User>>;
    /// Applies all changes in one statement and bumps `updated_at`. `Ok(None)` if no such user.
    async fn update_profile(
        &self,
        id: Uuid,
        changes: ProfileChanges,
    ) -> Result<Option<User>, RepoError>;
    async fn set_avatar(&self, id: Uuid, url: &str) -> anyhow::Result<Option<User>>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn map_write_err(e: sqlx::Error, what: &'static str) -> RepoError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return RepoError::EmailTaken;
        }
    }
    RepoError::Other(anyhow::Error::new(e).context(what))
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn insert(&self, new: NewUser) -> Result<User, RepoError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (id, username, email, password, role)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&new.username)
        .bind(&new.email)
        .bind(&new.password_hash)
        .bind(Role::User.as_str())
        .fetch_one(&self.db)
        .await
        .map_err(|e| map_write_err(e, "insert user"))?;
        Ok(row.into())
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("find user by email")?;
        Ok(row.map(User::from))
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find user by id")?;
        Ok(row.map(User::from))
    }

    async fn list(&self) -> anyhow::Result<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at ASC"
        ))
        .fetch_all(&self.db)
        .await
        .context("list users")?;
        Ok(rows.into_iter().map(User::from).collect())
    }

    async fn update_profile(
        &self,
        id: Uuid,
        changes: ProfileChanges,
    ) -> Result<Option<User>, RepoError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
               SET username   = COALESCE($2, username),
                   email      = COALESCE($3, email),
                   password   = COALESCE($4, password),
                   updated_at = now()
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(changes.username)
        .bind(changes.email)
        .bind(changes.password_hash)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| map_write_err(e, "update user profile"))?;
        Ok(row.map(User::from))
    }

    async fn set_avatar(&self, id: Uuid, url: &str) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
               SET avatar_url = $2,
                   updated_at = now()
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(url)
        .fetch_optional(&self.db)
        .await
        .context("set avatar url")?;
        Ok(row.map(User::from))
    }
}
