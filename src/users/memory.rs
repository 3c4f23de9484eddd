use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::repo::{RepoError, UserStore};
use super::repo_types::{NewUser, ProfileChanges, Role, User};

/// `UserStore` kept in process memory. Each call holds the lock for its whole
/// check-and-write, which gives the same uniqueness guarantee as the Postgres index.
#[derive(Default)]
pub struct MemoryUserStore {
    rows: Mutex<Vec<User>>,
}

fn email_taken(rows: &[User], email: &str, except: Option<Uuid>) -> bool {
    rows.iter()
        .any(|u| u.email == email && Some(u.id) != except)
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn insert(&self, new: NewUser) -> Result<User, RepoError> {
        let mut rows = self.rows.lock().await;
        if email_taken(&rows, &new.email, None) {
            return Err(RepoError::EmailTaken);
        }
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            username: new.username,
            email: new.email,
            password_hash: new.password_hash,
            role: Role::User,
            avatar_url: None,
            created_at: now,
            updated_at: now,
        };
        rows.push(user.clone());
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let rows = self.rows.lock().await;
        Ok(rows.iter().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let rows = self.rows.lock().await;
        Ok(rows.iter().find(|u| u.id == id).cloned())
    }

    async fn list(&self) -> anyhow::Result<Vec<User>> {
        Ok(self.rows.lock().await.clone())
    }

    async fn update_profile(
        &self,
        id: Uuid,
        changes: ProfileChanges,
    ) -> Result<Option<User>, RepoError> {
        let mut rows = self.rows.lock().await;
        if let Some(email) = &changes.email {
            if email_taken(&rows, email, Some(id)) {
                return Err(RepoError::EmailTaken);
            }
        }
        let Some(user) = rows.iter_mut().find(|u| u.id == id) else {
            return Ok(None);
        };
        if let Some(username) = changes.username {
            user.username = username;
        }
        if let Some(email) = changes.email {
            user.email = email;
        }
        if let Some(hash) = changes.password_hash {
            user.password_hash = hash;
        }
        user.updated_at = OffsetDateTime::now_utc();
        Ok(Some(user.clone()))
    }

    async fn set_avatar(&self, id: Uuid, url: &str) -> anyhow::Result<Option<User>> {
        let mut rows = self.rows.lock().await;
        let Some(user) = rows.iter_mut().find(|u| u.id == id) else {
            return Ok(None);
        };
        user.avatar_url = Some(url.to_string());
        user.updated_at = OffsetDateTime::now_utc();
        Ok(Some(user.clone()))
    }
}
