use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::User;

/// Row of `GET /api/users`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: &'static str,
    pub avatar_url: Option<String>,
}

impl From<User> for PublicUser {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            username: u.username,
            email: u.email,
            role: u.role.as_str(),
            avatar_url: u.avatar_url,
        }
    }
}

/// Body of `PUT /api/users/edit`; any subset of fields.
#[derive(Debug, Default, Deserialize)]
pub struct EditProfileRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditedProfile {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<User> for EditedProfile {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            username: u.username,
            email: u.email,
            updated_at: u.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EditProfileResponse {
    pub message: &'static str,
    pub data: EditedProfile,
}

#[derive(Debug, Serialize)]
pub struct AvatarResponse {
    pub message: &'static str,
    pub url: String,
}
