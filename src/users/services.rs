use bytes::Bytes;
use tracing::info;
use uuid::Uuid;

use super::dto::{EditProfileRequest, EditedProfile, PublicUser};
use super::repo_types::ProfileChanges;
use crate::auth::password::hash_password;
use crate::auth::services::{check_email, check_password, normalize_email};
use crate::{error::AppError, state::AppState};

pub const AVATAR_FOLDER: &str = "avatars";

/// A file part pulled out of a multipart upload.
pub struct AvatarFile {
    pub body: Bytes,
    pub content_type: String,
}

pub async fn list_users(state: &AppState) -> Result<Vec<PublicUser>, AppError> {
    let users = state.users.list().await?;
    Ok(users.into_iter().map(PublicUser::from).collect())
}

/// `Some(non-blank)` is a change, `None` is left alone, `Some(blank)` is rejected.
fn optional_field(value: Option<String>, field: &str) -> Result<Option<String>, AppError> {
    match value {
        None => Ok(None),
        Some(v) if v.trim().is_empty() => {
            Err(AppError::Validation(format!("{field} must not be empty")))
        }
        Some(v) => Ok(Some(v)),
    }
}

pub async fn edit_profile(
    state: &AppState,
    user_id: Uuid,
    req: EditProfileRequest,
) -> Result<EditedProfile, AppError> {
    let username = optional_field(req.username, "username")?.map(|u| u.trim().to_string());
    let email = optional_field(req.email, "email")?.map(|e| normalize_email(&e));
    let password = optional_field(req.password, "password")?;

    if username.is_none() && email.is_none() && password.is_none() {
        return Err(AppError::Validation("Nothing to update".into()));
    }
    if let Some(email) = &email {
        check_email(email)?;
    }
    let password_hash = match password {
        Some(p) => {
            check_password(&p)?;
            Some(hash_password(&p)?)
        }
        None => None,
    };

    let user = state
        .users
        .update_profile(
            user_id,
            ProfileChanges {
                username,
                email,
                password_hash,
            },
        )
        .await?
        .ok_or(AppError::UserNotFound)?;

    info!(user_id = %user.id, "profile updated");
    Ok(EditedProfile::from(user))
}

pub async fn upload_avatar(
    state: &AppState,
    user_id: Uuid,
    file: Option<AvatarFile>,
) -> Result<String, AppError> {
    let file = match file {
        Some(f) if !f.body.is_empty() => f,
        _ => return Err(AppError::NoFileProvided),
    };
    if !file.content_type.starts_with("image/") {
        return Err(AppError::Validation("Only image uploads are allowed".into()));
    }

    let url = state
        .storage
        .upload(AVATAR_FOLDER, file.body, &file.content_type)
        .await
        .map_err(AppError::UploadFailed)?;

    state
        .users
        .set_avatar(user_id, &url)
        .await?
        .ok_or(AppError::UserNotFound)?;

    info!(user_id = %user_id, url = %url, "avatar uploaded");
    Ok(url)
}
