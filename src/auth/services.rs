use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, warn};

use super::dto::{LoginRequest, RegisterRequest, UserSummary};
use super::password::{hash_password, verify_password};
use crate::{error::AppError, state::AppState, users::repo_types::NewUser};

pub(crate) const MIN_PASSWORD_LEN: usize = 6;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Non-blank value of a required field.
pub(crate) fn required<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str, AppError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(AppError::Validation(format!("{field} is required"))),
    }
}

pub(crate) fn check_email(email: &str) -> Result<(), AppError> {
    if is_valid_email(email) {
        Ok(())
    } else {
        Err(AppError::Validation("Invalid email".into()))
    }
}

pub(crate) fn check_password(password: &str) -> Result<(), AppError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

pub async fn register(state: &AppState, req: RegisterRequest) -> Result<UserSummary, AppError> {
    let email = normalize_email(required(&req.email, "email")?);
    let username = required(&req.username, "username")?.to_string();
    // passwords are taken verbatim, only the blank check trims
    required(&req.password, "password")?;
    let password = req.password.as_deref().unwrap_or_default();

    check_email(&email)?;
    check_password(password)?;

    // Fast path; the unique index still decides races.
    if state.users.find_by_email(&email).await?.is_some() {
        warn!(email = %email, "email already registered");
        return Err(AppError::EmailInUse);
    }

    let password_hash = hash_password(password)?;
    let user = state
        .users
        .insert(NewUser {
            username,
            email,
            password_hash,
        })
        .await
        .map_err(|e| {
            let e = AppError::from(e);
            if matches!(e, AppError::EmailInUse) {
                warn!("email registered concurrently");
            }
            e
        })?;

    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok(UserSummary::from(&user))
}

pub async fn login(
    state: &AppState,
    req: LoginRequest,
) -> Result<(String, UserSummary), AppError> {
    let email = normalize_email(required(&req.email, "email")?);
    required(&req.password, "password")?;
    let password = req.password.as_deref().unwrap_or_default();

    let user = state
        .users
        .find_by_email(&email)
        .await?
        .ok_or_else(|| {
            warn!(email = %email, "login unknown email");
            AppError::UserNotFound
        })?;

    if !verify_password(password, &user.password_hash)? {
        warn!(user_id = %user.id, "login invalid password");
        return Err(AppError::InvalidCredentials);
    }

    let token = state.jwt.issue(user.id)?;
    info!(user_id = %user.id, "user logged in");
    Ok((token, UserSummary::from(&user)))
}
