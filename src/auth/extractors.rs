use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use tracing::warn;
use uuid::Uuid;

use super::jwt::JwtKeys;
use crate::{error::AppError, state::AppState};

/// Authenticated caller, identified by the `sub` of a verified bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser(pub Uuid);

fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let auth = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".into()))?;

    // Expect "Bearer <token>"
    let (scheme, token) = auth
        .split_once(' ')
        .ok_or_else(|| AppError::Unauthorized("Invalid Authorization header".into()))?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(AppError::Unauthorized("Invalid Authorization header".into()));
    }
    Ok(token)
}

pub fn authenticate(headers: &HeaderMap, keys: &JwtKeys) -> Result<AuthUser, AppError> {
    let token = bearer_token(headers)?;
    let claims = keys.verify(token).map_err(|e| {
        warn!(reason = %e, "bearer token rejected");
        AppError::from(e)
    })?;
    Ok(AuthUser(claims.sub))
}

/// Route layer: rejects unauthenticated requests with 401 and stores
/// `AuthUser` in the request extensions for the handlers behind it.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user = authenticate(req.headers(), &state.jwt)?;
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthUser>() {
            return Ok(*user);
        }
        let keys = JwtKeys::from_ref(state);
        authenticate(&parts.headers, &keys)
    }
}
