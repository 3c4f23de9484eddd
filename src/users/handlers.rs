use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, State},
    middleware,
    routing::{get, post, put},
    Json, Router,
};
use tracing::{instrument, warn};

use super::dto::{AvatarResponse, EditProfileRequest, EditProfileResponse, PublicUser};
use super::services::{self, AvatarFile};
use crate::{
    auth::extractors::{require_auth, AuthUser},
    error::AppError,
    state::AppState,
};

const AVATAR_MAX_BYTES: usize = 5 * 1024 * 1024;

/// Routes mounted under `/api/users`; every one of them requires a bearer token.
pub fn user_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(list_users))
        .route(
            "/avatar",
            post(upload_avatar).layer(DefaultBodyLimit::max(AVATAR_MAX_BYTES)),
        )
        .route("/edit", put(edit_profile))
        .route_layer(middleware::from_fn_with_state(state, require_auth))
}

#[instrument(skip(state))]
pub async fn list_users(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
) -> Result<Json<Vec<PublicUser>>, AppError> {
    Ok(Json(services::list_users(&state).await?))
}

#[instrument(skip(state, payload))]
pub async fn edit_profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    payload: Result<Json<EditProfileRequest>, JsonRejection>,
) -> Result<Json<EditProfileResponse>, AppError> {
    let Json(payload) = payload?;
    let data = services::edit_profile(&state, user_id, payload).await?;
    Ok(Json(EditProfileResponse {
        message: "User Edit Success",
        data,
    }))
}

/// POST /api/users/avatar, multipart field `file`.
#[instrument(skip(state, mp))]
pub async fn upload_avatar(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    mut mp: Multipart,
) -> Result<Json<AvatarResponse>, AppError> {
    let mut file = None;
    while let Some(field) = mp.next_field().await.map_err(|e| {
        warn!(error = %e, "unreadable multipart body");
        AppError::Validation(e.body_text())
    })? {
        if field.name() != Some("file") {
            continue;
        }
        let content_type = field
            .content_type()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "application/octet-stream".into());
        let body = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(e.body_text()))?;
        file = Some(AvatarFile { body, content_type });
        break;
    }

    let url = services::upload_avatar(&state, user_id, file).await?;
    Ok(Json(AvatarResponse {
        message: "Avatar uploaded",
        url,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::{memory::MemoryUserStore, repo_types::NewUser};
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn app(state: AppState) -> Router {
        Router::new()
            .nest("/api/users", user_routes(state.clone()))
            .with_state(state)
    }

    async fn seeded() -> (AppState, Uuid, Uuid) {
        let state = AppState::fake();
        let mut ids = Vec::new();
        for (email, name) in [("a@x.com", "alice"), ("b@x.com", "bob")] {
            let u = state
                .users
                .insert(NewUser {
                    username: name.into(),
                    email: email.into(),
                    password_hash: crate::auth::password::hash_password("secret1").unwrap(),
                })
                .await
                .unwrap();
            ids.push(u.id);
        }
        (state, ids[0], ids[1])
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
        let res = app.oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn bearer(state: &AppState, id: Uuid) -> String {
        format!("Bearer {}", state.jwt.issue(id).unwrap())
    }

    fn multipart(field: &str, content_type: &str, data: &[u8]) -> (String, Vec<u8>) {
        let boundary = "X-USERMANAGER-BOUNDARY";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"a.png\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
        (format!("multipart/form-data; boundary={boundary}"), body)
    }

    #[tokio::test]
    async fn list_requires_token() {
        let (state, _, _) = seeded().await;
        let (status, body) = send(
            app(state),
            Request::get("/api/users").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Missing Authorization header");
    }

    #[tokio::test]
    async fn list_returns_public_fields_only() {
        let (state, alice, _) = seeded().await;
        let (status, body) = send(
            app(state.clone()),
            Request::get("/api/users")
                .header(header::AUTHORIZATION, bearer(&state, alice))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let rows = body.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["username"], "alice");
        assert_eq!(rows[0]["role"], "user");
        assert!(rows[0]["avatarUrl"].is_null());
        assert!(!body.to_string().contains("password"));
        assert!(!body.to_string().contains("argon2"));
    }

    #[tokio::test]
    async fn edit_conflicting_email_is_400() {
        let (state, alice, _) = seeded().await;
        let (status, body) = send(
            app(state.clone()),
            Request::put("/api/users/edit")
                .header(header::AUTHORIZATION, bearer(&state, alice))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({"email": "b@x.com"}).to_string()))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Email already in use");

        let stored = state.users.find_by_id(alice).await.unwrap().unwrap();
        assert_eq!(stored.email, "a@x.com");
    }

    #[tokio::test]
    async fn edit_returns_updated_fields() {
        let (state, alice, _) = seeded().await;
        let (status, body) = send(
            app(state.clone()),
            Request::put("/api/users/edit")
                .header(header::AUTHORIZATION, bearer(&state, alice))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({"username": "alice_new"}).to_string()))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "User Edit Success");
        assert_eq!(body["data"]["id"], alice.to_string());
        assert_eq!(body["data"]["username"], "alice_new");
        assert_eq!(body["data"]["email"], "a@x.com");
        assert!(body["data"]["updatedAt"].is_string());
        assert!(body["data"].get("password").is_none());
    }

    #[tokio::test]
    async fn avatar_upload_roundtrip() {
        let (state, alice, _) = seeded().await;
        let (ct, bytes) = multipart("file", "image/png", b"\x89PNG\r\n\x1a\n");
        let (status, body) = send(
            app(state.clone()),
            Request::post("/api/users/avatar")
                .header(header::AUTHORIZATION, bearer(&state, alice))
                .header(header::CONTENT_TYPE, ct)
                .body(Body::from(bytes))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Avatar uploaded");
        let url = body["url"].as_str().unwrap();

        let stored = state.users.find_by_id(alice).await.unwrap().unwrap();
        assert_eq!(stored.avatar_url.as_deref(), Some(url));
    }

    #[tokio::test]
    async fn avatar_without_file_field_is_400() {
        let (state, alice, _) = seeded().await;
        let (ct, bytes) = multipart("picture", "image/png", b"\x89PNG");
        let (status, body) = send(
            app(state.clone()),
            Request::post("/api/users/avatar")
                .header(header::AUTHORIZATION, bearer(&state, alice))
                .header(header::CONTENT_TYPE, ct)
                .body(Body::from(bytes))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "No file uploaded");
    }

    #[tokio::test]
    async fn token_for_vanished_user_cannot_edit() {
        let state = AppState::from_parts(
            Arc::new(MemoryUserStore::default()),
            Arc::new(crate::storage::fake::FakeMediaStore),
            AppState::fake().config,
        );
        let (status, _) = send(
            app(state.clone()),
            Request::put("/api/users/edit")
                .header(header::AUTHORIZATION, bearer(&state, Uuid::new_v4()))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({"username": "ghost"}).to_string()))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
