use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use tracing::instrument;

use super::dto::{LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};
use super::services;
use crate::{error::AppError, state::AppState};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RegisterResponse>), AppError> {
    let Json(payload) = payload?;
    let user = services::register(&state, payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "User registered",
            user,
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, AppError> {
    let Json(payload) = payload?;
    let (token, user) = services::login(&state, payload).await?;
    Ok(Json(LoginResponse {
        message: "Login successful",
        token,
        user,
    }))
}
