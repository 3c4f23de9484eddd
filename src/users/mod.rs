use crate::state::AppState;
use axum::Router;

mod dto;
pub mod handlers;
#[cfg(test)]
pub(crate) mod memory;
pub mod repo;
pub mod repo_types;
pub mod services;

/// Authenticated routes mounted under `/api/users`.
pub fn router(state: AppState) -> Router<AppState> {
    handlers::user_routes(state)
}
