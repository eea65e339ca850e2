use axum::{extract::State, Json};

use crate::api::state::AppState;
use crate::db::{User, UserRepository};
use crate::error::AppError;

/// GET /api/users (requires auth) - everyone except the caller
pub async fn list_users(
    State(state): State<AppState>,
    axum::Extension(user_id): axum::Extension<String>,
) -> Result<Json<Vec<User>>, AppError> {
    let users = UserRepository::list_excluding(&state.db, &user_id).await?;

    Ok(Json(users))
}
