use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::api::state::AppState;
use crate::crypto::{generate_salt, hash_password, verify_password};
use crate::db::{SessionRepository, User, UserRepository};
use crate::error::AppError;

const MIN_PASSWORD_LEN: usize = 8;
const MAX_EMAIL_LEN: usize = 254;
const MAX_DISPLAY_NAME_LEN: usize = 64;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub display_name: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub session_token: String,
    pub expires_at: i64,
    pub user_id: String,
}

/// Validate and normalize an email address
fn validate_email(email: &str) -> Result<String, AppError> {
    let normalized = email.trim().to_lowercase();

    if normalized.is_empty() || normalized.len() > MAX_EMAIL_LEN {
        return Err(AppError::InvalidContent(format!(
            "Email must be 1-{} characters",
            MAX_EMAIL_LEN
        )));
    }

    match normalized.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(normalized),
        _ => Err(AppError::InvalidContent(
            "Email must look like name@domain".to_string(),
        )),
    }
}

/// Validate and trim a display name
fn validate_display_name(display_name: &str) -> Result<String, AppError> {
    let trimmed = display_name.trim();

    if trimmed.is_empty() || trimmed.len() > MAX_DISPLAY_NAME_LEN {
        return Err(AppError::InvalidContent(format!(
            "Display name must be 1-{} characters",
            MAX_DISPLAY_NAME_LEN
        )));
    }

    Ok(trimmed.to_string())
}

/// POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, AppError> {
    let email = validate_email(&req.email)?;
    let display_name = validate_display_name(&req.display_name)?;

    if req.password.len() < MIN_PASSWORD_LEN {
        return Err(AppError::InvalidContent(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    // Generate salt and hash password
    let salt = generate_salt();
    let password_hash = hash_password(&req.password, &salt)?;

    // Create the profile; a duplicate email surfaces as Conflict
    let user = UserRepository::create(&state.db, &email, &display_name, &password_hash, &salt)
        .await?;

    Ok(Json(RegisterResponse { user_id: user.id }))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let email = validate_email(&req.email)?;

    let user = UserRepository::get_by_email(&state.db, &email)
        .await?
        .ok_or_else(|| AppError::Unauthenticated("Invalid credentials".to_string()))?;

    let stored_hash: [u8; 32] = user
        .password_hash
        .clone()
        .try_into()
        .map_err(|_| AppError::Internal("Invalid stored hash".to_string()))?;

    if !verify_password(&req.password, &stored_hash, &user.password_salt)? {
        return Err(AppError::Unauthenticated("Invalid credentials".to_string()));
    }

    // Create session, then flip the user online
    let session =
        SessionRepository::create(&state.db, &user.id, state.config.session_expiry_hours).await?;

    let last_seen = UserRepository::set_online_status(&state.db, &user.id, true).await?;
    state.subscriptions.publish_presence(&user.id, true, last_seen);

    Ok(Json(LoginResponse {
        session_token: session.token,
        expires_at: session.expires_at,
        user_id: user.id,
    }))
}

/// POST /api/auth/logout (requires auth)
pub async fn logout(
    State(state): State<AppState>,
    axum::Extension(user_id): axum::Extension<String>,
    headers: axum::http::HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    let auth_header = headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::Unauthenticated("Missing Authorization header".to_string()))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Unauthenticated("Invalid Authorization format".to_string()))?;

    SessionRepository::delete(&state.db, token).await?;

    let last_seen = UserRepository::set_online_status(&state.db, &user_id, false).await?;
    state.subscriptions.publish_presence(&user_id, false, last_seen);

    Ok(Json(serde_json::json!({"success": true})))
}

/// GET /api/auth/me (requires auth via middleware)
pub async fn me(
    State(state): State<AppState>,
    axum::Extension(user_id): axum::Extension<String>,
) -> Result<Json<User>, AppError> {
    let user = UserRepository::get_by_id(&state.db, &user_id)
        .await?
        .ok_or_else(|| AppError::Internal("User not found".to_string()))?;

    Ok(Json(user))
}
