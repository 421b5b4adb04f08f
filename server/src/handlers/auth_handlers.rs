use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::auth::middleware::AuthUser;
use crate::auth::password::{hash_password, verify_password};
use crate::infra::app_state::AppState;
use crate::infra::errors::{AppError, AppResult};

#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
}

pub async fn issue_token(
    State(state): State<AppState>,
    Json(credentials): Json<Credentials>,
) -> AppResult<Json<TokenResponse>> {
    let users = crate::db::UserRepo::new(state.pg_pool());
    let user = users
        .find_by_username(&credentials.username)
        .await?
        .ok_or_else(|| AppError::unauthorized("invalid username or password"))?;

    let valid = verify_password(&credentials.password, &user.password_hash)
        .map_err(|_| AppError::internal("password verification failed"))?;
    if !valid {
        return Err(AppError::unauthorized("invalid username or password"));
    }

    let access_token = state
        .jwt
        .issue_token(user.id)
        .map_err(|e| AppError::internal(format!("failed to sign token: {e}")))?;

    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer",
    }))
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: uuid::Uuid,
    pub username: String,
}

pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> AppResult<Json<UserResponse>> {
    if request.username.trim().is_empty() || request.password.len() < 8 {
        return Err(AppError::bad_request(
            "username must be non-empty and password must be at least 8 characters",
        ));
    }

    let users = crate::db::UserRepo::new(state.pg_pool());
    if users.find_by_username(&request.username).await?.is_some() {
        return Err(AppError::bad_request("username already taken"));
    }

    let password_hash =
        hash_password(&request.password).map_err(|_| AppError::internal("failed to hash password"))?;
    let id = users.create(&request.username, &password_hash).await?;

    Ok(Json(UserResponse {
        id,
        username: request.username,
    }))
}

pub async fn me(State(state): State<AppState>, AuthUser(user_id): AuthUser) -> AppResult<Json<UserResponse>> {
    let users = crate::db::UserRepo::new(state.pg_pool());
    let user = users
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))?;
    Ok(Json(UserResponse {
        id: user.id,
        username: user.username,
    }))
}
