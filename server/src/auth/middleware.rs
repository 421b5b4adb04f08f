//! Bearer-token auth middleware: extract the bearer token, validate it,
//! stash the authenticated identity in request extensions. No
//! RBAC/permissions extension, no device id — the auth context here is
//! a single opaque `owner_id`. Every core operation receives an
//! already-authenticated `owner_id`; the core itself never interprets
//! tokens.

use axum::extract::{FromRequestParts, Request, State};
use axum::http::{header, request::Parts, StatusCode};
use axum::middleware::Next;
use axum::response::Response;

use crate::infra::app_state::AppState;

/// Extractor pulling the authenticated user id out of request
/// extensions. Handlers take `AuthUser` as an argument; it only
/// resolves if `auth_middleware` has already run on this route.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub uuid::Uuid);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .copied()
            .ok_or(StatusCode::UNAUTHORIZED)
    }
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = extract_bearer_token(&request)?;
    let claims = state
        .jwt
        .validate_token(&token)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    request.extensions_mut().insert(AuthUser(claims.sub));
    Ok(next.run(request).await)
}

fn extract_bearer_token(request: &Request) -> Result<String, StatusCode> {
    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or(StatusCode::UNAUTHORIZED)?
        .to_str()
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    header_value
        .strip_prefix("Bearer ")
        .map(str::to_string)
        .ok_or(StatusCode::UNAUTHORIZED)
}
