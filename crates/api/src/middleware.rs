use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use tracing::debug;

use agriconnect_auth::{JwtClaims, JwtValidator};
use agriconnect_infra::users::{InMemoryUserDirectory, UserProfile};

use crate::app::errors;
use crate::context::PrincipalContext;

#[derive(Clone)]
pub struct AuthState {
    pub jwt: Arc<dyn JwtValidator>,
    pub users: Arc<InMemoryUserDirectory>,
}

pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let token = extract_bearer(req.headers()).ok_or_else(unauthorized)?;

    let claims = state.jwt.validate(token, Utc::now()).map_err(|e| {
        debug!(error = %e, "rejecting request");
        unauthorized()
    })?;

    remember_user(&state.users, &claims);
    req.extensions_mut()
        .insert(PrincipalContext::new(claims.sub, claims.role));

    Ok(next.run(req).await)
}

/// Profile claims feed the directory used to address notifications.
fn remember_user(users: &InMemoryUserDirectory, claims: &JwtClaims) {
    let Some(email) = claims.email.as_deref().map(str::trim).filter(|e| !e.is_empty()) else {
        return;
    };
    users.upsert(UserProfile {
        id: claims.sub,
        name: claims.name.clone().unwrap_or_else(|| email.to_string()),
        email: email.to_string(),
        role: claims.role.clone(),
    });
}

fn unauthorized() -> Response {
    errors::json_error(
        StatusCode::UNAUTHORIZED,
        "unauthorized",
        "Missing or invalid bearer token",
    )
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(axum::http::header::AUTHORIZATION)?;
    let token = header.to_str().ok()?.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token)
}
