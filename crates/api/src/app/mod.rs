//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: event store/bus, dispatcher, projections, bus workers
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::io;
use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use agriconnect_auth::Hs256JwtValidator;

use crate::config::ApiConfig;
use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router with default settings and the given secret.
pub fn build_app(jwt_secret: String) -> io::Result<Router> {
    build_app_with(&ApiConfig {
        jwt_secret,
        ..ApiConfig::default()
    })
}

pub fn build_app_with(config: &ApiConfig) -> io::Result<Router> {
    let services = Arc::new(services::build_services(config)?);
    let auth_state = middleware::AuthState {
        jwt: Arc::new(Hs256JwtValidator::new(config.jwt_secret.as_bytes())),
        users: services.users.clone(),
    };

    // Protected routes: require a valid bearer token.
    let protected = routes::router()
        .layer(Extension(services))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ));

    Ok(Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(ServiceBuilder::new()))
}
