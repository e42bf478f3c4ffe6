use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use agriconnect_core::AggregateId;
use agriconnect_infra::services::{AccessError, CatalogError, CheckoutError, TransitionError};

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn invalid_request(message: impl Into<String>) -> Response {
    json_error(StatusCode::BAD_REQUEST, "invalid_request", message)
}

pub fn forbidden(message: impl Into<String>) -> Response {
    json_error(StatusCode::FORBIDDEN, "forbidden", message)
}

fn internal(detail: String) -> Response {
    error!(error = %detail, "request failed");
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        "Internal server error",
    )
}

pub fn parse_id(raw: &str) -> Result<AggregateId, Response> {
    raw.trim()
        .parse()
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid id: {raw}")))
}

pub fn checkout_error_to_response(err: CheckoutError) -> Response {
    match err {
        CheckoutError::InvalidRequest(msg) => invalid_request(msg),
        CheckoutError::Forbidden(msg) => forbidden(msg),
        e @ CheckoutError::ProductNotFound(_) => {
            json_error(StatusCode::NOT_FOUND, "product_not_found", e.to_string())
        }
        e @ CheckoutError::InsufficientStock { .. } => {
            json_error(StatusCode::BAD_REQUEST, "insufficient_stock", e.to_string())
        }
        CheckoutError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        CheckoutError::Persistence(msg) => internal(msg),
    }
}

pub fn transition_error_to_response(err: TransitionError) -> Response {
    match err {
        TransitionError::Forbidden(msg) => forbidden(msg),
        e @ TransitionError::OrderNotFound(_) => {
            json_error(StatusCode::NOT_FOUND, "order_not_found", e.to_string())
        }
        e @ TransitionError::InvalidTransition { .. } => {
            json_error(StatusCode::BAD_REQUEST, "invalid_transition", e.to_string())
        }
        TransitionError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        TransitionError::Persistence(msg) => internal(msg),
    }
}

pub fn access_error_to_response(err: AccessError) -> Response {
    match err {
        e @ AccessError::OrderNotFound(_) => {
            json_error(StatusCode::NOT_FOUND, "order_not_found", e.to_string())
        }
        e @ AccessError::Forbidden => forbidden(e.to_string()),
        e @ AccessError::NotDelivered => invalid_request(e.to_string()),
        AccessError::Persistence(msg) => internal(msg),
        e @ AccessError::Receipt(_) => internal(e.to_string()),
    }
}

pub fn catalog_error_to_response(err: CatalogError) -> Response {
    match err {
        CatalogError::InvalidRequest(msg) => invalid_request(msg),
        CatalogError::Forbidden(msg) => forbidden(msg),
        e @ CatalogError::ProductNotFound(_) => {
            json_error(StatusCode::NOT_FOUND, "product_not_found", e.to_string())
        }
        CatalogError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        CatalogError::Persistence(msg) => internal(msg),
    }
}
