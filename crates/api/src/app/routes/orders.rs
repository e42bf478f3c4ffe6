use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use tracing::warn;

use agriconnect_auth::Permission;
use agriconnect_infra::notifications::ReceiptDocument;
use agriconnect_orders::OrderId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::authz;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(place_order))
        .route("/my-orders", get(my_orders))
        .route("/farmer-orders", get(farmer_orders))
        .route("/:id", get(get_order))
        .route("/:id/status", patch(change_status))
        .route("/:id/receipt", get(get_receipt))
}

fn parse_order_id(raw: &str) -> Result<OrderId, axum::response::Response> {
    errors::parse_id(raw).map(OrderId::new)
}

pub async fn place_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Json<dto::PlaceOrderRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return errors::invalid_request(rejection.body_text()),
    };
    let request = match body.into_checkout() {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    // Malformed requests are reported before role checks.
    if let Err(e) = request.validate() {
        return errors::checkout_error_to_response(e);
    }
    if let Err(e) = authz::require(&principal, &Permission::ORDERS_PLACE) {
        warn!(user_id = %principal.user_id(), error = %e, "order placement refused");
        return errors::forbidden("Farmers cannot place orders");
    }

    match services.checkout.place_order(&principal.actor(), request) {
        Ok(order) => (StatusCode::CREATED, Json(dto::order_to_json(order))).into_response(),
        Err(e) => errors::checkout_error_to_response(e),
    }
}

pub async fn change_status(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Result<Json<dto::ChangeStatusRequest>, JsonRejection>,
) -> axum::response::Response {
    let order_id = match parse_order_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return errors::invalid_request(rejection.body_text()),
    };

    if authz::require(&principal, &Permission::ORDERS_STATUS_UPDATE).is_err() {
        return errors::forbidden("Only farmers can update order status");
    }

    match services
        .status
        .transition_requested(&principal.actor(), order_id, &body.status)
    {
        Ok(order) => Json(dto::order_to_json(order)).into_response(),
        Err(e) => errors::transition_error_to_response(e),
    }
}

pub async fn get_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let order_id = match parse_order_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    if let Err(e) = authz::require(&principal, &Permission::ORDERS_READ) {
        return errors::forbidden(e.to_string());
    }

    match services.access.get(principal.user_id(), order_id) {
        Ok(order) => Json(dto::order_to_json(order)).into_response(),
        Err(e) => errors::access_error_to_response(e),
    }
}

pub async fn my_orders(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(e) = authz::require(&principal, &Permission::ORDERS_READ) {
        return errors::forbidden(e.to_string());
    }

    let orders = services
        .orders
        .list_for_buyer(principal.user_id())
        .into_iter()
        .map(dto::order_to_json)
        .collect::<Vec<_>>();
    Json(orders).into_response()
}

pub async fn farmer_orders(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if authz::require(&principal, &Permission::ORDERS_FARMER_READ).is_err() {
        return errors::forbidden("Only farmers can view farmer orders");
    }

    let orders = services
        .orders
        .list_for_farmer(principal.user_id())
        .into_iter()
        .map(dto::order_to_json)
        .collect::<Vec<_>>();
    Json(orders).into_response()
}

pub async fn get_receipt(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let order_id = match parse_order_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.access.receipt(principal.user_id(), order_id) {
        Ok(doc) => (
            [
                (header::CONTENT_TYPE, ReceiptDocument::CONTENT_TYPE.to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", doc.file_name),
                ),
            ],
            doc.bytes,
        )
            .into_response(),
        Err(e) => errors::access_error_to_response(e),
    }
}
