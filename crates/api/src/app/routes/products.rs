use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};

use agriconnect_auth::Permission;
use agriconnect_catalog::ProductId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::authz;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_product))
        .route("/mine", get(my_products))
        .route("/:id", get(get_product).patch(revise_product))
        .route("/:id/stock", patch(update_stock))
}

fn parse_product_id(raw: &str) -> Result<ProductId, axum::response::Response> {
    errors::parse_id(raw).map(ProductId::new)
}

fn require_manage(principal: &PrincipalContext) -> Result<(), axum::response::Response> {
    authz::require(principal, &Permission::CATALOG_MANAGE)
        .map_err(|_| errors::forbidden("Only farmers can manage products"))
}

pub async fn create_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Json<dto::CreateProductRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return errors::invalid_request(rejection.body_text()),
    };
    if let Err(resp) = require_manage(&principal) {
        return resp;
    }

    match services.catalog.list_product(&principal.actor(), body.into()) {
        Ok(product) => (StatusCode::CREATED, Json(dto::product_to_json(product))).into_response(),
        Err(e) => errors::catalog_error_to_response(e),
    }
}

pub async fn get_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let product_id = match parse_product_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    if let Err(e) = authz::require(&principal, &Permission::CATALOG_READ) {
        return errors::forbidden(e.to_string());
    }

    match services.catalog.get_product(product_id) {
        Ok(product) => Json(dto::product_to_json(product)).into_response(),
        Err(e) => errors::catalog_error_to_response(e),
    }
}

pub async fn my_products(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(resp) = require_manage(&principal) {
        return resp;
    }

    let products = services
        .products
        .list_for_farmer(principal.user_id())
        .into_iter()
        .map(dto::product_to_json)
        .collect::<Vec<_>>();
    Json(products).into_response()
}

pub async fn update_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Result<Json<dto::UpdateStockRequest>, JsonRejection>,
) -> axum::response::Response {
    let product_id = match parse_product_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return errors::invalid_request(rejection.body_text()),
    };
    if let Err(resp) = require_manage(&principal) {
        return resp;
    }

    match services
        .catalog
        .allocate_stock(&principal.actor(), product_id, body.into())
    {
        Ok(product) => Json(dto::product_to_json(product)).into_response(),
        Err(e) => errors::catalog_error_to_response(e),
    }
}

pub async fn revise_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Result<Json<dto::ReviseProductRequest>, JsonRejection>,
) -> axum::response::Response {
    let product_id = match parse_product_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return errors::invalid_request(rejection.body_text()),
    };
    if let Err(resp) = require_manage(&principal) {
        return resp;
    }

    match services
        .catalog
        .revise_listing(&principal.actor(), product_id, body.into())
    {
        Ok(product) => Json(dto::product_to_json(product)).into_response(),
        Err(e) => errors::catalog_error_to_response(e),
    }
}
