//! Farmer-facing catalog operations: listing products, setting pool levels and
//! revising listing details.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{info, instrument, warn};

use agriconnect_catalog::{
    AllocateStock, ListProduct, Product, ProductCommand, ProductId, ReviseListing, Unit,
};
use agriconnect_core::{AggregateId, DomainError};
use agriconnect_events::{EventBus, EventEnvelope};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;
use crate::projections::ProductReadModel;

use super::{Actor, PRODUCT_AGGREGATE};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("product {0} not found")]
    ProductNotFound(ProductId),

    #[error("{0}")]
    Conflict(String),

    #[error("catalog persistence failed: {0}")]
    Persistence(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewListing {
    pub name: String,
    pub price_per_unit: u64,
    pub unit: Unit,
    pub local_stock: u64,
    pub industrial_stock: u64,
}

/// Absolute pool levels; `None` keeps the current level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StockLevels {
    pub local_stock: Option<u64>,
    pub industrial_stock: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListingRevision {
    pub name: Option<String>,
    pub price_per_unit: Option<u64>,
    pub unit: Option<Unit>,
    pub is_active: Option<bool>,
}

#[derive(Debug)]
pub struct CatalogService<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
}

impl<S, B> CatalogService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(dispatcher: Arc<CommandDispatcher<S, B>>) -> Self {
        Self { dispatcher }
    }

    #[instrument(skip(self, listing), fields(farmer = %farmer.user_id))]
    pub fn list_product(
        &self,
        farmer: &Actor,
        listing: NewListing,
    ) -> Result<ProductReadModel, CatalogError> {
        if !farmer.role.is_farmer() {
            return Err(CatalogError::Forbidden("Only farmers can list products".to_string()));
        }

        let product_id = ProductId::new(AggregateId::new());
        let command = ProductCommand::ListProduct(ListProduct {
            product_id,
            farmer_id: farmer.user_id,
            name: listing.name,
            price_per_unit: listing.price_per_unit,
            unit: listing.unit,
            local_stock: listing.local_stock,
            industrial_stock: listing.industrial_stock,
            occurred_at: Utc::now(),
        });

        let product = self.run(product_id, command)?;
        info!(%product_id, "product listed");
        Ok(product)
    }

    pub fn get_product(&self, product_id: ProductId) -> Result<ProductReadModel, CatalogError> {
        let product: Product = self
            .dispatcher
            .load(product_id.0, PRODUCT_AGGREGATE, |id| Product::empty(ProductId::new(id)))
            .map_err(|e| map_dispatch(product_id, e))?;

        ProductReadModel::from_aggregate(&product).ok_or(CatalogError::ProductNotFound(product_id))
    }

    #[instrument(skip(self), fields(farmer = %farmer.user_id, product_id = %product_id))]
    pub fn allocate_stock(
        &self,
        farmer: &Actor,
        product_id: ProductId,
        levels: StockLevels,
    ) -> Result<ProductReadModel, CatalogError> {
        if !farmer.role.is_farmer() {
            return Err(CatalogError::Forbidden("Only farmers can manage stock".to_string()));
        }

        let command = ProductCommand::AllocateStock(AllocateStock {
            product_id,
            actor: farmer.user_id,
            local_stock: levels.local_stock,
            industrial_stock: levels.industrial_stock,
            occurred_at: Utc::now(),
        });

        let product = self.run(product_id, command)?;
        info!(
            local_stock = product.local_stock,
            industrial_stock = product.industrial_stock,
            "stock allocated"
        );
        Ok(product)
    }

    #[instrument(skip(self, revision), fields(farmer = %farmer.user_id, product_id = %product_id))]
    pub fn revise_listing(
        &self,
        farmer: &Actor,
        product_id: ProductId,
        revision: ListingRevision,
    ) -> Result<ProductReadModel, CatalogError> {
        if !farmer.role.is_farmer() {
            return Err(CatalogError::Forbidden("Only farmers can edit products".to_string()));
        }

        let command = ProductCommand::ReviseListing(ReviseListing {
            product_id,
            actor: farmer.user_id,
            name: revision.name,
            price_per_unit: revision.price_per_unit,
            unit: revision.unit,
            is_active: revision.is_active,
            occurred_at: Utc::now(),
        });

        let product = self.run(product_id, command)?;
        info!("listing revised");
        Ok(product)
    }

    fn run(&self, product_id: ProductId, command: ProductCommand) -> Result<ProductReadModel, CatalogError> {
        let committed = self
            .dispatcher
            .dispatch(product_id.0, PRODUCT_AGGREGATE, command, |id| {
                Product::empty(ProductId::new(id))
            })
            .map_err(|e| {
                let err = map_dispatch(product_id, e);
                warn!(error = %err, "catalog command rejected");
                err
            })?;

        ProductReadModel::from_aggregate(&committed.aggregate)
            .ok_or(CatalogError::ProductNotFound(product_id))
    }
}

fn map_dispatch(product_id: ProductId, err: DispatchError) -> CatalogError {
    match err {
        DispatchError::Domain(DomainError::NotFound) => CatalogError::ProductNotFound(product_id),
        DispatchError::Domain(DomainError::Unauthorized) => {
            CatalogError::Forbidden("Not authorized to manage this product".to_string())
        }
        DispatchError::Domain(DomainError::Validation(msg)) => CatalogError::InvalidRequest(msg),
        DispatchError::Domain(DomainError::Conflict(msg)) => CatalogError::Conflict(msg),
        DispatchError::Conflict { .. } => {
            CatalogError::Conflict("Product is being updated concurrently; try again".to_string())
        }
        other => CatalogError::Persistence(other.to_string()),
    }
}
