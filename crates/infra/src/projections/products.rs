use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use agriconnect_catalog::{Product, ProductEvent, ProductId, Unit};
use agriconnect_core::UserId;
use agriconnect_events::EventEnvelope;

use crate::projections::cursor::{ProjectionError, StreamCursors};
use crate::read_model::ReadStore;
use crate::services::PRODUCT_AGGREGATE;

/// Queryable product listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductReadModel {
    pub product_id: ProductId,
    pub farmer_id: UserId,
    pub name: String,
    pub price_per_unit: u64,
    pub unit: Unit,
    pub local_stock: u64,
    pub industrial_stock: u64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProductReadModel {
    pub fn from_aggregate(product: &Product) -> Option<Self> {
        Some(Self {
            product_id: product.id_typed(),
            farmer_id: product.farmer_id()?,
            name: product.name().to_string(),
            price_per_unit: product.price_per_unit(),
            unit: product.unit(),
            local_stock: product.local_stock(),
            industrial_stock: product.industrial_stock(),
            is_active: product.is_active(),
            created_at: product.listed_at()?,
            updated_at: product.updated_at()?,
        })
    }

    pub fn total_stock(&self) -> u64 {
        self.local_stock.saturating_add(self.industrial_stock)
    }
}

#[derive(Debug)]
pub struct ProductCatalogProjection<S>
where
    S: ReadStore<ProductId, ProductReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> ProductCatalogProjection<S>
where
    S: ReadStore<ProductId, ProductReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::default(),
        }
    }

    pub fn get(&self, product_id: &ProductId) -> Option<ProductReadModel> {
        self.store.get(product_id)
    }

    /// A farmer's listings, newest first.
    pub fn list_for_farmer(&self, farmer: UserId) -> Vec<ProductReadModel> {
        let mut listings: Vec<_> = self
            .store
            .list()
            .into_iter()
            .filter(|p| p.farmer_id == farmer)
            .collect();
        listings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        listings
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != PRODUCT_AGGREGATE {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();
        if !self.cursors.admit(aggregate_id, seq)? {
            return Ok(());
        }

        let ev: ProductEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        let product_id = match &ev {
            ProductEvent::ProductListed(e) => e.product_id,
            ProductEvent::StockReserved(e) => e.product_id,
            ProductEvent::StockReleased(e) => e.product_id,
            ProductEvent::StockAllocated(e) => e.product_id,
            ProductEvent::ListingRevised(e) => e.product_id,
        };
        if product_id.0 != aggregate_id {
            return Err(ProjectionError::Mismatch(
                "event product_id does not match envelope aggregate_id".to_string(),
            ));
        }

        if let ProductEvent::ProductListed(e) = &ev {
            self.store.upsert(
                e.product_id,
                ProductReadModel {
                    product_id: e.product_id,
                    farmer_id: e.farmer_id,
                    name: e.name.clone(),
                    price_per_unit: e.price_per_unit,
                    unit: e.unit,
                    local_stock: e.local_stock,
                    industrial_stock: e.industrial_stock,
                    is_active: true,
                    created_at: e.occurred_at,
                    updated_at: e.occurred_at,
                },
            );
        } else if let Some(mut rm) = self.store.get(&product_id) {
            match ev {
                ProductEvent::StockReserved(e) => {
                    let pool = pool_mut(&mut rm, e.pool);
                    *pool = pool.saturating_sub(e.quantity);
                    rm.updated_at = e.occurred_at;
                }
                ProductEvent::StockReleased(e) => {
                    let pool = pool_mut(&mut rm, e.pool);
                    *pool = pool.saturating_add(e.quantity);
                    rm.updated_at = e.occurred_at;
                }
                ProductEvent::StockAllocated(e) => {
                    rm.local_stock = e.local_stock;
                    rm.industrial_stock = e.industrial_stock;
                    rm.updated_at = e.occurred_at;
                }
                ProductEvent::ListingRevised(e) => {
                    rm.name = e.name;
                    rm.price_per_unit = e.price_per_unit;
                    rm.unit = e.unit;
                    rm.is_active = e.is_active;
                    rm.updated_at = e.occurred_at;
                }
                ProductEvent::ProductListed(_) => {}
            }
            self.store.upsert(product_id, rm);
        }

        self.cursors.advance(aggregate_id, seq);
        Ok(())
    }
}

fn pool_mut(rm: &mut ProductReadModel, pool: agriconnect_catalog::StockPool) -> &mut u64 {
    match pool {
        agriconnect_catalog::StockPool::Local => &mut rm.local_stock,
        agriconnect_catalog::StockPool::Industrial => &mut rm.industrial_stock,
    }
}
