//! Stock Ledger: atomic decrement-if-sufficient and increment on one product
//! pool.
//!
//! Every operation is a command against the product's own stream, so calls on
//! the same product are linearized by the dispatcher and calls on different
//! products never contend.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as JsonValue;
use thiserror::Error;

use agriconnect_catalog::{Product, ProductCommand, ProductId, ReleaseStock, ReserveStock, StockPool};
use agriconnect_core::DomainError;
use agriconnect_events::{EventBus, EventEnvelope};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;

use super::PRODUCT_AGGREGATE;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("quantity must be at least 1")]
    InvalidQuantity,

    #[error("product {0} not found")]
    ProductNotFound(ProductId),

    #[error("Insufficient {pool} stock for {product}. Available: {available}")]
    InsufficientStock {
        product_id: ProductId,
        product: String,
        pool: StockPool,
        available: u64,
        requested: u64,
    },

    #[error(transparent)]
    Dispatch(DispatchError),
}

/// A committed reservation and the product state right after it.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub product: Product,
    pub pool: StockPool,
    pub quantity: u64,
}

impl Reservation {
    /// Pool level after the decrement.
    pub fn balance(&self) -> u64 {
        self.product.stock(self.pool)
    }
}

#[derive(Debug)]
pub struct StockLedger<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
}

impl<S, B> Clone for StockLedger<S, B> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl<S, B> StockLedger<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(dispatcher: Arc<CommandDispatcher<S, B>>) -> Self {
        Self { dispatcher }
    }

    pub fn reserve(
        &self,
        product_id: ProductId,
        pool: StockPool,
        quantity: u64,
    ) -> Result<Reservation, LedgerError> {
        if quantity == 0 {
            return Err(LedgerError::InvalidQuantity);
        }

        let command = ProductCommand::ReserveStock(ReserveStock {
            product_id,
            pool,
            quantity,
            occurred_at: Utc::now(),
        });

        let committed = self
            .dispatcher
            .dispatch(product_id.0, PRODUCT_AGGREGATE, command, |id| {
                Product::empty(ProductId::new(id))
            })
            .map_err(|e| map_dispatch(product_id, pool, e))?;

        Ok(Reservation {
            product: committed.aggregate,
            pool,
            quantity,
        })
    }

    /// Return `quantity` to `pool`; yields the new pool level.
    pub fn release(
        &self,
        product_id: ProductId,
        pool: StockPool,
        quantity: u64,
    ) -> Result<u64, LedgerError> {
        if quantity == 0 {
            return Err(LedgerError::InvalidQuantity);
        }

        let command = ProductCommand::ReleaseStock(ReleaseStock {
            product_id,
            pool,
            quantity,
            occurred_at: Utc::now(),
        });

        let committed = self
            .dispatcher
            .dispatch(product_id.0, PRODUCT_AGGREGATE, command, |id| {
                Product::empty(ProductId::new(id))
            })
            .map_err(|e| map_dispatch(product_id, pool, e))?;

        Ok(committed.aggregate.stock(pool))
    }
}

fn map_dispatch(product_id: ProductId, pool: StockPool, err: DispatchError) -> LedgerError {
    match err {
        DispatchError::Domain(DomainError::NotFound) => LedgerError::ProductNotFound(product_id),
        DispatchError::Domain(DomainError::InsufficientStock {
            product,
            available,
            requested,
            ..
        }) => LedgerError::InsufficientStock {
            product_id,
            product,
            pool,
            available,
            requested,
        },
        DispatchError::Domain(DomainError::Validation(_)) => LedgerError::InvalidQuantity,
        other => LedgerError::Dispatch(other),
    }
}

#[cfg(test)]
mod tests {
    use agriconnect_catalog::{ListProduct, Unit};
    use agriconnect_core::{AggregateId, UserId};
    use agriconnect_events::InMemoryEventBus;

    use super::*;
    use crate::event_store::InMemoryEventStore;

    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

    fn ledger_with_product(local: u64, industrial: u64) -> (StockLedger<InMemoryEventStore, Bus>, ProductId) {
        let dispatcher = Arc::new(CommandDispatcher::new(InMemoryEventStore::new(), Bus::default()));
        let id = ProductId::new(AggregateId::new());
        dispatcher
            .dispatch(
                id.0,
                PRODUCT_AGGREGATE,
                ProductCommand::ListProduct(ListProduct {
                    product_id: id,
                    farmer_id: UserId::new(),
                    name: "Onions".to_string(),
                    price_per_unit: 25,
                    unit: Unit::Kg,
                    local_stock: local,
                    industrial_stock: industrial,
                    occurred_at: Utc::now(),
                }),
                |a| Product::empty(ProductId::new(a)),
            )
            .unwrap();
        (StockLedger::new(dispatcher), id)
    }

    #[test]
    fn reserve_returns_new_balance_and_snapshot() {
        let (ledger, id) = ledger_with_product(5, 0);

        let r = ledger.reserve(id, StockPool::Local, 3).unwrap();
        assert_eq!(r.balance(), 2);
        assert_eq!(r.product.name(), "Onions");
        assert_eq!(r.product.price_per_unit(), 25);
    }

    #[test]
    fn insufficient_pool_fails_without_side_effects() {
        let (ledger, id) = ledger_with_product(2, 100);

        let err = ledger.reserve(id, StockPool::Local, 3).unwrap_err();
        match err {
            LedgerError::InsufficientStock {
                product, available, pool, ..
            } => {
                assert_eq!(product, "Onions");
                assert_eq!(available, 2);
                assert_eq!(pool, StockPool::Local);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(ledger.release(id, StockPool::Local, 1).unwrap(), 3);
    }

    #[test]
    fn zero_quantity_is_rejected() {
        let (ledger, id) = ledger_with_product(2, 0);
        assert!(matches!(ledger.reserve(id, StockPool::Local, 0), Err(LedgerError::InvalidQuantity)));
        assert!(matches!(ledger.release(id, StockPool::Local, 0), Err(LedgerError::InvalidQuantity)));
    }

    #[test]
    fn unknown_product_is_not_found() {
        let (ledger, _) = ledger_with_product(1, 0);
        let missing = ProductId::new(AggregateId::new());
        assert!(matches!(
            ledger.reserve(missing, StockPool::Local, 1),
            Err(LedgerError::ProductNotFound(id)) if id == missing
        ));
    }
}
