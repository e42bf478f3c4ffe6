//! Checkout: turns a buyer's cart into a placed order.
//!
//! Items are reserved one by one in request order. The first failure releases
//! every reservation already made for the request, so a failed checkout leaves
//! all pools exactly as they were. Once the order is persisted the pools
//! reflect it; a persistence failure also releases everything.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use agriconnect_catalog::{ProductId, StockPool, pool_for};
use agriconnect_core::{AggregateId, DomainError};
use agriconnect_events::{EventBus, EventEnvelope};
use agriconnect_orders::{
    Order, OrderCommand, OrderId, OrderItem, PaymentMethod, PlaceOrder, ShippingAddress,
    validate_notes,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;
use crate::projections::OrderReadModel;

use super::stock_ledger::{LedgerError, StockLedger};
use super::{Actor, ORDER_AGGREGATE};

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("product {0} not found")]
    ProductNotFound(ProductId),

    #[error("Insufficient {pool} stock for {product}. Available: {available}")]
    InsufficientStock {
        product_id: ProductId,
        product: String,
        pool: StockPool,
        available: u64,
    },

    #[error("{0}")]
    Conflict(String),

    #[error("failed to persist order: {0}")]
    Persistence(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineRequest {
    pub product_id: ProductId,
    /// Signed so that zero and negative quantities from the wire are rejected
    /// here rather than lost in a conversion.
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRequest {
    pub items: Vec<LineRequest>,
    pub shipping_address: Option<ShippingAddress>,
    pub payment_method: Option<PaymentMethod>,
    pub notes: Option<String>,
}

impl CheckoutRequest {
    /// Shape checks only (items, quantities, address, notes); no stock or role.
    pub fn validate(&self) -> Result<(), CheckoutError> {
        validate_request(self).map(|_| ())
    }
}

#[derive(Debug, Clone, Copy)]
struct Reserved {
    product_id: ProductId,
    pool: StockPool,
    quantity: u64,
}

#[derive(Debug)]
pub struct CheckoutService<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    ledger: StockLedger<S, B>,
}

impl<S, B> CheckoutService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(dispatcher: Arc<CommandDispatcher<S, B>>) -> Self {
        Self {
            ledger: StockLedger::new(dispatcher.clone()),
            dispatcher,
        }
    }

    #[instrument(skip(self, request), fields(buyer = %buyer.user_id, items = request.items.len()))]
    pub fn place_order(
        &self,
        buyer: &Actor,
        request: CheckoutRequest,
    ) -> Result<OrderReadModel, CheckoutError> {
        let (lines, shipping_address) = validate_request(&request).inspect_err(|e| {
            warn!(error = %e, "checkout rejected");
        })?;

        if buyer.role.is_farmer() {
            warn!("farmer attempted checkout");
            return Err(CheckoutError::Forbidden("Farmers cannot place orders".to_string()));
        }

        let pool = pool_for(&buyer.role);
        let mut reserved: Vec<Reserved> = Vec::with_capacity(lines.len());
        let mut items: Vec<OrderItem> = Vec::with_capacity(lines.len());

        for (product_id, quantity) in lines {
            let reservation = match self.ledger.reserve(product_id, pool, quantity) {
                Ok(r) => r,
                Err(e) => {
                    self.compensate(&reserved);
                    let err = map_ledger(e);
                    warn!(error = %err, %product_id, "checkout failed during reservation");
                    return Err(err);
                }
            };
            reserved.push(Reserved {
                product_id,
                pool,
                quantity,
            });

            let product = &reservation.product;
            let snapshot = product
                .farmer_id()
                .ok_or_else(|| DomainError::invariant("listed product without farmer"))
                .and_then(|farmer_id| {
                    OrderItem::snapshot(
                        product_id,
                        product.name(),
                        farmer_id,
                        product.price_per_unit(),
                        product.unit(),
                        pool,
                        quantity,
                    )
                });
            match snapshot {
                Ok(item) => items.push(item),
                Err(e) => {
                    self.compensate(&reserved);
                    return Err(CheckoutError::InvalidRequest(domain_message(&e)));
                }
            }
        }

        let order_id = OrderId::new(AggregateId::new());
        let command = OrderCommand::PlaceOrder(PlaceOrder {
            order_id,
            buyer_id: buyer.user_id,
            items,
            shipping_address,
            payment_method: request.payment_method.unwrap_or_default(),
            notes: request.notes,
            occurred_at: Utc::now(),
        });

        let committed = match self.dispatcher.dispatch(order_id.0, ORDER_AGGREGATE, command, |id| {
            Order::empty(OrderId::new(id))
        }) {
            Ok(c) => c,
            Err(e) => {
                self.compensate(&reserved);
                error!(%order_id, error = %e, "order persistence failed; reservations released");
                return Err(map_persist(e));
            }
        };

        let order = OrderReadModel::from_aggregate(&committed.aggregate).ok_or_else(|| {
            CheckoutError::Persistence("committed order has no placement data".to_string())
        })?;

        info!(
            %order_id,
            total_amount = order.total_amount,
            pool = %pool,
            "order placed"
        );
        Ok(order)
    }

    /// Release reservations in reverse order. A release that fails here leaves
    /// stock withheld; it is logged for manual correction.
    fn compensate(&self, reserved: &[Reserved]) {
        for r in reserved.iter().rev() {
            if let Err(e) = self.ledger.release(r.product_id, r.pool, r.quantity) {
                error!(
                    product_id = %r.product_id,
                    pool = %r.pool,
                    quantity = r.quantity,
                    error = %e,
                    "compensating release failed"
                );
            }
        }
    }
}

fn validate_request(
    request: &CheckoutRequest,
) -> Result<(Vec<(ProductId, u64)>, ShippingAddress), CheckoutError> {
    if request.items.is_empty() {
        return Err(CheckoutError::InvalidRequest(
            "Order must have at least one item".to_string(),
        ));
    }

    let mut lines = Vec::with_capacity(request.items.len());
    for line in &request.items {
        if line.quantity < 1 {
            return Err(CheckoutError::InvalidRequest(
                "Quantity must be at least 1".to_string(),
            ));
        }
        lines.push((line.product_id, line.quantity as u64));
    }

    let address = request
        .shipping_address
        .clone()
        .ok_or_else(|| CheckoutError::InvalidRequest("Shipping address is required".to_string()))?;
    address
        .validate()
        .map_err(|e| CheckoutError::InvalidRequest(domain_message(&e)))?;

    validate_notes(request.notes.as_deref())
        .map_err(|e| CheckoutError::InvalidRequest(domain_message(&e)))?;

    Ok((lines, address))
}

fn map_ledger(err: LedgerError) -> CheckoutError {
    match err {
        LedgerError::InvalidQuantity => {
            CheckoutError::InvalidRequest("Quantity must be at least 1".to_string())
        }
        LedgerError::ProductNotFound(id) => CheckoutError::ProductNotFound(id),
        LedgerError::InsufficientStock {
            product_id,
            product,
            pool,
            available,
            ..
        } => CheckoutError::InsufficientStock {
            product_id,
            product,
            pool,
            available,
        },
        LedgerError::Dispatch(DispatchError::Conflict { .. }) => {
            CheckoutError::Conflict("Product stock is changing too fast; try again".to_string())
        }
        LedgerError::Dispatch(other) => CheckoutError::Persistence(other.to_string()),
    }
}

fn map_persist(err: DispatchError) -> CheckoutError {
    match err {
        DispatchError::Domain(e @ DomainError::Validation(_)) => {
            CheckoutError::InvalidRequest(domain_message(&e))
        }
        DispatchError::Conflict { .. } => {
            CheckoutError::Conflict("Order could not be stored; try again".to_string())
        }
        other => CheckoutError::Persistence(other.to_string()),
    }
}

/// Validation messages without the `validation failed:` prefix.
fn domain_message(err: &DomainError) -> String {
    match err {
        DomainError::Validation(msg) | DomainError::InvariantViolation(msg) => msg.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use agriconnect_auth::Role;
    use agriconnect_catalog::{ListProduct, Product, ProductCommand, Unit};
    use agriconnect_core::UserId;
    use agriconnect_events::InMemoryEventBus;

    use super::*;
    use crate::event_store::InMemoryEventStore;
    use crate::services::PRODUCT_AGGREGATE;

    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
    type Dispatcher = CommandDispatcher<InMemoryEventStore, Bus>;

    fn dispatcher() -> Arc<Dispatcher> {
        Arc::new(CommandDispatcher::new(InMemoryEventStore::new(), Bus::default()))
    }

    fn list(d: &Dispatcher, name: &str, price: u64, local: u64, industrial: u64) -> ProductId {
        let id = ProductId::new(AggregateId::new());
        d.dispatch(
            id.0,
            PRODUCT_AGGREGATE,
            ProductCommand::ListProduct(ListProduct {
                product_id: id,
                farmer_id: UserId::new(),
                name: name.to_string(),
                price_per_unit: price,
                unit: Unit::Kg,
                local_stock: local,
                industrial_stock: industrial,
                occurred_at: Utc::now(),
            }),
            |a| Product::empty(ProductId::new(a)),
        )
        .unwrap();
        id
    }

    fn stock(d: &Dispatcher, id: ProductId) -> (u64, u64) {
        let p: Product = d.load(id.0, PRODUCT_AGGREGATE, |a| Product::empty(ProductId::new(a))).unwrap();
        (p.local_stock(), p.industrial_stock())
    }

    fn address() -> ShippingAddress {
        ShippingAddress {
            street: "12 Mandi Road".to_string(),
            city: "Nashik".to_string(),
            state: "Maharashtra".to_string(),
            pincode: "422001".to_string(),
            phone: "9876543210".to_string(),
        }
    }

    fn buyer(role: Role) -> Actor {
        Actor {
            user_id: UserId::new(),
            role,
        }
    }

    fn request(items: Vec<(ProductId, i64)>) -> CheckoutRequest {
        CheckoutRequest {
            items: items
                .into_iter()
                .map(|(product_id, quantity)| LineRequest { product_id, quantity })
                .collect(),
            shipping_address: Some(address()),
            payment_method: None,
            notes: None,
        }
    }

    #[test]
    fn places_order_with_snapshots_and_total() {
        let d = dispatcher();
        let a = list(&d, "Tomatoes", 30, 10, 0);
        let b = list(&d, "Potatoes", 20, 10, 0);
        let svc = CheckoutService::new(d.clone());

        let order = svc
            .place_order(&buyer(Role::INDIVIDUAL), request(vec![(a, 2), (b, 3)]))
            .unwrap();

        assert_eq!(order.total_amount, 2 * 30 + 3 * 20);
        assert_eq!(order.items[0].product_name, "Tomatoes");
        assert_eq!(order.items[1].subtotal, 60);
        assert_eq!(order.payment_method, PaymentMethod::Cod);
        assert_eq!(stock(&d, a), (8, 0));
        assert_eq!(stock(&d, b), (7, 0));
    }

    #[test]
    fn farmers_cannot_check_out() {
        let d = dispatcher();
        let a = list(&d, "Tomatoes", 30, 10, 0);
        let svc = CheckoutService::new(d.clone());

        let err = svc
            .place_order(&buyer(Role::FARMER), request(vec![(a, 1)]))
            .unwrap_err();
        assert!(matches!(err, CheckoutError::Forbidden(msg) if msg == "Farmers cannot place orders"));
        assert_eq!(stock(&d, a), (10, 0));
    }

    #[test]
    fn request_validation_runs_before_any_reservation() {
        let d = dispatcher();
        let a = list(&d, "Tomatoes", 30, 10, 0);
        let svc = CheckoutService::new(d.clone());
        let who = buyer(Role::INDIVIDUAL);

        assert!(matches!(
            svc.place_order(&who, request(vec![])),
            Err(CheckoutError::InvalidRequest(_))
        ));
        assert!(matches!(
            svc.place_order(&who, request(vec![(a, 0)])),
            Err(CheckoutError::InvalidRequest(_))
        ));
        assert!(matches!(
            svc.place_order(&who, request(vec![(a, -2)])),
            Err(CheckoutError::InvalidRequest(_))
        ));

        let mut no_address = request(vec![(a, 1)]);
        no_address.shipping_address = None;
        assert!(matches!(svc.place_order(&who, no_address), Err(CheckoutError::InvalidRequest(_))));

        let mut blank_city = request(vec![(a, 1)]);
        if let Some(addr) = blank_city.shipping_address.as_mut() {
            addr.city = "  ".to_string();
        }
        assert!(matches!(svc.place_order(&who, blank_city), Err(CheckoutError::InvalidRequest(_))));

        let mut long_notes = request(vec![(a, 1)]);
        long_notes.notes = Some("x".repeat(501));
        assert!(matches!(svc.place_order(&who, long_notes), Err(CheckoutError::InvalidRequest(_))));

        assert_eq!(stock(&d, a), (10, 0));
    }

    #[test]
    fn failure_at_later_item_releases_earlier_reservations() {
        let d = dispatcher();
        let a = list(&d, "Tomatoes", 30, 5, 0);
        let b = list(&d, "Okra", 40, 0, 0);
        let svc = CheckoutService::new(d.clone());

        let err = svc
            .place_order(&buyer(Role::INDIVIDUAL), request(vec![(a, 2), (b, 1)]))
            .unwrap_err();

        match err {
            CheckoutError::InsufficientStock { product, available, .. } => {
                assert_eq!(product, "Okra");
                assert_eq!(available, 0);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(stock(&d, a), (5, 0));
    }

    #[test]
    fn unknown_product_releases_earlier_reservations() {
        let d = dispatcher();
        let a = list(&d, "Tomatoes", 30, 5, 0);
        let missing = ProductId::new(AggregateId::new());
        let svc = CheckoutService::new(d.clone());

        let err = svc
            .place_order(&buyer(Role::INDIVIDUAL), request(vec![(a, 1), (missing, 1)]))
            .unwrap_err();
        assert!(matches!(err, CheckoutError::ProductNotFound(id) if id == missing));
        assert_eq!(stock(&d, a), (5, 0));
    }

    #[test]
    fn industrial_buyers_draw_from_the_industrial_pool() {
        let d = dispatcher();
        let a = list(&d, "Wheat", 2000, 0, 10);
        let svc = CheckoutService::new(d.clone());

        let order = svc
            .place_order(&buyer(Role::INDUSTRIAL), request(vec![(a, 4)]))
            .unwrap();
        assert_eq!(order.items[0].stock_pool, StockPool::Industrial);
        assert_eq!(stock(&d, a), (0, 6));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 64,
                ..ProptestConfig::default()
            })]

            /// A checkout either draws exactly its quantities or leaves every
            /// pool untouched.
            #[test]
            fn checkout_is_all_or_nothing(
                stocks in proptest::collection::vec(0u64..6, 1..4),
                carts in proptest::collection::vec(
                    proptest::collection::vec((0usize..4, 1i64..4), 1..4),
                    1..8
                )
            ) {
                let d = dispatcher();
                let ids: Vec<ProductId> = stocks
                    .iter()
                    .enumerate()
                    .map(|(i, &s)| list(&d, &format!("P{i}"), 10, s, 0))
                    .collect();
                let svc = CheckoutService::new(d.clone());

                for lines in carts {
                    let items: Vec<(ProductId, i64)> = lines
                        .into_iter()
                        .map(|(idx, q)| (ids[idx % ids.len()], q))
                        .collect();
                    let before: Vec<u64> = ids.iter().map(|&id| stock(&d, id).0).collect();

                    let outcome = svc.place_order(&buyer(Role::INDIVIDUAL), request(items.clone()));
                    let after: Vec<u64> = ids.iter().map(|&id| stock(&d, id).0).collect();

                    match outcome {
                        Ok(_) => {
                            for (k, id) in ids.iter().enumerate() {
                                let drawn: u64 = items
                                    .iter()
                                    .filter(|(p, _)| p == id)
                                    .map(|(_, q)| *q as u64)
                                    .sum();
                                prop_assert_eq!(after[k] + drawn, before[k]);
                            }
                        }
                        Err(_) => prop_assert_eq!(&after, &before),
                    }
                }
            }
        }
    }
}
