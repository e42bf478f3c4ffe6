//! End-to-end tests of the order pipeline.
//!
//! Checkout / status change -> EventStore -> EventBus -> projections and
//! notifications, with real threads for the concurrent scenarios.

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    use chrono::Utc;
    use serde_json::Value as JsonValue;

    use agriconnect_auth::Role;
    use agriconnect_catalog::{ListProduct, Product, ProductCommand, ProductId, StockPool, Unit};
    use agriconnect_core::{AggregateId, ExpectedVersion, UserId};
    use agriconnect_events::{EventEnvelope, InMemoryEventBus};
    use agriconnect_orders::{OrderId, OrderStatus, ShippingAddress};

    use crate::command_dispatcher::CommandDispatcher;
    use crate::event_store::{EventStore, EventStoreError, InMemoryEventStore, StoredEvent, UncommittedEvent};
    use crate::notifications::{NotificationGateway, NotificationRelay, NotifyError, OrderNotification};
    use crate::projections::{OrderReadModel, OrdersProjection};
    use crate::read_model::InMemoryReadStore;
    use crate::services::{
        AccessError, Actor, CatalogError, CatalogService, CheckoutError, CheckoutRequest,
        CheckoutService, LineRequest, ListingRevision, ORDER_AGGREGATE, OrderAccess,
        PRODUCT_AGGREGATE, StatusService, TransitionError,
    };
    use crate::users::InMemoryUserDirectory;
    use crate::workers::BusWorker;

    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
    type Store = Arc<InMemoryEventStore>;
    type Dispatcher = CommandDispatcher<Store, Bus>;
    type Orders = OrdersProjection<Arc<InMemoryReadStore<OrderId, OrderReadModel>>>;

    struct Market {
        store: Store,
        bus: Bus,
        dispatcher: Arc<Dispatcher>,
        checkout: CheckoutService<Store, Bus>,
        status: StatusService<Store, Bus>,
        farmer: Actor,
    }

    fn market() -> Market {
        let store: Store = Arc::new(InMemoryEventStore::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let dispatcher = Arc::new(CommandDispatcher::new(store.clone(), bus.clone()));
        Market {
            checkout: CheckoutService::new(dispatcher.clone()),
            status: StatusService::new(dispatcher.clone()),
            store,
            bus,
            dispatcher,
            farmer: Actor {
                user_id: UserId::new(),
                role: Role::FARMER,
            },
        }
    }

    impl Market {
        fn list(&self, name: &str, price: u64, local: u64, industrial: u64) -> ProductId {
            let id = ProductId::new(AggregateId::new());
            self.dispatcher
                .dispatch(
                    id.0,
                    PRODUCT_AGGREGATE,
                    ProductCommand::ListProduct(ListProduct {
                        product_id: id,
                        farmer_id: self.farmer.user_id,
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

        fn stock(&self, id: ProductId) -> (u64, u64) {
            let p: Product = self
                .dispatcher
                .load(id.0, PRODUCT_AGGREGATE, |a| Product::empty(ProductId::new(a)))
                .unwrap();
            (p.local_stock(), p.industrial_stock())
        }

        fn order_streams(&self) -> usize {
            let mut ids: Vec<_> = self
                .store
                .load_by_type(ORDER_AGGREGATE)
                .unwrap()
                .into_iter()
                .map(|e| e.aggregate_id)
                .collect();
            ids.sort();
            ids.dedup();
            ids.len()
        }
    }

    fn buyer(role: Role) -> Actor {
        Actor {
            user_id: UserId::new(),
            role,
        }
    }

    fn cart(items: &[(ProductId, i64)]) -> CheckoutRequest {
        CheckoutRequest {
            items: items
                .iter()
                .map(|&(product_id, quantity)| LineRequest { product_id, quantity })
                .collect(),
            shipping_address: Some(ShippingAddress {
                street: "21 Market Yard".to_string(),
                city: "Indore".to_string(),
                state: "Madhya Pradesh".to_string(),
                pincode: "452001".to_string(),
                phone: "9855555555".to_string(),
            }),
            payment_method: None,
            notes: None,
        }
    }

    fn wait_until(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        done()
    }

    #[test]
    fn two_concurrent_checkouts_for_the_last_units_only_one_wins() {
        let m = Arc::new(market());
        let tomatoes = m.list("Tomatoes", 30, 5, 0);
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let m = m.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    m.checkout
                        .place_order(&buyer(Role::INDIVIDUAL), cart(&[(tomatoes, 3)]))
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.iter().any(|r| matches!(
            r,
            Err(CheckoutError::InsufficientStock { product, available: 2, .. }) if product == "Tomatoes"
        )));
        assert_eq!(m.stock(tomatoes), (2, 0));
    }

    #[test]
    fn pools_never_go_negative_under_contention() {
        let m = Arc::new(market());
        let a = m.list("Chillies", 10, 20, 15);
        let b = m.list("Ginger", 12, 9, 30);

        let handles: Vec<_> = (0..12)
            .map(|i| {
                let m = m.clone();
                thread::spawn(move || {
                    let role = if i % 3 == 0 { Role::INDUSTRIAL } else { Role::INDIVIDUAL };
                    let items = if i % 2 == 0 { vec![(a, 3), (b, 2)] } else { vec![(b, 4), (a, 1)] };
                    m.checkout
                        .place_order(&buyer(role), cart(&items))
                        .ok()
                })
            })
            .collect();
        let placed: Vec<_> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();

        let drawn = |product: ProductId, pool: StockPool| -> u64 {
            placed
                .iter()
                .flat_map(|o| o.items.iter())
                .filter(|i| i.product_id == product && i.stock_pool == pool)
                .map(|i| i.quantity)
                .sum()
        };

        let (a_local, a_ind) = m.stock(a);
        let (b_local, b_ind) = m.stock(b);
        assert_eq!(a_local + drawn(a, StockPool::Local), 20);
        assert_eq!(a_ind + drawn(a, StockPool::Industrial), 15);
        assert_eq!(b_local + drawn(b, StockPool::Local), 9);
        assert_eq!(b_ind + drawn(b, StockPool::Industrial), 30);
        assert_eq!(m.order_streams(), placed.len());
    }

    #[test]
    fn failure_on_second_item_restores_the_first_and_creates_no_order() {
        let m = market();
        let a = m.list("Brinjal", 35, 6, 0);
        let b = m.list("Cauliflower", 45, 0, 0);

        let err = m
            .checkout
            .place_order(&buyer(Role::INDIVIDUAL), cart(&[(a, 2), (b, 1)]))
            .unwrap_err();

        assert!(matches!(err, CheckoutError::InsufficientStock { ref product, .. } if product == "Cauliflower"));
        assert!(err.to_string().contains("Cauliflower"));
        assert_eq!(m.stock(a), (6, 0));
        assert_eq!(m.order_streams(), 0);
    }

    #[test]
    fn delivered_orders_cannot_be_cancelled() {
        let m = market();
        let a = m.list("Peas", 60, 4, 0);
        let order = m
            .checkout
            .place_order(&buyer(Role::INDIVIDUAL), cart(&[(a, 1)]))
            .unwrap();

        for next in [OrderStatus::Confirmed, OrderStatus::Processing, OrderStatus::Shipped] {
            m.status.transition(&m.farmer, order.order_id, next).unwrap();
        }
        let delivered = m
            .status
            .transition(&m.farmer, order.order_id, OrderStatus::Delivered)
            .unwrap();
        assert_eq!(delivered.status, OrderStatus::Delivered);

        let err = m
            .status
            .transition(&m.farmer, order.order_id, OrderStatus::Cancelled)
            .unwrap_err();
        assert!(matches!(err, TransitionError::InvalidTransition { .. }));
        assert_eq!(err.to_string(), "Cannot change status from 'delivered' to 'cancelled'");
        assert_eq!(m.stock(a), (3, 0));
    }

    #[test]
    fn industrial_buyer_uses_industrial_pool_when_local_is_empty() {
        let m = market();
        let wheat = m.list("Wheat", 2200, 0, 10);

        let order = m
            .checkout
            .place_order(&buyer(Role::INDUSTRIAL), cart(&[(wheat, 10)]))
            .unwrap();

        assert_eq!(order.items[0].stock_pool, StockPool::Industrial);
        assert_eq!(m.stock(wheat), (0, 0));

        let err = m
            .checkout
            .place_order(&buyer(Role::INDIVIDUAL), cart(&[(wheat, 1)]))
            .unwrap_err();
        assert!(matches!(err, CheckoutError::InsufficientStock { pool: StockPool::Local, .. }));
    }

    #[test]
    fn concurrent_cancellations_release_stock_once() {
        let m = Arc::new(market());
        let a = m.list("Millet", 55, 10, 0);
        let order = m
            .checkout
            .place_order(&buyer(Role::INDIVIDUAL), cart(&[(a, 7)]))
            .unwrap();
        assert_eq!(m.stock(a), (3, 0));

        let barrier = Arc::new(Barrier::new(4));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let m = m.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    m.status
                        .transition(&m.farmer, order.order_id, OrderStatus::Cancelled)
                        .is_ok()
                })
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(wins, 1);
        assert_eq!(m.stock(a), (10, 0));
    }

    #[test]
    fn catalog_edits_after_checkout_leave_snapshots_alone() {
        let m = market();
        let a = m.list("Turmeric", 200, 10, 0);
        let order = m
            .checkout
            .place_order(&buyer(Role::INDIVIDUAL), cart(&[(a, 2)]))
            .unwrap();

        CatalogService::new(m.dispatcher.clone())
            .revise_listing(
                &m.farmer,
                a,
                ListingRevision {
                    name: Some("Organic Turmeric".to_string()),
                    price_per_unit: Some(260),
                    ..ListingRevision::default()
                },
            )
            .unwrap();

        let confirmed = m
            .status
            .transition(&m.farmer, order.order_id, OrderStatus::Confirmed)
            .unwrap();
        assert_eq!(confirmed.items, order.items);
        assert_eq!(confirmed.items[0].product_name, "Turmeric");
        assert_eq!(confirmed.total_amount, 400);
    }

    #[test]
    fn ids_of_the_other_aggregate_kind_are_not_found() {
        let m = market();
        let a = m.list("Jaggery", 80, 5, 0);
        let shopper = buyer(Role::INDIVIDUAL);
        let order = m.checkout.place_order(&shopper, cart(&[(a, 1)])).unwrap();

        // An order stream addressed as a product.
        let order_as_product = ProductId::new(order.order_id.0);
        let err = m
            .checkout
            .place_order(&shopper, cart(&[(a, 1), (order_as_product, 1)]))
            .unwrap_err();
        assert!(matches!(err, CheckoutError::ProductNotFound(id) if id == order_as_product));
        assert!(matches!(
            CatalogService::new(m.dispatcher.clone()).get_product(order_as_product),
            Err(CatalogError::ProductNotFound(_))
        ));

        // A product stream addressed as an order.
        let product_as_order = OrderId::new(a.0);
        assert!(matches!(
            m.status.transition(&m.farmer, product_as_order, OrderStatus::Confirmed),
            Err(TransitionError::OrderNotFound(id)) if id == product_as_order
        ));
        let access = OrderAccess::new(m.dispatcher.clone(), InMemoryUserDirectory::new());
        assert!(matches!(
            access.get(shopper.user_id, product_as_order),
            Err(AccessError::OrderNotFound(_))
        ));

        // Listed, reserved for the order, then reserved and released by the
        // failed checkout. The order stream is untouched.
        assert_eq!(m.stock(a), (4, 0));
        assert_eq!(m.store.load_stream(a.0).unwrap().len(), 4);
        assert_eq!(m.store.load_stream(order.order_id.0).unwrap().len(), 1);
        assert_eq!(m.order_streams(), 1);
    }

    /// Refuses every order append; products behave normally.
    struct FailingOrderStore {
        inner: InMemoryEventStore,
    }

    impl EventStore for FailingOrderStore {
        fn append(
            &self,
            events: Vec<UncommittedEvent>,
            expected_version: ExpectedVersion,
        ) -> Result<Vec<StoredEvent>, EventStoreError> {
            if events.first().is_some_and(|e| e.aggregate_type == ORDER_AGGREGATE) {
                return Err(EventStoreError::Backend("write refused".to_string()));
            }
            self.inner.append(events, expected_version)
        }

        fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
            self.inner.load_stream(aggregate_id)
        }
    }

    #[test]
    fn persistence_failure_releases_every_reservation() {
        let store = Arc::new(FailingOrderStore {
            inner: InMemoryEventStore::new(),
        });
        let dispatcher = Arc::new(CommandDispatcher::new(store.clone(), Bus::default()));
        let farmer = UserId::new();
        let list = |name: &str, local: u64| {
            let id = ProductId::new(AggregateId::new());
            dispatcher
                .dispatch(
                    id.0,
                    PRODUCT_AGGREGATE,
                    ProductCommand::ListProduct(ListProduct {
                        product_id: id,
                        farmer_id: farmer,
                        name: name.to_string(),
                        price_per_unit: 10,
                        unit: Unit::Piece,
                        local_stock: local,
                        industrial_stock: 0,
                        occurred_at: Utc::now(),
                    }),
                    |a| Product::empty(ProductId::new(a)),
                )
                .unwrap();
            id
        };
        let a = list("Coconut", 8);
        let b = list("Banana", 12);

        let err = CheckoutService::new(dispatcher.clone())
            .place_order(&buyer(Role::INDIVIDUAL), cart(&[(a, 3), (b, 5)]))
            .unwrap_err();
        assert!(matches!(err, CheckoutError::Persistence(_)));

        for (id, initial) in [(a, 8), (b, 12)] {
            let p: Product = dispatcher.load(id.0, PRODUCT_AGGREGATE, |x| Product::empty(ProductId::new(x))).unwrap();
            assert_eq!(p.local_stock(), initial);
        }
    }

    struct Flaky;

    impl NotificationGateway for Flaky {
        fn notify(&self, n: &OrderNotification) -> Result<(), NotifyError> {
            Err(NotifyError::UnknownRecipient(n.order.buyer_id))
        }
    }

    #[test]
    fn projections_follow_the_bus_and_notification_failures_stay_local() {
        let m = market();
        let orders: Arc<Orders> = Arc::new(OrdersProjection::new(Arc::new(InMemoryReadStore::new())));

        let projection = orders.clone();
        let projector = BusWorker::spawn("orders-projection", &m.bus, move |env: EventEnvelope<JsonValue>| {
            projection.apply_envelope(&env)
        })
        .unwrap();
        let relay = NotificationRelay::new(m.store.clone(), Flaky);
        let notifier = BusWorker::spawn("notifications", &m.bus, move |env: EventEnvelope<JsonValue>| {
            relay.handle(&env)
        })
        .unwrap();

        let a = m.list("Lentils", 95, 20, 0);
        let shopper = buyer(Role::INDIVIDUAL);
        let first = m.checkout.place_order(&shopper, cart(&[(a, 1)])).unwrap();
        let second = m.checkout.place_order(&shopper, cart(&[(a, 2)])).unwrap();
        m.status
            .transition(&m.farmer, first.order_id, OrderStatus::Confirmed)
            .unwrap();

        assert!(wait_until(|| {
            orders
                .get(&first.order_id)
                .is_some_and(|o| o.status == OrderStatus::Confirmed)
                && orders.get(&second.order_id).is_some()
        }));

        let mine: Vec<_> = orders
            .list_for_buyer(shopper.user_id)
            .into_iter()
            .map(|o| o.order_id)
            .collect();
        assert_eq!(mine, vec![second.order_id, first.order_id]);
        assert_eq!(orders.list_for_farmer(m.farmer.user_id).len(), 2);
        assert!(orders.list_for_farmer(UserId::new()).is_empty());

        projector.shutdown();
        notifier.shutdown();
    }

    #[test]
    fn order_projection_rebuilds_from_the_store() {
        let m = market();
        let a = m.list("Barley", 30, 10, 0);
        let placed = m
            .checkout
            .place_order(&buyer(Role::INDIVIDUAL), cart(&[(a, 2)]))
            .unwrap();
        m.status
            .transition(&m.farmer, placed.order_id, OrderStatus::Cancelled)
            .unwrap();

        let orders: Orders = OrdersProjection::new(Arc::new(InMemoryReadStore::new()));
        let history = m.store.load_by_type(ORDER_AGGREGATE).unwrap();
        orders
            .rebuild_from_scratch(history.iter().map(StoredEvent::to_envelope))
            .unwrap();

        let rebuilt = orders.get(&placed.order_id).unwrap();
        assert_eq!(rebuilt.status, OrderStatus::Cancelled);
        assert_eq!(rebuilt.items, placed.items);
        assert_eq!(rebuilt.total_amount, placed.total_amount);
    }
}
