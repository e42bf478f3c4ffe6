//! Service wiring: event store, bus, dispatcher, projections and background
//! consumers.

use std::io;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::{info, warn};

use agriconnect_catalog::ProductId;
use agriconnect_events::{EventEnvelope, InMemoryEventBus};
use agriconnect_infra::{
    command_dispatcher::CommandDispatcher,
    event_store::InMemoryEventStore,
    notifications::{EmailNotifier, LogMailer, Mailer, NotificationRelay, SmtpMailer},
    projections::{OrderReadModel, OrdersProjection, ProductCatalogProjection, ProductReadModel},
    read_model::InMemoryReadStore,
    services::{CatalogService, CheckoutService, OrderAccess, StatusService},
    users::InMemoryUserDirectory,
    workers::{BusWorker, WorkerHandle},
};
use agriconnect_orders::OrderId;

use crate::config::ApiConfig;

pub type Store = Arc<InMemoryEventStore>;
pub type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
pub type Users = Arc<InMemoryUserDirectory>;
pub type OrdersView = OrdersProjection<InMemoryReadStore<OrderId, OrderReadModel>>;
pub type ProductsView = ProductCatalogProjection<InMemoryReadStore<ProductId, ProductReadModel>>;

pub struct AppServices {
    pub checkout: CheckoutService<Store, Bus>,
    pub status: StatusService<Store, Bus>,
    pub catalog: CatalogService<Store, Bus>,
    pub access: OrderAccess<Store, Bus, Users>,
    pub orders: Arc<OrdersView>,
    pub products: Arc<ProductsView>,
    pub users: Users,
    /// Bus consumers; they stop when the bus is dropped with the services.
    _workers: Vec<WorkerHandle>,
}

pub fn build_services(config: &ApiConfig) -> io::Result<AppServices> {
    let store: Store = Arc::new(InMemoryEventStore::new());
    let bus: Bus = Arc::new(InMemoryEventBus::new());
    let users: Users = Arc::new(InMemoryUserDirectory::new());
    let dispatcher = Arc::new(
        CommandDispatcher::new(store.clone(), bus.clone())
            .with_max_retries(config.dispatch_max_retries),
    );

    let orders = Arc::new(OrdersProjection::new(InMemoryReadStore::new()));
    let products = Arc::new(ProductCatalogProjection::new(InMemoryReadStore::new()));

    let mut workers = Vec::with_capacity(3);

    let view = orders.clone();
    workers.push(BusWorker::spawn(
        "orders-projection",
        &bus,
        move |env: EventEnvelope<JsonValue>| view.apply_envelope(&env),
    )?);

    let view = products.clone();
    workers.push(BusWorker::spawn(
        "products-projection",
        &bus,
        move |env: EventEnvelope<JsonValue>| view.apply_envelope(&env),
    )?);

    let mailer: Arc<dyn Mailer> = match &config.smtp {
        Some(settings) => {
            let smtp = SmtpMailer::new(settings).map_err(io::Error::other)?;
            info!(host = %settings.host, port = settings.port, "mail goes out over smtp");
            Arc::new(smtp)
        }
        None => {
            warn!("SMTP_HOST not set; emails are only logged");
            Arc::new(LogMailer)
        }
    };
    let notifier = EmailNotifier::new(users.clone(), mailer, config.mail_from.clone());
    let relay = NotificationRelay::new(store.clone(), notifier);
    workers.push(BusWorker::spawn(
        "order-notifications",
        &bus,
        move |env: EventEnvelope<JsonValue>| relay.handle(&env),
    )?);

    info!(workers = workers.len(), "services started");

    Ok(AppServices {
        checkout: CheckoutService::new(dispatcher.clone()),
        status: StatusService::new(dispatcher.clone()),
        catalog: CatalogService::new(dispatcher.clone()),
        access: OrderAccess::new(dispatcher, users.clone()),
        orders,
        products,
        users,
        _workers: workers,
    })
}
