//! Bus consumer that turns committed order events into notifications.
//!
//! The order is rebuilt from its stream up to the announced event, so every
//! notification shows the order exactly as that event left it. Gateway
//! failures are logged here and never travel back to the request that
//! committed the event.

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};

use agriconnect_events::EventEnvelope;
use agriconnect_orders::{Order, OrderEvent, OrderId};

use crate::command_dispatcher::{DispatchError, rehydrate};
use crate::event_store::EventStore;
use crate::projections::OrderReadModel;
use crate::services::ORDER_AGGREGATE;

use super::gateway::{NotificationGateway, NotificationKind, OrderNotification};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to deserialize order event: {0}")]
    Deserialize(String),

    #[error("failed to load order: {0}")]
    Load(#[from] DispatchError),
}

#[derive(Debug)]
pub struct NotificationRelay<S, G> {
    store: S,
    gateway: G,
}

impl<S, G> NotificationRelay<S, G>
where
    S: EventStore,
    G: NotificationGateway,
{
    pub fn new(store: S, gateway: G) -> Self {
        Self { store, gateway }
    }

    pub fn handle(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), RelayError> {
        if envelope.aggregate_type() != ORDER_AGGREGATE {
            return Ok(());
        }

        let event: OrderEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| RelayError::Deserialize(e.to_string()))?;
        let kind = match &event {
            OrderEvent::OrderPlaced(_) => NotificationKind::Created,
            OrderEvent::StatusChanged(e) => NotificationKind::StatusChanged {
                from: e.from,
                to: e.to,
            },
        };

        let order: Order = rehydrate(
            &self.store,
            envelope.aggregate_id(),
            ORDER_AGGREGATE,
            Some(envelope.sequence_number()),
            |id| Order::empty(OrderId::new(id)),
        )?;
        let Some(order) = OrderReadModel::from_aggregate(&order) else {
            debug!(aggregate_id = %envelope.aggregate_id(), "order not yet placed; nothing to announce");
            return Ok(());
        };

        let order_id = order.order_id;
        if let Err(e) = self.gateway.notify(&OrderNotification { kind, order }) {
            warn!(%order_id, error = %e, "order notification failed");
        }
        Ok(())
    }
}
