//! Read access to a single order: the buyer, or a farmer with a line item.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;

use agriconnect_core::{DomainError, UserId};
use agriconnect_events::{EventBus, EventEnvelope};
use agriconnect_orders::{Order, OrderId, OrderStatus};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;
use crate::notifications::{ReceiptDocument, ReceiptError, render_receipt};
use crate::projections::OrderReadModel;
use crate::users::UserDirectory;

use super::ORDER_AGGREGATE;

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    #[error("Not authorized")]
    Forbidden,

    #[error("Receipt is only available for delivered orders")]
    NotDelivered,

    #[error("failed to load order: {0}")]
    Persistence(String),

    #[error(transparent)]
    Receipt(#[from] ReceiptError),
}

#[derive(Debug)]
pub struct OrderAccess<S, B, D> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    users: D,
}

impl<S, B, D> OrderAccess<S, B, D>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    D: UserDirectory,
{
    pub fn new(dispatcher: Arc<CommandDispatcher<S, B>>, users: D) -> Self {
        Self { dispatcher, users }
    }

    /// Current state of the order, straight from its stream.
    pub fn get(&self, viewer: UserId, order_id: OrderId) -> Result<OrderReadModel, AccessError> {
        let order: Order = self
            .dispatcher
            .load(order_id.0, ORDER_AGGREGATE, |id| Order::empty(OrderId::new(id)))
            .map_err(|e| match e {
                DispatchError::Domain(DomainError::NotFound) => AccessError::OrderNotFound(order_id),
                other => AccessError::Persistence(other.to_string()),
            })?;

        let order = OrderReadModel::from_aggregate(&order).ok_or(AccessError::OrderNotFound(order_id))?;
        if order.buyer_id != viewer && !order.involves_farmer(viewer) {
            return Err(AccessError::Forbidden);
        }
        Ok(order)
    }

    pub fn receipt(&self, viewer: UserId, order_id: OrderId) -> Result<ReceiptDocument, AccessError> {
        let order = self.get(viewer, order_id)?;
        if order.status != OrderStatus::Delivered {
            return Err(AccessError::NotDelivered);
        }

        let buyer = self.users.get_user(order.buyer_id);
        Ok(render_receipt(&order, buyer.as_ref(), order.updated_at)?)
    }
}
