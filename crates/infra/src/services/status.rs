//! Order status transitions driven by farmers.
//!
//! Checks run in a fixed order: caller role, order existence, ownership (any
//! line item), then the transition table. Entering `cancelled` returns every
//! line's quantity to the pool it was drawn from; only the request whose
//! transition committed does so.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use agriconnect_core::DomainError;
use agriconnect_events::{EventBus, EventEnvelope};
use agriconnect_orders::{ChangeStatus, Order, OrderCommand, OrderId, OrderItem, OrderStatus};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;
use crate::projections::OrderReadModel;

use super::stock_ledger::StockLedger;
use super::{Actor, ORDER_AGGREGATE};

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("{0}")]
    Forbidden(String),

    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    #[error("Cannot change status from '{from}' to '{to}'")]
    InvalidTransition { from: String, to: String },

    #[error("{0}")]
    Conflict(String),

    #[error("failed to persist status change: {0}")]
    Persistence(String),
}

#[derive(Debug)]
pub struct StatusService<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    ledger: StockLedger<S, B>,
}

impl<S, B> StatusService<S, B>
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

    /// Transition to a status given by its wire name. An unknown name is an
    /// invalid transition out of the order's current status, reported only
    /// after the usual role, existence and ownership checks.
    #[instrument(skip(self), fields(actor = %actor.user_id, order_id = %order_id))]
    pub fn transition_requested(
        &self,
        actor: &Actor,
        order_id: OrderId,
        requested: &str,
    ) -> Result<OrderReadModel, TransitionError> {
        if let Ok(to) = requested.trim().parse::<OrderStatus>() {
            return self.transition(actor, order_id, to);
        }

        require_farmer(actor)?;
        let order: Order = self
            .dispatcher
            .load(order_id.0, ORDER_AGGREGATE, |id| Order::empty(OrderId::new(id)))
            .map_err(|e| map_dispatch(order_id, e))?;
        if !order.is_created() {
            return Err(TransitionError::OrderNotFound(order_id));
        }
        if !order.involves_farmer(actor.user_id) {
            return Err(TransitionError::Forbidden(
                "Not authorized to update this order".to_string(),
            ));
        }

        let err = TransitionError::InvalidTransition {
            from: order.status().to_string(),
            to: requested.to_string(),
        };
        warn!(error = %err, "status change rejected");
        Err(err)
    }

    #[instrument(skip(self), fields(actor = %actor.user_id, order_id = %order_id, to = %to))]
    pub fn transition(
        &self,
        actor: &Actor,
        order_id: OrderId,
        to: OrderStatus,
    ) -> Result<OrderReadModel, TransitionError> {
        require_farmer(actor)?;

        let command = OrderCommand::ChangeStatus(ChangeStatus {
            order_id,
            actor: actor.user_id,
            to,
            occurred_at: Utc::now(),
        });

        let committed = self
            .dispatcher
            .dispatch(order_id.0, ORDER_AGGREGATE, command, |id| Order::empty(OrderId::new(id)))
            .map_err(|e| {
                let err = map_dispatch(order_id, e);
                warn!(error = %err, "status change rejected");
                err
            })?;

        if to == OrderStatus::Cancelled {
            self.restock(order_id, committed.aggregate.items());
        }

        let order = OrderReadModel::from_aggregate(&committed.aggregate).ok_or_else(|| {
            TransitionError::Persistence("order has no placement data".to_string())
        })?;

        info!(status = %order.status, "order status changed");
        Ok(order)
    }

    fn restock(&self, order_id: OrderId, items: &[OrderItem]) {
        for item in items {
            if let Err(e) = self.ledger.release(item.product_id, item.stock_pool, item.quantity) {
                error!(
                    %order_id,
                    product_id = %item.product_id,
                    pool = %item.stock_pool,
                    quantity = item.quantity,
                    error = %e,
                    "failed to return stock of cancelled order"
                );
            }
        }
    }
}

fn require_farmer(actor: &Actor) -> Result<(), TransitionError> {
    if actor.role.is_farmer() {
        return Ok(());
    }
    warn!("non-farmer attempted status change");
    Err(TransitionError::Forbidden(
        "Only farmers can update order status".to_string(),
    ))
}

fn map_dispatch(order_id: OrderId, err: DispatchError) -> TransitionError {
    match err {
        DispatchError::Domain(DomainError::NotFound) => TransitionError::OrderNotFound(order_id),
        DispatchError::Domain(DomainError::Unauthorized) => {
            TransitionError::Forbidden("Not authorized to update this order".to_string())
        }
        DispatchError::Domain(DomainError::InvalidTransition { from, to }) => {
            TransitionError::InvalidTransition { from, to }
        }
        DispatchError::Conflict { .. } => {
            TransitionError::Conflict("Order is being updated concurrently; try again".to_string())
        }
        other => TransitionError::Persistence(other.to_string()),
    }
}
