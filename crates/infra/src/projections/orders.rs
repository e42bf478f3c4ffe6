use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use agriconnect_core::UserId;
use agriconnect_events::EventEnvelope;
use agriconnect_orders::{
    Order, OrderEvent, OrderId, OrderItem, OrderStatus, PaymentMethod, PaymentStatus,
    ShippingAddress,
};

use crate::projections::cursor::{ProjectionError, StreamCursors};
use crate::read_model::ReadStore;
use crate::services::ORDER_AGGREGATE;

/// Queryable order view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderReadModel {
    pub order_id: OrderId,
    pub buyer_id: UserId,
    pub items: Vec<OrderItem>,
    pub total_amount: u64,
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub status: OrderStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderReadModel {
    /// View of a rehydrated aggregate; `None` if the order was never placed.
    pub fn from_aggregate(order: &Order) -> Option<Self> {
        Some(Self {
            order_id: order.id_typed(),
            buyer_id: order.buyer_id()?,
            items: order.items().to_vec(),
            total_amount: order.total_amount(),
            shipping_address: order.shipping_address()?.clone(),
            payment_method: order.payment_method(),
            payment_status: order.payment_status(),
            status: order.status(),
            notes: order.notes().map(str::to_string),
            created_at: order.placed_at()?,
            updated_at: order.updated_at()?,
        })
    }

    pub fn involves_farmer(&self, farmer: UserId) -> bool {
        self.items.iter().any(|i| i.farmer_id == farmer)
    }
}

/// Orders by id, with buyer and farmer listings (newest first).
#[derive(Debug)]
pub struct OrdersProjection<S>
where
    S: ReadStore<OrderId, OrderReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> OrdersProjection<S>
where
    S: ReadStore<OrderId, OrderReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::default(),
        }
    }

    pub fn get(&self, order_id: &OrderId) -> Option<OrderReadModel> {
        self.store.get(order_id)
    }

    pub fn list_for_buyer(&self, buyer: UserId) -> Vec<OrderReadModel> {
        newest_first(self.store.list().into_iter().filter(|o| o.buyer_id == buyer).collect())
    }

    pub fn list_for_farmer(&self, farmer: UserId) -> Vec<OrderReadModel> {
        newest_first(
            self.store
                .list()
                .into_iter()
                .filter(|o| o.involves_farmer(farmer))
                .collect(),
        )
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != ORDER_AGGREGATE {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();
        if !self.cursors.admit(aggregate_id, seq)? {
            return Ok(());
        }

        let ev: OrderEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        let order_id = match &ev {
            OrderEvent::OrderPlaced(e) => e.order_id,
            OrderEvent::StatusChanged(e) => e.order_id,
        };
        if order_id.0 != aggregate_id {
            return Err(ProjectionError::Mismatch(
                "event order_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match ev {
            OrderEvent::OrderPlaced(e) => {
                self.store.upsert(
                    e.order_id,
                    OrderReadModel {
                        order_id: e.order_id,
                        buyer_id: e.buyer_id,
                        items: e.items,
                        total_amount: e.total_amount,
                        shipping_address: e.shipping_address,
                        payment_method: e.payment_method,
                        payment_status: PaymentStatus::Pending,
                        status: OrderStatus::Pending,
                        notes: e.notes,
                        created_at: e.occurred_at,
                        updated_at: e.occurred_at,
                    },
                );
            }
            OrderEvent::StatusChanged(e) => {
                // A status change for an order we never saw placed cannot be
                // materialized; the cursor still advances.
                if let Some(mut rm) = self.store.get(&e.order_id) {
                    rm.status = e.to;
                    rm.updated_at = e.occurred_at;
                    self.store.upsert(e.order_id, rm);
                }
            }
        }

        self.cursors.advance(aggregate_id, seq);
        Ok(())
    }

    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectionError> {
        self.store.clear();
        self.cursors.clear();

        let mut envs: Vec<_> = envelopes.into_iter().collect();
        envs.sort_by_key(|e| (e.aggregate_id(), e.sequence_number()));

        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}

fn newest_first(mut orders: Vec<OrderReadModel>) -> Vec<OrderReadModel> {
    orders.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.order_id.cmp(&a.order_id))
    });
    orders
}
