//! Orders domain module (event-sourced).
//!
//! An order is an immutable snapshot of what was bought, at which price, from
//! which pool. Only its status moves, along a fixed pipeline.

pub mod order;
pub mod status;

pub use order::{
    ChangeStatus, MAX_NOTES_LEN, Order, OrderCommand, OrderEvent, OrderId, OrderItem, OrderPlaced,
    PaymentMethod, PaymentStatus, PlaceOrder, ShippingAddress, StatusChanged, validate_notes,
};
pub use status::OrderStatus;
