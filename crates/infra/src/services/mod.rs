//! Application services: the write paths behind the HTTP surface.
//!
//! Each service drives one or more aggregates through the shared
//! [`CommandDispatcher`](crate::command_dispatcher::CommandDispatcher) and
//! translates domain rejections into its own error type.

pub mod catalog;
pub mod checkout;
pub mod order_access;
pub mod status;
pub mod stock_ledger;

pub use catalog::{CatalogError, CatalogService, ListingRevision, NewListing, StockLevels};
pub use checkout::{CheckoutError, CheckoutRequest, CheckoutService, LineRequest};
pub use order_access::{AccessError, OrderAccess};
pub use status::{StatusService, TransitionError};
pub use stock_ledger::{LedgerError, Reservation, StockLedger};

/// Stream type of product aggregates.
pub const PRODUCT_AGGREGATE: &str = "catalog.product";

/// Stream type of order aggregates.
pub const ORDER_AGGREGATE: &str = "orders.order";

/// The authenticated caller, as far as services care.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: agriconnect_core::UserId,
    pub role: agriconnect_auth::Role,
}
