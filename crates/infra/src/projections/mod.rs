//! Projections: bus consumers that fold events into query-optimized read models.
//!
//! Every projection is rebuildable from the store and idempotent under
//! at-least-once delivery (per-stream cursors drop duplicates).

pub mod cursor;
pub mod orders;
pub mod products;

pub use cursor::{ProjectionError, StreamCursors};
pub use orders::{OrderReadModel, OrdersProjection};
pub use products::{ProductCatalogProjection, ProductReadModel};
