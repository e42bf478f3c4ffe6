//! Append-only event store boundary.
//!
//! Products and orders each own one stream keyed by aggregate id. The store
//! assigns sequence numbers and enforces the expected-version check on append.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
