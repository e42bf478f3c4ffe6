//! Disposable read model storage (rebuildable from the event store).

pub mod store;

pub use store::{InMemoryReadStore, ReadStore};
