//! Command execution pipeline for event-sourced aggregates.
//!
//! ```text
//! Command
//!   -> lock the aggregate's stream (in-process)
//!   -> load events, rehydrate
//!   -> handle (pure decision)
//!   -> append with ExpectedVersion::Exact(loaded revision)
//!   -> publish committed envelopes to the bus
//! ```
//!
//! The per-stream lock serializes writers inside this process; the expected
//! version check catches writers the lock cannot see. A stale append is retried
//! from a fresh load up to `max_retries` times, then surfaces as
//! [`DispatchError::Conflict`].
//!
//! Publication happens strictly after the append. A bus failure is logged and
//! does not fail the command: the store already holds the events.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, error};
use uuid::Uuid;

use agriconnect_core::{Aggregate, AggregateId, DomainError, ExpectedVersion};
use agriconnect_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

pub const DEFAULT_MAX_RETRIES: u32 = 8;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// The aggregate rejected the command (deterministic).
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Optimistic retries exhausted.
    #[error("aggregate {aggregate_id} kept changing; gave up after {attempts} attempts")]
    Conflict { aggregate_id: AggregateId, attempts: u32 },

    /// The loaded stream is out of order or belongs to another aggregate.
    #[error("corrupt event stream: {0}")]
    Integrity(String),

    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),

    #[error(transparent)]
    Store(EventStoreError),
}

/// Outcome of a committed command: the aggregate after the new events, plus
/// the stored events themselves.
#[derive(Debug, Clone)]
pub struct Committed<A> {
    pub aggregate: A,
    pub events: Vec<StoredEvent>,
}

/// One mutex per aggregate stream, held only while someone uses it.
///
/// An entry is dropped when its last lease goes away, so ids that never
/// produced a stream leave nothing behind.
#[derive(Debug, Default)]
struct StreamLocks {
    inner: Mutex<HashMap<AggregateId, Arc<Mutex<()>>>>,
}

impl StreamLocks {
    fn lease(&self, aggregate_id: AggregateId) -> StreamLease<'_> {
        let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let lock = map.entry(aggregate_id).or_default().clone();
        StreamLease {
            locks: self,
            aggregate_id,
            lock,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

struct StreamLease<'a> {
    locks: &'a StreamLocks,
    aggregate_id: AggregateId,
    lock: Arc<Mutex<()>>,
}

impl Drop for StreamLease<'_> {
    fn drop(&mut self) {
        let mut map = self.locks.inner.lock().unwrap_or_else(|p| p.into_inner());
        // Clones are only handed out under the map lock: the map's copy plus
        // ours means nobody else holds or waits on this stream.
        let idle = map
            .get(&self.aggregate_id)
            .is_some_and(|held| Arc::ptr_eq(held, &self.lock) && Arc::strong_count(held) == 2);
        if idle {
            map.remove(&self.aggregate_id);
        }
    }
}

// The guarded value is `()`, so a poisoned lock carries no broken state.
fn acquire(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
    lock.lock().unwrap_or_else(|p| p.into_inner())
}

#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
    locks: StreamLocks,
    max_retries: u32,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self {
            store,
            bus,
            locks: StreamLocks::default(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Run `command` against the aggregate `aggregate_id`.
    ///
    /// `make_aggregate` builds the empty instance that history is applied to.
    pub fn dispatch<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        make_aggregate: impl Fn(AggregateId) -> A,
    ) -> Result<Committed<A>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: agriconnect_events::Event + Serialize + DeserializeOwned,
    {
        let lease = self.locks.lease(aggregate_id);
        let attempts = self.max_retries.saturating_add(1);

        for attempt in 1..=attempts {
            let _guard = acquire(&lease.lock);

            let history = self.store.load_stream(aggregate_id).map_err(DispatchError::Store)?;
            validate_loaded_stream(aggregate_id, aggregate_type, &history)?;
            let expected = ExpectedVersion::Exact(stream_version(&history));

            let mut aggregate = make_aggregate(aggregate_id);
            apply_history(&mut aggregate, &history)?;

            let decided = aggregate.handle(&command)?;
            if decided.is_empty() {
                return Ok(Committed {
                    aggregate,
                    events: vec![],
                });
            }

            let uncommitted = decided
                .iter()
                .map(|ev| UncommittedEvent::from_typed(aggregate_id, aggregate_type, Uuid::now_v7(), ev))
                .collect::<Result<Vec<_>, _>>()
                .map_err(DispatchError::Store)?;

            match self.store.append(uncommitted, expected) {
                Ok(committed) => {
                    for ev in &decided {
                        aggregate.apply(ev);
                    }
                    self.publish(&committed);
                    return Ok(Committed {
                        aggregate,
                        events: committed,
                    });
                }
                Err(EventStoreError::Concurrency(msg)) => {
                    debug!(%aggregate_id, attempt, reason = %msg, "stale append, retrying");
                    continue;
                }
                Err(other) => return Err(DispatchError::Store(other)),
            }
        }

        Err(DispatchError::Conflict {
            aggregate_id,
            attempts,
        })
    }

    /// Rehydrate the current state of an aggregate (read path, no lock).
    pub fn load<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        rehydrate(&self.store, aggregate_id, aggregate_type, None, make_aggregate)
    }

    #[cfg(test)]
    fn tracked_streams(&self) -> usize {
        self.locks.len()
    }

    fn publish(&self, committed: &[StoredEvent]) {
        for stored in committed {
            if let Err(e) = self.bus.publish(stored.to_envelope()) {
                error!(
                    aggregate_id = %stored.aggregate_id,
                    sequence_number = stored.sequence_number,
                    error = ?e,
                    "event committed but publication failed"
                );
            }
        }
    }
}

/// Rebuild an aggregate from its stream, optionally stopping after event
/// `up_to` (inclusive). A stream of another aggregate type reads as not found.
pub fn rehydrate<S, A>(
    store: &S,
    aggregate_id: AggregateId,
    aggregate_type: &str,
    up_to: Option<u64>,
    make_aggregate: impl FnOnce(AggregateId) -> A,
) -> Result<A, DispatchError>
where
    S: EventStore + ?Sized,
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    let mut history = store.load_stream(aggregate_id).map_err(DispatchError::Store)?;
    validate_loaded_stream(aggregate_id, aggregate_type, &history)?;
    if let Some(limit) = up_to {
        history.retain(|e| e.sequence_number <= limit);
    }

    let mut aggregate = make_aggregate(aggregate_id);
    apply_history(&mut aggregate, &history)?;
    Ok(aggregate)
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    aggregate_id: AggregateId,
    aggregate_type: &str,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // Products and orders share one id space; an id naming the other kind
    // of aggregate does not exist as far as the caller is concerned.
    if stream.first().is_some_and(|e| e.aggregate_type != aggregate_type) {
        return Err(DispatchError::Domain(DomainError::NotFound));
    }

    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_type != aggregate_type {
            return Err(DispatchError::Integrity(format!(
                "loaded stream mixes aggregate types at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::Integrity(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number != last + 1 {
            return Err(DispatchError::Integrity(format!(
                "non-contiguous sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            )));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use chrono::Utc;

    use agriconnect_catalog::{
        ListProduct, Product, ProductCommand, ProductId, ReserveStock, StockPool, Unit,
    };
    use agriconnect_core::{AggregateRoot, UserId};
    use agriconnect_events::InMemoryEventBus;

    use super::*;
    use crate::event_store::InMemoryEventStore;

    const PRODUCT: &str = "catalog.product";

    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

    fn list_cmd(id: ProductId, local: u64) -> ProductCommand {
        ProductCommand::ListProduct(ListProduct {
            product_id: id,
            farmer_id: UserId::new(),
            name: "Tomatoes".to_string(),
            price_per_unit: 30,
            unit: Unit::Kg,
            local_stock: local,
            industrial_stock: 0,
            occurred_at: Utc::now(),
        })
    }

    fn reserve_cmd(id: ProductId, qty: u64) -> ProductCommand {
        ProductCommand::ReserveStock(ReserveStock {
            product_id: id,
            pool: StockPool::Local,
            quantity: qty,
            occurred_at: Utc::now(),
        })
    }

    fn make(id: AggregateId) -> Product {
        Product::empty(ProductId::new(id))
    }

    /// Rejects the first `failures` appends with a concurrency error.
    struct FlakyStore {
        inner: InMemoryEventStore,
        failures: AtomicU32,
    }

    impl EventStore for FlakyStore {
        fn append(
            &self,
            events: Vec<UncommittedEvent>,
            expected_version: ExpectedVersion,
        ) -> Result<Vec<StoredEvent>, EventStoreError> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(EventStoreError::Concurrency("injected".to_string()));
            }
            self.inner.append(events, expected_version)
        }

        fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
            self.inner.load_stream(aggregate_id)
        }
    }

    #[test]
    fn dispatch_returns_aggregate_after_new_events() {
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let sub = bus.subscribe();
        let dispatcher = CommandDispatcher::new(InMemoryEventStore::new(), bus);
        let id = ProductId::new(AggregateId::new());

        dispatcher.dispatch(id.0, PRODUCT, list_cmd(id, 5), make).unwrap();
        let committed = dispatcher.dispatch(id.0, PRODUCT, reserve_cmd(id, 2), make).unwrap();

        assert_eq!(committed.aggregate.local_stock(), 3);
        assert_eq!(committed.aggregate.version(), 2);
        assert_eq!(committed.events[0].sequence_number, 2);

        assert_eq!(sub.try_recv().unwrap().sequence_number(), 1);
        assert_eq!(sub.try_recv().unwrap().sequence_number(), 2);
    }

    #[test]
    fn domain_rejection_appends_nothing() {
        let dispatcher = CommandDispatcher::new(InMemoryEventStore::new(), Bus::default());
        let id = ProductId::new(AggregateId::new());
        dispatcher.dispatch(id.0, PRODUCT, list_cmd(id, 1), make).unwrap();

        let err = dispatcher.dispatch(id.0, PRODUCT, reserve_cmd(id, 2), make).unwrap_err();
        assert!(matches!(err, DispatchError::Domain(DomainError::InsufficientStock { .. })));
        assert_eq!(dispatcher.store().load_stream(id.0).unwrap().len(), 1);
    }

    #[test]
    fn stale_appends_are_retried_from_a_fresh_load() {
        let store = FlakyStore {
            inner: InMemoryEventStore::new(),
            failures: AtomicU32::new(0),
        };
        let dispatcher = CommandDispatcher::new(store, Bus::default()).with_max_retries(3);
        let id = ProductId::new(AggregateId::new());
        dispatcher.dispatch(id.0, PRODUCT, list_cmd(id, 5), make).unwrap();

        dispatcher.store().failures.store(3, Ordering::SeqCst);
        let committed = dispatcher.dispatch(id.0, PRODUCT, reserve_cmd(id, 1), make).unwrap();
        assert_eq!(committed.aggregate.local_stock(), 4);
    }

    #[test]
    fn exhausted_retries_surface_as_conflict() {
        let store = FlakyStore {
            inner: InMemoryEventStore::new(),
            failures: AtomicU32::new(0),
        };
        let dispatcher = CommandDispatcher::new(store, Bus::default()).with_max_retries(2);
        let id = ProductId::new(AggregateId::new());
        dispatcher.dispatch(id.0, PRODUCT, list_cmd(id, 5), make).unwrap();

        dispatcher.store().failures.store(10, Ordering::SeqCst);
        let err = dispatcher.dispatch(id.0, PRODUCT, reserve_cmd(id, 1), make).unwrap_err();
        assert!(matches!(err, DispatchError::Conflict { attempts: 3, .. }));
    }

    #[test]
    fn concurrent_reservations_never_oversell() {
        let dispatcher = Arc::new(CommandDispatcher::new(InMemoryEventStore::new(), Bus::default()));
        let id = ProductId::new(AggregateId::new());
        dispatcher.dispatch(id.0, PRODUCT, list_cmd(id, 10), make).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let d = dispatcher.clone();
                std::thread::spawn(move || d.dispatch(id.0, PRODUCT, reserve_cmd(id, 3), make).is_ok())
            })
            .collect();
        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(successes, 3);

        let product: Product = dispatcher.load(id.0, PRODUCT, make).unwrap();
        assert_eq!(product.local_stock(), 1);
    }

    #[test]
    fn rehydrate_can_stop_at_a_sequence_number() {
        let dispatcher = CommandDispatcher::new(InMemoryEventStore::new(), Bus::default());
        let id = ProductId::new(AggregateId::new());
        dispatcher.dispatch(id.0, PRODUCT, list_cmd(id, 5), make).unwrap();
        dispatcher.dispatch(id.0, PRODUCT, reserve_cmd(id, 2), make).unwrap();

        let at_listing: Product = rehydrate(dispatcher.store(), id.0, PRODUCT, Some(1), make).unwrap();
        assert_eq!(at_listing.local_stock(), 5);
    }

    #[test]
    fn stream_of_another_type_reads_as_not_found() {
        let dispatcher = CommandDispatcher::new(InMemoryEventStore::new(), Bus::default());
        let id = ProductId::new(AggregateId::new());
        dispatcher.dispatch(id.0, PRODUCT, list_cmd(id, 5), make).unwrap();

        let err = dispatcher.dispatch(id.0, "orders.order", reserve_cmd(id, 1), make).unwrap_err();
        assert!(matches!(err, DispatchError::Domain(DomainError::NotFound)));

        let err = dispatcher.load(id.0, "orders.order", make).unwrap_err();
        assert!(matches!(err, DispatchError::Domain(DomainError::NotFound)));
        assert_eq!(dispatcher.store().load_stream(id.0).unwrap().len(), 1);
    }

    #[test]
    fn stream_locks_are_released_after_use() {
        let dispatcher = Arc::new(CommandDispatcher::new(InMemoryEventStore::new(), Bus::default()));

        for _ in 0..1_000 {
            let missing = ProductId::new(AggregateId::new());
            let err = dispatcher
                .dispatch(missing.0, PRODUCT, reserve_cmd(missing, 1), make)
                .unwrap_err();
            assert!(matches!(err, DispatchError::Domain(DomainError::NotFound)));
        }
        assert_eq!(dispatcher.tracked_streams(), 0);

        let id = ProductId::new(AggregateId::new());
        dispatcher.dispatch(id.0, PRODUCT, list_cmd(id, 100), make).unwrap();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let d = dispatcher.clone();
                std::thread::spawn(move || {
                    for _ in 0..5 {
                        d.dispatch(id.0, PRODUCT, reserve_cmd(id, 1), make).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(dispatcher.tracked_streams(), 0);
        let product: Product = dispatcher.load(id.0, PRODUCT, make).unwrap();
        assert_eq!(product.local_stock(), 60);
    }
}
