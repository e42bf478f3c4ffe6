//! Infrastructure layer: event store, command dispatch, read models and the
//! application services of the marketplace (stock ledger, checkout, status
//! transitions, notifications).

pub mod command_dispatcher;
pub mod event_store;
pub mod notifications;
pub mod projections;
pub mod read_model;
pub mod services;
pub mod users;
pub mod workers;

#[cfg(test)]
mod integration_tests;
