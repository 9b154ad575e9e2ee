//! Infrastructure: event store, command dispatch, read models, and the
//! orchestration services that tie the ledger, allocation, and transfer
//! domains together.

pub mod command_dispatcher;
pub mod event_store;
pub mod projections;
pub mod read_model;
pub mod saga;
pub mod services;
pub mod workers;

#[cfg(test)]
mod integration_tests;
