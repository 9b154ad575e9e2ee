//! Disposable read-model storage.

mod store;

pub use store::{InMemoryReadStore, ReadStore};
