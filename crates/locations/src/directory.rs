//! Location-lookup collaborator.
//!
//! Workflows that accept raw location ids (transfer creation, stock
//! initialization) resolve them here to validate existence and obtain the
//! display name/kind.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use stockyard_core::{DomainError, DomainResult};

use crate::location::{Location, LocationId};

/// Read/register access to the set of known locations.
pub trait LocationDirectory: Send + Sync {
    /// Register a new location. Duplicate ids are a conflict.
    fn register(&self, location: Location) -> DomainResult<()>;

    /// Look up a location, `None` when unknown.
    fn get(&self, id: LocationId) -> Option<Location>;

    /// All known locations (unspecified order).
    fn list(&self) -> Vec<Location>;

    /// Resolve a location that callers expect to exist.
    fn resolve(&self, id: LocationId) -> DomainResult<Location> {
        self.get(id)
            .ok_or_else(|| DomainError::validation(format!("unknown location: {id}")))
    }
}

impl<D> LocationDirectory for Arc<D>
where
    D: LocationDirectory + ?Sized,
{
    fn register(&self, location: Location) -> DomainResult<()> {
        (**self).register(location)
    }

    fn get(&self, id: LocationId) -> Option<Location> {
        (**self).get(id)
    }

    fn list(&self) -> Vec<Location> {
        (**self).list()
    }
}

/// In-memory directory for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryLocationDirectory {
    inner: RwLock<HashMap<LocationId, Location>>,
}

impl InMemoryLocationDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocationDirectory for InMemoryLocationDirectory {
    fn register(&self, location: Location) -> DomainResult<()> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| DomainError::invariant("location directory lock poisoned"))?;

        let id = location.id_typed();
        if map.contains_key(&id) {
            return Err(DomainError::conflict(format!(
                "location {id} is already registered"
            )));
        }

        map.insert(id, location);
        Ok(())
    }

    fn get(&self, id: LocationId) -> Option<Location> {
        let map = self.inner.read().ok()?;
        map.get(&id).cloned()
    }

    fn list(&self) -> Vec<Location> {
        match self.inner.read() {
            Ok(map) => map.values().cloned().collect(),
            Err(_) => vec![],
        }
    }
}
