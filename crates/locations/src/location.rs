use serde::{Deserialize, Serialize};

use stockyard_core::{AggregateId, DomainError, DomainResult, Entity};

/// Location identifier (warehouse or shop).
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LocationId(pub AggregateId);

impl LocationId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for LocationId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Location kind: a warehouse or a retail shop.
///
/// Both kinds share the same stock-record shape; the kind only matters for
/// display and for transfer endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationKind {
    Warehouse,
    Shop,
}

impl core::fmt::Display for LocationKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LocationKind::Warehouse => f.write_str("warehouse"),
            LocationKind::Shop => f.write_str("shop"),
        }
    }
}

/// A physical stock-holding location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    id: LocationId,
    kind: LocationKind,
    name: String,
}

impl Location {
    pub fn new(id: LocationId, kind: LocationKind, name: impl Into<String>) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("location name cannot be empty"));
        }
        Ok(Self { id, kind, name })
    }

    pub fn warehouse(id: LocationId, name: impl Into<String>) -> DomainResult<Self> {
        Self::new(id, LocationKind::Warehouse, name)
    }

    pub fn shop(id: LocationId, name: impl Into<String>) -> DomainResult<Self> {
        Self::new(id, LocationKind::Shop, name)
    }

    pub fn id_typed(&self) -> LocationId {
        self.id
    }

    pub fn kind(&self) -> LocationKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Snapshot of this location for embedding in other aggregates.
    pub fn to_ref(&self) -> LocationRef {
        LocationRef {
            id: self.id,
            kind: self.kind,
            name: self.name.clone(),
        }
    }
}

impl Entity for Location {
    type Id = LocationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Denormalized location snapshot embedded in transfer orders and messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationRef {
    pub id: LocationId,
    pub kind: LocationKind,
    pub name: String,
}

impl stockyard_core::ValueObject for LocationRef {}
