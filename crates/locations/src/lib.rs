//! Location model: warehouses and shops, modeled uniformly, plus the
//! location-lookup collaborator used by the ledger and transfer workflows.

pub mod directory;
pub mod location;

pub use directory::{InMemoryLocationDirectory, LocationDirectory};
pub use location::{Location, LocationId, LocationKind, LocationRef};
