//! Allocation engine: pure computation deciding how a requested quantity is
//! split across locations' available stock, plus the read-only fulfillment
//! validator. Neither mutates state — callers must separately reserve the
//! returned allocations.

pub mod engine;
pub mod validator;

pub use engine::{Allocation, AllocationResult, StockLevel, allocate};
pub use validator::{OrderLine, can_fulfill};
