use serde::{Deserialize, Serialize};

use stockyard_core::{ProductId, ValueObject};

/// A requested (product, quantity) pair, e.g. one sale line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: i64,
}

impl ValueObject for OrderLine {}

/// Read-only aggregate check: can total available stock cover every line?
///
/// `total_available` reports the sum of `available` across all locations for
/// a product. Returns `false` on the first insufficient line. Advisory only:
/// no locking happens here, so the answer can be stale by the time
/// reservations run — `reserve` is the enforcement point.
pub fn can_fulfill<F>(lines: &[OrderLine], mut total_available: F) -> bool
where
    F: FnMut(ProductId) -> i64,
{
    lines
        .iter()
        .all(|line| total_available(line.product_id) >= line.quantity)
}
