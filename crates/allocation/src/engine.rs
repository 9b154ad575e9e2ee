use serde::{Deserialize, Serialize};

use stockyard_core::{DomainError, DomainResult, ProductId, ValueObject};
use stockyard_locations::LocationId;

/// Per-location availability snapshot fed into the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub location_id: LocationId,
    pub location_name: String,
    pub available: i64,
}

impl ValueObject for StockLevel {}

/// One leg of an allocation: how much to take from which location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub location_id: LocationId,
    pub location_name: String,
    pub allocated: i64,
    /// Availability observed at allocation time (for shortfall messages).
    pub available_at_allocation: i64,
}

impl ValueObject for Allocation {}

/// Outcome of an allocation request. Transient — never persisted.
///
/// Invariant: `sum(allocated) + unallocated == requested quantity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationResult {
    pub success: bool,
    pub allocations: Vec<Allocation>,
    pub unallocated: i64,
    pub message: String,
}

impl AllocationResult {
    /// Total quantity covered by the proposed allocations.
    pub fn allocated_total(&self) -> i64 {
        self.allocations.iter().map(|a| a.allocated).sum()
    }
}

/// Decide how to split `requested` units of a product across locations.
///
/// Greedy, advisory, deterministic:
/// 1. only locations with `available > 0` are candidates;
/// 2. a preferred location (when given and stocked) is consumed first, capped
///    at its availability;
/// 3. the rest are consumed in descending-availability order, ties broken by
///    location id;
/// 4. `success` iff nothing is left unallocated.
pub fn allocate(
    product_id: ProductId,
    requested: i64,
    preferred: Option<LocationId>,
    levels: &[StockLevel],
) -> DomainResult<AllocationResult> {
    if requested <= 0 {
        return Err(DomainError::validation(
            "requested quantity must be positive",
        ));
    }

    let mut candidates: Vec<&StockLevel> = levels.iter().filter(|l| l.available > 0).collect();
    if candidates.is_empty() {
        return Ok(AllocationResult {
            success: false,
            allocations: Vec::new(),
            unallocated: requested,
            message: format!("no stock available for product {product_id}"),
        });
    }

    candidates.sort_by(|a, b| {
        b.available
            .cmp(&a.available)
            .then_with(|| a.location_id.cmp(&b.location_id))
    });

    let mut remaining = requested;
    let mut allocations = Vec::new();

    if let Some(preferred_id) = preferred {
        if let Some(level) = candidates.iter().find(|l| l.location_id == preferred_id) {
            let take = remaining.min(level.available);
            allocations.push(Allocation {
                location_id: level.location_id,
                location_name: level.location_name.clone(),
                allocated: take,
                available_at_allocation: level.available,
            });
            remaining -= take;
        }
    }

    for level in &candidates {
        if remaining == 0 {
            break;
        }
        if Some(level.location_id) == preferred {
            continue;
        }
        let take = remaining.min(level.available);
        allocations.push(Allocation {
            location_id: level.location_id,
            location_name: level.location_name.clone(),
            allocated: take,
            available_at_allocation: level.available,
        });
        remaining -= take;
    }

    let success = remaining == 0;
    let message = if success {
        format!(
            "allocated {requested} units of product {product_id} across {} location(s)",
            allocations.len()
        )
    } else {
        format!(
            "product {product_id}: requested {requested}, allocatable {}, short by {remaining}",
            requested - remaining
        )
    };

    Ok(AllocationResult {
        success,
        allocations,
        unallocated: remaining,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use stockyard_core::AggregateId;
    use uuid::Uuid;

    fn location(seed: u128) -> LocationId {
        LocationId::new(AggregateId::from_uuid(Uuid::from_u128(seed)))
    }

    fn level(id: LocationId, name: &str, available: i64) -> StockLevel {
        StockLevel {
            location_id: id,
            location_name: name.to_string(),
            available,
        }
    }

    #[test]
    fn preferred_location_is_consumed_first() {
        // Warehouse A available=10, Warehouse B available=5; allocate 12 preferring B.
        let a = location(1);
        let b = location(2);
        let levels = vec![level(a, "Warehouse A", 10), level(b, "Warehouse B", 5)];

        let result = allocate(ProductId::new(), 12, Some(b), &levels).unwrap();

        assert!(result.success);
        assert_eq!(result.unallocated, 0);
        assert_eq!(result.allocations.len(), 2);
        assert_eq!(result.allocations[0].location_id, b);
        assert_eq!(result.allocations[0].allocated, 5);
        assert_eq!(result.allocations[0].available_at_allocation, 5);
        assert_eq!(result.allocations[1].location_id, a);
        assert_eq!(result.allocations[1].allocated, 7);
    }

    #[test]
    fn partial_allocation_reports_shortfall() {
        // Total available 15; allocate 20 => unallocated 5, failure.
        let levels = vec![
            level(location(1), "A", 7),
            level(location(2), "B", 5),
            level(location(3), "C", 3),
        ];

        let result = allocate(ProductId::new(), 20, None, &levels).unwrap();

        assert!(!result.success);
        assert_eq!(result.allocated_total(), 15);
        assert_eq!(result.unallocated, 5);
        assert!(result.message.contains("short by 5"));
    }

    #[test]
    fn consumes_largest_locations_first() {
        let small = location(1);
        let big = location(2);
        let levels = vec![level(small, "Small", 2), level(big, "Big", 9)];

        let result = allocate(ProductId::new(), 10, None, &levels).unwrap();

        assert!(result.success);
        assert_eq!(result.allocations[0].location_id, big);
        assert_eq!(result.allocations[0].allocated, 9);
        assert_eq!(result.allocations[1].location_id, small);
        assert_eq!(result.allocations[1].allocated, 1);
    }

    #[test]
    fn ties_break_deterministically_by_location_id() {
        let first = location(1);
        let second = location(2);
        let levels_fwd = vec![level(second, "B", 4), level(first, "A", 4)];
        let levels_rev = vec![level(first, "A", 4), level(second, "B", 4)];

        let fwd = allocate(ProductId::new(), 3, None, &levels_fwd).unwrap();
        let rev = allocate(ProductId::new(), 3, None, &levels_rev).unwrap();

        assert_eq!(fwd.allocations[0].location_id, first);
        assert_eq!(fwd.allocations, rev.allocations);
    }

    #[test]
    fn no_candidates_yields_failed_empty_result() {
        let levels = vec![level(location(1), "Empty", 0)];
        let result = allocate(ProductId::new(), 4, None, &levels).unwrap();

        assert!(!result.success);
        assert!(result.allocations.is_empty());
        assert_eq!(result.unallocated, 4);
    }

    #[test]
    fn exact_fit_from_single_location() {
        let a = location(1);
        let result = allocate(ProductId::new(), 5, None, &[level(a, "A", 5)]).unwrap();

        assert!(result.success);
        assert_eq!(result.allocations.len(), 1);
        assert_eq!(result.allocations[0].allocated, 5);
        assert_eq!(result.unallocated, 0);
    }

    #[test]
    fn unknown_preferred_location_falls_back_to_ordering() {
        let a = location(1);
        let result = allocate(ProductId::new(), 3, Some(location(9)), &[level(a, "A", 5)]).unwrap();

        assert!(result.success);
        assert_eq!(result.allocations[0].location_id, a);
    }

    #[test]
    fn non_positive_request_is_rejected() {
        for requested in [0, -2] {
            let err = allocate(ProductId::new(), requested, None, &[]).unwrap_err();
            assert!(matches!(err, stockyard_core::DomainError::Validation(_)));
        }
    }

    proptest! {
        /// sum(allocated) + unallocated == requested, for any inputs.
        #[test]
        fn allocation_conserves_quantity(
            requested in 1i64..5_000,
            availables in proptest::collection::vec(0i64..500, 0..12),
            prefer_idx in proptest::option::of(0usize..12),
        ) {
            let levels: Vec<StockLevel> = availables
                .iter()
                .enumerate()
                .map(|(i, &available)| level(location(i as u128 + 1), "L", available))
                .collect();
            let preferred = prefer_idx
                .and_then(|i| levels.get(i))
                .map(|l| l.location_id);

            let result = allocate(ProductId::new(), requested, preferred, &levels).unwrap();

            prop_assert_eq!(result.allocated_total() + result.unallocated, requested);
            prop_assert_eq!(result.success, result.unallocated == 0);
            for alloc in &result.allocations {
                prop_assert!(alloc.allocated > 0);
                prop_assert!(alloc.allocated <= alloc.available_at_allocation);
            }
        }
    }
}
