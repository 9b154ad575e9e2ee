//! Sale fulfillment coordinator.
//!
//! Orchestrates the multi-line sale flow:
//!
//! 1. fulfillment validation (advisory hint)
//! 2. allocation per line (every split is kept, not just a primary location)
//! 3. per-location reserve, in sorted (product, location) order
//! 4. confirm on sale completion — or release on failure/abandonment
//!
//! Reservations across records are not atomic, so each successful per-line
//! reservation is recorded as a pending intent; any later failure releases
//! every already-reserved intent before the error is reported. Pending
//! intents carry a deadline, and `sweep_expired` releases overdue ones so
//! abandoned workflows cannot strand reserved stock.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, error, warn};

use stockyard_allocation::OrderLine;
use stockyard_core::{AggregateId, DomainError, ProductId};
use stockyard_events::{EventBus, EventEnvelope};
use stockyard_ledger::StockRecordId;
use stockyard_locations::LocationId;

use crate::command_dispatcher::DispatchError;
use crate::event_store::EventStore;
use crate::projections::StockRecordView;
use crate::read_model::ReadStore;
use crate::services::stock::StockLedgerService;

/// Sale identifier (owned by the calling sale workflow).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SaleId(pub AggregateId);

impl SaleId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for SaleId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// One successfully planned/executed per-location reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationIntent {
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub quantity: i64,
}

/// Reservation state for one in-flight sale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSale {
    pub sale_id: SaleId,
    pub intents: Vec<ReservationIntent>,
    pub reserved_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum SaleFulfillmentError {
    #[error("sale has no lines")]
    EmptySale,

    #[error("sale {0} already has an active reservation")]
    DuplicateSale(SaleId),

    #[error("sale {0} has no active reservation")]
    UnknownSale(SaleId),

    /// Validation hint or allocation said the demand cannot be met.
    #[error("cannot fulfill: {0}")]
    CannotFulfill(String),

    /// A per-location reserve/confirm step failed.
    #[error("reservation step failed for product {product_id} at location {location_id}: {source}")]
    Reservation {
        product_id: ProductId,
        location_id: LocationId,
        #[source]
        source: DispatchError,
    },

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Compensating-transaction coordinator for multi-line sales.
pub struct SaleFulfillmentCoordinator<S, B, R>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    R: ReadStore<StockRecordId, StockRecordView>,
{
    stock: Arc<StockLedgerService<S, B, R>>,
    pending: Mutex<HashMap<SaleId, PendingSale>>,
    reservation_ttl: Duration,
}

impl<S, B, R> SaleFulfillmentCoordinator<S, B, R>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    R: ReadStore<StockRecordId, StockRecordView>,
{
    pub fn new(stock: Arc<StockLedgerService<S, B, R>>, reservation_ttl: Duration) -> Self {
        Self {
            stock,
            pending: Mutex::new(HashMap::new()),
            reservation_ttl,
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<SaleId, PendingSale>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// The sale's active reservation, if any.
    pub fn active_reservation(&self, sale_id: SaleId) -> Option<PendingSale> {
        self.pending().get(&sale_id).cloned()
    }

    /// Reserve stock for every line of a sale.
    ///
    /// On success the sale holds a pending reservation until `confirm_sale`
    /// or `release_sale` (or the expiry sweep) resolves it. On any failure,
    /// already-reserved lines are released before the error is returned.
    pub fn reserve_sale(
        &self,
        sale_id: SaleId,
        lines: &[OrderLine],
        preferred: Option<LocationId>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReservationIntent>, SaleFulfillmentError> {
        if lines.is_empty() {
            return Err(SaleFulfillmentError::EmptySale);
        }
        for line in lines {
            if line.quantity <= 0 {
                return Err(DomainError::validation("line quantity must be positive").into());
            }
        }

        {
            let mut pending = self.pending();
            if pending.contains_key(&sale_id) {
                return Err(SaleFulfillmentError::DuplicateSale(sale_id));
            }
            pending.insert(
                sale_id,
                PendingSale {
                    sale_id,
                    intents: Vec::new(),
                    reserved_at: now,
                    expires_at: now + self.reservation_ttl,
                },
            );
        }

        match self.reserve_lines(lines, preferred, now) {
            Ok(intents) => {
                if let Some(entry) = self.pending().get_mut(&sale_id) {
                    entry.intents = intents.clone();
                }
                Ok(intents)
            }
            Err(err) => {
                self.pending().remove(&sale_id);
                Err(err)
            }
        }
    }

    fn reserve_lines(
        &self,
        lines: &[OrderLine],
        preferred: Option<LocationId>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReservationIntent>, SaleFulfillmentError> {
        // Advisory hint; reserve below is the enforcement point.
        if !self.stock.can_fulfill(lines) {
            return Err(SaleFulfillmentError::CannotFulfill(
                "insufficient total stock for one or more lines".to_string(),
            ));
        }

        let mut planned = Vec::new();
        for line in lines {
            let result = self.stock.allocate(line.product_id, line.quantity, preferred)?;
            if !result.success {
                return Err(SaleFulfillmentError::CannotFulfill(result.message));
            }
            for allocation in result.allocations {
                planned.push(ReservationIntent {
                    product_id: line.product_id,
                    location_id: allocation.location_id,
                    quantity: allocation.allocated,
                });
            }
        }

        // Deterministic multi-record acquisition order.
        planned.sort_by_key(|intent| (intent.product_id, intent.location_id));

        let mut reserved: Vec<ReservationIntent> = Vec::new();
        for intent in &planned {
            if let Err(err) =
                self.stock
                    .reserve(intent.product_id, intent.location_id, intent.quantity, now)
            {
                warn!(
                    product = %intent.product_id,
                    location = %intent.location_id,
                    released = reserved.len(),
                    "reservation failed; releasing already-reserved lines"
                );
                self.release_intents(&reserved, now);
                return Err(SaleFulfillmentError::Reservation {
                    product_id: intent.product_id,
                    location_id: intent.location_id,
                    source: err,
                });
            }
            reserved.push(intent.clone());
        }

        Ok(planned)
    }

    /// Finalize the sale: every reserved quantity is consumed.
    pub fn confirm_sale(
        &self,
        sale_id: SaleId,
        now: DateTime<Utc>,
    ) -> Result<(), SaleFulfillmentError> {
        let entry = self
            .pending()
            .remove(&sale_id)
            .ok_or(SaleFulfillmentError::UnknownSale(sale_id))?;

        for (idx, intent) in entry.intents.iter().enumerate() {
            if let Err(err) =
                self.stock
                    .confirm(intent.product_id, intent.location_id, intent.quantity, now)
            {
                // Park the unconfirmed remainder so the sweep can reclaim it.
                let mut remainder = entry.clone();
                remainder.intents = entry.intents[idx..].to_vec();
                self.pending().insert(sale_id, remainder);
                return Err(SaleFulfillmentError::Reservation {
                    product_id: intent.product_id,
                    location_id: intent.location_id,
                    source: err,
                });
            }
        }

        // Notify the product-level aggregate quantity for each affected product.
        let products: BTreeSet<ProductId> =
            entry.intents.iter().map(|intent| intent.product_id).collect();
        for product_id in products {
            debug!(
                sale = %sale_id,
                product = %product_id,
                total_available = self.stock.total_available(product_id),
                "sale confirmed"
            );
        }

        Ok(())
    }

    /// Abandon the sale: every reserved quantity returns to available.
    pub fn release_sale(
        &self,
        sale_id: SaleId,
        now: DateTime<Utc>,
    ) -> Result<(), SaleFulfillmentError> {
        let entry = self
            .pending()
            .remove(&sale_id)
            .ok_or(SaleFulfillmentError::UnknownSale(sale_id))?;
        self.release_intents(&entry.intents, now);
        Ok(())
    }

    /// The whole sale-creation flow: reserve every line, then confirm.
    pub fn fulfill_sale(
        &self,
        sale_id: SaleId,
        lines: &[OrderLine],
        preferred: Option<LocationId>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReservationIntent>, SaleFulfillmentError> {
        let intents = self.reserve_sale(sale_id, lines, preferred, now)?;
        self.confirm_sale(sale_id, now)?;
        Ok(intents)
    }

    /// Release every pending reservation whose deadline has passed.
    ///
    /// Returns the number of sales swept.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let expired: Vec<PendingSale> = {
            let mut pending = self.pending();
            let ids: Vec<SaleId> = pending
                .values()
                .filter(|sale| sale.expires_at <= now)
                .map(|sale| sale.sale_id)
                .collect();
            ids.iter().filter_map(|id| pending.remove(id)).collect()
        };

        for sale in &expired {
            warn!(
                sale = %sale.sale_id,
                intents = sale.intents.len(),
                "releasing expired reservation"
            );
            self.release_intents(&sale.intents, now);
        }

        expired.len()
    }

    fn release_intents(&self, intents: &[ReservationIntent], now: DateTime<Utc>) {
        for intent in intents.iter().rev() {
            if let Err(err) =
                self.stock
                    .release(intent.product_id, intent.location_id, intent.quantity, now)
            {
                error!(
                    product = %intent.product_id,
                    location = %intent.location_id,
                    error = %err,
                    "compensating release failed"
                );
            }
        }
    }
}
