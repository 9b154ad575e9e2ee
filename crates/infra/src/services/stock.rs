//! Stock ledger service: the write-side entry point for every stock
//! mutation (initialize, receive, adjust, reserve/confirm/release, move),
//! plus the availability queries built on the stock-levels projection.
//!
//! All mutations go through the command dispatcher's bounded conflict retry,
//! so callers see linearizable per-record updates.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{error, warn};

use stockyard_allocation::{AllocationResult, OrderLine, allocate, can_fulfill};
use stockyard_core::{DomainError, DomainResult, ProductId};
use stockyard_events::{Command, EventBus, EventEnvelope};
use stockyard_ledger::{
    AdjustStock, ConfirmReservation, InitializeStock, LedgerCommand, ProductRef, ReceiveStock,
    ReleaseReservation, ReserveStock, STOCK_RECORD_AGGREGATE_TYPE, StockRecord, StockRecordId,
};
use stockyard_locations::{Location, LocationId};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::{EventStore, StoredEvent};
use crate::projections::{StockLevelsProjection, StockRecordView};
use crate::read_model::ReadStore;

/// Notification emitted after a successful stock receipt (e.g. towards an
/// accounting collaborator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptNote {
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub quantity: i64,
    pub unit_cost: u64,
}

/// Receipt listener. Failures are logged and swallowed: the receipt itself
/// stands regardless of downstream bookkeeping.
pub type ReceiptHook = Box<dyn Fn(&ReceiptNote) -> Result<(), String> + Send + Sync>;

/// Write-side service over stock records.
pub struct StockLedgerService<S, B, R>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    R: ReadStore<StockRecordId, StockRecordView>,
{
    dispatcher: CommandDispatcher<S, B>,
    levels: Arc<StockLevelsProjection<R>>,
    receipt_hook: Option<ReceiptHook>,
    max_attempts: u32,
}

impl<S, B, R> StockLedgerService<S, B, R>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    R: ReadStore<StockRecordId, StockRecordView>,
{
    pub fn new(dispatcher: CommandDispatcher<S, B>, levels: Arc<StockLevelsProjection<R>>) -> Self {
        Self {
            dispatcher,
            levels,
            receipt_hook: None,
            max_attempts: 3,
        }
    }

    pub fn with_receipt_hook(mut self, hook: ReceiptHook) -> Self {
        self.receipt_hook = Some(hook);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Read access to the stock-levels projection.
    pub fn levels(&self) -> &StockLevelsProjection<R> {
        &self.levels
    }

    fn dispatch_record(&self, command: LedgerCommand) -> Result<Vec<StoredEvent>, DispatchError> {
        let record_id = command.record_id();
        let committed = self.dispatcher.dispatch_with_retry(
            command.target_aggregate_id(),
            STOCK_RECORD_AGGREGATE_TYPE,
            command,
            self.max_attempts,
            |id| StockRecord::empty(StockRecordId::new(id)),
        )?;

        // Keep the local read model current without waiting for a bus worker;
        // the projection's cursor makes the double-apply a no-op.
        for stored in &committed {
            if let Err(err) = self.levels.apply_envelope(&stored.to_envelope()) {
                warn!(record = %record_id, error = %err, "failed to apply committed ledger event");
            }
        }

        Ok(committed)
    }

    /// Create the zero-quantity record for a product×location pair.
    pub fn initialize_stock(
        &self,
        product: ProductRef,
        location: &Location,
        at: DateTime<Utc>,
    ) -> Result<StockRecordId, DispatchError> {
        let record_id = StockRecordId::for_pair(product.product_id, location.id_typed());
        self.dispatch_record(LedgerCommand::InitializeStock(InitializeStock {
            record_id,
            product,
            location_id: location.id_typed(),
            location_name: location.name().to_string(),
            occurred_at: at,
        }))?;
        Ok(record_id)
    }

    /// Initialize the record if absent; existing pairs are left untouched.
    pub fn ensure_initialized(
        &self,
        product: ProductRef,
        location: &Location,
        at: DateTime<Utc>,
    ) -> Result<StockRecordId, DispatchError> {
        let record_id = StockRecordId::for_pair(product.product_id, location.id_typed());
        if self.levels.get(&record_id).is_some() {
            return Ok(record_id);
        }
        match self.initialize_stock(product, location, at) {
            Ok(id) => Ok(id),
            // Lost an initialization race; the record exists now.
            Err(DispatchError::Domain(DomainError::Conflict(_))) => Ok(record_id),
            Err(err) => Err(err),
        }
    }

    /// Create zero-quantity records for a product at every given location,
    /// skipping pairs that already exist.
    pub fn initialize_product_at(
        &self,
        product: &ProductRef,
        locations: &[Location],
        at: DateTime<Utc>,
    ) -> Result<Vec<StockRecordId>, DispatchError> {
        locations
            .iter()
            .map(|location| self.ensure_initialized(product.clone(), location, at))
            .collect()
    }

    /// Inbound stock (e.g. purchase receipt): increases availability and
    /// recomputes the weighted average cost, creating the record when absent.
    pub fn receive_stock(
        &self,
        product: ProductRef,
        location: &Location,
        quantity: i64,
        unit_cost: u64,
        at: DateTime<Utc>,
    ) -> Result<StockRecordId, DispatchError> {
        let product_id = product.product_id;
        let record_id = self.ensure_initialized(product, location, at)?;
        self.dispatch_record(LedgerCommand::ReceiveStock(ReceiveStock {
            record_id,
            quantity,
            unit_cost,
            occurred_at: at,
        }))?;

        if let Some(hook) = &self.receipt_hook {
            let note = ReceiptNote {
                product_id,
                location_id: location.id_typed(),
                quantity,
                unit_cost,
            };
            // Explicit partial-failure policy: the receipt stands even when
            // downstream bookkeeping fails.
            if let Err(err) = hook(&note) {
                warn!(
                    product = %note.product_id,
                    location = %note.location_id,
                    error = %err,
                    "receipt notification failed; stock receipt kept"
                );
            }
        }

        Ok(record_id)
    }

    /// Signed manual correction of available quantity. Fails when the result
    /// would go negative.
    pub fn adjust(
        &self,
        product_id: ProductId,
        location_id: LocationId,
        delta: i64,
        at: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        let record_id = StockRecordId::for_pair(product_id, location_id);
        self.dispatch_record(LedgerCommand::AdjustStock(AdjustStock {
            record_id,
            delta,
            occurred_at: at,
        }))?;
        Ok(())
    }

    /// Reserve quantity (available → reserved).
    pub fn reserve(
        &self,
        product_id: ProductId,
        location_id: LocationId,
        quantity: i64,
        at: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        let record_id = StockRecordId::for_pair(product_id, location_id);
        self.dispatch_record(LedgerCommand::ReserveStock(ReserveStock {
            record_id,
            quantity,
            occurred_at: at,
        }))?;
        Ok(())
    }

    /// Finalize a reservation as consumed stock.
    pub fn confirm(
        &self,
        product_id: ProductId,
        location_id: LocationId,
        quantity: i64,
        at: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        let record_id = StockRecordId::for_pair(product_id, location_id);
        self.dispatch_record(LedgerCommand::ConfirmReservation(ConfirmReservation {
            record_id,
            quantity,
            occurred_at: at,
        }))?;
        Ok(())
    }

    /// Undo a reservation (reserved → available).
    pub fn release(
        &self,
        product_id: ProductId,
        location_id: LocationId,
        quantity: i64,
        at: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        let record_id = StockRecordId::for_pair(product_id, location_id);
        self.dispatch_record(LedgerCommand::ReleaseReservation(ReleaseReservation {
            record_id,
            quantity,
            occurred_at: at,
        }))?;
        Ok(())
    }

    /// Move quantity between two locations, carrying the source's average
    /// cost to the destination.
    ///
    /// The source decrement happens first and fails loudly on insufficiency,
    /// before the destination is touched. If the destination-side increase
    /// fails, the source decrement is compensated.
    pub fn move_stock(
        &self,
        product_id: ProductId,
        from: LocationId,
        to: &Location,
        quantity: i64,
        at: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        if quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive").into());
        }

        let source = self
            .levels
            .get_pair(product_id, from)
            .ok_or(DispatchError::Domain(DomainError::NotFound))?;
        let unit_cost = source.average_unit_cost;
        let product = ProductRef {
            product_id,
            name: source.product_name,
            sku: source.product_sku,
        };

        self.adjust(product_id, from, -quantity, at)?;

        let destination = match self.ensure_initialized(product, to, at) {
            Ok(record_id) => record_id,
            Err(err) => {
                self.return_to_source(product_id, from, quantity, at);
                return Err(err);
            }
        };

        if let Err(err) = self.dispatch_record(LedgerCommand::ReceiveStock(ReceiveStock {
            record_id: destination,
            quantity,
            unit_cost,
            occurred_at: at,
        })) {
            self.return_to_source(product_id, from, quantity, at);
            return Err(err);
        }

        Ok(())
    }

    fn return_to_source(
        &self,
        product_id: ProductId,
        from: LocationId,
        quantity: i64,
        at: DateTime<Utc>,
    ) {
        if let Err(err) = self.adjust(product_id, from, quantity, at) {
            error!(
                product = %product_id,
                location = %from,
                quantity,
                error = %err,
                "failed to return stock to source after aborted movement"
            );
        }
    }

    /// Per-location availability for a product.
    pub fn query_available(&self, product_id: ProductId) -> Vec<(LocationId, i64)> {
        self.levels.query_available(product_id)
    }

    /// Sum of availability across all locations for a product.
    pub fn total_available(&self, product_id: ProductId) -> i64 {
        self.levels.total_available(product_id)
    }

    /// Advisory aggregate check over order lines; `reserve` stays the
    /// enforcement point.
    pub fn can_fulfill(&self, lines: &[OrderLine]) -> bool {
        can_fulfill(lines, |product_id| self.levels.total_available(product_id))
    }

    /// Advisory allocation over the current availability snapshot.
    pub fn allocate(
        &self,
        product_id: ProductId,
        quantity: i64,
        preferred: Option<LocationId>,
    ) -> DomainResult<AllocationResult> {
        allocate(
            product_id,
            quantity,
            preferred,
            &self.levels.stock_levels(product_id),
        )
    }
}
