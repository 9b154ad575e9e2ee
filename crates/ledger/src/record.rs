use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockyard_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, ProductId, ValueObject,
};
use stockyard_events::Event;
use stockyard_locations::LocationId;

/// Namespace for deriving stock record ids from (product, location) keys.
const STOCK_RECORD_NAMESPACE: Uuid = Uuid::from_u128(0x8c9a_4f02_71d3_4b5e_9f46_2a1c_0d8e_66b1);

/// Stock record identifier: one per (product, location) pair.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StockRecordId(pub AggregateId);

impl StockRecordId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    /// Derive the record id for a (product, location) pair.
    ///
    /// Deterministic: the same pair always maps to the same stream, which is
    /// what enforces "at most one record per (product, location)".
    pub fn for_pair(product_id: ProductId, location_id: LocationId) -> Self {
        let mut key = [0u8; 32];
        key[..16].copy_from_slice(product_id.as_uuid().as_bytes());
        key[16..].copy_from_slice(location_id.0.as_uuid().as_bytes());
        Self(AggregateId::derived(&STOCK_RECORD_NAMESPACE, &key))
    }
}

impl core::fmt::Display for StockRecordId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Denormalized product snapshot carried on the record for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRef {
    pub product_id: ProductId,
    pub name: String,
    pub sku: String,
}

impl ValueObject for ProductRef {}

/// Quantity-weighted average unit cost after an inbound movement.
///
/// Falls back to the incoming unit cost when the combined quantity would be
/// zero (division guard). Costs are in minor currency units; the division
/// truncates.
pub fn weighted_average_cost(old_qty: i64, old_cost: u64, add_qty: i64, add_cost: u64) -> u64 {
    let old_qty = old_qty.max(0) as u128;
    let add_qty = add_qty.max(0) as u128;
    let denom = old_qty + add_qty;
    if denom == 0 {
        return add_cost;
    }
    let total = old_qty * old_cost as u128 + add_qty * add_cost as u128;
    (total / denom) as u64
}

/// Aggregate root: StockRecord.
///
/// Tracks `available` and `reserved` counters for one product at one
/// location. Both counters are never negative; `total()` (= available +
/// reserved) is derived for reporting and never mutated directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockRecord {
    id: StockRecordId,
    product: Option<ProductRef>,
    location_id: Option<LocationId>,
    location_name: String,
    available: i64,
    reserved: i64,
    average_unit_cost: u64,
    last_updated: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl StockRecord {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: StockRecordId) -> Self {
        Self {
            id,
            product: None,
            location_id: None,
            location_name: String::new(),
            available: 0,
            reserved: 0,
            average_unit_cost: 0,
            last_updated: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> StockRecordId {
        self.id
    }

    pub fn product(&self) -> Option<&ProductRef> {
        self.product.as_ref()
    }

    pub fn location_id(&self) -> Option<LocationId> {
        self.location_id
    }

    pub fn location_name(&self) -> &str {
        &self.location_name
    }

    pub fn available(&self) -> i64 {
        self.available
    }

    pub fn reserved(&self) -> i64 {
        self.reserved
    }

    /// Reporting-only derived quantity.
    pub fn total(&self) -> i64 {
        self.available + self.reserved
    }

    pub fn average_unit_cost(&self) -> u64 {
        self.average_unit_cost
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }
}

impl AggregateRoot for StockRecord {
    type Id = StockRecordId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: InitializeStock (zero-quantity record for a product×location pair).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializeStock {
    pub record_id: StockRecordId,
    pub product: ProductRef,
    pub location_id: LocationId,
    pub location_name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReceiveStock (inbound quantity at a unit cost).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveStock {
    pub record_id: StockRecordId,
    pub quantity: i64,
    /// Unit cost in minor currency units.
    pub unit_cost: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReserveStock (available → reserved).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveStock {
    pub record_id: StockRecordId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmReservation (reserved quantity permanently consumed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmReservation {
    pub record_id: StockRecordId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReleaseReservation (undo of reserve).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseReservation {
    pub record_id: StockRecordId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AdjustStock (signed delta on available quantity).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustStock {
    pub record_id: StockRecordId,
    pub delta: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerCommand {
    InitializeStock(InitializeStock),
    ReceiveStock(ReceiveStock),
    ReserveStock(ReserveStock),
    ConfirmReservation(ConfirmReservation),
    ReleaseReservation(ReleaseReservation),
    AdjustStock(AdjustStock),
}

impl LedgerCommand {
    /// Record this command targets.
    pub fn record_id(&self) -> StockRecordId {
        match self {
            LedgerCommand::InitializeStock(cmd) => cmd.record_id,
            LedgerCommand::ReceiveStock(cmd) => cmd.record_id,
            LedgerCommand::ReserveStock(cmd) => cmd.record_id,
            LedgerCommand::ConfirmReservation(cmd) => cmd.record_id,
            LedgerCommand::ReleaseReservation(cmd) => cmd.record_id,
            LedgerCommand::AdjustStock(cmd) => cmd.record_id,
        }
    }
}

impl stockyard_events::Command for LedgerCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        self.record_id().0
    }
}

/// Event: StockInitialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockInitialized {
    pub record_id: StockRecordId,
    pub product: ProductRef,
    pub location_id: LocationId,
    pub location_name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReceived.
///
/// Carries the recomputed average cost so `apply` stays a plain assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReceived {
    pub record_id: StockRecordId,
    pub quantity: i64,
    pub unit_cost: u64,
    pub new_average_cost: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReserved {
    pub record_id: StockRecordId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReservationConfirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationConfirmed {
    pub record_id: StockRecordId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReservationReleased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationReleased {
    pub record_id: StockRecordId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockAdjusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjusted {
    pub record_id: StockRecordId,
    pub delta: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    StockInitialized(StockInitialized),
    StockReceived(StockReceived),
    StockReserved(StockReserved),
    ReservationConfirmed(ReservationConfirmed),
    ReservationReleased(ReservationReleased),
    StockAdjusted(StockAdjusted),
}

impl LedgerEvent {
    /// Record this event belongs to.
    pub fn record_id(&self) -> StockRecordId {
        match self {
            LedgerEvent::StockInitialized(e) => e.record_id,
            LedgerEvent::StockReceived(e) => e.record_id,
            LedgerEvent::StockReserved(e) => e.record_id,
            LedgerEvent::ReservationConfirmed(e) => e.record_id,
            LedgerEvent::ReservationReleased(e) => e.record_id,
            LedgerEvent::StockAdjusted(e) => e.record_id,
        }
    }
}

impl Event for LedgerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LedgerEvent::StockInitialized(_) => "ledger.stock.initialized",
            LedgerEvent::StockReceived(_) => "ledger.stock.received",
            LedgerEvent::StockReserved(_) => "ledger.stock.reserved",
            LedgerEvent::ReservationConfirmed(_) => "ledger.stock.reservation_confirmed",
            LedgerEvent::ReservationReleased(_) => "ledger.stock.reservation_released",
            LedgerEvent::StockAdjusted(_) => "ledger.stock.adjusted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LedgerEvent::StockInitialized(e) => e.occurred_at,
            LedgerEvent::StockReceived(e) => e.occurred_at,
            LedgerEvent::StockReserved(e) => e.occurred_at,
            LedgerEvent::ReservationConfirmed(e) => e.occurred_at,
            LedgerEvent::ReservationReleased(e) => e.occurred_at,
            LedgerEvent::StockAdjusted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for StockRecord {
    type Command = LedgerCommand;
    type Event = LedgerEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            LedgerEvent::StockInitialized(e) => {
                self.id = e.record_id;
                self.product = Some(e.product.clone());
                self.location_id = Some(e.location_id);
                self.location_name = e.location_name.clone();
                self.available = 0;
                self.reserved = 0;
                self.average_unit_cost = 0;
                self.last_updated = Some(e.occurred_at);
                self.created = true;
            }
            LedgerEvent::StockReceived(e) => {
                self.available += e.quantity;
                self.average_unit_cost = e.new_average_cost;
                self.last_updated = Some(e.occurred_at);
            }
            LedgerEvent::StockReserved(e) => {
                self.available -= e.quantity;
                self.reserved += e.quantity;
                self.last_updated = Some(e.occurred_at);
            }
            LedgerEvent::ReservationConfirmed(e) => {
                // Quantity left `available` at reserve time; it is now consumed.
                self.reserved -= e.quantity;
                self.last_updated = Some(e.occurred_at);
            }
            LedgerEvent::ReservationReleased(e) => {
                self.reserved -= e.quantity;
                self.available += e.quantity;
                self.last_updated = Some(e.occurred_at);
            }
            LedgerEvent::StockAdjusted(e) => {
                self.available += e.delta;
                self.last_updated = Some(e.occurred_at);
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            LedgerCommand::InitializeStock(cmd) => self.handle_initialize(cmd),
            LedgerCommand::ReceiveStock(cmd) => self.handle_receive(cmd),
            LedgerCommand::ReserveStock(cmd) => self.handle_reserve(cmd),
            LedgerCommand::ConfirmReservation(cmd) => self.handle_confirm(cmd),
            LedgerCommand::ReleaseReservation(cmd) => self.handle_release(cmd),
            LedgerCommand::AdjustStock(cmd) => self.handle_adjust(cmd),
        }
    }
}

impl StockRecord {
    fn ensure_record_id(&self, record_id: StockRecordId) -> Result<(), DomainError> {
        if self.id != record_id {
            return Err(DomainError::invariant("record_id mismatch"));
        }
        Ok(())
    }

    fn ensure_created(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn ensure_positive(quantity: i64) -> Result<(), DomainError> {
        if quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        Ok(())
    }

    fn handle_initialize(&self, cmd: &InitializeStock) -> Result<Vec<LedgerEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("stock record already exists"));
        }
        self.ensure_record_id(cmd.record_id)?;

        if cmd.product.name.trim().is_empty() {
            return Err(DomainError::validation("product name cannot be empty"));
        }
        if cmd.product.sku.trim().is_empty() {
            return Err(DomainError::validation("product sku cannot be empty"));
        }
        if cmd.location_name.trim().is_empty() {
            return Err(DomainError::validation("location name cannot be empty"));
        }

        Ok(vec![LedgerEvent::StockInitialized(StockInitialized {
            record_id: cmd.record_id,
            product: cmd.product.clone(),
            location_id: cmd.location_id,
            location_name: cmd.location_name.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_receive(&self, cmd: &ReceiveStock) -> Result<Vec<LedgerEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_record_id(cmd.record_id)?;
        Self::ensure_positive(cmd.quantity)?;

        if self.available.checked_add(cmd.quantity).is_none() {
            return Err(DomainError::invariant("available quantity overflow"));
        }

        let new_average_cost = weighted_average_cost(
            self.available,
            self.average_unit_cost,
            cmd.quantity,
            cmd.unit_cost,
        );

        Ok(vec![LedgerEvent::StockReceived(StockReceived {
            record_id: cmd.record_id,
            quantity: cmd.quantity,
            unit_cost: cmd.unit_cost,
            new_average_cost,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reserve(&self, cmd: &ReserveStock) -> Result<Vec<LedgerEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_record_id(cmd.record_id)?;
        Self::ensure_positive(cmd.quantity)?;

        if self.available < cmd.quantity {
            return Err(DomainError::insufficient_stock(self.available, cmd.quantity));
        }

        Ok(vec![LedgerEvent::StockReserved(StockReserved {
            record_id: cmd.record_id,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_confirm(&self, cmd: &ConfirmReservation) -> Result<Vec<LedgerEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_record_id(cmd.record_id)?;
        Self::ensure_positive(cmd.quantity)?;

        if self.reserved < cmd.quantity {
            return Err(DomainError::insufficient_reserved(
                self.reserved,
                cmd.quantity,
            ));
        }

        Ok(vec![LedgerEvent::ReservationConfirmed(
            ReservationConfirmed {
                record_id: cmd.record_id,
                quantity: cmd.quantity,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_release(&self, cmd: &ReleaseReservation) -> Result<Vec<LedgerEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_record_id(cmd.record_id)?;
        Self::ensure_positive(cmd.quantity)?;

        if self.reserved < cmd.quantity {
            return Err(DomainError::insufficient_reserved(
                self.reserved,
                cmd.quantity,
            ));
        }

        Ok(vec![LedgerEvent::ReservationReleased(ReservationReleased {
            record_id: cmd.record_id,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_adjust(&self, cmd: &AdjustStock) -> Result<Vec<LedgerEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_record_id(cmd.record_id)?;

        if cmd.delta == 0 {
            return Err(DomainError::validation("delta cannot be zero"));
        }

        let new_available = self
            .available
            .checked_add(cmd.delta)
            .ok_or_else(|| DomainError::invariant("available quantity overflow"))?;
        if new_available < 0 {
            return Err(DomainError::insufficient_stock(self.available, -cmd.delta));
        }

        Ok(vec![LedgerEvent::StockAdjusted(StockAdjusted {
            record_id: cmd.record_id,
            delta: cmd.delta,
            occurred_at: cmd.occurred_at,
        })])
    }
}
