//! Transfer orchestrator: validates, numbers, and executes inter-location
//! transfer orders on top of the transfer aggregate and the stock movement
//! primitive.
//!
//! Completion policy: movement failures are hard failures. The first line
//! whose source decrement fails aborts the completion; lines already moved
//! are reversed, the order stays `InProgress`, and the shortfall is surfaced
//! to the caller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{error, warn};

use stockyard_core::{AggregateId, DomainError, ProductId, UserId};
use stockyard_events::{Command, EventBus, EventEnvelope};
use stockyard_ledger::StockRecordId;
use stockyard_locations::{LocationDirectory, LocationId};
use stockyard_transfers::{
    ApproveTransfer, CancelTransfer, CompleteTransfer, OpenTransfer, TRANSFER_ORDER_AGGREGATE_TYPE,
    TransferCommand, TransferLineSpec, TransferOrder, TransferOrderId, TransferStatus,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::{EventStore, StoredEvent};
use crate::projections::{StockRecordView, TransferOrderView, TransferOrdersProjection};
use crate::read_model::ReadStore;
use crate::services::stock::StockLedgerService;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("unknown location: {0}")]
    UnknownLocation(LocationId),

    #[error("transfer order not found")]
    NotFound,

    #[error("transfer is {status:?}, expected {expected:?}")]
    InvalidStatus {
        status: TransferStatus,
        expected: TransferStatus,
    },

    /// Requested quantity exceeds the source location's availability.
    #[error(
        "cannot transfer product {product_id} from {location_name}: requested {requested}, available {available}"
    )]
    InsufficientSource {
        product_id: ProductId,
        location_name: String,
        available: i64,
        requested: i64,
    },

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Per-day sequential transfer numbers (`TRF-YYYYMMDD-NNNN`).
///
/// Counters are process-local; `next` takes the number of transfers already
/// issued for the day so the sequence continues across restarts.
#[derive(Debug, Default)]
pub struct TransferNumberGenerator {
    counters: Mutex<HashMap<NaiveDate, u32>>,
}

impl TransferNumberGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self, day: NaiveDate, issued_so_far: u32) -> String {
        let mut counters = match self.counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let counter = counters.entry(day).or_insert(0);
        *counter = (*counter).max(issued_so_far) + 1;
        format!("TRF-{}-{:04}", day.format("%Y%m%d"), counter)
    }
}

/// Orchestrates transfer order lifecycles and the stock movements they imply.
pub struct TransferOrchestrator<S, B, RL, RT>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    RL: ReadStore<StockRecordId, StockRecordView>,
    RT: ReadStore<TransferOrderId, TransferOrderView>,
{
    dispatcher: CommandDispatcher<S, B>,
    stock: Arc<StockLedgerService<S, B, RL>>,
    transfers: Arc<TransferOrdersProjection<RT>>,
    directory: Arc<dyn LocationDirectory>,
    numbers: TransferNumberGenerator,
    max_attempts: u32,
}

impl<S, B, RL, RT> TransferOrchestrator<S, B, RL, RT>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    RL: ReadStore<StockRecordId, StockRecordView>,
    RT: ReadStore<TransferOrderId, TransferOrderView>,
{
    pub fn new(
        dispatcher: CommandDispatcher<S, B>,
        stock: Arc<StockLedgerService<S, B, RL>>,
        transfers: Arc<TransferOrdersProjection<RT>>,
        directory: Arc<dyn LocationDirectory>,
    ) -> Self {
        Self {
            dispatcher,
            stock,
            transfers,
            directory,
            numbers: TransferNumberGenerator::new(),
            max_attempts: 3,
        }
    }

    /// Read access to the transfer-orders projection.
    pub fn transfers(&self) -> &TransferOrdersProjection<RT> {
        &self.transfers
    }

    fn dispatch_transfer(&self, command: TransferCommand) -> Result<Vec<StoredEvent>, DispatchError> {
        let transfer_id = command.transfer_id();
        let committed = self.dispatcher.dispatch_with_retry(
            command.target_aggregate_id(),
            TRANSFER_ORDER_AGGREGATE_TYPE,
            command,
            self.max_attempts,
            |id| TransferOrder::empty(TransferOrderId::new(id)),
        )?;

        for stored in &committed {
            if let Err(err) = self.transfers.apply_envelope(&stored.to_envelope()) {
                warn!(transfer = %transfer_id, error = %err, "failed to apply committed transfer event");
            }
        }

        Ok(committed)
    }

    /// Open a transfer in `Pending`.
    ///
    /// Both endpoints are resolved through the location directory and every
    /// line is validated against the source's current availability; a
    /// shortfall rejects the whole request with no state mutation.
    pub fn create_transfer(
        &self,
        from_id: LocationId,
        to_id: LocationId,
        lines: Vec<TransferLineSpec>,
        requested_at: DateTime<Utc>,
    ) -> Result<TransferOrderView, TransferError> {
        let from = self
            .directory
            .get(from_id)
            .ok_or(TransferError::UnknownLocation(from_id))?;
        let to = self
            .directory
            .get(to_id)
            .ok_or(TransferError::UnknownLocation(to_id))?;

        for line in &lines {
            let available = self
                .stock
                .levels()
                .get_pair(line.product_id, from_id)
                .map(|view| view.available)
                .unwrap_or(0);
            if available < line.quantity {
                return Err(TransferError::InsufficientSource {
                    product_id: line.product_id,
                    location_name: from.name().to_string(),
                    available,
                    requested: line.quantity,
                });
            }
        }

        let day = requested_at.date_naive();
        let transfer_number = self
            .numbers
            .next(day, self.transfers.count_for_day(day) as u32);
        let transfer_id = TransferOrderId::new(AggregateId::new());

        self.dispatch_transfer(TransferCommand::OpenTransfer(OpenTransfer {
            transfer_id,
            transfer_number,
            from: from.to_ref(),
            to: to.to_ref(),
            lines,
            occurred_at: requested_at,
        }))?;

        self.transfers
            .get(&transfer_id)
            .ok_or(TransferError::NotFound)
    }

    /// Pending → InProgress.
    pub fn approve_transfer(
        &self,
        transfer_id: TransferOrderId,
        approver: UserId,
        at: DateTime<Utc>,
    ) -> Result<(), TransferError> {
        self.dispatch_transfer(TransferCommand::ApproveTransfer(ApproveTransfer {
            transfer_id,
            approver,
            occurred_at: at,
        }))?;
        Ok(())
    }

    /// Execute every line's movement and mark the order `Completed`.
    pub fn complete_transfer(
        &self,
        transfer_id: TransferOrderId,
        at: DateTime<Utc>,
    ) -> Result<(), TransferError> {
        let view = self
            .transfers
            .get(&transfer_id)
            .ok_or(TransferError::NotFound)?;
        if view.status != TransferStatus::InProgress {
            return Err(TransferError::InvalidStatus {
                status: view.status,
                expected: TransferStatus::InProgress,
            });
        }

        let source = self
            .directory
            .get(view.from.id)
            .ok_or(TransferError::UnknownLocation(view.from.id))?;
        let destination = self
            .directory
            .get(view.to.id)
            .ok_or(TransferError::UnknownLocation(view.to.id))?;

        let mut moved: Vec<(ProductId, i64)> = Vec::new();
        for line in &view.lines {
            match self.stock.move_stock(
                line.product_id,
                view.from.id,
                &destination,
                line.requested,
                at,
            ) {
                Ok(()) => moved.push((line.product_id, line.requested)),
                Err(err) => {
                    // Stock changed between validation and execution. Reverse
                    // the lines already moved and surface the shortfall; the
                    // order stays InProgress.
                    for (product_id, quantity) in moved.iter().rev() {
                        if let Err(reversal) = self.stock.move_stock(
                            *product_id,
                            view.to.id,
                            &source,
                            *quantity,
                            at,
                        ) {
                            error!(
                                transfer = %transfer_id,
                                product = %product_id,
                                error = %reversal,
                                "failed to reverse movement after aborted completion"
                            );
                        }
                    }
                    return Err(match err.as_domain() {
                        Some(DomainError::InsufficientStock {
                            available,
                            requested,
                        }) => TransferError::InsufficientSource {
                            product_id: line.product_id,
                            location_name: view.from.name.clone(),
                            available: *available,
                            requested: *requested,
                        },
                        _ => TransferError::Dispatch(err),
                    });
                }
            }
        }

        self.dispatch_transfer(TransferCommand::CompleteTransfer(CompleteTransfer {
            transfer_id,
            occurred_at: at,
        }))?;
        Ok(())
    }

    /// Cancel from any non-Completed state.
    pub fn cancel_transfer(
        &self,
        transfer_id: TransferOrderId,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<(), TransferError> {
        self.dispatch_transfer(TransferCommand::CancelTransfer(CancelTransfer {
            transfer_id,
            reason,
            occurred_at: at,
        }))?;
        Ok(())
    }
}
