//! Transfer-orders projection: queryable view of transfer lifecycles, also
//! the source for per-day transfer numbering.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use stockyard_core::{AggregateId, UserId};
use stockyard_events::EventEnvelope;
use stockyard_locations::LocationRef;
use stockyard_transfers::{
    TRANSFER_ORDER_AGGREGATE_TYPE, TransferEvent, TransferLine, TransferOrderId, TransferStatus,
};

use crate::read_model::ReadStore;

/// Queryable transfer order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOrderView {
    pub transfer_id: TransferOrderId,
    pub transfer_number: String,
    pub from: LocationRef,
    pub to: LocationRef,
    pub lines: Vec<TransferLine>,
    pub status: TransferStatus,
    pub approved_by: Option<UserId>,
    pub request_date: DateTime<Utc>,
    pub completed_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum TransferOrdersError {
    #[error("failed to deserialize transfer event: {0}")]
    Deserialize(String),

    #[error("stream mismatch: {0}")]
    StreamMismatch(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Transfer-orders projection (idempotent, rebuildable).
#[derive(Debug)]
pub struct TransferOrdersProjection<S>
where
    S: ReadStore<TransferOrderId, TransferOrderView>,
{
    store: S,
    cursors: RwLock<HashMap<AggregateId, u64>>,
}

impl<S> TransferOrdersProjection<S>
where
    S: ReadStore<TransferOrderId, TransferOrderView>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, transfer_id: &TransferOrderId) -> Option<TransferOrderView> {
        self.store.get(transfer_id)
    }

    /// All transfers, newest request first.
    pub fn list(&self) -> Vec<TransferOrderView> {
        let mut orders = self.store.list();
        orders.sort_by(|a, b| b.request_date.cmp(&a.request_date));
        orders
    }

    pub fn list_by_status(&self, status: TransferStatus) -> Vec<TransferOrderView> {
        self.list()
            .into_iter()
            .filter(|v| v.status == status)
            .collect()
    }

    /// Number of transfers requested on the given day (feeds numbering).
    pub fn count_for_day(&self, day: NaiveDate) -> usize {
        self.store
            .list()
            .iter()
            .filter(|v| v.request_date.date_naive() == day)
            .count()
    }

    /// Apply a published envelope into the projection.
    ///
    /// Same idempotency contract as the stock-levels projection: replays at
    /// or below the stream cursor are ignored, gaps are rejected.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), TransferOrdersError> {
        if envelope.aggregate_type() != TRANSFER_ORDER_AGGREGATE_TYPE {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let mut cursors = match self.cursors.write() {
            Ok(cursors) => cursors,
            Err(_) => {
                return Err(TransferOrdersError::StreamMismatch(
                    "cursor lock poisoned".to_string(),
                ));
            }
        };

        let last = *cursors.get(&aggregate_id).unwrap_or(&0);

        if seq == 0 {
            return Err(TransferOrdersError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }
        if seq != last + 1 && last != 0 {
            return Err(TransferOrdersError::NonMonotonicSequence { last, found: seq });
        }

        let event: TransferEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| TransferOrdersError::Deserialize(e.to_string()))?;

        let transfer_id = event.transfer_id();
        if transfer_id.0 != aggregate_id {
            return Err(TransferOrdersError::StreamMismatch(
                "event transfer_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match event {
            TransferEvent::TransferOpened(e) => {
                self.store.upsert(
                    transfer_id,
                    TransferOrderView {
                        transfer_id,
                        transfer_number: e.transfer_number,
                        from: e.from,
                        to: e.to,
                        lines: e
                            .lines
                            .iter()
                            .enumerate()
                            .map(|(idx, spec)| TransferLine {
                                line_no: idx as u32 + 1,
                                product_id: spec.product_id,
                                product_name: spec.product_name.clone(),
                                requested: spec.quantity,
                                transferred: 0,
                            })
                            .collect(),
                        status: TransferStatus::Pending,
                        approved_by: None,
                        request_date: e.occurred_at,
                        completed_date: None,
                    },
                );
            }
            TransferEvent::TransferApproved(e) => self.update_view(transfer_id, |view| {
                view.status = TransferStatus::InProgress;
                view.approved_by = Some(e.approver);
            })?,
            TransferEvent::TransferCompleted(e) => self.update_view(transfer_id, |view| {
                for line in &mut view.lines {
                    line.transferred = line.requested;
                }
                view.status = TransferStatus::Completed;
                view.completed_date = Some(e.occurred_at);
            })?,
            TransferEvent::TransferCancelled(_) => self.update_view(transfer_id, |view| {
                view.status = TransferStatus::Cancelled;
            })?,
        }

        cursors.insert(aggregate_id, seq);
        Ok(())
    }

    fn update_view(
        &self,
        transfer_id: TransferOrderId,
        update: impl FnOnce(&mut TransferOrderView),
    ) -> Result<(), TransferOrdersError> {
        let Some(mut view) = self.store.get(&transfer_id) else {
            return Err(TransferOrdersError::StreamMismatch(format!(
                "event for unknown transfer order {transfer_id}"
            )));
        };
        update(&mut view);
        self.store.upsert(transfer_id, view);
        Ok(())
    }

    /// Rebuild the read model from scratch by replaying envelopes.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), TransferOrdersError> {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.clear();
        }
        self.store.clear();

        let mut envs: Vec<_> = envelopes.into_iter().collect();
        envs.sort_by_key(|e| (*e.aggregate_id().as_uuid().as_bytes(), e.sequence_number()));

        for env in &envs {
            self.apply_envelope(env)?;
        }

        Ok(())
    }
}
