//! Stock-levels projection: the queryable side of the stock record store.
//!
//! Consumes published ledger envelopes and maintains one
//! [`StockRecordView`] per (product, location). Read models are disposable
//! and rebuildable from the event stream.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use stockyard_allocation::StockLevel;
use stockyard_core::{AggregateId, ProductId};
use stockyard_events::EventEnvelope;
use stockyard_ledger::{LedgerEvent, STOCK_RECORD_AGGREGATE_TYPE, StockRecordId};
use stockyard_locations::LocationId;

use crate::read_model::ReadStore;

/// Queryable stock record: current counters per (product, location).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockRecordView {
    pub record_id: StockRecordId,
    pub product_id: ProductId,
    pub product_name: String,
    pub product_sku: String,
    pub location_id: LocationId,
    pub location_name: String,
    pub available: i64,
    pub reserved: i64,
    pub average_unit_cost: u64,
    pub last_updated: DateTime<Utc>,
}

impl StockRecordView {
    /// Reporting-only derived quantity.
    pub fn total(&self) -> i64 {
        self.available + self.reserved
    }
}

#[derive(Debug, Error)]
pub enum StockLevelsError {
    #[error("failed to deserialize ledger event: {0}")]
    Deserialize(String),

    #[error("stream mismatch: {0}")]
    StreamMismatch(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Stock-levels projection.
///
/// Idempotent for at-least-once delivery: replays at or below the per-stream
/// cursor are ignored, so applying the same envelope from both the dispatch
/// path and a bus worker is safe.
#[derive(Debug)]
pub struct StockLevelsProjection<S>
where
    S: ReadStore<StockRecordId, StockRecordView>,
{
    store: S,
    cursors: RwLock<HashMap<AggregateId, u64>>,
}

impl<S> StockLevelsProjection<S>
where
    S: ReadStore<StockRecordId, StockRecordView>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    /// Record for a known record id.
    pub fn get(&self, record_id: &StockRecordId) -> Option<StockRecordView> {
        self.store.get(record_id)
    }

    /// Record for a (product, location) pair.
    pub fn get_pair(&self, product_id: ProductId, location_id: LocationId) -> Option<StockRecordView> {
        self.get(&StockRecordId::for_pair(product_id, location_id))
    }

    /// All records (unspecified order).
    pub fn list(&self) -> Vec<StockRecordView> {
        self.store.list()
    }

    /// All records for one product, ordered by location id.
    pub fn list_by_product(&self, product_id: ProductId) -> Vec<StockRecordView> {
        let mut records: Vec<_> = self
            .store
            .list()
            .into_iter()
            .filter(|v| v.product_id == product_id)
            .collect();
        records.sort_by_key(|v| v.location_id);
        records
    }

    /// All records held at one location, ordered by product id.
    pub fn list_by_location(&self, location_id: LocationId) -> Vec<StockRecordView> {
        let mut records: Vec<_> = self
            .store
            .list()
            .into_iter()
            .filter(|v| v.location_id == location_id)
            .collect();
        records.sort_by_key(|v| v.product_id);
        records
    }

    /// Low/out-of-stock query: records with `available <= threshold`.
    pub fn list_below_threshold(&self, threshold: i64) -> Vec<StockRecordView> {
        let mut records: Vec<_> = self
            .store
            .list()
            .into_iter()
            .filter(|v| v.available <= threshold)
            .collect();
        records.sort_by_key(|v| (v.product_id, v.location_id));
        records
    }

    /// Per-location availability for one product.
    pub fn query_available(&self, product_id: ProductId) -> Vec<(LocationId, i64)> {
        self.list_by_product(product_id)
            .into_iter()
            .map(|v| (v.location_id, v.available))
            .collect()
    }

    /// Sum of `available` across all locations for one product.
    pub fn total_available(&self, product_id: ProductId) -> i64 {
        self.list_by_product(product_id)
            .iter()
            .map(|v| v.available)
            .sum()
    }

    /// Availability snapshot consumed by the allocation engine.
    pub fn stock_levels(&self, product_id: ProductId) -> Vec<StockLevel> {
        self.list_by_product(product_id)
            .into_iter()
            .map(|v| StockLevel {
                location_id: v.location_id,
                location_name: v.location_name,
                available: v.available,
            })
            .collect()
    }

    /// Apply a published envelope into the projection.
    ///
    /// - Enforces monotonic sequence per stream
    /// - Idempotent for at-least-once delivery (replays <= cursor are ignored)
    /// - Envelopes for other aggregate types are ignored
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), StockLevelsError> {
        if envelope.aggregate_type() != STOCK_RECORD_AGGREGATE_TYPE {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let mut cursors = match self.cursors.write() {
            Ok(cursors) => cursors,
            Err(_) => {
                return Err(StockLevelsError::StreamMismatch(
                    "cursor lock poisoned".to_string(),
                ));
            }
        };

        let last = *cursors.get(&aggregate_id).unwrap_or(&0);

        if seq == 0 {
            return Err(StockLevelsError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            // Duplicate or replay; safe to ignore.
            return Ok(());
        }
        if seq != last + 1 && last != 0 {
            return Err(StockLevelsError::NonMonotonicSequence { last, found: seq });
        }

        let event: LedgerEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| StockLevelsError::Deserialize(e.to_string()))?;

        let record_id = event.record_id();
        if record_id.0 != aggregate_id {
            return Err(StockLevelsError::StreamMismatch(
                "event record_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match event {
            LedgerEvent::StockInitialized(e) => {
                self.store.upsert(
                    record_id,
                    StockRecordView {
                        record_id,
                        product_id: e.product.product_id,
                        product_name: e.product.name,
                        product_sku: e.product.sku,
                        location_id: e.location_id,
                        location_name: e.location_name,
                        available: 0,
                        reserved: 0,
                        average_unit_cost: 0,
                        last_updated: e.occurred_at,
                    },
                );
            }
            LedgerEvent::StockReceived(e) => self.update_view(record_id, |view| {
                view.available += e.quantity;
                view.average_unit_cost = e.new_average_cost;
                view.last_updated = e.occurred_at;
            })?,
            LedgerEvent::StockReserved(e) => self.update_view(record_id, |view| {
                view.available -= e.quantity;
                view.reserved += e.quantity;
                view.last_updated = e.occurred_at;
            })?,
            LedgerEvent::ReservationConfirmed(e) => self.update_view(record_id, |view| {
                view.reserved -= e.quantity;
                view.last_updated = e.occurred_at;
            })?,
            LedgerEvent::ReservationReleased(e) => self.update_view(record_id, |view| {
                view.reserved -= e.quantity;
                view.available += e.quantity;
                view.last_updated = e.occurred_at;
            })?,
            LedgerEvent::StockAdjusted(e) => self.update_view(record_id, |view| {
                view.available += e.delta;
                view.last_updated = e.occurred_at;
            })?,
        }

        // Advance cursor after successful apply.
        cursors.insert(aggregate_id, seq);
        Ok(())
    }

    fn update_view(
        &self,
        record_id: StockRecordId,
        update: impl FnOnce(&mut StockRecordView),
    ) -> Result<(), StockLevelsError> {
        let Some(mut view) = self.store.get(&record_id) else {
            return Err(StockLevelsError::StreamMismatch(format!(
                "event for unknown stock record {record_id}"
            )));
        };
        update(&mut view);
        self.store.upsert(record_id, view);
        Ok(())
    }

    /// Rebuild the read model from scratch by replaying envelopes.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), StockLevelsError> {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.clear();
        }
        self.store.clear();

        // Deterministic replay order: aggregate, then sequence.
        let mut envs: Vec<_> = envelopes.into_iter().collect();
        envs.sort_by_key(|e| (*e.aggregate_id().as_uuid().as_bytes(), e.sequence_number()));

        for env in &envs {
            self.apply_envelope(env)?;
        }

        Ok(())
    }
}
