//! Command execution pipeline for event-sourced aggregates.
//!
//! `CommandDispatcher` runs the full lifecycle for one command:
//!
//! ```text
//! 1. load events from the store
//! 2. rehydrate the aggregate (apply history)
//! 3. handle the command (pure decision, produces events)
//! 4. append with an exact expected version (compare-and-set)
//! 5. publish committed events to the bus
//! ```
//!
//! A lost CAS race surfaces as [`DispatchError::Concurrency`];
//! [`CommandDispatcher::dispatch_with_retry`] reloads and re-decides a
//! bounded number of times so callers get linearizable single-record
//! mutations without writing their own conflict loops.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use stockyard_core::{Aggregate, AggregateId, DomainError, ExpectedVersion};
use stockyard_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Optimistic concurrency failure (stale aggregate version). Retryable.
    #[error("concurrency conflict: {0}")]
    Concurrency(String),

    /// Loaded or appended events mixed aggregate streams.
    #[error("stream mismatch: {0}")]
    StreamMismatch(String),

    /// Deterministic domain failure (validation, invariant, shortfall, ...).
    #[error(transparent)]
    Domain(DomainError),

    /// Failed to deserialize historical event payloads into the aggregate
    /// event type.
    #[error("event deserialization failed: {0}")]
    Deserialize(String),

    /// Persisting to the event store failed.
    #[error("event store failure: {0}")]
    Store(EventStoreError),

    /// Publication failed after a successful append (at-least-once; the
    /// events are persisted, retrying publication is safe).
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            EventStoreError::StreamMismatch(msg) => DispatchError::StreamMismatch(msg),
            other => DispatchError::Store(other),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        DispatchError::Domain(value)
    }
}

impl DispatchError {
    /// The underlying domain error, when this failure is a deterministic
    /// business rejection.
    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            DispatchError::Domain(err) => Some(err),
            _ => None,
        }
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// Generic over the store and bus so tests run against the in-memory
/// implementations and production can swap in durable backends.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Dispatch a command through the full pipeline once.
    ///
    /// The `make_aggregate` closure produces a fresh (empty) aggregate for
    /// rehydration, keeping the dispatcher ignorant of aggregate
    /// construction. Returns the committed events with assigned sequence
    /// numbers; the last one's sequence number is the new aggregate version.
    pub fn dispatch<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: stockyard_events::Event + Serialize + DeserializeOwned,
    {
        // 1) Load history
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        // 2) Rehydrate aggregate
        let mut aggregate = make_aggregate(aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;

        // 3) Decide events (no mutation)
        let decided = aggregate.handle(&command).map_err(DispatchError::from)?;
        if decided.is_empty() {
            return Ok(vec![]);
        }

        // 4) Persist (append-only, optimistic)
        let aggregate_type = aggregate_type.into();
        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    aggregate_id,
                    aggregate_type.clone(),
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;

        // 5) Publish committed events (after append)
        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        Ok(committed)
    }

    /// Dispatch with a bounded retry on concurrency conflicts.
    ///
    /// Each retry reloads the stream and re-runs the decision against the
    /// fresh state. Deterministic domain failures are never retried. When
    /// `max_attempts` conflicts in a row occur, the last conflict is
    /// returned for the caller to surface.
    pub fn dispatch_with_retry<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        max_attempts: u32,
        make_aggregate: impl Fn(AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: stockyard_events::Event + Serialize + DeserializeOwned,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.dispatch(
                aggregate_id,
                aggregate_type,
                command.clone(),
                &make_aggregate,
            ) {
                Err(DispatchError::Concurrency(msg)) if attempt < max_attempts => {
                    warn!(
                        aggregate = %aggregate_id,
                        attempt,
                        "concurrency conflict, retrying: {msg}"
                    );
                }
                other => return other,
            }
        }
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // Defense in depth: reject cross-stream data even if a buggy backend
    // returns it, and ensure sequence numbers increase monotonically.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::StreamMismatch(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number == 0 {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(
                "stored event has sequence_number=0".to_string(),
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(
                format!(
                    "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                    e.sequence_number
                ),
            )));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    // Ensure deterministic ordering.
    let mut sorted = history.to_vec();
    sorted.sort_by_key(|e| e.sequence_number);

    for stored in sorted {
        let ev: A::Event = serde_json::from_value(stored.payload)
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }

    Ok(())
}
