use stockyard_core::AggregateId;

/// A command targets a specific aggregate.
///
/// Commands represent intent — a request to perform an action on an
/// aggregate. They are transient (not persisted) and are transformed into
/// events, which are persisted. A command is rejected if invalid; events
/// represent accepted changes.
pub trait Command: Clone + core::fmt::Debug + Send + Sync + 'static {
    fn target_aggregate_id(&self) -> AggregateId;
}
