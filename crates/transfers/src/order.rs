use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockyard_core::{Aggregate, AggregateId, AggregateRoot, DomainError, ProductId, UserId};
use stockyard_events::Event;
use stockyard_locations::LocationRef;

/// Transfer order identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferOrderId(pub AggregateId);

impl TransferOrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for TransferOrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Transfer order status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

/// Requested line for opening a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLineSpec {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: i64,
}

/// Line item on a transfer order.
///
/// `transferred` stays 0 until completion fixes it to `requested`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLine {
    pub line_no: u32,
    pub product_id: ProductId,
    pub product_name: String,
    pub requested: i64,
    pub transferred: i64,
}

/// Aggregate root: TransferOrder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOrder {
    id: TransferOrderId,
    transfer_number: String,
    from: Option<LocationRef>,
    to: Option<LocationRef>,
    lines: Vec<TransferLine>,
    status: TransferStatus,
    approved_by: Option<UserId>,
    request_date: Option<DateTime<Utc>>,
    completed_date: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl TransferOrder {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: TransferOrderId) -> Self {
        Self {
            id,
            transfer_number: String::new(),
            from: None,
            to: None,
            lines: Vec::new(),
            status: TransferStatus::Pending,
            approved_by: None,
            request_date: None,
            completed_date: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> TransferOrderId {
        self.id
    }

    pub fn transfer_number(&self) -> &str {
        &self.transfer_number
    }

    pub fn from_location(&self) -> Option<&LocationRef> {
        self.from.as_ref()
    }

    pub fn to_location(&self) -> Option<&LocationRef> {
        self.to.as_ref()
    }

    pub fn lines(&self) -> &[TransferLine] {
        &self.lines
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    pub fn approved_by(&self) -> Option<UserId> {
        self.approved_by
    }

    pub fn request_date(&self) -> Option<DateTime<Utc>> {
        self.request_date
    }

    pub fn completed_date(&self) -> Option<DateTime<Utc>> {
        self.completed_date
    }

    pub fn is_cancellable(&self) -> bool {
        !matches!(
            self.status,
            TransferStatus::Completed | TransferStatus::Cancelled
        )
    }
}

impl AggregateRoot for TransferOrder {
    type Id = TransferOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenTransfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenTransfer {
    pub transfer_id: TransferOrderId,
    pub transfer_number: String,
    pub from: LocationRef,
    pub to: LocationRef,
    pub lines: Vec<TransferLineSpec>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApproveTransfer (Pending → InProgress).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveTransfer {
    pub transfer_id: TransferOrderId,
    pub approver: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CompleteTransfer (InProgress → Completed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteTransfer {
    pub transfer_id: TransferOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelTransfer (any non-Completed state).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelTransfer {
    pub transfer_id: TransferOrderId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferCommand {
    OpenTransfer(OpenTransfer),
    ApproveTransfer(ApproveTransfer),
    CompleteTransfer(CompleteTransfer),
    CancelTransfer(CancelTransfer),
}

impl TransferCommand {
    /// Transfer order this command targets.
    pub fn transfer_id(&self) -> TransferOrderId {
        match self {
            TransferCommand::OpenTransfer(cmd) => cmd.transfer_id,
            TransferCommand::ApproveTransfer(cmd) => cmd.transfer_id,
            TransferCommand::CompleteTransfer(cmd) => cmd.transfer_id,
            TransferCommand::CancelTransfer(cmd) => cmd.transfer_id,
        }
    }
}

impl stockyard_events::Command for TransferCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        self.transfer_id().0
    }
}

/// Event: TransferOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOpened {
    pub transfer_id: TransferOrderId,
    pub transfer_number: String,
    pub from: LocationRef,
    pub to: LocationRef,
    pub lines: Vec<TransferLineSpec>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransferApproved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferApproved {
    pub transfer_id: TransferOrderId,
    pub approver: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransferCompleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCompleted {
    pub transfer_id: TransferOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransferCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCancelled {
    pub transfer_id: TransferOrderId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferEvent {
    TransferOpened(TransferOpened),
    TransferApproved(TransferApproved),
    TransferCompleted(TransferCompleted),
    TransferCancelled(TransferCancelled),
}

impl TransferEvent {
    pub fn transfer_id(&self) -> TransferOrderId {
        match self {
            TransferEvent::TransferOpened(e) => e.transfer_id,
            TransferEvent::TransferApproved(e) => e.transfer_id,
            TransferEvent::TransferCompleted(e) => e.transfer_id,
            TransferEvent::TransferCancelled(e) => e.transfer_id,
        }
    }
}

impl Event for TransferEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TransferEvent::TransferOpened(_) => "transfers.order.opened",
            TransferEvent::TransferApproved(_) => "transfers.order.approved",
            TransferEvent::TransferCompleted(_) => "transfers.order.completed",
            TransferEvent::TransferCancelled(_) => "transfers.order.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TransferEvent::TransferOpened(e) => e.occurred_at,
            TransferEvent::TransferApproved(e) => e.occurred_at,
            TransferEvent::TransferCompleted(e) => e.occurred_at,
            TransferEvent::TransferCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for TransferOrder {
    type Command = TransferCommand;
    type Event = TransferEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            TransferEvent::TransferOpened(e) => {
                self.id = e.transfer_id;
                self.transfer_number = e.transfer_number.clone();
                self.from = Some(e.from.clone());
                self.to = Some(e.to.clone());
                self.lines = e
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
                    .collect();
                self.status = TransferStatus::Pending;
                self.request_date = Some(e.occurred_at);
                self.created = true;
            }
            TransferEvent::TransferApproved(e) => {
                self.status = TransferStatus::InProgress;
                self.approved_by = Some(e.approver);
            }
            TransferEvent::TransferCompleted(e) => {
                for line in &mut self.lines {
                    line.transferred = line.requested;
                }
                self.status = TransferStatus::Completed;
                self.completed_date = Some(e.occurred_at);
            }
            TransferEvent::TransferCancelled(_) => {
                self.status = TransferStatus::Cancelled;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            TransferCommand::OpenTransfer(cmd) => self.handle_open(cmd),
            TransferCommand::ApproveTransfer(cmd) => self.handle_approve(cmd),
            TransferCommand::CompleteTransfer(cmd) => self.handle_complete(cmd),
            TransferCommand::CancelTransfer(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl TransferOrder {
    fn ensure_transfer_id(&self, transfer_id: TransferOrderId) -> Result<(), DomainError> {
        if self.id != transfer_id {
            return Err(DomainError::invariant("transfer_id mismatch"));
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenTransfer) -> Result<Vec<TransferEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("transfer order already exists"));
        }
        self.ensure_transfer_id(cmd.transfer_id)?;

        if cmd.transfer_number.trim().is_empty() {
            return Err(DomainError::validation("transfer number cannot be empty"));
        }
        if cmd.from.id == cmd.to.id {
            return Err(DomainError::validation(
                "source and destination locations must differ",
            ));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation(
                "transfer must have at least one line",
            ));
        }
        for spec in &cmd.lines {
            if spec.quantity <= 0 {
                return Err(DomainError::validation("line quantity must be positive"));
            }
            if spec.product_name.trim().is_empty() {
                return Err(DomainError::validation("product name cannot be empty"));
            }
        }

        Ok(vec![TransferEvent::TransferOpened(TransferOpened {
            transfer_id: cmd.transfer_id,
            transfer_number: cmd.transfer_number.clone(),
            from: cmd.from.clone(),
            to: cmd.to.clone(),
            lines: cmd.lines.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_approve(&self, cmd: &ApproveTransfer) -> Result<Vec<TransferEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_transfer_id(cmd.transfer_id)?;

        if self.status != TransferStatus::Pending {
            return Err(DomainError::invariant(
                "only pending transfers can be approved",
            ));
        }

        Ok(vec![TransferEvent::TransferApproved(TransferApproved {
            transfer_id: cmd.transfer_id,
            approver: cmd.approver,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_complete(&self, cmd: &CompleteTransfer) -> Result<Vec<TransferEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_transfer_id(cmd.transfer_id)?;

        if self.status != TransferStatus::InProgress {
            return Err(DomainError::invariant(
                "only in-progress transfers can be completed",
            ));
        }

        Ok(vec![TransferEvent::TransferCompleted(TransferCompleted {
            transfer_id: cmd.transfer_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelTransfer) -> Result<Vec<TransferEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_transfer_id(cmd.transfer_id)?;

        match self.status {
            TransferStatus::Completed => Err(DomainError::invariant(
                "cannot cancel a completed transfer",
            )),
            TransferStatus::Cancelled => {
                Err(DomainError::conflict("transfer is already cancelled"))
            }
            TransferStatus::Pending | TransferStatus::InProgress => {
                Ok(vec![TransferEvent::TransferCancelled(TransferCancelled {
                    transfer_id: cmd.transfer_id,
                    reason: cmd.reason.clone(),
                    occurred_at: cmd.occurred_at,
                })])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockyard_locations::{Location, LocationId};

    fn test_transfer_id() -> TransferOrderId {
        TransferOrderId::new(AggregateId::new())
    }

    fn test_location_ref(name: &str) -> LocationRef {
        Location::warehouse(LocationId::new(AggregateId::new()), name)
            .unwrap()
            .to_ref()
    }

    fn test_line(quantity: i64) -> TransferLineSpec {
        TransferLineSpec {
            product_id: ProductId::new(),
            product_name: "Widget".to_string(),
            quantity,
        }
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn opened_transfer() -> TransferOrder {
        let transfer_id = test_transfer_id();
        let mut order = TransferOrder::empty(transfer_id);
        let events = order
            .handle(&TransferCommand::OpenTransfer(OpenTransfer {
                transfer_id,
                transfer_number: "TRF-20240101-0001".to_string(),
                from: test_location_ref("Warehouse A"),
                to: test_location_ref("Shop B"),
                lines: vec![test_line(3), test_line(5)],
                occurred_at: test_time(),
            }))
            .unwrap();
        order.apply(&events[0]);
        order
    }

    fn approve(order: &mut TransferOrder) {
        let events = order
            .handle(&TransferCommand::ApproveTransfer(ApproveTransfer {
                transfer_id: order.id_typed(),
                approver: UserId::new(),
                occurred_at: test_time(),
            }))
            .unwrap();
        order.apply(&events[0]);
    }

    #[test]
    fn open_transfer_starts_pending_with_untransferred_lines() {
        let order = opened_transfer();
        assert_eq!(order.status(), TransferStatus::Pending);
        assert_eq!(order.lines().len(), 2);
        assert!(order.lines().iter().all(|l| l.transferred == 0));
        assert_eq!(order.lines()[0].line_no, 1);
        assert_eq!(order.lines()[1].line_no, 2);
        assert!(order.request_date().is_some());
        assert!(order.completed_date().is_none());
    }

    #[test]
    fn open_rejects_same_source_and_destination() {
        let transfer_id = test_transfer_id();
        let endpoint = test_location_ref("Warehouse A");
        let order = TransferOrder::empty(transfer_id);

        let err = order
            .handle(&TransferCommand::OpenTransfer(OpenTransfer {
                transfer_id,
                transfer_number: "TRF-20240101-0001".to_string(),
                from: endpoint.clone(),
                to: endpoint,
                lines: vec![test_line(1)],
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn open_rejects_empty_lines_and_non_positive_quantities() {
        let transfer_id = test_transfer_id();
        let order = TransferOrder::empty(transfer_id);

        let err = order
            .handle(&TransferCommand::OpenTransfer(OpenTransfer {
                transfer_id,
                transfer_number: "TRF-20240101-0001".to_string(),
                from: test_location_ref("A"),
                to: test_location_ref("B"),
                lines: vec![],
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let err = order
            .handle(&TransferCommand::OpenTransfer(OpenTransfer {
                transfer_id,
                transfer_number: "TRF-20240101-0001".to_string(),
                from: test_location_ref("A"),
                to: test_location_ref("B"),
                lines: vec![test_line(0)],
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn approve_moves_pending_to_in_progress() {
        let mut order = opened_transfer();
        approve(&mut order);
        assert_eq!(order.status(), TransferStatus::InProgress);
        assert!(order.approved_by().is_some());
    }

    #[test]
    fn approve_rejects_non_pending_states() {
        let mut order = opened_transfer();
        approve(&mut order);

        let err = order
            .handle(&TransferCommand::ApproveTransfer(ApproveTransfer {
                transfer_id: order.id_typed(),
                approver: UserId::new(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn complete_fixes_transferred_quantities() {
        let mut order = opened_transfer();
        approve(&mut order);

        let events = order
            .handle(&TransferCommand::CompleteTransfer(CompleteTransfer {
                transfer_id: order.id_typed(),
                occurred_at: test_time(),
            }))
            .unwrap();
        order.apply(&events[0]);

        assert_eq!(order.status(), TransferStatus::Completed);
        assert!(order.completed_date().is_some());
        assert!(
            order
                .lines()
                .iter()
                .all(|l| l.transferred == l.requested)
        );
    }

    #[test]
    fn complete_rejects_pending_transfer() {
        let order = opened_transfer();
        let err = order
            .handle(&TransferCommand::CompleteTransfer(CompleteTransfer {
                transfer_id: order.id_typed(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn cancel_allowed_from_pending_and_in_progress() {
        let mut pending = opened_transfer();
        let events = pending
            .handle(&TransferCommand::CancelTransfer(CancelTransfer {
                transfer_id: pending.id_typed(),
                reason: Some("requested by shop".to_string()),
                occurred_at: test_time(),
            }))
            .unwrap();
        pending.apply(&events[0]);
        assert_eq!(pending.status(), TransferStatus::Cancelled);

        let mut in_progress = opened_transfer();
        approve(&mut in_progress);
        let events = in_progress
            .handle(&TransferCommand::CancelTransfer(CancelTransfer {
                transfer_id: in_progress.id_typed(),
                reason: None,
                occurred_at: test_time(),
            }))
            .unwrap();
        in_progress.apply(&events[0]);
        assert_eq!(in_progress.status(), TransferStatus::Cancelled);
    }

    #[test]
    fn cancel_rejects_completed_transfer() {
        let mut order = opened_transfer();
        approve(&mut order);
        let events = order
            .handle(&TransferCommand::CompleteTransfer(CompleteTransfer {
                transfer_id: order.id_typed(),
                occurred_at: test_time(),
            }))
            .unwrap();
        order.apply(&events[0]);

        let err = order
            .handle(&TransferCommand::CancelTransfer(CancelTransfer {
                transfer_id: order.id_typed(),
                reason: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn cancel_twice_is_a_conflict() {
        let mut order = opened_transfer();
        let events = order
            .handle(&TransferCommand::CancelTransfer(CancelTransfer {
                transfer_id: order.id_typed(),
                reason: None,
                occurred_at: test_time(),
            }))
            .unwrap();
        order.apply(&events[0]);

        let err = order
            .handle(&TransferCommand::CancelTransfer(CancelTransfer {
                transfer_id: order.id_typed(),
                reason: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn version_increments_on_apply() {
        let mut order = opened_transfer();
        assert_eq!(order.version(), 1);
        approve(&mut order);
        assert_eq!(order.version(), 2);
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let order = opened_transfer();
        let version = order.version();
        let status = order.status();

        let events1 = order
            .handle(&TransferCommand::ApproveTransfer(ApproveTransfer {
                transfer_id: order.id_typed(),
                approver: UserId::new(),
                occurred_at: test_time(),
            }))
            .unwrap();
        assert_eq!(order.version(), version);
        assert_eq!(order.status(), status);
        assert_eq!(events1.len(), 1);
    }
}
