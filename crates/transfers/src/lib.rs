//! Transfer order domain module (event-sourced).
//!
//! A transfer order tracks a request to move product quantities between two
//! locations through its own approval/completion lifecycle. Stock movement
//! itself happens in the orchestration layer on completion.

pub mod order;

pub use order::{
    ApproveTransfer, CancelTransfer, CompleteTransfer, OpenTransfer, TransferCancelled,
    TransferCommand, TransferCompleted, TransferEvent, TransferLine, TransferLineSpec,
    TransferOpened, TransferApproved, TransferOrder, TransferOrderId, TransferStatus,
};

/// Stream/aggregate type identifier for transfer orders.
pub const TRANSFER_ORDER_AGGREGATE_TYPE: &str = "transfers.order";
