//! Application services orchestrating the domain crates over the event
//! store: the stock ledger operations and the transfer workflow.

pub mod stock;
pub mod transfer;

pub use stock::{ReceiptHook, ReceiptNote, StockLedgerService};
pub use transfer::{TransferError, TransferNumberGenerator, TransferOrchestrator};
