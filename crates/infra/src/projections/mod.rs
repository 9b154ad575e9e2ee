//! Rebuildable read models fed by published event envelopes.

pub mod stock_levels;
pub mod transfer_orders;

pub use stock_levels::{StockLevelsError, StockLevelsProjection, StockRecordView};
pub use transfer_orders::{TransferOrderView, TransferOrdersError, TransferOrdersProjection};
