//! Multi-record workflow coordination (sagas with compensating actions).

pub mod sale_fulfillment;

pub use sale_fulfillment::{
    PendingSale, ReservationIntent, SaleFulfillmentCoordinator, SaleFulfillmentError, SaleId,
};
