//! Integration tests for the full pipeline.
//!
//! Command → EventStore → EventBus → Projection → ReadModel, plus the
//! orchestrated workflows (sale fulfillment, transfers) end to end.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value as JsonValue;

use stockyard_allocation::OrderLine;
use stockyard_core::{AggregateId, ProductId, UserId};
use stockyard_events::{EventEnvelope, InMemoryEventBus};
use stockyard_ledger::{ProductRef, StockRecordId};
use stockyard_locations::{
    InMemoryLocationDirectory, Location, LocationDirectory, LocationId, LocationKind,
};
use stockyard_transfers::{TransferLineSpec, TransferOrderId, TransferStatus};

use crate::command_dispatcher::CommandDispatcher;
use crate::event_store::InMemoryEventStore;
use crate::projections::{
    StockLevelsProjection, StockRecordView, TransferOrderView, TransferOrdersProjection,
};
use crate::read_model::InMemoryReadStore;
use crate::saga::{SaleFulfillmentCoordinator, SaleId};
use crate::services::{StockLedgerService, TransferError, TransferOrchestrator};
use crate::workers::ProjectionWorker;

type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
type Store = Arc<InMemoryEventStore>;
type LedgerStore = Arc<InMemoryReadStore<StockRecordId, StockRecordView>>;
type TransferStore = Arc<InMemoryReadStore<TransferOrderId, TransferOrderView>>;
type Service = StockLedgerService<Store, Bus, LedgerStore>;
type Orchestrator = TransferOrchestrator<Store, Bus, LedgerStore, TransferStore>;
type Coordinator = SaleFulfillmentCoordinator<Store, Bus, LedgerStore>;

struct Harness {
    bus: Bus,
    stock: Arc<Service>,
    transfers: Orchestrator,
    sales: Coordinator,
    directory: Arc<InMemoryLocationDirectory>,
}

fn harness() -> Harness {
    let store: Store = Arc::new(InMemoryEventStore::new());
    let bus: Bus = Arc::new(InMemoryEventBus::new());
    let directory = Arc::new(InMemoryLocationDirectory::new());

    let levels = Arc::new(StockLevelsProjection::new(Arc::new(InMemoryReadStore::new())));
    let stock = Arc::new(StockLedgerService::new(
        CommandDispatcher::new(store.clone(), bus.clone()),
        levels,
    ));

    let transfer_views = Arc::new(TransferOrdersProjection::new(Arc::new(
        InMemoryReadStore::new(),
    )));
    let transfers = TransferOrchestrator::new(
        CommandDispatcher::new(store.clone(), bus.clone()),
        stock.clone(),
        transfer_views,
        directory.clone() as Arc<dyn LocationDirectory>,
    );

    let sales = SaleFulfillmentCoordinator::new(stock.clone(), Duration::minutes(30));

    Harness {
        bus,
        stock,
        transfers,
        sales,
        directory,
    }
}

fn register_location(harness: &Harness, kind: LocationKind, name: &str) -> Location {
    let location = Location::new(LocationId::new(AggregateId::new()), kind, name).unwrap();
    harness.directory.register(location.clone()).unwrap();
    location
}

fn product(name: &str, sku: &str) -> ProductRef {
    ProductRef {
        product_id: ProductId::new(),
        name: name.to_string(),
        sku: sku.to_string(),
    }
}

fn now() -> DateTime<Utc> {
    Utc::now()
}

#[test]
fn reserve_then_sell_updates_the_read_model() {
    let harness = harness();
    let widget = product("Widget", "WID-001");
    let a = register_location(&harness, LocationKind::Warehouse, "Warehouse A");

    harness
        .stock
        .receive_stock(widget.clone(), &a, 10, 100, now())
        .unwrap();
    harness
        .stock
        .reserve(widget.product_id, a.id_typed(), 7, now())
        .unwrap();

    let view = harness
        .stock
        .levels()
        .get_pair(widget.product_id, a.id_typed())
        .unwrap();
    assert_eq!((view.available, view.reserved), (3, 7));

    harness
        .stock
        .confirm(widget.product_id, a.id_typed(), 7, now())
        .unwrap();

    let view = harness
        .stock
        .levels()
        .get_pair(widget.product_id, a.id_typed())
        .unwrap();
    assert_eq!((view.available, view.reserved), (3, 0));
    assert_eq!(
        harness.stock.query_available(widget.product_id),
        vec![(a.id_typed(), 3)]
    );
}

#[test]
fn bus_worker_keeps_a_second_projection_in_sync() {
    let harness = harness();
    let widget = product("Widget", "WID-001");
    let a = register_location(&harness, LocationKind::Warehouse, "Warehouse A");

    // An independent read model fed only by the bus.
    let mirror = Arc::new(StockLevelsProjection::<LedgerStore>::new(Arc::new(
        InMemoryReadStore::new(),
    )));
    let mirror_in_worker = mirror.clone();
    let worker = ProjectionWorker::spawn("stock-levels-mirror", harness.bus.clone(), move |env| {
        mirror_in_worker.apply_envelope(&env)
    });

    harness
        .stock
        .receive_stock(widget.clone(), &a, 6, 120, now())
        .unwrap();

    // The worker drains asynchronously.
    let deadline = std::time::Instant::now() + StdDuration::from_secs(2);
    loop {
        if let Some(view) = mirror.get_pair(widget.product_id, a.id_typed()) {
            if view.available == 6 {
                break;
            }
        }
        assert!(
            std::time::Instant::now() < deadline,
            "mirror projection never caught up"
        );
        std::thread::sleep(StdDuration::from_millis(10));
    }

    worker.shutdown();
}

#[test]
fn sale_with_preferred_location_reserves_every_split() {
    let harness = harness();
    let widget = product("Widget", "WID-001");
    let a = register_location(&harness, LocationKind::Warehouse, "Warehouse A");
    let b = register_location(&harness, LocationKind::Shop, "Shop B");

    harness
        .stock
        .receive_stock(widget.clone(), &a, 10, 100, now())
        .unwrap();
    harness
        .stock
        .receive_stock(widget.clone(), &b, 5, 100, now())
        .unwrap();

    let lines = [OrderLine {
        product_id: widget.product_id,
        quantity: 12,
    }];
    let sale_id = SaleId::new(AggregateId::new());

    let intents = harness
        .sales
        .fulfill_sale(sale_id, &lines, Some(b.id_typed()), now())
        .unwrap();

    assert_eq!(intents.iter().map(|i| i.quantity).sum::<i64>(), 12);
    let at_a = harness
        .stock
        .levels()
        .get_pair(widget.product_id, a.id_typed())
        .unwrap();
    let at_b = harness
        .stock
        .levels()
        .get_pair(widget.product_id, b.id_typed())
        .unwrap();
    // Preferred shop emptied first, remainder came from the warehouse.
    assert_eq!((at_b.available, at_b.reserved), (0, 0));
    assert_eq!((at_a.available, at_a.reserved), (3, 0));
}

#[test]
fn expired_sale_reservation_is_swept_back_to_available() {
    let harness = harness();
    let widget = product("Widget", "WID-001");
    let a = register_location(&harness, LocationKind::Warehouse, "Warehouse A");
    harness
        .stock
        .receive_stock(widget.clone(), &a, 8, 100, now())
        .unwrap();

    let reserved_at = now();
    let sale_id = SaleId::new(AggregateId::new());
    harness
        .sales
        .reserve_sale(
            sale_id,
            &[OrderLine {
                product_id: widget.product_id,
                quantity: 8,
            }],
            None,
            reserved_at,
        )
        .unwrap();

    let view = harness
        .stock
        .levels()
        .get_pair(widget.product_id, a.id_typed())
        .unwrap();
    assert_eq!((view.available, view.reserved), (0, 8));

    assert_eq!(harness.sales.sweep_expired(reserved_at + Duration::hours(1)), 1);

    let view = harness
        .stock
        .levels()
        .get_pair(widget.product_id, a.id_typed())
        .unwrap();
    assert_eq!((view.available, view.reserved), (8, 0));
}

#[test]
fn exact_quantity_transfer_carries_average_cost() {
    let harness = harness();
    let widget = product("Widget", "WID-001");
    let a = register_location(&harness, LocationKind::Warehouse, "Warehouse A");
    let b = register_location(&harness, LocationKind::Shop, "Shop B");

    harness
        .stock
        .receive_stock(widget.clone(), &a, 3, 250, now())
        .unwrap();

    let opened = harness
        .transfers
        .create_transfer(
            a.id_typed(),
            b.id_typed(),
            vec![TransferLineSpec {
                product_id: widget.product_id,
                product_name: widget.name.clone(),
                quantity: 3,
            }],
            now(),
        )
        .unwrap();
    assert_eq!(opened.status, TransferStatus::Pending);
    assert!(opened.transfer_number.starts_with("TRF-"));
    assert!(opened.transfer_number.ends_with("-0001"));

    harness
        .transfers
        .approve_transfer(opened.transfer_id, UserId::new(), now())
        .unwrap();
    harness
        .transfers
        .complete_transfer(opened.transfer_id, now())
        .unwrap();

    let source = harness
        .stock
        .levels()
        .get_pair(widget.product_id, a.id_typed())
        .unwrap();
    let destination = harness
        .stock
        .levels()
        .get_pair(widget.product_id, b.id_typed())
        .unwrap();
    assert_eq!(source.available, 0);
    assert_eq!(destination.available, 3);
    assert_eq!(destination.average_unit_cost, 250);

    let completed = harness.transfers.transfers().get(&opened.transfer_id).unwrap();
    assert_eq!(completed.status, TransferStatus::Completed);
    assert_eq!(completed.lines[0].transferred, 3);
    assert!(completed.completed_date.is_some());
}

#[test]
fn transfer_exceeding_source_availability_is_rejected_at_creation() {
    let harness = harness();
    let widget = product("Widget", "WID-001");
    let a = register_location(&harness, LocationKind::Warehouse, "Warehouse A");
    let b = register_location(&harness, LocationKind::Shop, "Shop B");

    harness
        .stock
        .receive_stock(widget.clone(), &a, 3, 100, now())
        .unwrap();

    let err = harness
        .transfers
        .create_transfer(
            a.id_typed(),
            b.id_typed(),
            vec![TransferLineSpec {
                product_id: widget.product_id,
                product_name: widget.name.clone(),
                quantity: 5,
            }],
            now(),
        )
        .unwrap_err();

    match err {
        TransferError::InsufficientSource {
            available,
            requested,
            location_name,
            ..
        } => {
            assert_eq!(available, 3);
            assert_eq!(requested, 5);
            assert_eq!(location_name, "Warehouse A");
        }
        other => panic!("expected InsufficientSource, got {other:?}"),
    }

    // No state mutation: no transfer persisted, stock untouched.
    assert!(harness.transfers.transfers().list().is_empty());
    let view = harness
        .stock
        .levels()
        .get_pair(widget.product_id, a.id_typed())
        .unwrap();
    assert_eq!(view.available, 3);
}

#[test]
fn aborted_completion_reverses_already_moved_lines() {
    let harness = harness();
    let widget = product("Widget", "WID-001");
    let gadget = product("Gadget", "GAD-001");
    let a = register_location(&harness, LocationKind::Warehouse, "Warehouse A");
    let b = register_location(&harness, LocationKind::Shop, "Shop B");

    harness
        .stock
        .receive_stock(widget.clone(), &a, 4, 100, now())
        .unwrap();
    harness
        .stock
        .receive_stock(gadget.clone(), &a, 6, 100, now())
        .unwrap();

    let opened = harness
        .transfers
        .create_transfer(
            a.id_typed(),
            b.id_typed(),
            vec![
                TransferLineSpec {
                    product_id: widget.product_id,
                    product_name: widget.name.clone(),
                    quantity: 4,
                },
                TransferLineSpec {
                    product_id: gadget.product_id,
                    product_name: gadget.name.clone(),
                    quantity: 6,
                },
            ],
            now(),
        )
        .unwrap();
    harness
        .transfers
        .approve_transfer(opened.transfer_id, UserId::new(), now())
        .unwrap();

    // Stock changes between validation and execution: the second line's
    // source quantity is sold off.
    harness
        .stock
        .adjust(gadget.product_id, a.id_typed(), -5, now())
        .unwrap();

    let err = harness
        .transfers
        .complete_transfer(opened.transfer_id, now())
        .unwrap_err();
    assert!(matches!(err, TransferError::InsufficientSource { .. }));

    // First line's movement was reversed; the order stays in progress.
    let widget_at_a = harness
        .stock
        .levels()
        .get_pair(widget.product_id, a.id_typed())
        .unwrap();
    assert_eq!(widget_at_a.available, 4);
    let widget_at_b = harness
        .stock
        .levels()
        .get_pair(widget.product_id, b.id_typed())
        .unwrap();
    assert_eq!(widget_at_b.available, 0);

    let view = harness.transfers.transfers().get(&opened.transfer_id).unwrap();
    assert_eq!(view.status, TransferStatus::InProgress);
}

#[test]
fn cancelled_transfer_moves_no_stock() {
    let harness = harness();
    let widget = product("Widget", "WID-001");
    let a = register_location(&harness, LocationKind::Warehouse, "Warehouse A");
    let b = register_location(&harness, LocationKind::Shop, "Shop B");

    harness
        .stock
        .receive_stock(widget.clone(), &a, 5, 100, now())
        .unwrap();

    let opened = harness
        .transfers
        .create_transfer(
            a.id_typed(),
            b.id_typed(),
            vec![TransferLineSpec {
                product_id: widget.product_id,
                product_name: widget.name.clone(),
                quantity: 5,
            }],
            now(),
        )
        .unwrap();

    harness
        .transfers
        .cancel_transfer(opened.transfer_id, Some("no longer needed".to_string()), now())
        .unwrap();

    let view = harness.transfers.transfers().get(&opened.transfer_id).unwrap();
    assert_eq!(view.status, TransferStatus::Cancelled);

    // Completion after cancellation is rejected and nothing moves.
    let err = harness
        .transfers
        .complete_transfer(opened.transfer_id, now())
        .unwrap_err();
    assert!(matches!(err, TransferError::InvalidStatus { .. }));
    let at_a = harness
        .stock
        .levels()
        .get_pair(widget.product_id, a.id_typed())
        .unwrap();
    assert_eq!(at_a.available, 5);
}

#[test]
fn transfer_numbers_increment_within_a_day() {
    let harness = harness();
    let widget = product("Widget", "WID-001");
    let a = register_location(&harness, LocationKind::Warehouse, "Warehouse A");
    let b = register_location(&harness, LocationKind::Shop, "Shop B");

    harness
        .stock
        .receive_stock(widget.clone(), &a, 10, 100, now())
        .unwrap();

    let at = now();
    let first = harness
        .transfers
        .create_transfer(
            a.id_typed(),
            b.id_typed(),
            vec![TransferLineSpec {
                product_id: widget.product_id,
                product_name: widget.name.clone(),
                quantity: 2,
            }],
            at,
        )
        .unwrap();
    let second = harness
        .transfers
        .create_transfer(
            a.id_typed(),
            b.id_typed(),
            vec![TransferLineSpec {
                product_id: widget.product_id,
                product_name: widget.name.clone(),
                quantity: 2,
            }],
            at,
        )
        .unwrap();

    assert!(first.transfer_number.ends_with("-0001"));
    assert!(second.transfer_number.ends_with("-0002"));
}

#[test]
fn unknown_location_is_rejected_before_any_numbering() {
    let harness = harness();
    let widget = product("Widget", "WID-001");
    let a = register_location(&harness, LocationKind::Warehouse, "Warehouse A");

    let err = harness
        .transfers
        .create_transfer(
            a.id_typed(),
            LocationId::new(AggregateId::new()),
            vec![TransferLineSpec {
                product_id: widget.product_id,
                product_name: widget.name.clone(),
                quantity: 1,
            }],
            now(),
        )
        .unwrap_err();
    assert!(matches!(err, TransferError::UnknownLocation(_)));
}
