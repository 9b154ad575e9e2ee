use std::hint::black_box;
use std::sync::Arc;

use chrono::Utc;
use criterion::{Criterion, criterion_group, criterion_main};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use stockyard_allocation::{StockLevel, allocate};
use stockyard_core::{AggregateId, ProductId};
use stockyard_events::{EventEnvelope, InMemoryEventBus};
use stockyard_infra::command_dispatcher::CommandDispatcher;
use stockyard_infra::event_store::InMemoryEventStore;
use stockyard_infra::projections::StockLevelsProjection;
use stockyard_infra::read_model::InMemoryReadStore;
use stockyard_infra::services::StockLedgerService;
use stockyard_ledger::ProductRef;
use stockyard_locations::{Location, LocationId};

fn bench_allocation(c: &mut Criterion) {
    let levels: Vec<StockLevel> = (0u128..100)
        .map(|i| StockLevel {
            location_id: LocationId::new(AggregateId::from_uuid(Uuid::from_u128(i + 1))),
            location_name: format!("Location {i}"),
            available: (i as i64 % 17) + 1,
        })
        .collect();
    let product_id = ProductId::new();

    c.bench_function("allocate_100_locations", |b| {
        b.iter(|| allocate(product_id, black_box(500), None, &levels))
    });
}

fn bench_receive_stock(c: &mut Criterion) {
    let store = Arc::new(InMemoryEventStore::new());
    let bus: Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>> =
        Arc::new(InMemoryEventBus::new());
    let levels = Arc::new(StockLevelsProjection::new(Arc::new(InMemoryReadStore::new())));
    let service = StockLedgerService::new(CommandDispatcher::new(store, bus), levels);
    let site = Location::warehouse(LocationId::new(AggregateId::new()), "Bench Warehouse")
        .expect("valid location");

    c.bench_function("receive_stock_fresh_record", |b| {
        b.iter(|| {
            let product = ProductRef {
                product_id: ProductId::new(),
                name: "Bench Widget".to_string(),
                sku: "BENCH-001".to_string(),
            };
            service
                .receive_stock(product, &site, black_box(10), 100, Utc::now())
                .expect("receive succeeds")
        })
    });
}

fn bench_reserve_release(c: &mut Criterion) {
    let store = Arc::new(InMemoryEventStore::new());
    let bus: Arc<InMemoryEventBus<EventEnvelope<JsonValue>>> = Arc::new(InMemoryEventBus::new());
    let levels = Arc::new(StockLevelsProjection::new(Arc::new(InMemoryReadStore::new())));
    let service = StockLedgerService::new(CommandDispatcher::new(store, bus), levels);
    let site = Location::warehouse(LocationId::new(AggregateId::new()), "Bench Warehouse")
        .expect("valid location");
    let product = ProductRef {
        product_id: ProductId::new(),
        name: "Bench Widget".to_string(),
        sku: "BENCH-002".to_string(),
    };
    service
        .receive_stock(product.clone(), &site, 1_000_000, 100, Utc::now())
        .expect("seed stock");

    c.bench_function("reserve_release_cycle", |b| {
        b.iter(|| {
            service
                .reserve(product.product_id, site.id_typed(), 1, Utc::now())
                .expect("reserve");
            service
                .release(product.product_id, site.id_typed(), 1, Utc::now())
                .expect("release");
        })
    });
}

criterion_group!(
    benches,
    bench_allocation,
    bench_receive_stock,
    bench_reserve_release
);
criterion_main!(benches);
