// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Benchmarks for the stock ledger.
//!
//! Run with: cargo bench
//!
//! Benchmarks include:
//! - Single-threaded movement recording
//! - Lot consumption and historical valuation
//! - Multi-threaded recording on one key and across keys
//! - Transfers and scaling with thread count

use chrono::Utc;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rayon::prelude::*;
use rust_decimal::Decimal;
use std::sync::Arc;
use stock_ledger_rs::{
    Cancellation, DimensionKey, InventoryEngine, LedgerConfig, LocationId, ProductId,
    StockMovementRequest, TenantId, TransferRequest, ValuationMethod,
};

const TENANT: TenantId = TenantId(1);
const NUM_PRODUCTS: u64 = 1_000;

// =============================================================================
// Helper Functions
// =============================================================================

fn make_engine() -> InventoryEngine {
    let engine = InventoryEngine::new(LedgerConfig::default());
    let catalog = engine.catalog();
    for product in 1..=NUM_PRODUCTS {
        catalog.register_product(TENANT, ProductId(product));
    }
    catalog.register_location(TENANT, LocationId(1), None);
    catalog.register_location(TENANT, LocationId(2), None);
    engine
}

fn make_receipt(product: u64, quantity: i64, unit_cost: i64) -> StockMovementRequest {
    StockMovementRequest::stock_in(TENANT, ProductId(product), Decimal::from(quantity))
        .at_location(LocationId(1))
        .with_unit_cost(Decimal::new(unit_cost, 2))
}

fn make_issue(product: u64, quantity: i64) -> StockMovementRequest {
    StockMovementRequest::stock_out(TENANT, ProductId(product), Decimal::from(quantity))
        .at_location(LocationId(1))
}

fn key(product: u64) -> DimensionKey {
    DimensionKey::product(TENANT, ProductId(product)).with_location(LocationId(1))
}

/// Engine holding `lots` open receipts of one unit each for product 1.
fn engine_with_lots(lots: usize) -> InventoryEngine {
    let engine = make_engine();
    for i in 0..lots {
        engine.stock_in(make_receipt(1, 1, 100 + i as i64)).unwrap();
    }
    engine
}

// =============================================================================
// Single-Threaded Benchmarks
// =============================================================================

fn bench_single_receipt(c: &mut Criterion) {
    c.bench_function("single_receipt", |b| {
        b.iter(|| {
            let engine = make_engine();
            engine.stock_in(black_box(make_receipt(1, 10, 1000))).unwrap();
        })
    });
}

fn bench_single_issue(c: &mut Criterion) {
    c.bench_function("single_issue", |b| {
        b.iter(|| {
            let engine = make_engine();
            engine.stock_in(make_receipt(1, 10, 1000)).unwrap();
            engine.stock_out(black_box(make_issue(1, 5))).unwrap();
        })
    });
}

fn bench_mixed_movements(c: &mut Criterion) {
    let mut group = c.benchmark_group("mixed_movements");

    for count in [100, 1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(*count as u64 * 2));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter(|| {
                let engine = make_engine();
                for _ in 0..count {
                    engine.stock_in(make_receipt(1, 2, 1000)).unwrap();
                    let _ = engine.stock_out(make_issue(1, 1));
                }
                black_box(&engine);
            })
        });
    }
    group.finish();
}

// =============================================================================
// Valuation Benchmarks
// =============================================================================

fn bench_consumption_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("consumption_plan");

    for lots in [10, 100, 1_000].iter() {
        let engine = engine_with_lots(*lots);
        let quantity = Decimal::from(*lots as i64);
        for method in [ValuationMethod::Fifo, ValuationMethod::Lifo, ValuationMethod::Average] {
            group.bench_with_input(
                BenchmarkId::new(method.to_string(), lots),
                &quantity,
                |b, quantity| {
                    b.iter(|| {
                        let plan = engine.valuation().quote(&key(1), *quantity, method).unwrap();
                        black_box(plan);
                    })
                },
            );
        }
    }
    group.finish();
}

fn bench_valuation_as_of(c: &mut Criterion) {
    let mut group = c.benchmark_group("valuation_as_of");

    // Replay cost as history grows.
    for history_size in [100, 1_000, 10_000].iter() {
        let engine = make_engine();
        for _ in 0..*history_size / 2 {
            engine.stock_in(make_receipt(1, 2, 1000)).unwrap();
            engine.stock_out(make_issue(1, 1)).unwrap();
        }
        let cancel = Cancellation::new();

        group.throughput(Throughput::Elements(*history_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(history_size),
            history_size,
            |b, _| {
                b.iter(|| {
                    let value = engine
                        .valuation_as_of(&key(1), ValuationMethod::Fifo, Utc::now(), &cancel)
                        .unwrap();
                    black_box(value);
                })
            },
        );
    }
    group.finish();
}

// =============================================================================
// Multi-Threaded Benchmarks
// =============================================================================

fn bench_parallel_receipts_same_key(c: &mut Criterion) {
    let mut group = c.benchmark_group("parallel_receipts_same_key");

    for count in [1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter(|| {
                let engine = Arc::new(make_engine());

                (0..count).into_par_iter().for_each(|_| {
                    engine.stock_in(make_receipt(1, 1, 1000)).unwrap();
                });

                black_box(&engine);
            })
        });
    }
    group.finish();
}

fn bench_parallel_receipts_different_keys(c: &mut Criterion) {
    let mut group = c.benchmark_group("parallel_receipts_different_keys");

    for count in [1_000, 10_000, 100_000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter(|| {
                let engine = Arc::new(make_engine());

                (0..count as u64).into_par_iter().for_each(|i| {
                    let product = i % NUM_PRODUCTS + 1;
                    engine.stock_in(make_receipt(product, 1, 1000)).unwrap();
                });

                black_box(&engine);
            })
        });
    }
    group.finish();
}

fn bench_parallel_transfers(c: &mut Criterion) {
    let mut group = c.benchmark_group("parallel_transfers");

    for num_products in [10, 100, 1_000].iter() {
        group.throughput(Throughput::Elements(*num_products as u64 * 10));
        group.bench_with_input(
            BenchmarkId::from_parameter(num_products),
            num_products,
            |b, &num_products| {
                b.iter_batched(
                    || {
                        let engine = make_engine();
                        for product in 1..=num_products {
                            engine.stock_in(make_receipt(product, 100, 1000)).unwrap();
                        }
                        Arc::new(engine)
                    },
                    |engine| {
                        (1..=num_products).into_par_iter().for_each(|product| {
                            for _ in 0..10 {
                                let request = TransferRequest::new(
                                    TENANT,
                                    ProductId(product),
                                    LocationId(1),
                                    LocationId(2),
                                    Decimal::from(5),
                                );
                                engine.stock_transfer(request).unwrap();
                            }
                        });
                        black_box(&engine);
                    },
                    criterion::BatchSize::SmallInput,
                )
            },
        );
    }
    group.finish();
}

// =============================================================================
// Scaling Benchmarks
// =============================================================================

fn bench_thread_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("thread_scaling");
    let total_movements = 100_000u64;

    for num_threads in [1, 2, 4, 8].iter() {
        group.throughput(Throughput::Elements(total_movements));
        group.bench_with_input(
            BenchmarkId::from_parameter(num_threads),
            num_threads,
            |b, &num_threads| {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(num_threads)
                    .build()
                    .unwrap();

                b.iter(|| {
                    let engine = Arc::new(make_engine());

                    pool.install(|| {
                        (0..total_movements).into_par_iter().for_each(|i| {
                            let product = i % NUM_PRODUCTS + 1;
                            engine.stock_in(make_receipt(product, 1, 1000)).unwrap();
                        });
                    });

                    black_box(&engine);
                })
            },
        );
    }
    group.finish();
}

fn bench_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("contention");
    let total_ops = 10_000u64;

    // Fewer products = more threads competing for the same key lock.
    for num_products in [1, 10, 100, 1_000].iter() {
        group.throughput(Throughput::Elements(total_ops));
        group.bench_with_input(
            BenchmarkId::new("products", num_products),
            num_products,
            |b, &num_products| {
                b.iter(|| {
                    let engine = Arc::new(make_engine());

                    (0..total_ops).into_par_iter().for_each(|i| {
                        let product = i % num_products + 1;
                        engine.stock_in(make_receipt(product, 1, 1000)).unwrap();
                    });

                    black_box(&engine);
                })
            },
        );
    }
    group.finish();
}

criterion_group!(
    single_threaded,
    bench_single_receipt,
    bench_single_issue,
    bench_mixed_movements,
);

criterion_group!(valuation, bench_consumption_plan, bench_valuation_as_of,);

criterion_group!(
    multi_threaded,
    bench_parallel_receipts_same_key,
    bench_parallel_receipts_different_keys,
    bench_parallel_transfers,
);

criterion_group!(scaling, bench_thread_scaling, bench_contention,);

criterion_main!(single_threaded, valuation, multi_threaded, scaling);
