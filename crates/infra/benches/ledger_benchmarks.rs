use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::runtime::Runtime;

use stockledger_core::ItemKey;
use stockledger_infra::{InMemoryLedgerStore, InventoryLedger};
use stockledger_inventory::{
    Balance, InventoryTransaction, Movement, NewItem, StockAudit, TransactionRequest, apply_movement,
};

fn runtime() -> Runtime {
    Runtime::new().expect("tokio runtime")
}

fn seeded_ledger(rt: &Runtime, codes: &[&str]) -> InventoryLedger<InMemoryLedgerStore> {
    let ledger = InventoryLedger::new(InMemoryLedgerStore::new());
    rt.block_on(async {
        for code in codes {
            ledger
                .create_item(
                    NewItem::new(*code, *code).with_initial_stock(dec!(1_000_000), Some(dec!(2.5))),
                    None,
                )
                .await
                .expect("seed item");
        }
    });
    ledger
}

/// Pure weighted-average arithmetic, no storage.
fn bench_apply_movement(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply_movement");
    group.throughput(Throughput::Elements(1));

    let balance = Balance::new(dec!(1234.5), Some(dec!(3.1415)));
    group.bench_function("receipt_reweights_cost", |b| {
        b.iter(|| {
            apply_movement(
                "BENCH",
                black_box(balance),
                Movement::Receipt,
                black_box(dec!(17)),
                Some(dec!(4.2)),
            )
        })
    });
    group.bench_function("issue", |b| {
        b.iter(|| apply_movement("BENCH", black_box(balance), Movement::Issue, black_box(dec!(17)), None))
    });
    group.finish();
}

/// Full commit path through the in-memory store: lock, plan, append, write balances.
fn bench_record_transaction(c: &mut Criterion) {
    let rt = runtime();
    let ledger = seeded_ledger(&rt, &["SRC", "DST"]);
    let source = ItemKey::Code("SRC".to_string());
    let mut group = c.benchmark_group("record_transaction");
    group.throughput(Throughput::Elements(1));

    group.bench_function("receipt", |b| {
        b.iter(|| {
            rt.block_on(ledger.record_transaction(
                &source,
                TransactionRequest::receipt(dec!(1), dec!(2.75)),
                None,
            ))
        })
    });
    group.bench_function("transfer", |b| {
        b.iter(|| {
            rt.block_on(ledger.record_transaction(
                &source,
                TransactionRequest::transfer(dec!(1), ItemKey::Code("DST".to_string())),
                None,
            ))
        })
    });
    group.finish();
}

/// Replaying history to audit a balance, at increasing ledger sizes.
fn bench_audit_replay(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("audit_replay");

    for rows in [10usize, 100, 1_000, 10_000] {
        let ledger = seeded_ledger(&rt, &["AUDIT"]);
        let key = ItemKey::Code("AUDIT".to_string());
        rt.block_on(async {
            for i in 1..rows {
                let request = if i % 3 == 0 {
                    TransactionRequest::issue(dec!(1))
                } else {
                    TransactionRequest::receipt(Decimal::from(i % 7 + 1), dec!(2))
                };
                ledger
                    .record_transaction(&key, request, None)
                    .await
                    .expect("seed history");
            }
        });
        let item = rt.block_on(ledger.get_item(&key)).expect("audited item");
        let history: Vec<InventoryTransaction> = rt
            .block_on(async {
                use stockledger_infra::TransactionLog;
                ledger.store().item_history(item.id).await
            })
            .expect("history");

        group.throughput(Throughput::Elements(rows as u64));
        group.bench_with_input(BenchmarkId::from_parameter(rows), &history, |b, history| {
            b.iter(|| StockAudit::replay(black_box(&item), black_box(history)))
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_apply_movement,
    bench_record_transaction,
    bench_audit_replay,
);
criterion_main!(benches);
