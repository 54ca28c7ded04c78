//! Performance benchmarks for hashing, nonce search and chain replay

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use powledger::chain::{Block, MiningTask};
use powledger::crypto::PrefixHasher;
use powledger::ledger::{Ledger, MemoryStore};
use powledger::policy::ChainParams;
use powledger::pow::{search, solve, NonceRange};
use powledger::transaction::Transaction;
use powledger::wallet::Wallet;
use powledger::{Amount, Difficulty, Hash256, Target};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn task(transactions: usize) -> MiningTask {
    let miner = Wallet::generate();
    let txs = (0..transactions)
        .map(|i| Transaction::reward(miner.address().clone(), Amount::from_coins(i as u64 + 1), 1_700_000_000_000))
        .collect();
    MiningTask {
        index: 1,
        previous_hash: Hash256::default(),
        transactions: txs,
        difficulty: Difficulty::new(1).expect("valid difficulty"),
        timestamp: 1_700_000_000_000,
    }
}

fn bench_hash_nonce(c: &mut Criterion) {
    let hasher = task(1).prefix_hasher();

    c.bench_function("hash_nonce", |b| {
        let mut nonce = 0u64;
        b.iter(|| {
            nonce = nonce.wrapping_add(1);
            black_box(hasher.hash_nonce(black_box(nonce)));
        });
    });
}

fn bench_prefix_absorb(c: &mut Criterion) {
    let mut group = c.benchmark_group("prefix_absorb");

    for transactions in [1usize, 10, 100] {
        let task = task(transactions);
        group.bench_with_input(BenchmarkId::from_parameter(transactions), &task, |b, task| {
            b.iter(|| black_box(task.prefix_hasher()));
        });
    }

    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("search");
    let hasher: PrefixHasher = task(1).prefix_hasher();
    let token = CancellationToken::new();
    let span = 10_000u64;
    group.throughput(Throughput::Elements(span));

    // An unreachable target forces a full sweep of the range
    group.bench_function("exhaust_10k", |b| {
        b.iter(|| {
            black_box(search(
                &hasher,
                &Target::min(),
                NonceRange { start: 0, last: span - 1 },
                &token,
                Duration::from_secs(60),
                |_| {},
            ))
        });
    });

    group.bench_function("solve_difficulty_2", |b| {
        let mut task = task(1);
        task.difficulty = Difficulty::new(2).expect("valid difficulty");
        b.iter(|| {
            task.timestamp += 1;
            black_box(solve(&task, &token))
        });
    });

    group.finish();
}

fn bench_block_hash(c: &mut Criterion) {
    let task = task(10);
    let block: Block = solve(&task, &CancellationToken::new()).expect("difficulty 1 is solvable");

    c.bench_function("block_recompute_hash", |b| {
        b.iter(|| black_box(block.recompute_hash()));
    });
}

fn bench_ledger_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger");
    group.sample_size(20);

    let mut params = ChainParams::default();
    params.difficulty.initial = Difficulty::new(1).expect("valid difficulty");
    params.difficulty.min = params.difficulty.initial;
    params.difficulty.max = params.difficulty.initial;

    let miner = Wallet::generate();
    let ledger = Ledger::open(params.clone(), Arc::new(MemoryStore::new())).expect("open ledger");
    for _ in 0..50 {
        let task = ledger.mining_task(miner.address()).expect("task");
        let block = solve(&task, &CancellationToken::new()).expect("solvable");
        ledger.append(block).expect("append");
    }
    let chain = ledger.blocks();

    group.bench_function("balance_50_blocks", |b| {
        b.iter(|| black_box(ledger.balance(miner.address())));
    });

    group.bench_function("reopen_50_blocks", |b| {
        b.iter(|| {
            let store = Arc::new(MemoryStore::with_chain(chain.clone()));
            black_box(Ledger::open(params.clone(), store).expect("reopen"))
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_hash_nonce,
    bench_prefix_absorb,
    bench_search,
    bench_block_hash,
    bench_ledger_replay
);
criterion_main!(benches);
