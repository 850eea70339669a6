//! HNSW insert and search benchmarks.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use engram::arena::SlotMeta;
use engram::store::{SearchOptions, VectorStore, VectorStoreConfig};
use engram::types::MemoryType;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use uuid::Uuid;

const DIMS: usize = 128;

fn random_unit_vector(rng: &mut ChaCha8Rng) -> Vec<f32> {
    let mut v: Vec<f32> = (0..DIMS).map(|_| rng.gen::<f32>() - 0.5).collect();
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    for x in &mut v {
        *x /= norm;
    }
    v
}

fn populated_store(n: usize) -> (VectorStore, ChaCha8Rng) {
    let mut config = VectorStoreConfig::new(DIMS);
    config.max_memory_mb = 64;
    let mut store = VectorStore::new(config).unwrap();
    let persona = Uuid::new_v4();
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    for i in 0..n {
        let v = random_unit_vector(&mut rng);
        let meta = SlotMeta::new(persona, None, MemoryType::Fact, None, 0.5, i as i64, i as i64);
        store.add(Uuid::new_v4(), &v, meta).unwrap();
    }
    (store, rng)
}

fn bench_insert(c: &mut Criterion) {
    c.bench_function("insert_into_10k_store", |b| {
        let (mut store, mut rng) = populated_store(10_000);
        let persona = Uuid::new_v4();
        b.iter_batched(
            || random_unit_vector(&mut rng),
            |v| {
                let meta = SlotMeta::new(persona, None, MemoryType::Fact, None, 0.5, 0, 0);
                // The arena can fill during long runs; capacity errors
                // are not what this bench measures.
                let _ = store.add(Uuid::new_v4(), &v, meta);
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_search(c: &mut Criterion) {
    let (store, mut rng) = populated_store(10_000);
    let queries: Vec<Vec<f32>> = (0..64).map(|_| random_unit_vector(&mut rng)).collect();
    let mut i = 0;
    c.bench_function("search_k10_10k_store", |b| {
        b.iter(|| {
            let q = &queries[i % queries.len()];
            i += 1;
            store
                .search(
                    q,
                    &SearchOptions {
                        limit: 10,
                        ..SearchOptions::default()
                    },
                )
                .unwrap()
        });
    });
}

criterion_group!(benches, bench_search, bench_insert);
criterion_main!(benches);
