use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use fed_select_core::diversity::DiversityGreedySelector;
use fed_select_core::model::ModelParams;
use fed_select_core::selector::{ClientSelector, SelectionContext, SelectionSignal};

fn synthetic_population(clients: usize, params: usize, seed: u64) -> Vec<ModelParams> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..clients)
        .map(|_| {
            ModelParams::from_flat((0..params).map(|_| rng.gen_range(-1.0..1.0)).collect())
        })
        .collect()
}

fn bench_diversity_select(c: &mut Criterion) {
    let total = 64;
    let locals = synthetic_population(total, 256, 7);
    let ids: Vec<usize> = (0..total).collect();
    let global = ModelParams::from_flat(vec![0.0; 256]);

    c.bench_function("diversity_select_64x256", |b| {
        let mut selector = DiversityGreedySelector::new(Some(0.3)).unwrap();
        selector.init(&global).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let ctx = SelectionContext::new(total, 8, 0);
        b.iter(|| {
            let picked = selector
                .select(
                    &ctx,
                    black_box(&ids),
                    SelectionSignal::LocalModels(&locals),
                    &mut rng,
                )
                .unwrap();
            black_box(picked)
        })
    });
}

criterion_group!(benches, bench_diversity_select);
criterion_main!(benches);
