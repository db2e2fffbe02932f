// Throughput of full piece evaluation and of one local search sweep.
//
// Evaluation dominates search time: every order-1 neighbor examined by the
// local search is scored from scratch (sonority extraction plus every
// weighted function).

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use geniartor_music::config::GeneratorConfig;
use geniartor_music::draft::build_draft;
use geniartor_music::neighborhood::Neighborhood;
use geniartor_music::sonority::extract_sonorities;
use geniartor_music::vns::Composer;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::BTreeMap;

fn bench_evaluation(c: &mut Criterion) {
    let config = GeneratorConfig::default();
    let composer = Composer::new(&config).unwrap();
    let piece = build_draft(composer.constraints(), &mut StdRng::seed_from_u64(0)).unwrap();

    c.bench_function("extract_sonorities", |b| {
        b.iter(|| extract_sonorities(black_box(&piece), &BTreeMap::new()))
    });

    c.bench_function("evaluate_default_weights", |b| {
        b.iter(|| composer.evaluator().evaluate(black_box(&piece)).unwrap())
    });

    let hood = Neighborhood::new(
        composer.constraints().voices.clone(),
        config.search.move_weights,
        config.search.move_retry_budget,
    )
    .unwrap();
    c.bench_function("evaluate_all_order1_neighbors", |b| {
        b.iter(|| {
            let mut best = f64::NEG_INFINITY;
            for mv in hood.all_moves(&piece) {
                if let Some(next) = hood.apply(&piece, &mv) {
                    best = best.max(composer.evaluator().evaluate(&next).unwrap());
                }
            }
            best
        })
    });
}

criterion_group!(benches, bench_evaluation);
criterion_main!(benches);
