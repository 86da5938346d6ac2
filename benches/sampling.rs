use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::Array4;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use trajdiff::forward::{q_sample, randn_like, sample_steps};
use trajdiff::reverse::{p_sample_loop, sample_strided};
use trajdiff::{Inpaint, LinearNoiseEstimator, NoiseSchedule, ScheduleKind};

fn bench_forward(c: &mut Criterion) {
    let mut group = c.benchmark_group("q_sample");
    let schedule = NoiseSchedule::new(ScheduleKind::Linear, 1000).unwrap();

    for &batch in &[16usize, 64, 256] {
        let mut rng = ChaCha8Rng::seed_from_u64(123);
        let x0 = randn_like((batch, 1, 20, 5), &mut rng);
        let noise = randn_like((batch, 1, 20, 5), &mut rng);
        let t = sample_steps(1000, batch, &mut rng);
        group.bench_with_input(BenchmarkId::new("linear", batch), &batch, |b, _| {
            b.iter(|| q_sample(&schedule, x0.view(), &t, noise.view()).unwrap())
        });
    }
    group.finish();
}

fn bench_reverse(c: &mut Criterion) {
    let mut group = c.benchmark_group("reverse");
    group.sample_size(20);

    // Reference shapes: 20-step trajectories of 5 features, 10 observed steps of 10 features.
    let reference = Array4::<f32>::zeros((8, 1, 20, 5));
    let cond = Array4::<f32>::zeros((8, 1, 10, 10));
    let inpaint = Inpaint::new(10);

    for &steps in &[100usize, 1000] {
        let schedule = NoiseSchedule::new(ScheduleKind::Cosine, steps).unwrap();
        let mut est = LinearNoiseEstimator::new_zeros((20, 5), 100, steps);

        group.bench_with_input(BenchmarkId::new("strided_10", steps), &steps, |b, _| {
            let mut rng = ChaCha8Rng::seed_from_u64(7);
            b.iter(|| {
                sample_strided(
                    &schedule,
                    &mut est,
                    cond.view(),
                    reference.view(),
                    inpaint,
                    steps / 10,
                    &mut rng,
                )
                .unwrap()
            })
        });

        group.bench_with_input(BenchmarkId::new("ancestral", steps), &steps, |b, _| {
            let mut rng = ChaCha8Rng::seed_from_u64(7);
            b.iter(|| {
                p_sample_loop(
                    &schedule,
                    &mut est,
                    cond.view(),
                    reference.view(),
                    inpaint,
                    None,
                    &mut rng,
                )
                .unwrap()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_forward, bench_reverse);
criterion_main!(benches);
