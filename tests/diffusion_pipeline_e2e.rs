use ndarray::{s, Array3, Array4, ArrayD, IxDyn};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};
use trajdiff::conditioning::FlattenEncoder;
use trajdiff::forward::q_sample;
use trajdiff::reverse::sample_strided;
use trajdiff::{
    DiffusionConfig, Error, LinearNoiseEstimator, NoiseSchedule, ObservationBatch, ScheduleKind,
    TrajectoryDiffusion,
};

/// Vehicles driving circles of varying radius; actions are (steer, accel, brake).
fn circle_batch(b: usize, len: usize, seed: u64) -> ObservationBatch {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let radii: Vec<f32> = (0..b)
        .map(|_| {
            let z: f32 = StandardNormal.sample(&mut rng);
            1.0 + 0.1 * z.abs()
        })
        .collect();
    let position = Array3::from_shape_fn((b, len, 2), |(i, t, c)| {
        let a = 0.1 * t as f32;
        if c == 0 {
            radii[i] * a.cos()
        } else {
            radii[i] * a.sin()
        }
    });
    let action = Array3::from_shape_fn((b, len, 3), |(i, _, c)| match c {
        0 => 1.0 / radii[i],
        1 => 0.1,
        _ => 0.0,
    });
    let velocity = Array3::from_elem((b, len, 1), 0.1);
    let image = ArrayD::from_shape_fn(IxDyn(&[b, len, 2, 2]), |ix| (ix[1] % 3) as f32 * 0.25);
    ObservationBatch {
        position,
        action,
        velocity,
        image,
    }
}

#[test]
fn reference_setup_schedule_and_zero_noise_forward() {
    let cfg = DiffusionConfig::default();
    assert_eq!(cfg.noise_steps, 1000);
    assert_eq!(
        (cfg.obs_horizon, cfg.pred_horizon, cfg.inpaint_horizon),
        (10, 10, 10)
    );

    let schedule = NoiseSchedule::new(ScheduleKind::Linear, cfg.noise_steps).unwrap();
    assert!((schedule.betas()[0] - 1e-4).abs() < 1e-9);
    assert!((schedule.betas()[999] - 0.02).abs() < 1e-9);

    // P + A + V + K = 2 + 3 + 1 + 4 per observed step.
    let est = LinearNoiseEstimator::new_zeros((20, 5), 10 * 10, cfg.noise_steps);
    let mut model = TrajectoryDiffusion::new(cfg, est, FlattenEncoder).unwrap();
    let batch = circle_batch(4, 20, 1);
    let x0 = model.prepare(&batch).unwrap().target;
    assert_eq!(x0.shape(), &[4, 1, 20, 5]);

    let noise = Array4::<f32>::zeros(x0.raw_dim());
    let x_t = q_sample(model.schedule(), x0.view(), &[0; 4], noise.view()).unwrap();
    for (&a, &b) in x_t.iter().zip(x0.iter()) {
        assert!((a - b).abs() <= 1e-4 * (1.0 + b.abs()), "{a} vs {b}");
    }
}

#[test]
fn nan_in_observed_positions_fails_before_estimation() {
    let cfg = DiffusionConfig {
        noise_steps: 100,
        ..Default::default()
    };
    let est = LinearNoiseEstimator::new_zeros((20, 5), 100, 100);
    let mut model = TrajectoryDiffusion::new(cfg, est, FlattenEncoder).unwrap();
    let mut batch = circle_batch(2, 20, 2);
    batch.position[[1, 4, 0]] = f32::NAN;
    let mut rng = ChaCha8Rng::seed_from_u64(0);
    assert!(matches!(
        model.loss(&batch, &mut rng),
        Err(Error::NonFinite(_))
    ));

    // NaN in a future position is outside the checked slice.
    let mut batch = circle_batch(2, 20, 2);
    batch.position[[0, 15, 1]] = f32::NAN;
    assert!(model.prepare(&batch).is_ok());
}

#[test]
fn strided_history_matches_subset_and_keeps_prefix() {
    let cfg = DiffusionConfig {
        noise_steps: 200,
        denoising_steps: 8,
        obs_horizon: 4,
        pred_horizon: 3,
        inpaint_horizon: 2,
        schedule: ScheduleKind::Cosine,
        ..Default::default()
    };
    let schedule = NoiseSchedule::new(cfg.schedule, cfg.noise_steps).unwrap();
    let est = LinearNoiseEstimator::new_zeros((5, 5), 4 * 10, cfg.noise_steps);
    let stride = cfg.sample_stride();
    let mut model = TrajectoryDiffusion::new(cfg, est, FlattenEncoder).unwrap();
    let assembled = model.prepare(&circle_batch(3, 7, 3)).unwrap();

    let mut rng = ChaCha8Rng::seed_from_u64(9);
    let out = sample_strided(
        &schedule,
        model.estimator_mut(),
        assembled.cond.view(),
        assembled.target.view(),
        trajdiff::Inpaint::new(2),
        stride,
        &mut rng,
    )
    .unwrap();

    assert_eq!(stride, 25);
    assert_eq!(out.steps.first(), Some(&0));
    assert_eq!(out.steps.last(), Some(&175));
    assert_eq!(out.history.len(), out.steps.len());
    assert_eq!(
        out.trajectory.slice(s![.., .., ..2, ..]),
        assembled.target.slice(s![.., .., ..2, ..])
    );
    assert!(out.trajectory.iter().all(|v| v.is_finite()));
}

#[test]
fn ancestral_sampling_is_deterministic_given_seed() {
    let cfg = DiffusionConfig {
        noise_steps: 50,
        denoising_steps: 5,
        obs_horizon: 3,
        pred_horizon: 2,
        inpaint_horizon: 3,
        ..Default::default()
    };
    let batch = circle_batch(2, 5, 4);
    let run = |seed: u64| {
        let est = LinearNoiseEstimator::new_zeros((5, 5), 3 * 10, 50);
        let mut model = TrajectoryDiffusion::new(cfg.clone(), est, FlattenEncoder).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        model.sample_ancestral(&batch, None, &mut rng).unwrap()
    };
    let a = run(5);
    let b = run(5);
    assert_eq!(a, b);
    assert_ne!(a, run(6));
}
