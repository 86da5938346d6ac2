use ndarray::{Array3, ArrayD, IxDyn};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use trajdiff::conditioning::FlattenEncoder;
use trajdiff::{fit, DiffusionConfig, FitConfig, LinearNoiseEstimator, ObservationBatch, TrajectoryDiffusion};

fn config() -> DiffusionConfig {
    DiffusionConfig {
        noise_steps: 100,
        denoising_steps: 10,
        obs_horizon: 3,
        pred_horizon: 4,
        inpaint_horizon: 1,
        position_dim: 2,
        action_dim: 1,
        learning_rate: 1e-2,
        ..Default::default()
    }
}

fn batches(n: usize, b: usize, seed: u64) -> Vec<ObservationBatch> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let phase: Vec<f32> = (0..b).map(|_| rng.random::<f32>() * 6.28).collect();
            ObservationBatch {
                position: Array3::from_shape_fn((b, 7, 2), |(i, t, c)| {
                    let a = phase[i] + 0.2 * t as f32;
                    if c == 0 {
                        a.cos()
                    } else {
                        a.sin()
                    }
                }),
                action: Array3::from_elem((b, 7, 1), 0.2),
                velocity: Array3::from_elem((b, 7, 1), 0.2),
                image: ArrayD::from_shape_fn(IxDyn(&[b, 7, 2]), |ix| phase[ix[0]] / 6.28),
            }
        })
        .collect()
}

fn model() -> TrajectoryDiffusion<LinearNoiseEstimator, FlattenEncoder> {
    // cond width = obs * (P + A + V + K) = 3 * 6; trajectory = (1 + 4, 3).
    let est = LinearNoiseEstimator::new_zeros((5, 3), 18, 100);
    TrajectoryDiffusion::new(config(), est, FlattenEncoder).unwrap()
}

#[test]
fn fit_reduces_validation_loss_below_zero_estimator() {
    let mut m = model();
    let train = batches(4, 16, 1);
    let val = batches(2, 32, 2);

    let mut rng = ChaCha8Rng::seed_from_u64(0);
    let baseline: f32 =
        val.iter().map(|b| m.loss(b, &mut rng).unwrap()).sum::<f32>() / val.len() as f32;
    assert!((baseline - 1.0).abs() < 0.2, "zero estimator loss {baseline}");

    let cfg = FitConfig {
        epochs: 20,
        ..Default::default()
    };
    let report = fit(&mut m, &train, &val, &cfg).unwrap();
    assert_eq!(report.epochs.len(), 20);

    let last = report.epochs[19];
    assert!(last.val_loss < 0.8 * baseline, "{baseline} -> {}", last.val_loss);
    assert!(report.epochs.iter().all(|e| e.train_loss.is_finite() && e.lr > 0.0));

    let sample = report.last_sample.unwrap();
    assert_eq!(sample.denoising_steps(), 10);
    assert_eq!(sample.predicted.dim(), (5, 3));
}

#[test]
fn fit_without_sampling_or_validation() {
    let mut m = model();
    let cfg = FitConfig {
        epochs: 2,
        sample_each_epoch: false,
        ..Default::default()
    };
    let report = fit(&mut m, &batches(1, 4, 3), &[], &cfg).unwrap();
    assert!(report.last_sample.is_none());
    // Without validation batches the monitored metric is the train loss.
    assert!(report.epochs.iter().all(|e| e.val_loss == e.train_loss));

    assert!(fit(&mut m, &[], &[], &cfg).is_err());
}
