#[cfg(not(feature = "burn"))]
fn main() {
    eprintln!("This demo requires the `burn` feature.");
    eprintln!("Run: cargo run --example burn_noise_mlp --features burn");
}

#[cfg(feature = "burn")]
fn main() -> trajdiff::Result<()> {
    use burn_core::tensor::backend::Backend;
    use ndarray::{Array3, ArrayD, IxDyn};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use trajdiff::burn_mlp::{train_noise_mlp, BurnBackend, BurnNoiseMlp};
    use trajdiff::conditioning::FlattenEncoder;
    use trajdiff::{DiffusionConfig, ObservationBatch, TrajectoryDiffusion};

    tracing_subscriber::fmt().with_env_filter("info").init();

    let cfg = DiffusionConfig {
        noise_steps: 100,
        denoising_steps: 10,
        obs_horizon: 4,
        pred_horizon: 4,
        inpaint_horizon: 2,
        action_dim: 1,
        learning_rate: 1e-3,
        ..Default::default()
    };

    // Straight-line drives with per-element speed.
    let b = 32usize;
    let len = cfg.obs_horizon + cfg.pred_horizon;
    let batch = ObservationBatch {
        position: Array3::from_shape_fn((b, len, 2), |(i, t, c)| {
            (1 + i % 4) as f32 * 0.05 * t as f32 * if c == 0 { 1.0 } else { 0.5 }
        }),
        action: Array3::from_shape_fn((b, len, 1), |(i, _, _)| (1 + i % 4) as f32 * 0.05),
        velocity: Array3::from_shape_fn((b, len, 1), |(i, _, _)| (1 + i % 4) as f32 * 0.05),
        image: ArrayD::zeros(IxDyn(&[b, len, 1])),
    };

    let device = <BurnBackend as Backend>::Device::default();
    // 2 position + 1 action + 1 velocity + 1 pixel per observed step.
    let net = BurnNoiseMlp::<BurnBackend>::new(
        &device,
        (cfg.trajectory_len(), cfg.trajectory_dim()),
        cfg.obs_horizon * 5,
        cfg.noise_steps,
        64,
    );
    let mut model = TrajectoryDiffusion::new(cfg, net, FlattenEncoder)?;
    let mut rng = ChaCha8Rng::seed_from_u64(0);
    let losses = train_noise_mlp(&mut model, &[batch.clone()], 50, &mut rng)?;
    println!(
        "loss: first={:.4} last={:.4}",
        losses.first().copied().unwrap_or(f32::NAN),
        losses.last().copied().unwrap_or(f32::NAN)
    );

    let report = model.sample(&batch, &mut rng)?;
    let (ade, fde) = report.displacement_errors()?;
    println!("ADE={ade:.3} FDE={fde:.3}");
    Ok(())
}
