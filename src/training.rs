//! Training orchestration.
//!
//! One training step is the epsilon-prediction regression:
//!
//! 1. assemble conditioning and target from the raw batch,
//! 2. draw `t ~ U{0..T}` per element and `eps ~ N(0, I)`,
//! 3. noise the target in closed form and reinstate the history prefix,
//! 4. regress `eps_hat(x_t, t, c)` toward `eps`.
//!
//! [`fit`] runs epochs of steps, evaluates validation loss, samples the first validation batch,
//! and drives the learning rate with a [`PlateauScheduler`].

use ndarray::ArrayView4;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use crate::conditioning::{FeatureEncoder, ObservationBatch};
use crate::estimator::{NoiseEstimator, StepIndex};
use crate::linear::LinearNoiseEstimator;
use crate::model::{SampleReport, TrajectoryDiffusion};
use crate::{Error, Result};

/// A noise estimator that can take one gradient step toward a noise target.
pub trait Trainable: NoiseEstimator {
    /// Update parameters on one batch; returns the batch loss before the update.
    fn train_batch(
        &mut self,
        x_t: ArrayView4<'_, f32>,
        t: StepIndex<'_>,
        cond: ArrayView4<'_, f32>,
        noise: ArrayView4<'_, f32>,
        lr: f32,
    ) -> Result<f32>;
}

impl Trainable for LinearNoiseEstimator {
    fn train_batch(
        &mut self,
        x_t: ArrayView4<'_, f32>,
        t: StepIndex<'_>,
        cond: ArrayView4<'_, f32>,
        noise: ArrayView4<'_, f32>,
        lr: f32,
    ) -> Result<f32> {
        self.sgd_step(x_t, t, cond, noise, lr)
    }
}

/// One optimization step on `batch`.
pub fn train_step<E: Trainable, F: FeatureEncoder>(
    model: &mut TrajectoryDiffusion<E, F>,
    batch: &ObservationBatch,
    lr: f32,
    rng: &mut impl rand::Rng,
) -> Result<f32> {
    let assembled = model.prepare(batch)?;
    let noised = model.noise_target(assembled.target.view(), rng)?;
    model.estimator_mut().train_batch(
        noised.x_noisy.view(),
        StepIndex::Batch(&noised.t),
        assembled.cond.view(),
        noised.noise.view(),
        lr,
    )
}

/// Reduce-on-plateau learning-rate policy (mode `min`).
///
/// After `patience` consecutive epochs without a relative improvement of `threshold` over the
/// best metric seen, the rate is multiplied by `factor` (floored at `min_lr`) and the counter
/// restarts.
#[derive(Debug, Clone)]
pub struct PlateauScheduler {
    pub factor: f32,
    pub patience: usize,
    pub threshold: f32,
    pub min_lr: f32,
    lr: f32,
    best: f32,
    bad_epochs: usize,
}

impl PlateauScheduler {
    pub fn new(lr: f32) -> Self {
        Self {
            factor: 0.1,
            patience: 5,
            threshold: 1e-4,
            min_lr: 0.0,
            lr,
            best: f32::INFINITY,
            bad_epochs: 0,
        }
    }

    pub fn with_patience(mut self, patience: usize) -> Self {
        self.patience = patience;
        self
    }

    pub fn with_factor(mut self, factor: f32) -> Self {
        self.factor = factor;
        self
    }

    pub fn lr(&self) -> f32 {
        self.lr
    }

    /// Feed one epoch's monitored metric; returns the learning rate to use next.
    pub fn step(&mut self, metric: f32) -> f32 {
        if metric < self.best * (1.0 - self.threshold) {
            self.best = metric;
            self.bad_epochs = 0;
        } else {
            self.bad_epochs += 1;
        }
        if self.bad_epochs > self.patience {
            let next = (self.lr * self.factor).max(self.min_lr);
            if next < self.lr {
                debug!(from = self.lr, to = next, "reducing learning rate on plateau");
            }
            self.lr = next;
            self.bad_epochs = 0;
        }
        self.lr
    }
}

/// Knobs of [`fit`].
#[derive(Debug, Clone)]
pub struct FitConfig {
    pub epochs: usize,
    /// Sample the first validation batch after every epoch.
    pub sample_each_epoch: bool,
    /// Plateau patience in epochs.
    pub patience: usize,
    pub seed: u64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            sample_each_epoch: true,
            patience: 5,
            seed: 123,
        }
    }
}

/// Per-epoch record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochStats {
    pub epoch: usize,
    pub train_loss: f32,
    pub val_loss: f32,
    /// Learning rate used during this epoch.
    pub lr: f32,
}

#[derive(Debug, Clone)]
pub struct FitReport {
    pub epochs: Vec<EpochStats>,
    /// Sample of the first validation batch after the last epoch that sampled.
    pub last_sample: Option<SampleReport>,
}

/// Train for `cfg.epochs` epochs over `train`, validating on `val`.
///
/// The initial learning rate is the model's configured `learning_rate`.
pub fn fit<E: Trainable, F: FeatureEncoder>(
    model: &mut TrajectoryDiffusion<E, F>,
    train: &[ObservationBatch],
    val: &[ObservationBatch],
    cfg: &FitConfig,
) -> Result<FitReport> {
    if train.is_empty() {
        return Err(Error::Domain("training set must contain at least one batch"));
    }
    if cfg.epochs == 0 {
        return Err(Error::Domain("epochs must be >= 1"));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(cfg.seed);
    let mut sched = PlateauScheduler::new(model.config().learning_rate).with_patience(cfg.patience);
    let mut epochs = Vec::with_capacity(cfg.epochs);
    let mut last_sample = None;

    for epoch in 0..cfg.epochs {
        let lr = sched.lr();
        let mut train_sum = 0.0f64;
        for batch in train {
            train_sum += train_step(model, batch, lr, &mut rng)? as f64;
        }
        let train_loss = (train_sum / train.len() as f64) as f32;

        let val_loss = if val.is_empty() {
            train_loss
        } else {
            let mut s = 0.0f64;
            for batch in val {
                s += model.loss(batch, &mut rng)? as f64;
            }
            (s / val.len() as f64) as f32
        };

        if cfg.sample_each_epoch {
            if let Some(first) = val.first() {
                last_sample = Some(model.sample(first, &mut rng)?);
            }
        }

        info!(epoch, train_loss, val_loss, lr, "epoch");
        epochs.push(EpochStats {
            epoch,
            train_loss,
            val_loss,
            lr,
        });
        sched.step(val_loss);
    }

    Ok(FitReport {
        epochs,
        last_sample,
    })
}
