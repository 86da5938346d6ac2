//! The configured model: schedule, assembler, inpainting, estimator and encoder in one place.

use ndarray::{s, Array2, Array4, ArrayView4, Axis};
use rand::Rng;
use tracing::info;

use crate::conditioning::{Assembled, ConditioningAssembler, FeatureEncoder, ObservationBatch};
use crate::config::DiffusionConfig;
use crate::estimator::{NoiseEstimator, StepIndex};
use crate::forward::{q_sample, randn_like, sample_steps};
use crate::inpaint::Inpaint;
use crate::metrics::{displacement_errors, mse};
use crate::reverse::{p_sample_loop, sample_strided};
use crate::schedule::NoiseSchedule;
use crate::{Error, Result};

/// A noised training pair for one batch.
#[derive(Debug, Clone)]
pub struct NoisedBatch {
    /// Inpainted `x_t`.
    pub x_noisy: Array4<f32>,
    /// Step per batch element.
    pub t: Vec<usize>,
    /// The noise that was added (the regression target).
    pub noise: Array4<f32>,
}

/// Everything a visualizer needs from one strided sampling run.
///
/// Positions occupy the first `position_dim` features of a trajectory, actions the rest.
#[derive(Debug, Clone)]
pub struct SampleReport {
    /// `(time, feature)` snapshot per transition, starting with the initial noise.
    pub history: Vec<Array2<f32>>,
    /// Final `(time, feature)` trajectory.
    pub predicted: Array2<f32>,
    /// Target positions, history prefix included: `(inpaint + pred, P)`.
    pub positions_groundtruth: Array2<f32>,
    /// Target actions, history prefix included: `(inpaint + pred, A)`.
    pub actions_groundtruth: Array2<f32>,
    /// Observed positions: `(obs_horizon, P)`.
    pub position_observation: Array2<f32>,
    /// Observed actions: `(obs_horizon, A)`.
    pub actions_observation: Array2<f32>,
    pub inpaint_horizon: usize,
}

impl SampleReport {
    pub fn denoising_steps(&self) -> usize {
        self.history.len()
    }

    /// ADE/FDE of the predicted positions over the non-inpainted suffix.
    pub fn displacement_errors(&self) -> Result<(f32, f32)> {
        let p = self.positions_groundtruth.ncols();
        displacement_errors(
            self.predicted.slice(s![self.inpaint_horizon.., ..p]),
            self.positions_groundtruth.slice(s![self.inpaint_horizon.., ..]),
        )
    }
}

/// Conditional trajectory diffusion model.
///
/// Owns its noise estimator `E` and image encoder `F`; both are fixed at construction.
pub struct TrajectoryDiffusion<E, F> {
    config: DiffusionConfig,
    schedule: NoiseSchedule,
    assembler: ConditioningAssembler,
    inpaint: Inpaint,
    estimator: E,
    encoder: F,
}

impl<E: NoiseEstimator, F: FeatureEncoder> TrajectoryDiffusion<E, F> {
    pub fn new(config: DiffusionConfig, estimator: E, encoder: F) -> Result<Self> {
        config.validate()?;
        let schedule = NoiseSchedule::new(config.schedule, config.noise_steps)?;
        let assembler =
            ConditioningAssembler::new(config.obs_horizon, config.pred_horizon, config.inpaint_horizon)?;
        let inpaint = Inpaint::new(config.inpaint_horizon);

        info!(
            noise_steps = config.noise_steps,
            denoising_steps = config.denoising_steps,
            schedule = ?config.schedule,
            obs_horizon = config.obs_horizon,
            pred_horizon = config.pred_horizon,
            inpaint_horizon = config.inpaint_horizon,
            position_dim = config.position_dim,
            action_dim = config.action_dim,
            learning_rate = config.learning_rate,
            cond_dim = ?estimator.cond_dim(),
            "trajectory diffusion model"
        );

        Ok(Self {
            config,
            schedule,
            assembler,
            inpaint,
            estimator,
            encoder,
        })
    }

    pub fn config(&self) -> &DiffusionConfig {
        &self.config
    }

    pub fn schedule(&self) -> &NoiseSchedule {
        &self.schedule
    }

    pub fn inpaint(&self) -> Inpaint {
        self.inpaint
    }

    pub fn estimator(&self) -> &E {
        &self.estimator
    }

    pub fn estimator_mut(&mut self) -> &mut E {
        &mut self.estimator
    }

    pub fn into_parts(self) -> (E, F) {
        (self.estimator, self.encoder)
    }

    /// Conditioning and target for `batch`, checked against the estimator's conditioning width.
    pub fn prepare(&mut self, batch: &ObservationBatch) -> Result<Assembled> {
        let assembled =
            self.assembler
                .assemble(batch, &mut self.encoder, self.estimator.cond_dim())?;
        let dim = assembled.target.len_of(Axis(3));
        if dim != self.config.trajectory_dim() {
            return Err(Error::DimensionMismatch {
                what: "position_dim + action_dim",
                expected: self.config.trajectory_dim(),
                got: dim,
            });
        }
        Ok(assembled)
    }

    /// Forward-noise `target` at uniformly drawn steps and reapply the history.
    pub fn noise_target(&self, target: ArrayView4<'_, f32>, rng: &mut impl Rng) -> Result<NoisedBatch> {
        let t = sample_steps(self.config.noise_steps, target.len_of(Axis(0)), rng);
        let noise = randn_like(target.dim(), rng);
        let mut x_noisy = q_sample(&self.schedule, target, &t, noise.view())?;
        self.inpaint.apply(&mut x_noisy, target)?;
        Ok(NoisedBatch { x_noisy, t, noise })
    }

    /// Noise-prediction MSE for one batch (no parameter update).
    pub fn loss(&mut self, batch: &ObservationBatch, rng: &mut impl Rng) -> Result<f32> {
        let assembled = self.prepare(batch)?;
        let noised = self.noise_target(assembled.target.view(), rng)?;
        let est = self.estimator.estimate(
            noised.x_noisy.view(),
            StepIndex::Batch(&noised.t),
            assembled.cond.view(),
        )?;
        mse(noised.noise.view().into_dyn(), est.view().into_dyn())
    }

    /// Strided sampling for the first element of `batch`.
    pub fn sample(&mut self, batch: &ObservationBatch, rng: &mut impl Rng) -> Result<SampleReport> {
        let first = batch.select(0)?;
        let assembled = self.prepare(&first)?;
        let sampled = sample_strided(
            &self.schedule,
            &mut self.estimator,
            assembled.cond.view(),
            assembled.target.view(),
            self.inpaint,
            self.config.sample_stride(),
            rng,
        )?;

        let p = self.config.position_dim;
        let target = assembled.target.slice(s![0, 0, .., ..]);
        let cond = assembled.cond.slice(s![0, 0, .., ..]);
        let a = self.config.action_dim;
        Ok(SampleReport {
            history: sampled
                .history
                .iter()
                .map(|x| x.slice(s![0, 0, .., ..]).to_owned())
                .collect(),
            predicted: sampled.trajectory.slice(s![0, 0, .., ..]).to_owned(),
            positions_groundtruth: target.slice(s![.., ..p]).to_owned(),
            actions_groundtruth: target.slice(s![.., p..]).to_owned(),
            position_observation: cond.slice(s![.., ..p]).to_owned(),
            actions_observation: cond.slice(s![.., p..p + a]).to_owned(),
            inpaint_horizon: self.config.inpaint_horizon,
        })
    }

    /// Full ancestral sampling for the whole batch.
    ///
    /// `x_t_init` defaults to standard normal noise shaped like the target.
    pub fn sample_ancestral(
        &mut self,
        batch: &ObservationBatch,
        x_t_init: Option<Array4<f32>>,
        rng: &mut impl Rng,
    ) -> Result<Array4<f32>> {
        let assembled = self.prepare(batch)?;
        p_sample_loop(
            &self.schedule,
            &mut self.estimator,
            assembled.cond.view(),
            assembled.target.view(),
            self.inpaint,
            x_t_init,
            rng,
        )
    }
}
