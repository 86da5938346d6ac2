//! # trajdiff
//!
//! Conditional denoising diffusion for trajectory prediction.
//!
//! Given a short horizon of past observations (position, action, velocity, image), the model
//! predicts a future horizon of position/action states by learning to reverse a fixed noising
//! process. The known history is inpainted into the trajectory at every process step, so only
//! the unknown suffix is ever estimated.
//!
//! This crate is the numerical core:
//!
//! - it builds the **noise schedule** and runs the closed-form **forward process**,
//! - it runs the **reverse process** (full ancestral sampling and a strided deterministic sampler),
//! - it assembles **conditioning** from raw observation batches,
//! - it is agnostic to the network and the image encoder; those plug in through
//!   [`estimator::NoiseEstimator`] and [`conditioning::FeatureEncoder`] (a linear baseline and,
//!   behind the `burn` feature, an MLP are provided).
//!
//! ## Public invariants (must not change)
//!
//! - **Determinism knobs are explicit**: every stochastic operation takes an `rng` argument.
//! - **Broadcasts are explicit**: per-step coefficients are gathered into a `(batch,)` vector
//!   (training) or a single scalar (sampling), and the broadcast over `(1, time, feature)` is
//!   done by the call site, never implied.
//! - **Schedules are immutable**: a [`schedule::NoiseSchedule`] is computed once and borrowed by
//!   the forward and reverse processes.
//! - **Backend-agnostic by default**: the public API is `ndarray`; the optional `burn` backend is
//!   feature-gated.
//!
//! ## Tensor layout
//!
//! Trajectories and conditioning are `Array4<f32>` with axes `(batch, 1, time, feature)`.
//! A trajectory's feature axis is `position_dim + action_dim`; its time axis is
//! `inpaint_horizon + pred_horizon`, the first `inpaint_horizon` steps being known history.
//!
//! ## References
//!
//! - Ho et al., *Denoising Diffusion Probabilistic Models* (arXiv:2006.11239):
//!   linear schedule, ancestral sampler, epsilon-prediction objective.
//! - Nichol & Dhariwal, *Improved DDPM* (arXiv:2102.09672): cosine schedule.
//! - Song et al., *Denoising Diffusion Implicit Models* (arXiv:2010.02502): deterministic strided
//!   sampling.
//! - Janner et al., *Planning with Diffusion for Flexible Behavior Synthesis* (arXiv:2205.09991):
//!   inpainting-style trajectory conditioning.
//!
//! ## Module map
//!
//! - `config`: `DiffusionConfig` hyperparameters (serde)
//! - `schedule`: beta schedules and cached derived buffers
//! - `forward`: closed-form `q(x_t | x_0)`
//! - `inpaint`: constraint enforcement over the known prefix
//! - `reverse`: ancestral and strided samplers
//! - `conditioning`: observation batches, feature encoders, conditioning assembly
//! - `estimator`: the noise-estimator seam
//! - `linear`: a linear baseline noise estimator trainable with SGD
//! - `model`: `TrajectoryDiffusion`, the configured facade
//! - `training`: training steps, fit loop, plateau LR policy
//! - `metrics`: MSE and displacement errors
//! - `burn_mlp` (feature `burn`): an MLP noise estimator trained with Burn autodiff

pub mod conditioning;
pub mod config;
pub mod estimator;
pub mod forward;
pub mod inpaint;
pub mod linear;
pub mod metrics;
pub mod model;
pub mod reverse;
pub mod schedule;
pub mod training;

#[cfg(feature = "burn")]
pub mod burn_mlp;

/// trajdiff error variants.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("shape mismatch: {0}")]
    Shape(&'static str),
    #[error("{what}: expected {expected}, got {got}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("domain error: {0}")]
    Domain(&'static str),
    #[error("non-finite values in {0}")]
    NonFinite(&'static str),
    #[error("conditioning width {got} does not match the noise estimator's expected {expected}")]
    CondWidth { expected: usize, got: usize },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, Error>;

pub use conditioning::{Assembled, ConditioningAssembler, FeatureEncoder, ObservationBatch};
pub use config::DiffusionConfig;
pub use estimator::{NoiseEstimator, StepIndex};
pub use inpaint::Inpaint;
pub use linear::LinearNoiseEstimator;
pub use model::{SampleReport, TrajectoryDiffusion};
pub use schedule::{NoiseSchedule, ScheduleKind};
pub use training::{fit, train_step, FitConfig, FitReport, PlateauScheduler, Trainable};
