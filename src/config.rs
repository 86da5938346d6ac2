//! Model hyperparameters.

use serde::{Deserialize, Serialize};

use crate::schedule::ScheduleKind;
use crate::{Error, Result};

/// Hyperparameters of a [`crate::TrajectoryDiffusion`] model.
///
/// Defaults match the reference setup: a 1000-step linear schedule, 10 observed steps,
/// 10 predicted steps, all 10 observed steps inpainted as history, 2D positions and 3D actions
/// (steering, acceleration, brake).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffusionConfig {
    /// Length of the fixed noise schedule.
    pub noise_steps: usize,
    /// Sets the strided sampler's stride, `noise_steps / denoising_steps`.
    ///
    /// The visited subset has exactly this many steps only when it divides `noise_steps`.
    pub denoising_steps: usize,
    /// Observed steps used as conditioning context.
    pub obs_horizon: usize,
    /// Future steps to predict.
    pub pred_horizon: usize,
    /// Trailing observed steps prepended to the target as known history.
    pub inpaint_horizon: usize,
    pub position_dim: usize,
    pub action_dim: usize,
    pub learning_rate: f32,
    pub schedule: ScheduleKind,
    /// RNG seed for training/sampling drivers that own their RNG.
    pub seed: u64,
}

impl Default for DiffusionConfig {
    fn default() -> Self {
        Self {
            noise_steps: 1000,
            denoising_steps: 10,
            obs_horizon: 10,
            pred_horizon: 10,
            inpaint_horizon: 10,
            position_dim: 2,
            action_dim: 3,
            learning_rate: 1e-4,
            schedule: ScheduleKind::Linear,
            seed: 0,
        }
    }
}

impl DiffusionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.noise_steps == 0 {
            return Err(Error::Config("noise_steps must be >= 1".into()));
        }
        if self.denoising_steps == 0 || self.denoising_steps > self.noise_steps {
            return Err(Error::Config(format!(
                "denoising_steps must be in 1..={}, got {}",
                self.noise_steps, self.denoising_steps
            )));
        }
        if self.obs_horizon == 0 || self.pred_horizon == 0 {
            return Err(Error::Config("obs_horizon and pred_horizon must be >= 1".into()));
        }
        if self.inpaint_horizon > self.obs_horizon {
            return Err(Error::Config(format!(
                "inpaint_horizon ({}) cannot exceed obs_horizon ({})",
                self.inpaint_horizon, self.obs_horizon
            )));
        }
        if self.position_dim == 0 || self.action_dim == 0 {
            return Err(Error::Config("position_dim and action_dim must be >= 1".into()));
        }
        if !(self.learning_rate > 0.0) || !self.learning_rate.is_finite() {
            return Err(Error::Config("learning_rate must be positive and finite".into()));
        }
        Ok(())
    }

    /// Stride of the accelerated sampler's step subset.
    pub fn sample_stride(&self) -> usize {
        (self.noise_steps / self.denoising_steps.max(1)).max(1)
    }

    /// Time length of a target trajectory (history + prediction).
    pub fn trajectory_len(&self) -> usize {
        self.inpaint_horizon + self.pred_horizon
    }

    /// Feature width of a target trajectory (position + action).
    pub fn trajectory_dim(&self) -> usize {
        self.position_dim + self.action_dim
    }
}
