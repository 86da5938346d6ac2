//! Noise schedules.
//!
//! A schedule is the fixed sequence of per-step noise variances \(\beta_t\) plus the buffers
//! derived from it:
//! \[
//! \alpha_t = 1 - \beta_t, \qquad \bar\alpha_t = \prod_{i \le t} \alpha_i .
//! \]
//!
//! Everything is computed once in [`NoiseSchedule::new`] and never mutated afterwards.
//! Buffers are `f64`; coefficients are handed to `f32` tensor code through the explicit
//! gather helpers at the bottom of this file.

use std::str::FromStr;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Offset `s` of the cosine schedule.
const COSINE_OFFSET: f64 = 0.008;
/// Upper clip for cosine betas.
const COSINE_MAX_BETA: f64 = 0.999;

/// Which beta schedule family to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    /// DDPM linear schedule, rescaled by `1000 / noise_steps`.
    #[default]
    #[serde(alias = "linear_v2")]
    Linear,
    /// Improved-DDPM cosine schedule with `s = 0.008`, betas clipped to `[0, 0.999]`.
    #[serde(alias = "cosine_beta_schedule")]
    Cosine,
}

impl FromStr for ScheduleKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "linear" | "linear_v2" => Ok(Self::Linear),
            "cosine" | "cosine_beta_schedule" => Ok(Self::Cosine),
            other => Err(Error::Config(format!("unknown noise schedule `{other}`"))),
        }
    }
}

impl ScheduleKind {
    /// Betas for `steps` diffusion steps.
    pub fn betas(self, steps: usize) -> Result<Array1<f64>> {
        if steps == 0 {
            return Err(Error::Domain("noise_steps must be >= 1"));
        }
        let betas = match self {
            ScheduleKind::Linear => linear_betas(steps),
            ScheduleKind::Cosine => cosine_betas(steps),
        };
        if betas.iter().any(|&b| !(b > 0.0 && b < 1.0)) {
            return Err(Error::Domain(
                "schedule produced betas outside (0, 1); increase noise_steps",
            ));
        }
        Ok(betas)
    }
}

fn linear_betas(steps: usize) -> Array1<f64> {
    // Scale relative to the reference 1000-step schedule.
    let scale = 1000.0 / steps as f64;
    let beta_start = scale * 1e-4;
    let beta_end = scale * 2e-2;
    Array1::linspace(beta_start, beta_end, steps)
}

fn cosine_betas(timesteps: usize) -> Array1<f64> {
    let steps = timesteps + 1;
    let n = steps as f64;
    let x = Array1::linspace(0.0, n, steps);
    let f = x.mapv(|xi| {
        let c = ((xi / n + COSINE_OFFSET) / (1.0 + COSINE_OFFSET) * std::f64::consts::FRAC_PI_2).cos();
        c * c
    });
    let f0 = f[0];
    let mut betas = Array1::<f64>::zeros(timesteps);
    for i in 0..timesteps {
        let b = 1.0 - (f[i + 1] / f0) / (f[i] / f0);
        betas[i] = b.clamp(0.0, COSINE_MAX_BETA);
    }
    betas
}

/// Fixed noise schedule and its cached derived buffers.
#[derive(Debug, Clone)]
pub struct NoiseSchedule {
    kind: ScheduleKind,
    betas: Array1<f64>,
    alphas: Array1<f64>,
    alphas_cumprod: Array1<f64>,
    sqrt_alphas_cumprod: Array1<f64>,
    sqrt_one_minus_alphas_cumprod: Array1<f64>,
}

impl NoiseSchedule {
    pub fn new(kind: ScheduleKind, noise_steps: usize) -> Result<Self> {
        let betas = kind.betas(noise_steps)?;
        let alphas = betas.mapv(|b| 1.0 - b);

        let mut alphas_cumprod = Array1::<f64>::zeros(noise_steps);
        let mut acc = 1.0f64;
        for (i, &a) in alphas.iter().enumerate() {
            acc *= a;
            alphas_cumprod[i] = acc;
        }

        let sqrt_alphas_cumprod = alphas_cumprod.mapv(f64::sqrt);
        let sqrt_one_minus_alphas_cumprod = alphas_cumprod.mapv(|a| (1.0 - a).sqrt());

        Ok(Self {
            kind,
            betas,
            alphas,
            alphas_cumprod,
            sqrt_alphas_cumprod,
            sqrt_one_minus_alphas_cumprod,
        })
    }

    pub fn kind(&self) -> ScheduleKind {
        self.kind
    }

    /// Number of diffusion steps (`noise_steps`).
    pub fn len(&self) -> usize {
        self.betas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.betas.is_empty()
    }

    pub fn betas(&self) -> &Array1<f64> {
        &self.betas
    }

    pub fn alphas(&self) -> &Array1<f64> {
        &self.alphas
    }

    pub fn alphas_cumprod(&self) -> &Array1<f64> {
        &self.alphas_cumprod
    }

    pub fn sqrt_alphas_cumprod(&self) -> &Array1<f64> {
        &self.sqrt_alphas_cumprod
    }

    pub fn sqrt_one_minus_alphas_cumprod(&self) -> &Array1<f64> {
        &self.sqrt_one_minus_alphas_cumprod
    }

    /// Bounds-checked step index.
    #[inline]
    pub fn check_step(&self, t: usize) -> Result<usize> {
        if t >= self.len() {
            return Err(Error::DimensionMismatch {
                what: "diffusion step out of range (noise_steps)",
                expected: self.len(),
                got: t,
            });
        }
        Ok(t)
    }

    /// Scalar gather: `buf[t]`, for sampling where one step applies to the whole batch.
    pub fn at(&self, buf: &Array1<f64>, t: usize) -> Result<f64> {
        let t = self.check_step(t)?;
        Ok(buf[t])
    }

    /// Per-batch gather: `out[b] = buf[t[b]]`, shape `(batch,)`.
    ///
    /// The caller broadcasts `out[b]` over the `(1, time, feature)` block of batch element `b`.
    pub fn gather(&self, buf: &Array1<f64>, t: &[usize]) -> Result<Array1<f32>> {
        let mut out = Array1::<f32>::zeros(t.len());
        for (b, &tb) in t.iter().enumerate() {
            out[b] = buf[self.check_step(tb)?] as f32;
        }
        Ok(out)
    }
}
