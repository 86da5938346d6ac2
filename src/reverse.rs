//! Reverse (denoising) process.
//!
//! Two samplers:
//!
//! - **Ancestral** ([`p_sample_loop`]): one step per schedule index, \(t = T-1, \dots, 0\),
//!   \[
//!   x_{t-1} = \frac{1}{\sqrt{\alpha_t}}\Big(x_t - \frac{1-\alpha_t}{\sqrt{1-\bar\alpha_t}}\,\hat\epsilon\Big)
//!   + \sqrt{\beta_t}\, z ,
//!   \]
//!   with \(z \sim \mathcal N(0, I)\) for \(t > 0\) and \(z = 0\) at \(t = 0\).
//! - **Strided** ([`sample_strided`]): a deterministic sampler over every `stride`-th step,
//!   \[
//!   x \leftarrow \sqrt{\bar\alpha_{t'}}\,\frac{x - \sqrt{1-\bar\alpha_t}\,\hat\epsilon(x,t)}{\sqrt{\bar\alpha_t}}
//!   + \sqrt{1-\bar\alpha_{t'}}\,\hat\epsilon(x,t'),
//!   \]
//!   which evaluates the estimator twice per transition \(t \to t'\) (both on the current `x`).
//!
//! Both apply [`Inpaint`] after every step. Steps are strictly sequential.

use ndarray::{Array4, ArrayView4, Zip};
use rand::Rng;
use tracing::debug;

use crate::estimator::{check_estimate_shape, NoiseEstimator, StepIndex};
use crate::forward::randn_like;
use crate::inpaint::Inpaint;
use crate::schedule::NoiseSchedule;
use crate::{Error, Result};

/// One ancestral update with an explicit noise draw `z` (`None` means `z = 0`).
///
/// This is the pure arithmetic of a reverse step; [`p_sample_step`] decides `z`.
pub fn p_step(
    schedule: &NoiseSchedule,
    x_t: ArrayView4<'_, f32>,
    t: usize,
    est_noise: ArrayView4<'_, f32>,
    z: Option<ArrayView4<'_, f32>>,
) -> Result<Array4<f32>> {
    if x_t.shape() != est_noise.shape() {
        return Err(Error::Shape("estimated noise must have the same shape as x_t"));
    }
    let alpha = schedule.at(schedule.alphas(), t)?;
    let alpha_bar = schedule.at(schedule.alphas_cumprod(), t)?;
    let beta = schedule.at(schedule.betas(), t)?;

    let inv_sqrt_alpha = (1.0 / alpha.sqrt()) as f32;
    let eps_coef = ((1.0 - alpha) / (1.0 - alpha_bar).sqrt()) as f32;
    let sigma = beta.sqrt() as f32;

    let mut out = Zip::from(&x_t)
        .and(&est_noise)
        .map_collect(|&x, &e| inv_sqrt_alpha * (x - eps_coef * e));

    if let Some(z) = z {
        if z.shape() != x_t.shape() {
            return Err(Error::Shape("z must have the same shape as x_t"));
        }
        Zip::from(&mut out).and(&z).for_each(|o, &zi| *o += sigma * zi);
    }
    Ok(out)
}

/// One ancestral step: estimate noise at `t`, then apply [`p_step`].
///
/// Fresh noise is drawn for `t > 0`; step 0 never injects noise.
pub fn p_sample_step<E: NoiseEstimator>(
    schedule: &NoiseSchedule,
    estimator: &mut E,
    x_t: ArrayView4<'_, f32>,
    t: usize,
    cond: ArrayView4<'_, f32>,
    rng: &mut impl Rng,
) -> Result<Array4<f32>> {
    schedule.check_step(t)?;
    let est = estimator.estimate(x_t, StepIndex::Scalar(t), cond)?;
    check_estimate_shape(&x_t, &est)?;
    if t == 0 {
        p_step(schedule, x_t, t, est.view(), None)
    } else {
        let z = randn_like(x_t.dim(), rng);
        p_step(schedule, x_t, t, est.view(), Some(z.view()))
    }
}

/// Full ancestral sampling from `t = noise_steps - 1` down to `0`.
///
/// - `reference`: history tensor `(batch, 1, time, feature)`; its shape is the output shape
/// - `x_t_init`: starting state (defaults to standard normal noise)
///
/// Returns the `x_0` estimate after step 0.
pub fn p_sample_loop<E: NoiseEstimator>(
    schedule: &NoiseSchedule,
    estimator: &mut E,
    cond: ArrayView4<'_, f32>,
    reference: ArrayView4<'_, f32>,
    inpaint: Inpaint,
    x_t_init: Option<Array4<f32>>,
    rng: &mut impl Rng,
) -> Result<Array4<f32>> {
    let mut x = match x_t_init {
        Some(x) => {
            if x.shape() != reference.shape() {
                return Err(Error::Shape("initial state must have the reference's shape"));
            }
            x
        }
        None => randn_like(reference.dim(), rng),
    };

    debug!(steps = schedule.len(), shape = ?x.shape(), "ancestral sampling");
    for t in (0..schedule.len()).rev() {
        x = p_sample_step(schedule, estimator, x.view(), t, cond, rng)?;
        inpaint.apply(&mut x, reference)?;
    }
    Ok(x)
}

/// Strictly increasing step subset `0, stride, 2*stride, ...` below `noise_steps`.
///
/// Always contains `0` and the largest multiple of `stride` below `noise_steps`.
pub fn strided_steps(noise_steps: usize, stride: usize) -> Result<Vec<usize>> {
    if noise_steps == 0 {
        return Err(Error::Domain("noise_steps must be >= 1"));
    }
    if stride == 0 {
        return Err(Error::Domain("stride must be >= 1"));
    }
    Ok((0..noise_steps).step_by(stride).collect())
}

/// Output of the strided sampler.
#[derive(Debug, Clone)]
pub struct StridedSample {
    /// Final trajectory (state after the transition into step 0).
    pub trajectory: Array4<f32>,
    /// Snapshot after every transition, starting with the initial noise.
    ///
    /// Length equals the number of steps in the subset.
    pub history: Vec<Array4<f32>>,
    /// The step subset that was visited (ascending).
    pub steps: Vec<usize>,
}

/// Deterministic strided sampling over `strided_steps(noise_steps, stride)`.
///
/// Starts from standard normal noise at the largest subset step and walks the subset in reverse,
/// applying the inpaint constraint after each transition.
pub fn sample_strided<E: NoiseEstimator>(
    schedule: &NoiseSchedule,
    estimator: &mut E,
    cond: ArrayView4<'_, f32>,
    reference: ArrayView4<'_, f32>,
    inpaint: Inpaint,
    stride: usize,
    rng: &mut impl Rng,
) -> Result<StridedSample> {
    let steps = strided_steps(schedule.len(), stride)?;
    let mut x = randn_like(reference.dim(), rng);
    let mut history = Vec::with_capacity(steps.len());
    history.push(x.clone());

    debug!(
        stride,
        transitions = steps.len() - 1,
        shape = ?x.shape(),
        "strided sampling"
    );

    let ac = schedule.alphas_cumprod();
    let mut t = steps[steps.len() - 1];
    for &t_next in steps[..steps.len() - 1].iter().rev() {
        let a_t = ac[t];
        let a_next = ac[t_next];

        let eps_t = estimator.estimate(x.view(), StepIndex::Scalar(t), cond)?;
        check_estimate_shape(&x.view(), &eps_t)?;
        let eps_next = estimator.estimate(x.view(), StepIndex::Scalar(t_next), cond)?;
        check_estimate_shape(&x.view(), &eps_next)?;

        let c_x0 = (a_next.sqrt() / a_t.sqrt()) as f32;
        let c_eps_t = (1.0 - a_t).sqrt() as f32;
        let c_eps_next = (1.0 - a_next).sqrt() as f32;

        Zip::from(&mut x)
            .and(&eps_t)
            .and(&eps_next)
            .for_each(|xi, &et, &en| *xi = c_x0 * (*xi - c_eps_t * et) + c_eps_next * en);

        inpaint.apply(&mut x, reference)?;
        history.push(x.clone());
        t = t_next;
    }
    // A one-step subset has no transition; the output still carries the known history.
    if steps.len() == 1 {
        inpaint.apply(&mut x, reference)?;
    }

    Ok(StridedSample {
        trajectory: x,
        history,
        steps,
    })
}
