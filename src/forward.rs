//! Forward (noising) process \(q(x_t \mid x_0)\) in closed form:
//! \[
//! x_t = \sqrt{\bar\alpha_t}\, x_0 + \sqrt{1-\bar\alpha_t}\, \epsilon .
//! \]

use ndarray::{Array4, ArrayView4, Axis, Zip};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::schedule::NoiseSchedule;
use crate::{Error, Result};

/// Draw `x_t ~ q(x_t | x_0)` for one step index per batch element.
///
/// - `x0`, `noise`: `(batch, 1, time, feature)`, same shape
/// - `t`: length `batch`, each in `[0, noise_steps)`
///
/// The coefficients are gathered to shape `(batch,)` and broadcast over the remaining axes of
/// each batch element.
pub fn q_sample(
    schedule: &NoiseSchedule,
    x0: ArrayView4<'_, f32>,
    t: &[usize],
    noise: ArrayView4<'_, f32>,
) -> Result<Array4<f32>> {
    if x0.shape() != noise.shape() {
        return Err(Error::Shape("x0 and noise must have the same shape"));
    }
    let batch = x0.len_of(Axis(0));
    if t.len() != batch {
        return Err(Error::DimensionMismatch {
            what: "step indices per batch element",
            expected: batch,
            got: t.len(),
        });
    }

    let signal = schedule.gather(schedule.sqrt_alphas_cumprod(), t)?;
    let noise_scale = schedule.gather(schedule.sqrt_one_minus_alphas_cumprod(), t)?;

    let mut out = Array4::<f32>::zeros(x0.raw_dim());
    for b in 0..batch {
        let (sa, sb) = (signal[b], noise_scale[b]);
        Zip::from(out.index_axis_mut(Axis(0), b))
            .and(x0.index_axis(Axis(0), b))
            .and(noise.index_axis(Axis(0), b))
            .for_each(|o, &x, &e| *o = sa * x + sb * e);
    }
    Ok(out)
}

/// Standard-normal tensor with the given shape.
pub fn randn_like(shape: (usize, usize, usize, usize), rng: &mut impl Rng) -> Array4<f32> {
    Array4::from_shape_simple_fn(shape, || StandardNormal.sample(&mut *rng))
}

/// Uniform step index in `[0, noise_steps)` for each of `batch` elements.
pub fn sample_steps(noise_steps: usize, batch: usize, rng: &mut impl Rng) -> Vec<usize> {
    (0..batch).map(|_| rng.random_range(0..noise_steps)).collect()
}
