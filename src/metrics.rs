//! Evaluation utilities (small + explicit).
//!
//! These helpers surface exactly the scalar they compute:
//! - `mse` is the elementwise mean over every entry, nothing masked
//! - displacement errors are Euclidean distances per timestep, over whatever rows you pass

use ndarray::{ArrayView2, ArrayViewD, Axis};

use crate::{Error, Result};

/// Mean squared error over all entries.
pub fn mse(a: ArrayViewD<'_, f32>, b: ArrayViewD<'_, f32>) -> Result<f32> {
    if a.shape() != b.shape() {
        return Err(Error::Shape("mse operands must have the same shape"));
    }
    if a.is_empty() {
        return Err(Error::Domain("mse of an empty tensor"));
    }
    let mut s: f64 = 0.0;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let r = (x - y) as f64;
        s += r * r;
    }
    Ok((s / a.len() as f64) as f32)
}

/// Average and final displacement error between predicted and true positions.
///
/// Both inputs are `(time, position_dim)`. ADE is the mean per-step Euclidean distance,
/// FDE the distance at the last step.
pub fn displacement_errors(
    predicted: ArrayView2<'_, f32>,
    truth: ArrayView2<'_, f32>,
) -> Result<(f32, f32)> {
    if predicted.dim() != truth.dim() {
        return Err(Error::Shape("predicted and true positions must have the same shape"));
    }
    let steps = predicted.nrows();
    if steps == 0 || predicted.ncols() == 0 {
        return Err(Error::Domain("displacement errors need at least one position"));
    }
    let mut dists = Vec::with_capacity(steps);
    for (p, q) in predicted.axis_iter(Axis(0)).zip(truth.axis_iter(Axis(0))) {
        let mut d2 = 0.0f32;
        for (&x, &y) in p.iter().zip(q.iter()) {
            d2 += (x - y) * (x - y);
        }
        dists.push(d2.sqrt());
    }
    let ade = dists.iter().sum::<f32>() / steps as f32;
    let fde = dists[steps - 1];
    Ok((ade, fde))
}
