//! The noise-estimator seam.
//!
//! A noise estimator \(\epsilon_\theta(x_t, t, c)\) is whatever network predicts the noise in a
//! noisy trajectory. The core only needs it as a function; architecture lives elsewhere.

use ndarray::{Array4, ArrayView4};

use crate::Result;

/// Diffusion step(s) handed to a noise estimator.
///
/// Training passes one step per batch element; sampling passes one step for the whole batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepIndex<'a> {
    /// `t[b]` applies to batch element `b`.
    Batch(&'a [usize]),
    /// One step broadcast over every batch element.
    Scalar(usize),
}

impl StepIndex<'_> {
    /// Step for batch element `b`.
    #[inline]
    pub fn at(&self, b: usize) -> usize {
        match self {
            StepIndex::Batch(ts) => ts[b],
            StepIndex::Scalar(t) => *t,
        }
    }

    /// Check that a batched index covers exactly `batch` elements.
    pub fn check_batch(&self, batch: usize) -> Result<()> {
        match self {
            StepIndex::Batch(ts) if ts.len() != batch => Err(crate::Error::DimensionMismatch {
                what: "step indices per batch element",
                expected: batch,
                got: ts.len(),
            }),
            _ => Ok(()),
        }
    }
}

/// Predicts the noise contained in `x_t`.
///
/// - `x_t`: `(batch, 1, time, feature)`
/// - `cond`: `(batch, 1, obs_horizon, cond_feature)`
///
/// Returns a tensor with the same shape as `x_t`.
pub trait NoiseEstimator {
    fn estimate(
        &mut self,
        x_t: ArrayView4<'_, f32>,
        t: StepIndex<'_>,
        cond: ArrayView4<'_, f32>,
    ) -> Result<Array4<f32>>;

    /// Flattened conditioning width (`obs_horizon * cond_feature`) this estimator was built for.
    ///
    /// `None` skips the width check during conditioning assembly.
    fn cond_dim(&self) -> Option<usize> {
        None
    }
}

impl<E: NoiseEstimator + ?Sized> NoiseEstimator for &mut E {
    fn estimate(
        &mut self,
        x_t: ArrayView4<'_, f32>,
        t: StepIndex<'_>,
        cond: ArrayView4<'_, f32>,
    ) -> Result<Array4<f32>> {
        (**self).estimate(x_t, t, cond)
    }

    fn cond_dim(&self) -> Option<usize> {
        (**self).cond_dim()
    }
}

impl<E: NoiseEstimator + ?Sized> NoiseEstimator for Box<E> {
    fn estimate(
        &mut self,
        x_t: ArrayView4<'_, f32>,
        t: StepIndex<'_>,
        cond: ArrayView4<'_, f32>,
    ) -> Result<Array4<f32>> {
        (**self).estimate(x_t, t, cond)
    }

    fn cond_dim(&self) -> Option<usize> {
        (**self).cond_dim()
    }
}

/// Shape check shared by estimator implementations.
pub(crate) fn check_estimate_shape(x_t: &ArrayView4<'_, f32>, out: &Array4<f32>) -> Result<()> {
    if x_t.shape() != out.shape() {
        return Err(crate::Error::Shape(
            "noise estimate must have the same shape as x_t",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_step_broadcasts_and_batch_is_checked() {
        let s = StepIndex::Scalar(7);
        assert_eq!(s.at(0), 7);
        assert_eq!(s.at(41), 7);
        s.check_batch(3).unwrap();

        let ts = [1usize, 2, 3];
        let b = StepIndex::Batch(&ts);
        assert_eq!(b.at(2), 3);
        b.check_batch(3).unwrap();
        assert!(b.check_batch(4).is_err());
    }
}
