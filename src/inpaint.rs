//! Constraint enforcement by inpainting the known history.
//!
//! The first `horizon` timesteps of every trajectory are history: they are copied from the
//! reference after every forward-noising step (training) and every reverse step (sampling),
//! so the network never has to denoise them.

use ndarray::{s, Array4, ArrayView4, Axis};

use crate::{Error, Result};

/// Overwrites the first `horizon` timesteps of a trajectory with a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inpaint {
    horizon: usize,
}

impl Inpaint {
    pub fn new(horizon: usize) -> Self {
        Self { horizon }
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    /// Copy `reference[:, :, ..horizon, :]` into `x[:, :, ..horizon, :]`; later steps untouched.
    ///
    /// Both tensors are `(batch, 1, time, feature)`; they must agree on every axis except time,
    /// and both time axes must be at least `horizon` long.
    pub fn apply(&self, x: &mut Array4<f32>, reference: ArrayView4<'_, f32>) -> Result<()> {
        let h = self.horizon;
        let time = x.len_of(Axis(2));
        if h > time {
            return Err(Error::DimensionMismatch {
                what: "inpaint horizon exceeds trajectory length",
                expected: time,
                got: h,
            });
        }
        if h > reference.len_of(Axis(2)) {
            return Err(Error::DimensionMismatch {
                what: "inpaint horizon exceeds reference length",
                expected: reference.len_of(Axis(2)),
                got: h,
            });
        }
        for axis in [0usize, 1, 3] {
            if x.len_of(Axis(axis)) != reference.len_of(Axis(axis)) {
                return Err(Error::Shape(
                    "trajectory and reference differ outside the time axis",
                ));
            }
        }
        x.slice_mut(s![.., .., ..h, ..])
            .assign(&reference.slice(s![.., .., ..h, ..]));
        Ok(())
    }

    /// Owned variant of [`Self::apply`].
    pub fn applied(&self, mut x: Array4<f32>, reference: ArrayView4<'_, f32>) -> Result<Array4<f32>> {
        self.apply(&mut x, reference)?;
        Ok(x)
    }
}
