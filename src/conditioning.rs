//! Conditioning assembly.
//!
//! From a raw batch of aligned time series this builds:
//!
//! - the **conditioning tensor** `(batch, 1, obs_horizon, P + A + V + K)`: observed position,
//!   action, velocity and per-frame image features, concatenated along the feature axis;
//! - the **target trajectory** `(batch, 1, inpaint_horizon + pred_horizon, P + A)`: the last
//!   `inpaint_horizon` observed position/action steps followed by the `pred_horizon` future
//!   position/action steps.
//!
//! Public invariant: batches with NaN in the observed positions or in the future actions are
//! rejected before anything is encoded.

use ndarray::{
    concatenate, s, Array2, Array3, Array4, ArrayD, ArrayView3, ArrayViewD, Axis, IxDyn, Slice,
};

use crate::{Error, Result};

/// Aligned observation time series for a batch.
///
/// - `position`: `(batch, len, P)`
/// - `action`: `(batch, len, A)`
/// - `velocity`: `(batch, len, V)`
/// - `image`: `(batch, len, ...)` (any per-frame shape)
#[derive(Debug, Clone)]
pub struct ObservationBatch {
    pub position: Array3<f32>,
    pub action: Array3<f32>,
    pub velocity: Array3<f32>,
    pub image: ArrayD<f32>,
}

impl ObservationBatch {
    pub fn batch_size(&self) -> usize {
        self.position.len_of(Axis(0))
    }

    /// Number of timesteps in every series.
    pub fn len(&self) -> usize {
        self.position.len_of(Axis(1))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check that all four series agree on batch size and length.
    pub fn validate(&self) -> Result<()> {
        let (b, l) = (self.batch_size(), self.len());
        let aligned = |a: &Array3<f32>| a.len_of(Axis(0)) == b && a.len_of(Axis(1)) == l;
        if !aligned(&self.action) {
            return Err(Error::Shape("action series is not aligned with position"));
        }
        if !aligned(&self.velocity) {
            return Err(Error::Shape("velocity series is not aligned with position"));
        }
        if self.image.ndim() < 2 {
            return Err(Error::Shape("image must have at least (batch, time) axes"));
        }
        if self.image.len_of(Axis(0)) != b || self.image.len_of(Axis(1)) != l {
            return Err(Error::Shape("image series is not aligned with position"));
        }
        Ok(())
    }

    /// A batch of one holding element `b`.
    pub fn select(&self, b: usize) -> Result<Self> {
        if b >= self.batch_size() {
            return Err(Error::DimensionMismatch {
                what: "batch element out of range",
                expected: self.batch_size(),
                got: b,
            });
        }
        let one = Slice::from(b..b + 1);
        Ok(Self {
            position: self.position.slice_axis(Axis(0), one).to_owned(),
            action: self.action.slice_axis(Axis(0), one).to_owned(),
            velocity: self.velocity.slice_axis(Axis(0), one).to_owned(),
            image: self.image.slice_axis(Axis(0), one).to_owned(),
        })
    }
}

/// Encodes image frames into fixed-size feature vectors.
///
/// `frames` is `(n, ...)`; the result is `(n, k)` with the same `k` for every call.
pub trait FeatureEncoder {
    fn encode(&mut self, frames: ArrayViewD<'_, f32>) -> Result<Array2<f32>>;
}

impl<F: FeatureEncoder + ?Sized> FeatureEncoder for &mut F {
    fn encode(&mut self, frames: ArrayViewD<'_, f32>) -> Result<Array2<f32>> {
        (**self).encode(frames)
    }
}

impl<F: FeatureEncoder + ?Sized> FeatureEncoder for Box<F> {
    fn encode(&mut self, frames: ArrayViewD<'_, f32>) -> Result<Array2<f32>> {
        (**self).encode(frames)
    }
}

/// Baseline encoder: each frame, flattened row-major, is its own feature vector.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlattenEncoder;

impl FeatureEncoder for FlattenEncoder {
    fn encode(&mut self, frames: ArrayViewD<'_, f32>) -> Result<Array2<f32>> {
        if frames.ndim() == 0 {
            return Err(Error::Shape("frames must have a leading frame axis"));
        }
        let n = frames.len_of(Axis(0));
        let k: usize = frames.shape()[1..].iter().product();
        let flat = frames
            .to_shape((n, k))
            .map_err(|_| Error::Shape("frames cannot be flattened"))?;
        Ok(flat.into_owned())
    }
}

/// Conditioning tensor plus target trajectory for one batch.
#[derive(Debug, Clone)]
pub struct Assembled {
    /// `(batch, 1, inpaint_horizon + pred_horizon, P + A)`
    pub target: Array4<f32>,
    /// `(batch, 1, obs_horizon, P + A + V + K)`
    pub cond: Array4<f32>,
}

impl Assembled {
    /// Flattened conditioning width, `obs_horizon * cond_feature`.
    pub fn cond_width(&self) -> usize {
        self.cond.len_of(Axis(2)) * self.cond.len_of(Axis(3))
    }
}

/// Slices a raw batch into observation context and prediction target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConditioningAssembler {
    pub obs_horizon: usize,
    pub pred_horizon: usize,
    pub inpaint_horizon: usize,
}

impl ConditioningAssembler {
    pub fn new(obs_horizon: usize, pred_horizon: usize, inpaint_horizon: usize) -> Result<Self> {
        if obs_horizon == 0 || pred_horizon == 0 {
            return Err(Error::Domain("obs_horizon and pred_horizon must be >= 1"));
        }
        if inpaint_horizon > obs_horizon {
            return Err(Error::DimensionMismatch {
                what: "inpaint_horizon exceeds obs_horizon",
                expected: obs_horizon,
                got: inpaint_horizon,
            });
        }
        Ok(Self {
            obs_horizon,
            pred_horizon,
            inpaint_horizon,
        })
    }

    /// Build conditioning and target for `batch`.
    ///
    /// `expected_cond_width` is the noise estimator's flattened conditioning width; a mismatch
    /// is reported as [`Error::CondWidth`].
    pub fn assemble<F: FeatureEncoder + ?Sized>(
        &self,
        batch: &ObservationBatch,
        encoder: &mut F,
        expected_cond_width: Option<usize>,
    ) -> Result<Assembled> {
        batch.validate()?;
        let (obs, pred, inpaint) = (self.obs_horizon, self.pred_horizon, self.inpaint_horizon);
        let total = obs + pred;
        if batch.len() < total {
            return Err(Error::DimensionMismatch {
                what: "batch series shorter than obs_horizon + pred_horizon",
                expected: total,
                got: batch.len(),
            });
        }

        // Fail fast on corrupted data.
        if has_nan(batch.position.slice(s![.., ..obs, ..])) {
            return Err(Error::NonFinite("position over the observation horizon"));
        }
        if has_nan(batch.action.slice(s![.., obs..total, ..])) {
            return Err(Error::NonFinite("action over the prediction horizon"));
        }

        let b = batch.batch_size();
        let pos_obs = batch.position.slice(s![.., ..obs, ..]);
        let act_obs = batch.action.slice(s![.., ..obs, ..]);
        let vel_obs = batch.velocity.slice(s![.., ..obs, ..]);

        // Encode every observed frame independently: (b, obs, ...) -> (b*obs, ...) -> (b, obs, k).
        let img_obs = batch.image.slice_axis(Axis(1), Slice::from(..obs));
        let mut flat_dims = vec![b * obs];
        flat_dims.extend_from_slice(&img_obs.shape()[2..]);
        let frames = img_obs
            .to_shape(IxDyn(&flat_dims))
            .map_err(|_| Error::Shape("image frames cannot be flattened"))?;
        let encoded = encoder.encode(frames.view())?;
        if encoded.nrows() != b * obs {
            return Err(Error::DimensionMismatch {
                what: "encoded frame count",
                expected: b * obs,
                got: encoded.nrows(),
            });
        }
        let k = encoded.ncols();
        let features = encoded
            .into_shape_with_order((b, obs, k))
            .map_err(|_| Error::Shape("encoded features cannot be reshaped"))?;

        let cond = concatenate(
            Axis(2),
            &[pos_obs, act_obs, vel_obs, features.view()],
        )
        .map_err(|_| Error::Shape("conditioning channels do not concatenate"))?;

        let got = cond.len_of(Axis(2)) * obs;
        if let Some(expected) = expected_cond_width {
            if got != expected {
                return Err(Error::CondWidth { expected, got });
            }
        }

        let target = assemble_target(batch, obs, pred, inpaint)?;

        Ok(Assembled {
            target: target.insert_axis(Axis(1)),
            cond: cond.insert_axis(Axis(1)),
        })
    }
}

fn assemble_target(
    batch: &ObservationBatch,
    obs: usize,
    pred: usize,
    inpaint: usize,
) -> Result<Array3<f32>> {
    let history = concatenate(
        Axis(2),
        &[
            batch.position.slice(s![.., obs - inpaint..obs, ..]),
            batch.action.slice(s![.., obs - inpaint..obs, ..]),
        ],
    )
    .map_err(|_| Error::Shape("history channels do not concatenate"))?;
    let future = concatenate(
        Axis(2),
        &[
            batch.position.slice(s![.., obs..obs + pred, ..]),
            batch.action.slice(s![.., obs..obs + pred, ..]),
        ],
    )
    .map_err(|_| Error::Shape("target channels do not concatenate"))?;
    concatenate(Axis(1), &[history.view(), future.view()])
        .map_err(|_| Error::Shape("history and target do not concatenate"))
}

fn has_nan(a: ArrayView3<'_, f32>) -> bool {
    a.iter().any(|v| v.is_nan())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    /// position[b, t] = (t, b), action[b, t] = (10 + t, 0, 1), velocity = (0.5),
    /// image[b, t] = 2x2 frame filled with t.
    fn toy_batch(batch: usize, len: usize) -> ObservationBatch {
        let position = Array3::from_shape_fn((batch, len, 2), |(b, t, c)| {
            if c == 0 {
                t as f32
            } else {
                b as f32
            }
        });
        let action = Array3::from_shape_fn((batch, len, 3), |(_, t, c)| match c {
            0 => 10.0 + t as f32,
            1 => 0.0,
            _ => 1.0,
        });
        let velocity = Array3::from_elem((batch, len, 1), 0.5);
        let image = Array::from_shape_fn(IxDyn(&[batch, len, 2, 2]), |ix| ix[1] as f32);
        ObservationBatch {
            position,
            action,
            velocity,
            image,
        }
    }

    #[test]
    fn shapes_and_history_prefix() {
        let batch = toy_batch(3, 8);
        let asm = ConditioningAssembler::new(4, 3, 2).unwrap();
        let out = asm.assemble(&batch, &mut FlattenEncoder, None).unwrap();

        // cond: P + A + V + K = 2 + 3 + 1 + 4
        assert_eq!(out.cond.shape(), &[3, 1, 4, 10]);
        assert_eq!(out.cond_width(), 40);
        // target: inpaint + pred = 5 steps, P + A = 5 features
        assert_eq!(out.target.shape(), &[3, 1, 5, 5]);

        // History prefix = observed steps 2, 3; then future steps 4, 5, 6.
        for (i, t) in [2usize, 3, 4, 5, 6].iter().enumerate() {
            assert_eq!(out.target[[1, 0, i, 0]], *t as f32);
            assert_eq!(out.target[[1, 0, i, 1]], 1.0);
            assert_eq!(out.target[[1, 0, i, 2]], 10.0 + *t as f32);
        }
        // Image features of observed step 3 are the flattened 2x2 frame of 3s.
        for c in 6..10 {
            assert_eq!(out.cond[[2, 0, 3, c]], 3.0);
        }
        assert_eq!(out.cond[[0, 0, 0, 5]], 0.5);
    }

    #[test]
    fn nan_in_observed_position_fails_fast() {
        struct Panicking;
        impl FeatureEncoder for Panicking {
            fn encode(&mut self, _frames: ArrayViewD<'_, f32>) -> Result<Array2<f32>> {
                panic!("encoder must not run on a corrupted batch");
            }
        }

        let mut batch = toy_batch(2, 6);
        batch.position[[1, 2, 0]] = f32::NAN;
        let asm = ConditioningAssembler::new(3, 3, 3).unwrap();
        let res = asm.assemble(&batch, &mut Panicking, None);
        assert!(matches!(res, Err(Error::NonFinite(_))));
    }

    #[test]
    fn nan_in_future_action_fails_but_nan_in_future_position_does_not() {
        let asm = ConditioningAssembler::new(3, 3, 1).unwrap();

        let mut batch = toy_batch(1, 6);
        batch.action[[0, 4, 1]] = f32::NAN;
        assert!(matches!(
            asm.assemble(&batch, &mut FlattenEncoder, None),
            Err(Error::NonFinite(_))
        ));

        let mut batch = toy_batch(1, 6);
        batch.action[[0, 1, 1]] = f32::NAN;
        batch.position[[0, 4, 0]] = f32::NAN;
        assert!(asm.assemble(&batch, &mut FlattenEncoder, None).is_ok());
    }

    #[test]
    fn cond_width_mismatch_is_a_config_error() {
        let batch = toy_batch(2, 8);
        let asm = ConditioningAssembler::new(4, 4, 4).unwrap();
        let res = asm.assemble(&batch, &mut FlattenEncoder, Some(39));
        assert!(matches!(
            res,
            Err(Error::CondWidth {
                expected: 39,
                got: 40
            })
        ));
        asm.assemble(&batch, &mut FlattenEncoder, Some(40)).unwrap();
    }

    #[test]
    fn short_or_misaligned_batches_are_rejected() {
        let asm = ConditioningAssembler::new(4, 4, 2).unwrap();
        assert!(matches!(
            asm.assemble(&toy_batch(1, 7), &mut FlattenEncoder, None),
            Err(Error::DimensionMismatch { .. })
        ));

        let mut batch = toy_batch(2, 8);
        batch.velocity = Array3::zeros((2, 7, 1));
        assert!(matches!(
            asm.assemble(&batch, &mut FlattenEncoder, None),
            Err(Error::Shape(_))
        ));

        assert!(ConditioningAssembler::new(2, 2, 3).is_err());
    }

    #[test]
    fn select_keeps_one_element() {
        let batch = toy_batch(3, 5);
        let one = batch.select(2).unwrap();
        assert_eq!(one.batch_size(), 1);
        assert_eq!(one.position[[0, 4, 1]], 2.0);
        assert_eq!(one.image.shape(), &[1, 5, 2, 2]);
        assert!(batch.select(3).is_err());
    }
}
