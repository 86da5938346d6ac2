//! Burn-backed (opt-in) noise estimator.
//!
//! The public model surface stays `ndarray`: [`BurnNoiseMlp`] implements
//! [`NoiseEstimator`] by converting views to Burn tensors at the boundary. Training uses Burn
//! autodiff + Adam on the same `(x_t, t, cond) -> eps` pairs the ndarray path builds.

use burn_core as burn;

use burn::module::Module;
use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Tensor, TensorData};
use burn_autodiff::Autodiff;
use burn_ndarray::NdArray;
use burn_nn::{Linear, LinearConfig, Relu};
use burn_optim::{AdamConfig, GradientsParams, Optimizer};
use ndarray::{Array4, ArrayView4, Axis};
use tracing::info;

use crate::conditioning::{FeatureEncoder, ObservationBatch};
use crate::estimator::{NoiseEstimator, StepIndex};
use crate::model::TrajectoryDiffusion;
use crate::{Error, Result};

/// Default burn backend: ndarray + autodiff.
pub type BurnBackend = Autodiff<NdArray<f32>>;

/// A conditional MLP noise estimator.
///
/// Input features per batch element are `[x_t (time * feature), cond (flattened), t / T]`;
/// the output is reshaped back to `(1, time, feature)`.
#[derive(Module, Debug)]
pub struct BurnNoiseMlp<B: Backend> {
    l1: Linear<B>,
    l2: Linear<B>,
    l3: Linear<B>,
    time: usize,
    feature: usize,
    cond_width: usize,
    noise_steps: usize,
}

impl<B: Backend> BurnNoiseMlp<B> {
    pub fn new(
        device: &B::Device,
        traj_shape: (usize, usize),
        cond_width: usize,
        noise_steps: usize,
        hidden: usize,
    ) -> Self {
        let (time, feature) = traj_shape;
        let n = time * feature;
        let l1 = LinearConfig::new(n + cond_width + 1, hidden).init(device);
        let l2 = LinearConfig::new(hidden, hidden).init(device);
        let l3 = LinearConfig::new(hidden, n).init(device);
        Self {
            l1,
            l2,
            l3,
            time,
            feature,
            cond_width,
            noise_steps: noise_steps.max(1),
        }
    }

    /// Forward pass on flattened inputs.
    ///
    /// Shapes: `x_t` `[batch, n]`, `cond` `[batch, m]`, `t` `[batch, 1]` (already divided by `T`).
    /// Returns `[batch, n]`.
    pub fn forward(&self, x_t: Tensor<B, 2>, cond: Tensor<B, 2>, t: Tensor<B, 2>) -> Tensor<B, 2> {
        let feats = Tensor::cat(vec![x_t, cond, t], 1);
        let h = Relu.forward(self.l1.forward(feats));
        let h = Relu.forward(self.l2.forward(h));
        self.l3.forward(h)
    }

    fn check_shapes(&self, x_t: &ArrayView4<'_, f32>, cond: &ArrayView4<'_, f32>) -> Result<()> {
        if x_t.len_of(Axis(1)) != 1
            || x_t.len_of(Axis(2)) != self.time
            || x_t.len_of(Axis(3)) != self.feature
        {
            return Err(Error::Shape("x_t does not match the estimator's trajectory shape"));
        }
        if cond.len_of(Axis(0)) != x_t.len_of(Axis(0)) {
            return Err(Error::Shape("cond and x_t batch sizes differ"));
        }
        let width = cond.len_of(Axis(1)) * cond.len_of(Axis(2)) * cond.len_of(Axis(3));
        if width != self.cond_width {
            return Err(Error::CondWidth {
                expected: self.cond_width,
                got: width,
            });
        }
        Ok(())
    }

    /// Flatten `(x_t, t, cond)` into the three forward-pass inputs.
    fn inputs(
        &self,
        device: &B::Device,
        x_t: ArrayView4<'_, f32>,
        t: StepIndex<'_>,
        cond: ArrayView4<'_, f32>,
    ) -> Result<(Tensor<B, 2>, Tensor<B, 2>, Tensor<B, 2>)> {
        self.check_shapes(&x_t, &cond)?;
        let batch = x_t.len_of(Axis(0));
        t.check_batch(batch)?;

        let n = self.time * self.feature;
        let x = TensorData::new(x_t.iter().copied().collect::<Vec<f32>>(), [batch, n]);
        let c = TensorData::new(cond.iter().copied().collect::<Vec<f32>>(), [batch, self.cond_width]);
        let steps: Vec<f32> = (0..batch)
            .map(|b| t.at(b) as f32 / self.noise_steps as f32)
            .collect();
        let s = TensorData::new(steps, [batch, 1]);
        Ok((
            Tensor::from_data(x, device),
            Tensor::from_data(c, device),
            Tensor::from_data(s, device),
        ))
    }
}

impl<B: Backend> NoiseEstimator for BurnNoiseMlp<B> {
    fn estimate(
        &mut self,
        x_t: ArrayView4<'_, f32>,
        t: StepIndex<'_>,
        cond: ArrayView4<'_, f32>,
    ) -> Result<Array4<f32>> {
        let device = self.l1.weight.device();
        let (x, c, s) = self.inputs(&device, x_t.view(), t, cond)?;
        let out = self.forward(x, c, s);
        let flat = out
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| Error::Backend(format!("{e:?}")))?;
        Array4::from_shape_vec(x_t.raw_dim(), flat)
            .map_err(|e| Error::Backend(format!("estimate has unexpected size: {e}")))
    }

    fn cond_dim(&self) -> Option<usize> {
        Some(self.cond_width)
    }
}

/// Train the model's MLP estimator with Adam for `epochs` passes over `batches`.
///
/// Each step builds the same noised pairs as [`TrajectoryDiffusion::loss`]; the learning rate
/// is the model's configured `learning_rate`. Returns the mean loss per epoch.
pub fn train_noise_mlp<F: FeatureEncoder>(
    model: &mut TrajectoryDiffusion<BurnNoiseMlp<BurnBackend>, F>,
    batches: &[ObservationBatch],
    epochs: usize,
    rng: &mut impl rand::Rng,
) -> Result<Vec<f32>> {
    if batches.is_empty() {
        return Err(Error::Domain("training set must contain at least one batch"));
    }
    let lr = model.config().learning_rate as f64;
    let mut optim = AdamConfig::new().init::<BurnBackend, BurnNoiseMlp<BurnBackend>>();
    let mut history = Vec::with_capacity(epochs);

    for epoch in 0..epochs {
        let mut sum = 0.0f64;
        for batch in batches {
            let assembled = model.prepare(batch)?;
            let noised = model.noise_target(assembled.target.view(), rng)?;

            let net = model.estimator().clone();
            let device = net.l1.weight.device();
            let (x, c, s) = net.inputs(
                &device,
                noised.x_noisy.view(),
                StepIndex::Batch(&noised.t),
                assembled.cond.view(),
            )?;
            let b = noised.noise.len_of(Axis(0));
            let n = noised.noise.len() / b.max(1);
            let eps = Tensor::<BurnBackend, 2>::from_data(
                TensorData::new(noised.noise.iter().copied().collect::<Vec<f32>>(), [b, n]),
                &device,
            );

            let pred = net.forward(x, c, s);
            let loss = (pred - eps).powf_scalar(2.0).mean();
            sum += loss.clone().into_scalar().elem::<f32>() as f64;

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &net);
            *model.estimator_mut() = optim.step(lr, net, grads);
        }
        let mean = (sum / batches.len() as f64) as f32;
        info!(epoch, loss = mean, "burn noise mlp epoch");
        history.push(mean);
    }
    Ok(history)
}
