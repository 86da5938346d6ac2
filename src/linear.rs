//! A linear noise estimator.
//!
//! This is an intentionally boring baseline: enough structure to exercise the training and
//! sampling loops end to end without importing an ML framework.

use ndarray::{Array1, Array2, Array4, ArrayView1, ArrayView4, Axis};

use crate::estimator::{NoiseEstimator, StepIndex};
use crate::{Error, Result};

/// Per batch element,
///
/// \[
/// \hat\epsilon = W \cdot [\,x_t;\ c;\ t / T;\ 1\,],
/// \]
///
/// where `x_t` is the flattened `(time, feature)` trajectory, `c` the flattened
/// `(obs_horizon, cond_feature)` conditioning, and `W` is `n × (n + m + 2)` with
/// `n = time * feature`, `m = obs_horizon * cond_feature`.
#[derive(Debug, Clone)]
pub struct LinearNoiseEstimator {
    /// Parameters `W` with shape `(n, n + m + 2)`.
    pub w: Array2<f32>,
    /// Trajectory shape `(time, feature)`.
    pub traj_shape: (usize, usize),
    /// Flattened conditioning width `m`.
    pub cond_width: usize,
    /// Schedule length used to normalize `t`.
    pub noise_steps: usize,
}

impl LinearNoiseEstimator {
    pub fn new_zeros(traj_shape: (usize, usize), cond_width: usize, noise_steps: usize) -> Self {
        let n = traj_shape.0 * traj_shape.1;
        Self {
            w: Array2::zeros((n, n + cond_width + 2)),
            traj_shape,
            cond_width,
            noise_steps: noise_steps.max(1),
        }
    }

    fn n(&self) -> usize {
        self.traj_shape.0 * self.traj_shape.1
    }

    /// Feature vector `[x_t; c; t/T; 1]` for batch element `b`.
    fn features(
        &self,
        x_t: &ArrayView4<'_, f32>,
        cond: &ArrayView4<'_, f32>,
        b: usize,
        t: usize,
    ) -> Array1<f32> {
        let n = self.n();
        let mut f = Array1::<f32>::zeros(n + self.cond_width + 2);
        for (i, &v) in x_t.index_axis(Axis(0), b).iter().enumerate() {
            f[i] = v;
        }
        for (i, &v) in cond.index_axis(Axis(0), b).iter().enumerate() {
            f[n + i] = v;
        }
        f[n + self.cond_width] = t as f32 / self.noise_steps as f32;
        f[n + self.cond_width + 1] = 1.0;
        f
    }

    fn check_shapes(&self, x_t: &ArrayView4<'_, f32>, cond: &ArrayView4<'_, f32>) -> Result<()> {
        let (time, feat) = self.traj_shape;
        if x_t.len_of(Axis(1)) != 1 || x_t.len_of(Axis(2)) != time || x_t.len_of(Axis(3)) != feat
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

    fn eval_features(&self, f: &ArrayView1<f32>) -> Array1<f32> {
        self.w.dot(f)
    }

    /// One SGD step on
    ///
    /// \[
    /// L = \tfrac12 \|\hat\epsilon(x_t,t,c) - \epsilon\|_2^2
    /// \]
    ///
    /// for every batch element in turn. Returns the mean squared error before the update.
    pub fn sgd_step(
        &mut self,
        x_t: ArrayView4<'_, f32>,
        t: StepIndex<'_>,
        cond: ArrayView4<'_, f32>,
        noise: ArrayView4<'_, f32>,
        lr: f32,
    ) -> Result<f32> {
        self.check_shapes(&x_t, &cond)?;
        if noise.shape() != x_t.shape() {
            return Err(Error::Shape("noise target must have the same shape as x_t"));
        }
        let batch = x_t.len_of(Axis(0));
        t.check_batch(batch)?;

        let n = self.n();
        let mut s: f64 = 0.0;
        for b in 0..batch {
            let f = self.features(&x_t, &cond, b, t.at(b));
            let pred = self.eval_features(&f.view());
            let target = noise.index_axis(Axis(0), b);

            // Residual r = pred - eps; dW[i, k] = r[i] * f[k].
            let mut r = Array1::<f32>::zeros(n);
            for (i, &e) in target.iter().enumerate() {
                r[i] = pred[i] - e;
                s += (r[i] as f64) * (r[i] as f64);
            }
            for i in 0..n {
                let ri = lr * r[i];
                for (k, &fk) in f.iter().enumerate() {
                    self.w[[i, k]] -= ri * fk;
                }
            }
        }
        Ok((s / (batch as f64 * n as f64)) as f32)
    }
}

impl NoiseEstimator for LinearNoiseEstimator {
    fn estimate(
        &mut self,
        x_t: ArrayView4<'_, f32>,
        t: StepIndex<'_>,
        cond: ArrayView4<'_, f32>,
    ) -> Result<Array4<f32>> {
        self.check_shapes(&x_t, &cond)?;
        let batch = x_t.len_of(Axis(0));
        t.check_batch(batch)?;

        let mut out = Array4::<f32>::zeros(x_t.raw_dim());
        for b in 0..batch {
            let f = self.features(&x_t, &cond, b, t.at(b));
            let pred = self.eval_features(&f.view());
            for (o, &p) in out.index_axis_mut(Axis(0), b).iter_mut().zip(pred.iter()) {
                *o = p;
            }
        }
        Ok(out)
    }

    fn cond_dim(&self) -> Option<usize> {
        Some(self.cond_width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward::randn_like;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn zero_estimator_predicts_zero_with_matching_shape() {
        let mut est = LinearNoiseEstimator::new_zeros((4, 3), 6, 100);
        let x = Array4::<f32>::ones((2, 1, 4, 3));
        let c = Array4::<f32>::ones((2, 1, 2, 3));
        let out = est.estimate(x.view(), StepIndex::Scalar(5), c.view()).unwrap();
        assert_eq!(out.shape(), x.shape());
        assert!(out.iter().all(|&v| v == 0.0));
        assert_eq!(est.cond_dim(), Some(6));
    }

    #[test]
    fn wrong_cond_width_is_rejected() {
        let mut est = LinearNoiseEstimator::new_zeros((4, 3), 6, 100);
        let x = Array4::<f32>::ones((1, 1, 4, 3));
        let c = Array4::<f32>::ones((1, 1, 2, 4));
        assert!(matches!(
            est.estimate(x.view(), StepIndex::Scalar(0), c.view()),
            Err(Error::CondWidth { expected: 6, got: 8 })
        ));
    }

    #[test]
    fn sgd_learns_identity_noise_map() {
        // With x_t = eps, the optimal linear estimator is the identity on the x_t block.
        let mut est = LinearNoiseEstimator::new_zeros((3, 2), 2, 10);
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let c = Array4::<f32>::zeros((8, 1, 1, 2));
        let ts = [0usize; 8];

        let mut first = None;
        let mut last = 0.0;
        for _ in 0..400 {
            let eps = randn_like((8, 1, 3, 2), &mut rng);
            let l = est
                .sgd_step(eps.view(), StepIndex::Batch(&ts), c.view(), eps.view(), 0.02)
                .unwrap();
            first.get_or_insert(l);
            last = l;
        }
        let first = first.unwrap();
        assert!(last < 0.1 * first, "loss did not drop: {first} -> {last}");
    }
}
