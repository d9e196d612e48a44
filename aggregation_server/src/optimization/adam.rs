use rayon::prelude::*;

use super::{Optimizer, Result, error::check_len};

/// Adam, with bias corrected first and second moment estimates.
#[derive(Debug)]
pub struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    step: i32,
    m: Vec<f32>,
    v: Vec<f32>,
}

impl Adam {
    /// Creates a new `Adam` optimizer with zeroed moments.
    ///
    /// # Arguments
    /// * `len` - The amount of values of the optimized parameter.
    /// * `lr` - The learning rate.
    /// * `beta1` - Decay of the first moment estimate.
    /// * `beta2` - Decay of the second moment estimate.
    /// * `eps` - Added to the denominator for numerical stability.
    pub fn new(len: usize, lr: f32, beta1: f32, beta2: f32, eps: f32) -> Self {
        Self {
            lr,
            beta1,
            beta2,
            eps,
            step: 0,
            m: vec![0.; len],
            v: vec![0.; len],
        }
    }
}

impl Optimizer for Adam {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_len(self.m.len(), &[grad.len(), params.len()])?;

        self.step = self.step.saturating_add(1);
        let (b1, b2, eps) = (self.beta1, self.beta2, self.eps);
        let alpha = self.lr * (1. - b2.powi(self.step)).sqrt() / (1. - b1.powi(self.step));

        let moments = self.m.par_iter_mut().zip(self.v.par_iter_mut());
        params
            .par_iter_mut()
            .zip(grad.par_iter())
            .zip(moments)
            .for_each(|((p, &g), (m, v))| {
                *m = b1 * *m + (1. - b1) * g;
                *v = b2 * *v + (1. - b2) * g * g;
                *p -= alpha * *m / (v.sqrt() + eps);
            });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_step_moves_by_the_learning_rate() {
        let mut adam = Adam::new(2, 0.1, 0.9, 0.999, 1e-8);
        let mut params = [1., 1.];

        adam.update_params(&[3., -3.], &mut params).unwrap();

        assert!((params[0] - 0.9).abs() < 1e-4);
        assert!((params[1] - 1.1).abs() < 1e-4);
    }

    #[test]
    fn state_length_is_enforced() {
        let mut adam = Adam::new(2, 0.1, 0.9, 0.999, 1e-8);
        let err = adam.update_params(&[1.; 3], &mut [0.; 3]).unwrap_err();
        assert_eq!(err.expected, 2);
    }
}
