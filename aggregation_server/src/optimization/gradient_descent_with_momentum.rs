use rayon::prelude::*;

use super::{Optimizer, Result, error::check_len};

/// Gradient descent with classical momentum: `v = mu * v + g`, then `p -= lr * v`.
#[derive(Debug)]
pub struct GradientDescentWithMomentum {
    lr: f32,
    mu: f32,
    velocity: Vec<f32>,
}

impl GradientDescentWithMomentum {
    /// Creates the optimizer for a parameter of `len` values, starting at rest.
    pub fn new(len: usize, lr: f32, mu: f32) -> Self {
        Self {
            lr,
            mu,
            velocity: vec![0.; len],
        }
    }
}

impl Optimizer for GradientDescentWithMomentum {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_len(self.velocity.len(), &[grad.len(), params.len()])?;

        let (lr, mu) = (self.lr, self.mu);
        params
            .par_iter_mut()
            .zip(grad.par_iter())
            .zip(self.velocity.par_iter_mut())
            .for_each(|((p, &g), v)| {
                *v = mu * *v + g;
                *p -= lr * *v;
            });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn velocity_accumulates_across_steps() {
        let mut opt = GradientDescentWithMomentum::new(1, 1., 0.5);
        let mut params = [0.];

        opt.update_params(&[1.], &mut params).unwrap();
        assert_eq!(params, [-1.]);

        opt.update_params(&[1.], &mut params).unwrap();
        assert_eq!(params, [-2.5]);
    }
}
