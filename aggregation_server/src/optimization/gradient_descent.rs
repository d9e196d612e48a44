use rayon::prelude::*;

use super::{Optimizer, Result, error::check_len};

/// Plain gradient descent, stateless.
#[derive(Debug)]
pub struct GradientDescent {
    lr: f32,
}

impl GradientDescent {
    pub fn new(lr: f32) -> Self {
        Self { lr }
    }
}

impl Optimizer for GradientDescent {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_len(params.len(), &[grad.len()])?;

        let lr = self.lr;
        params
            .par_iter_mut()
            .zip(grad.par_iter())
            .for_each(|(p, g)| *p -= lr * g);

        Ok(())
    }
}
