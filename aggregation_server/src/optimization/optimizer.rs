use comms::specs::server::OptimizerSpec;

use super::{Adam, GradientDescent, GradientDescentWithMomentum, Result};

/// Defines the strategy for updating a parameter based on its merged gradient.
pub trait Optimizer: Send {
    /// Updates the provided slice of parameters using the gradient.
    ///
    /// # Arguments
    /// * `grad` - The merged gradient of the parameter.
    /// * `params` - The parameter values to update.
    ///
    /// # Returns
    /// An error if there's a mismatch in the sizes of `grad`, `params` or the optimizer state.
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()>;
}

/// Builds the optimizer described by `spec` for a parameter of `len` values.
///
/// # Arguments
/// * `spec` - The specification of the optimizer.
/// * `len` - The amount of values of the optimized parameter.
///
/// # Returns
/// A boxed optimizer holding its own state.
pub fn build_optimizer(spec: OptimizerSpec, len: usize) -> Box<dyn Optimizer> {
    match spec {
        OptimizerSpec::Adam {
            learning_rate,
            beta1,
            beta2,
            epsilon,
        } => Box::new(Adam::new(len, learning_rate, beta1, beta2, epsilon)),
        OptimizerSpec::GradientDescent { learning_rate } => {
            Box::new(GradientDescent::new(learning_rate))
        }
        OptimizerSpec::GradientDescentWithMomentum {
            learning_rate,
            momentum,
        } => Box::new(GradientDescentWithMomentum::new(len, learning_rate, momentum)),
    }
}
