use comms::specs::server::{InitSpec, VariableSpec};
use rand::{Rng, SeedableRng, distr::Uniform, rngs::StdRng};

use super::{Result, Tensor, VariableStore};

impl VariableStore {
    /// Declares every variable in `specs` with its initial value.
    ///
    /// # Arguments
    /// * `specs` - The declared variable slots.
    /// * `seed` - An optional seed for the random initializers.
    ///
    /// # Returns
    /// A new `VariableStore` or `StoreErr::InvalidInit` if an initializer has invalid bounds.
    pub fn from_specs(specs: &[VariableSpec], seed: Option<u64>) -> Result<Self> {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let mut store = Self::new();

        for VariableSpec { name, dims, init } in specs {
            let tensor = match *init {
                InitSpec::Const { value } => Tensor::filled(dims.clone(), value),
                InitSpec::Uniform { low, high } => {
                    let dist = Uniform::new(low, high)?;
                    let mut tensor = Tensor::zeros(dims.clone());
                    tensor
                        .values_mut()
                        .iter_mut()
                        .for_each(|v| *v = rng.sample(&dist));
                    tensor
                }
            };

            store.declare(name.clone(), tensor);
        }

        Ok(store)
    }
}
