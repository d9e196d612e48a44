use std::collections::HashMap;

use comms::specs::server::{OpSpec, OptimizerSpec, SubgraphSpec};
use log::debug;
use rayon::prelude::*;

use super::{ExecErr, ExecErrKind, GraphExecutor};
use crate::{
    optimization::{Optimizer, SizeMismatchErr, build_optimizer},
    store::{Tensor, VariableStore},
};

/// The built-in executor, runs the ops of an optimize subgraph in order.
///
/// Optimizer state (momentum, moments) lives here and persists across rounds, keyed by
/// the name of the optimized parameter.
#[derive(Default)]
pub struct OptimizeExecutor {
    optimizers: HashMap<String, Box<dyn Optimizer>>,
}

impl OptimizeExecutor {
    /// Creates a new `OptimizeExecutor` without optimizer state.
    pub fn new() -> Self {
        Self::default()
    }

    fn sum(store: &mut VariableStore, inputs: &[String], output: &str) -> Result<(), ExecErr> {
        let Some((first, rest)) = inputs.split_first() else {
            return Err(ExecErr::new(
                ExecErrKind::InvalidOp,
                format!("sum into {output} has no inputs"),
            ));
        };

        let mut acc = Self::read(store, first)?.clone();

        for name in rest {
            let addend = Self::read(store, name)?;
            if addend.len() != acc.len() {
                return Err(SizeMismatchErr {
                    expected: acc.len(),
                    got: addend.len(),
                }
                .into());
            }

            acc.values_mut()
                .par_iter_mut()
                .zip(addend.values().par_iter())
                .for_each(|(a, b)| *a += b);
        }

        store.set(output, acc)?;
        Ok(())
    }

    fn scale(
        store: &mut VariableStore,
        input: &str,
        factor: f32,
        output: &str,
    ) -> Result<(), ExecErr> {
        let mut scaled = Self::read(store, input)?.clone();
        scaled.values_mut().par_iter_mut().for_each(|v| *v *= factor);

        store.set(output, scaled)?;
        Ok(())
    }

    fn optimize(
        &mut self,
        store: &mut VariableStore,
        param: &str,
        grad: &str,
        spec: OptimizerSpec,
    ) -> Result<(), ExecErr> {
        let grad = Self::read(store, grad)?.clone();
        let param_values = store
            .get_mut(param)
            .ok_or_else(|| ExecErr::missing(param))?
            .values_mut();

        let len = param_values.len();
        let optimizer = self
            .optimizers
            .entry(param.to_string())
            .or_insert_with(|| build_optimizer(spec, len));

        optimizer.update_params(grad.values(), param_values)?;
        Ok(())
    }

    fn read<'a>(store: &'a VariableStore, name: &str) -> Result<&'a Tensor, ExecErr> {
        store.get(name).ok_or_else(|| ExecErr::missing(name))
    }
}

impl GraphExecutor for OptimizeExecutor {
    fn run(&mut self, subgraph: &SubgraphSpec, store: &mut VariableStore) -> Result<(), ExecErr> {
        for op in &subgraph.ops {
            debug!(op:? = op; "running op");

            match op {
                OpSpec::Sum { inputs, output } => Self::sum(store, inputs, output)?,
                OpSpec::Scale {
                    input,
                    factor,
                    output,
                } => Self::scale(store, input, *factor, output)?,
                OpSpec::Optimize {
                    param,
                    grad,
                    optimizer,
                } => self.optimize(store, param, grad, *optimizer)?,
            }
        }

        Ok(())
    }
}
