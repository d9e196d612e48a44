use comms::specs::server::SubgraphSpec;

use super::ExecErr;
use crate::store::VariableStore;

/// Runs the consolidation subgraph over a round's variables.
///
/// It's invoked once per completed round, synchronously and only from the aggregation loop.
pub trait GraphExecutor: Send {
    /// Runs `subgraph` reading and writing the variables of `store`.
    ///
    /// # Arguments
    /// * `subgraph` - The descriptor of the operators to run.
    /// * `store` - The round's variables, already holding every received tensor.
    ///
    /// # Returns
    /// An `ExecErr` if the subgraph failed, `store` may then be partially updated.
    fn run(&mut self, subgraph: &SubgraphSpec, store: &mut VariableStore) -> Result<(), ExecErr>;
}

impl<F> GraphExecutor for F
where
    F: FnMut(&SubgraphSpec, &mut VariableStore) -> Result<(), ExecErr> + Send,
{
    fn run(&mut self, subgraph: &SubgraphSpec, store: &mut VariableStore) -> Result<(), ExecErr> {
        self(subgraph, store)
    }
}
