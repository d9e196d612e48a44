use std::num::NonZeroUsize;

use comms::specs::server::{DEFAULT_ENDPOINT, ServerSpec, SubgraphSpec};

use crate::store::{Result, VariableStore};

/// Immutable settings of an aggregation server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub endpoint: String,
    pub fan_in: NonZeroUsize,
    pub expected_acks: usize,
    pub subgraph: SubgraphSpec,
    pub variables: VariableStore,
}

impl ServerConfig {
    /// Creates a new `ServerConfig` with an empty subgraph, expecting one ack per sender.
    ///
    /// # Arguments
    /// * `endpoint` - The address to bind to.
    /// * `fan_in` - The amount of distinct senders that complete a round.
    /// * `variables` - The declared variable slots and their initial values.
    pub fn new(endpoint: impl Into<String>, fan_in: NonZeroUsize, variables: VariableStore) -> Self {
        Self {
            endpoint: endpoint.into(),
            fan_in,
            expected_acks: fan_in.get(),
            subgraph: SubgraphSpec::default(),
            variables,
        }
    }

    /// Resolves a `ServerSpec` into a configuration, initializing every declared variable.
    ///
    /// # Arguments
    /// * `spec` - The specification of the server.
    ///
    /// # Returns
    /// A new `ServerConfig` or `StoreErr::InvalidInit` if an initializer is invalid.
    pub fn from_spec(spec: ServerSpec) -> Result<Self> {
        let variables = VariableStore::from_specs(&spec.variables, spec.seed)?;

        Ok(Self {
            endpoint: spec.endpoint,
            fan_in: spec.fan_in,
            expected_acks: spec.expected_acks.unwrap_or(spec.fan_in.get()),
            subgraph: spec.subgraph,
            variables,
        })
    }

    pub fn with_subgraph(mut self, subgraph: SubgraphSpec) -> Self {
        self.subgraph = subgraph;
        self
    }

    pub fn with_expected_acks(mut self, expected_acks: usize) -> Self {
        self.expected_acks = expected_acks;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT, NonZeroUsize::MIN, VariableStore::new())
    }
}
