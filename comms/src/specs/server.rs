use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

/// The endpoint the server binds to when none is configured.
pub const DEFAULT_ENDPOINT: &str = "127.0.0.1:6164";

/// How a declared variable is filled before the first round.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InitSpec {
    Const { value: f32 },
    Uniform { low: f32, high: f32 },
}

impl Default for InitSpec {
    fn default() -> Self {
        Self::Const { value: 0. }
    }
}

/// A variable slot the server accepts by name.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct VariableSpec {
    pub name: String,
    pub dims: Vec<u32>,
    #[serde(default)]
    pub init: InitSpec,
}

/// The specification for the `Optimizer` trait.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerSpec {
    Adam {
        learning_rate: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
    },
    GradientDescent {
        learning_rate: f32,
    },
    GradientDescentWithMomentum {
        learning_rate: f32,
        momentum: f32,
    },
}

/// A single operator of the consolidation subgraph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpSpec {
    /// Element-wise sum of `inputs` written into `output`.
    Sum { inputs: Vec<String>, output: String },
    /// `output = input * factor`.
    Scale {
        input: String,
        factor: f32,
        output: String,
    },
    /// Applies `grad` to `param` with the given optimizer.
    Optimize {
        param: String,
        grad: String,
        optimizer: OptimizerSpec,
    },
}

/// The subgraph run once per round over the round's variables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubgraphSpec {
    pub ops: Vec<OpSpec>,
}

/// The specification for the aggregation server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSpec {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_fan_in")]
    pub fan_in: NonZeroUsize,
    #[serde(default)]
    pub expected_acks: Option<usize>,
    pub variables: Vec<VariableSpec>,
    #[serde(default)]
    pub subgraph: SubgraphSpec,
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_fan_in() -> NonZeroUsize {
    NonZeroUsize::MIN
}
