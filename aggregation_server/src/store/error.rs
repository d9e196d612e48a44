use std::{
    error::Error,
    fmt::{self, Display},
};

use rand::distr::uniform::Error as UniformError;

/// The specific result type for the storage module.
pub type Result<T> = std::result::Result<T, StoreErr>;

/// Errors returned while building tensors or writing into a `VariableStore`.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreErr {
    /// The name doesn't resolve to a declared variable slot.
    UnknownVariable(String),
    /// The amount of values doesn't match the product of the dimensions.
    InvalidLength { dims: Vec<u32>, len: usize },
    /// A variable initializer was given invalid bounds.
    InvalidInit(String),
}

impl From<UniformError> for StoreErr {
    fn from(value: UniformError) -> Self {
        Self::InvalidInit(value.to_string())
    }
}

impl Display for StoreErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownVariable(name) => write!(f, "can not find server side var: {name}"),
            Self::InvalidLength { dims, len } => {
                write!(f, "{len} values can't fill a tensor of dims {dims:?}")
            }
            Self::InvalidInit(detail) => write!(f, "invalid variable initializer: {detail}"),
        }
    }
}

impl Error for StoreErr {}
