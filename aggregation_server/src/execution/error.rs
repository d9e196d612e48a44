use std::{
    error::Error,
    fmt::{self, Display},
};

use crate::{optimization::SizeMismatchErr, store::StoreErr};

/// The category of a failed consolidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecErrKind {
    /// An operator read or wrote a variable the store doesn't declare.
    MissingVariable,
    /// Operands of an operator don't have the same amount of values.
    ShapeMismatch,
    /// The operator itself is malformed.
    InvalidOp,
    /// A failure specific to a custom executor.
    Other,
}

/// The typed failure returned by a `GraphExecutor`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecErr {
    pub kind: ExecErrKind,
    pub message: String,
}

impl ExecErr {
    /// Creates a new `ExecErr`.
    pub fn new(kind: ExecErrKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub(super) fn missing(name: &str) -> Self {
        Self::new(
            ExecErrKind::MissingVariable,
            format!("can not find var: {name}"),
        )
    }
}

impl From<SizeMismatchErr> for ExecErr {
    fn from(value: SizeMismatchErr) -> Self {
        Self::new(ExecErrKind::ShapeMismatch, value.to_string())
    }
}

impl From<StoreErr> for ExecErr {
    fn from(value: StoreErr) -> Self {
        let kind = match value {
            StoreErr::UnknownVariable(_) => ExecErrKind::MissingVariable,
            StoreErr::InvalidLength { .. } => ExecErrKind::ShapeMismatch,
            StoreErr::InvalidInit(_) => ExecErrKind::Other,
        };

        Self::new(kind, value.to_string())
    }
}

impl Display for ExecErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl Error for ExecErr {}
