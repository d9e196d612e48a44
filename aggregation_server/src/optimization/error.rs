use std::{
    error::Error,
    fmt::{self, Display},
};

/// The specific result type for the optimizers.
pub type Result<T> = std::result::Result<T, SizeMismatchErr>;

/// Error returned by an `Optimizer` whenever the gradient, the parameters and the
/// optimizer's own state don't have the same length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeMismatchErr {
    pub expected: usize,
    pub got: usize,
}

impl Display for SizeMismatchErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self { expected, got } = self;
        write!(f, "size mismatch: expected {expected} values, got {got}")
    }
}

impl Error for SizeMismatchErr {}

/// Checks that every given length equals `expected`.
pub(super) fn check_len(expected: usize, lens: &[usize]) -> Result<()> {
    match lens.iter().find(|&&got| got != expected) {
        Some(&got) => Err(SizeMismatchErr { expected, got }),
        None => Ok(()),
    }
}
