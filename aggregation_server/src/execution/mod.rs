mod error;
mod executor;
mod optimize;

pub use error::{ExecErr, ExecErrKind};
pub use executor::GraphExecutor;
pub use optimize::OptimizeExecutor;
