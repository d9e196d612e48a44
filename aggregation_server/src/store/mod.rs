mod error;
mod init;
mod tensor;
mod variables;

pub use error::{Result, StoreErr};
pub use tensor::Tensor;
pub use variables::VariableStore;
