use std::{error::Error, fmt, io};

use crate::store::StoreErr;

/// The server's result type.
pub type Result<T> = std::result::Result<T, ServerErr>;

/// Failures that end the aggregation loop.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregationErr {
    /// A data message named a variable the round doesn't declare.
    UnknownVariable { round: u64, name: String },
    /// The aggregation task panicked or was cancelled.
    Aborted(String),
}

impl fmt::Display for AggregationErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregationErr::UnknownVariable { round, name } => {
                write!(f, "can not find server side var {name} at round {round}")
            }
            AggregationErr::Aborted(detail) => write!(f, "aggregation loop aborted: {detail}"),
        }
    }
}

impl Error for AggregationErr {}

/// Aggregation server failures.
#[derive(Debug)]
pub enum ServerErr {
    Io(io::Error),
    Store(StoreErr),
    Aggregation(AggregationErr),
}

impl fmt::Display for ServerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerErr::Io(e) => write!(f, "io error: {e}"),
            ServerErr::Store(e) => write!(f, "invalid variables: {e}"),
            ServerErr::Aggregation(e) => write!(f, "{e}"),
        }
    }
}

impl Error for ServerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ServerErr::Io(e) => Some(e),
            ServerErr::Store(e) => Some(e),
            ServerErr::Aggregation(e) => Some(e),
        }
    }
}

impl From<io::Error> for ServerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<StoreErr> for ServerErr {
    fn from(value: StoreErr) -> Self {
        Self::Store(value)
    }
}

impl From<AggregationErr> for ServerErr {
    fn from(value: AggregationErr) -> Self {
        Self::Aggregation(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<ServerErr> for io::Error {
    fn from(value: ServerErr) -> Self {
        match value {
            ServerErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
