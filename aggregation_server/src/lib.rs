pub mod client;
pub mod error;
pub mod execution;
pub mod optimization;
pub mod queue;
pub mod service;
pub mod store;
pub mod synchronization;

pub use client::AggregationClient;
pub use error::{AggregationErr, Result, ServerErr};
pub use service::{AggregationServer, ServerConfig, ServerHandle};
