mod aggregation;
mod config;
mod connection;
mod server;

pub use aggregation::{AggregationLoop, Phase, RoundStats};
pub use config::ServerConfig;
pub use connection::serve_connection;
pub use server::{AggregationServer, ServerHandle};
