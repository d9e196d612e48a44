use std::{env, io};

use aggregation_server::{
    AggregationServer, ServerConfig, ServerErr, execution::OptimizeExecutor,
};
use comms::specs::server::ServerSpec;
use log::info;
use tokio::{fs, signal};

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let path = env::args()
        .nth(1)
        .or_else(|| env::var("CONFIG").ok())
        .ok_or_else(|| io::Error::other("usage: aggregation_server <spec.json>, or set CONFIG"))?;

    let raw = fs::read_to_string(&path).await?;
    let mut spec: ServerSpec = serde_json::from_str(&raw)?;

    let host = env::var("HOST").ok();
    let port = env::var("PORT").ok();
    if host.is_some() || port.is_some() {
        let (default_host, default_port) = spec.endpoint.rsplit_once(':').ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "endpoint must be host:port")
        })?;

        let host = host.as_deref().unwrap_or(default_host);
        let port = port.as_deref().unwrap_or(default_port);
        spec.endpoint = format!("{host}:{port}");
    }

    let config = ServerConfig::from_spec(spec).map_err(ServerErr::from)?;
    info!(fan_in = config.fan_in.get(); "starting aggregation server");

    let server = AggregationServer::new(config, OptimizeExecutor::new())
        .start()
        .await?;

    let outcome = tokio::select! {
        outcome = server.wait() => outcome,
        _ = signal::ctrl_c() => {
            info!("received SIGINT");
            server.stop().await
        }
    };

    let stats = outcome.map_err(ServerErr::from)?;
    info!(
        rounds = stats.consolidated,
        failed = stats.failed;
        "wrapping up"
    );

    Ok(())
}
