use std::{io, mem, net::SocketAddr, sync::Arc};

use log::{error, info, warn};
use parking_lot::Mutex;
use tokio::{
    net::TcpListener,
    sync::{Mutex as AsyncMutex, watch},
    task::{JoinHandle, JoinSet},
};

use super::{AggregationLoop, RoundStats, ServerConfig, serve_connection};
use crate::{
    error::AggregationErr,
    execution::GraphExecutor,
    queue::{self, Message, QueueSender, SenderId},
    synchronization::ReleaseGate,
};

type Outcome = Result<RoundStats, AggregationErr>;

/// An aggregation server ready to be started.
pub struct AggregationServer {
    config: ServerConfig,
    executor: Box<dyn GraphExecutor>,
}

impl AggregationServer {
    /// Creates a new `AggregationServer`.
    ///
    /// # Arguments
    /// * `config` - The immutable settings of the server.
    /// * `executor` - The graph executor run once per round.
    pub fn new<E: GraphExecutor + 'static>(config: ServerConfig, executor: E) -> Self {
        Self {
            config,
            executor: Box::new(executor),
        }
    }

    /// Binds the configured endpoint and spawns the accept and aggregation tasks.
    ///
    /// # Returns
    /// A handle to the running server, or an io error if binding failed.
    pub async fn start(self) -> io::Result<ServerHandle> {
        let Self { config, executor } = self;

        let listener = TcpListener::bind(&config.endpoint).await?;
        let local_addr = listener.local_addr()?;
        info!("listening at {local_addr}");

        let (queue_tx, queue_rx) = queue::inbound();
        let gate = ReleaseGate::new();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let shutdown = Arc::new(shutdown);

        let aggregation = AggregationLoop::new(
            queue_rx,
            gate.clone(),
            &config.variables,
            executor,
            config.subgraph,
            config.fan_in,
            config.expected_acks,
        );
        let stats = aggregation.stats();

        let aggregation = {
            let shutdown = Arc::clone(&shutdown);
            tokio::spawn(async move {
                let outcome = aggregation.run().await;
                shutdown.send_replace(true);
                outcome
            })
        };

        let acceptor = tokio::spawn(accept_loop(
            listener,
            queue_tx.clone(),
            gate.clone(),
            shutdown_rx,
        ));

        Ok(ServerHandle {
            local_addr,
            queue: queue_tx,
            gate,
            shutdown,
            stats,
            tasks: AsyncMutex::new(Lifecycle::Running {
                aggregation,
                acceptor,
            }),
        })
    }
}

enum Lifecycle {
    Running {
        aggregation: JoinHandle<Outcome>,
        acceptor: JoinHandle<()>,
    },
    Stopped(Outcome),
}

/// The handle of a running aggregation server.
///
/// Dropping it requests a stop without waiting for it.
pub struct ServerHandle {
    local_addr: SocketAddr,
    queue: QueueSender,
    gate: ReleaseGate,
    shutdown: Arc<watch::Sender<bool>>,
    stats: Arc<Mutex<RoundStats>>,
    tasks: AsyncMutex<Lifecycle>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns a snapshot of the aggregation counters.
    pub fn stats(&self) -> RoundStats {
        *self.stats.lock()
    }

    /// Whether the aggregation loop has exited.
    pub fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Stops the server and waits for every task.
    ///
    /// A terminate message is pushed and the release gate is shut down so that the
    /// aggregation loop exits whether it's collecting or waiting for acks. Calling it again,
    /// or concurrently, returns the same outcome.
    ///
    /// # Returns
    /// The final counters, or the error that ended the aggregation loop.
    pub async fn stop(&self) -> Outcome {
        if !self.is_stopped() {
            info!("stopping aggregation server");
        }

        self.request_stop();
        self.wait().await
    }

    /// Waits for the aggregation loop to exit on its own, then joins every task.
    ///
    /// # Returns
    /// The final counters, or the error that ended the aggregation loop.
    pub async fn wait(&self) -> Outcome {
        let mut tasks = self.tasks.lock().await;

        let aggregation = match &mut *tasks {
            Lifecycle::Stopped(outcome) => return outcome.clone(),
            Lifecycle::Running { aggregation, .. } => aggregation,
        };

        let outcome = match aggregation.await {
            Ok(outcome) => outcome,
            Err(e) => Err(AggregationErr::Aborted(e.to_string())),
        };

        // The outcome is recorded before joining the acceptor, a cancelled wait never polls
        // the finished aggregation task again.
        self.shutdown.send_replace(true);
        let stopped = Lifecycle::Stopped(outcome.clone());

        if let Lifecycle::Running { acceptor, .. } = mem::replace(&mut *tasks, stopped) {
            if let Err(e) = acceptor.await {
                error!("accept task failed: {e}");
            }
        }

        info!("aggregation server stopped");
        outcome
    }

    fn request_stop(&self) {
        let _ = self.queue.push(Message::terminate());
        self.gate.shutdown();
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.request_stop();
        self.shutdown.send_replace(true);
    }
}

/// Accepts worker connections until shut down, every connection gets its own task.
async fn accept_loop(
    listener: TcpListener,
    queue: QueueSender,
    gate: ReleaseGate,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();
    let mut next_id: SenderId = 0;

    loop {
        tokio::select! {
            _ = stopped(&mut shutdown) => break,

            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let sender = next_id;
                    next_id += 1;
                    info!(sender = sender; "worker connected from {addr}");

                    match comms::tcp_channel(stream) {
                        Ok((rx, tx)) => {
                            connections.spawn(serve_connection(sender, rx, tx, queue.clone(), gate.clone()));
                        }
                        Err(e) => warn!(sender = sender; "failed to set up the connection: {e}"),
                    }
                }
                Err(e) => warn!("failed to accept a connection: {e}"),
            },

            Some(res) = connections.join_next(), if !connections.is_empty() => match res {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("connection failed: {e}"),
                Err(e) => error!("connection task failed: {e}"),
            },
        }
    }

    connections.shutdown().await;
}

/// Resolves once the shutdown flag is raised or its sender is gone.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopped| *stopped).await;
}
