use std::{
    io,
    net::SocketAddr,
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use aggregation_server::{
    AggregationClient, AggregationErr, AggregationServer, ServerConfig, ServerHandle,
    execution::{ExecErr, OptimizeExecutor},
    store::{Tensor, VariableStore},
};
use comms::specs::server::{OpSpec, OptimizerSpec, SubgraphSpec};
use tokio::{
    net::tcp::{OwnedReadHalf, OwnedWriteHalf},
    time,
};

type Client = AggregationClient<OwnedReadHalf, OwnedWriteHalf>;

const TIMEOUT: Duration = Duration::from_secs(10);

fn averaging_subgraph() -> SubgraphSpec {
    SubgraphSpec {
        ops: vec![
            OpSpec::Sum {
                inputs: vec!["grad_0".into(), "grad_1".into()],
                output: "grad".into(),
            },
            OpSpec::Scale {
                input: "grad".into(),
                factor: 0.5,
                output: "grad".into(),
            },
            OpSpec::Optimize {
                param: "w".into(),
                grad: "grad".into(),
                optimizer: OptimizerSpec::GradientDescent { learning_rate: 0.1 },
            },
        ],
    }
}

fn averaging_variables() -> VariableStore {
    let mut variables = VariableStore::new();
    variables.declare("w", Tensor::filled(vec![2], 1.));
    for name in ["grad_0", "grad_1", "grad"] {
        variables.declare(name, Tensor::zeros(vec![2]));
    }
    variables
}

async fn start_averaging_server() -> ServerHandle {
    let fan_in = NonZeroUsize::new(2).unwrap();
    let config = ServerConfig::new("127.0.0.1:0", fan_in, averaging_variables())
        .with_subgraph(averaging_subgraph());

    AggregationServer::new(config, OptimizeExecutor::new())
        .start()
        .await
        .unwrap()
}

async fn connect(addr: SocketAddr) -> Client {
    AggregationClient::connect(addr).await.unwrap()
}

/// Sends a gradient, closes the round and reads back the updated parameter.
async fn step(client: &mut Client, grad: &str, values: &[f32]) -> io::Result<Tensor> {
    client.send(grad, &Tensor::from_slice(values)).await?;
    client.batch_barrier().await?;

    let mut res = client.fetch(&["w"]).await?;
    Ok(res.remove(0))
}

fn assert_close(tensor: &Tensor, expected: &[f32]) {
    assert_eq!(tensor.len(), expected.len());
    for (got, want) in tensor.values().iter().zip(expected) {
        assert!((got - want).abs() < 1e-5, "got {got}, want {want}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_workers_average_their_gradients() {
    let server = start_averaging_server().await;
    let addr = server.local_addr();

    let workers: Vec<_> = [("grad_0", [1f32, 2.]), ("grad_1", [3., 4.])]
        .into_iter()
        .map(|(grad, values)| {
            tokio::spawn(async move {
                let mut client = connect(addr).await;
                let w = step(&mut client, grad, &values).await.unwrap();
                client.disconnect().await.unwrap();
                w
            })
        })
        .collect();

    for worker in workers {
        let w = time::timeout(TIMEOUT, worker).await.unwrap().unwrap();
        assert_close(&w, &[0.8, 0.7]);
    }

    let stats = time::timeout(TIMEOUT, server.stop()).await.unwrap().unwrap();
    assert_eq!(stats.consolidated, 1);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.round, 1);
    assert_eq!(stats.last_received, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parameters_carry_over_between_rounds() {
    let server = start_averaging_server().await;
    let addr = server.local_addr();

    let workers: Vec<_> = ["grad_0", "grad_1"]
        .into_iter()
        .map(|grad| {
            tokio::spawn(async move {
                let mut client = connect(addr).await;
                let mut history = Vec::new();
                for _ in 0..3 {
                    history.push(step(&mut client, grad, &[1., 1.]).await.unwrap());
                }
                history
            })
        })
        .collect();

    for worker in workers {
        let history = time::timeout(TIMEOUT, worker).await.unwrap().unwrap();
        assert_close(&history[0], &[0.9, 0.9]);
        assert_close(&history[1], &[0.8, 0.8]);
        assert_close(&history[2], &[0.7, 0.7]);
    }

    let stats = server.stop().await.unwrap();
    assert_eq!(stats.consolidated, 3);
    assert_eq!(stats.round, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_releases_waiting_workers() {
    let server = start_averaging_server().await;
    let mut client = connect(server.local_addr()).await;

    // Only one of the two workers reaches the barrier, the round never completes.
    let waiting = tokio::spawn(async move { step(&mut client, "grad_0", &[1., 1.]).await });
    time::sleep(Duration::from_millis(50)).await;

    let stats = time::timeout(TIMEOUT, server.stop()).await.unwrap().unwrap();
    assert_eq!(stats.consolidated, 0);

    let res = time::timeout(TIMEOUT, waiting).await.unwrap().unwrap();
    assert!(res.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_is_idempotent() {
    let server = Arc::new(start_averaging_server().await);

    let concurrent: Vec<_> = (0..3)
        .map(|_| {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.stop().await })
        })
        .collect();

    for stop in concurrent {
        let stats = time::timeout(TIMEOUT, stop).await.unwrap().unwrap();
        assert_eq!(stats.unwrap().consolidated, 0);
    }

    assert!(server.is_stopped());
    assert_eq!(server.stop().await.unwrap().consolidated, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_worker_can_terminate_the_server() {
    let server = start_averaging_server().await;
    let mut client = connect(server.local_addr()).await;

    client.terminate().await.unwrap();

    let stats = time::timeout(TIMEOUT, server.wait()).await.unwrap().unwrap();
    assert_eq!(stats.consolidated, 0);
    assert!(server.is_stopped());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn undeclared_variable_stops_the_server() {
    let server = start_averaging_server().await;
    let mut client = connect(server.local_addr()).await;

    client.send("bias", &Tensor::from_slice(&[1.])).await.unwrap();

    let err = time::timeout(TIMEOUT, server.wait()).await.unwrap().unwrap_err();
    assert_eq!(
        err,
        AggregationErr::UnknownVariable {
            round: 0,
            name: "bias".into()
        }
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fetching_an_unknown_name_is_refused() {
    let config = ServerConfig::new("127.0.0.1:0", NonZeroUsize::MIN, averaging_variables());
    let executor = |_: &SubgraphSpec, _: &mut VariableStore| Ok::<_, ExecErr>(());
    let server = AggregationServer::new(config, executor).start().await.unwrap();

    let mut client = connect(server.local_addr()).await;
    client.batch_barrier().await.unwrap();

    let err = time::timeout(TIMEOUT, client.fetch(&["bias"]))
        .await
        .unwrap()
        .unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::Other);

    // The refused fetch still acknowledged the round.
    client.batch_barrier().await.unwrap();
    let w = client.fetch(&["w"]).await.unwrap();
    assert_close(&w[0], &[1., 1.]);

    let stats = server.stop().await.unwrap();
    assert_eq!(stats.consolidated, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn three_workers_fetch_the_same_round() {
    let mut variables = VariableStore::new();
    variables.declare("grad_a", Tensor::zeros(vec![2]));
    variables.declare("grad_b", Tensor::zeros(vec![2]));

    let calls = Arc::new(AtomicUsize::new(0));
    let executor = {
        let calls = Arc::clone(&calls);
        move |_: &SubgraphSpec, _: &mut VariableStore| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ExecErr>(())
        }
    };

    let config = ServerConfig::new("127.0.0.1:0", NonZeroUsize::new(3).unwrap(), variables);
    let server = AggregationServer::new(config, executor).start().await.unwrap();
    let addr = server.local_addr();

    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(connect(addr).await);
    }

    clients[0].send("grad_a", &Tensor::from_slice(&[1., 1.])).await.unwrap();
    clients[1].send("grad_b", &Tensor::from_slice(&[2., 2.])).await.unwrap();
    time::sleep(Duration::from_millis(100)).await;
    clients[2].send("grad_a", &Tensor::from_slice(&[3., 3.])).await.unwrap();

    let workers: Vec<_> = clients
        .into_iter()
        .map(|mut client| {
            tokio::spawn(async move {
                client.batch_barrier().await?;
                client.fetch(&["grad_a", "grad_b"]).await
            })
        })
        .collect();

    for worker in workers {
        let res = time::timeout(TIMEOUT, worker).await.unwrap().unwrap().unwrap();
        assert_eq!(res[0], Tensor::from_slice(&[3., 3.]));
        assert_eq!(res[1], Tensor::from_slice(&[2., 2.]));
    }

    let stats = server.stop().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(stats.consolidated, 1);
    assert_eq!(stats.round, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn resent_barrier_does_not_consolidate_twice() {
    let config = ServerConfig::new("127.0.0.1:0", NonZeroUsize::MIN, averaging_variables());
    let executor = |_: &SubgraphSpec, _: &mut VariableStore| Ok::<_, ExecErr>(());
    let server = AggregationServer::new(config, executor).start().await.unwrap();
    let mut client = connect(server.local_addr()).await;

    client.batch_barrier().await.unwrap();
    client.batch_barrier().await.unwrap();
    time::timeout(TIMEOUT, client.fetch(&["w"]))
        .await
        .unwrap()
        .unwrap();

    time::sleep(Duration::from_millis(100)).await;
    let stats = server.stats();
    assert_eq!(stats.consolidated, 1);
    assert_eq!(stats.round, 1);

    client.batch_barrier().await.unwrap();
    time::timeout(TIMEOUT, client.fetch(&["w"]))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(server.stop().await.unwrap().consolidated, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancelled_wait_can_be_retried() {
    let server = start_averaging_server().await;

    assert!(
        time::timeout(Duration::from_millis(50), server.wait())
            .await
            .is_err()
    );

    let stats = time::timeout(TIMEOUT, server.stop()).await.unwrap().unwrap();
    assert_eq!(server.wait().await.unwrap(), stats);
}
