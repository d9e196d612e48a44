use std::{mem, num::NonZeroUsize, sync::Arc};

use comms::{msg::MessageKind, specs::server::SubgraphSpec};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::{
    runtime::{Handle, RuntimeFlavor},
    task,
};

use crate::{
    error::AggregationErr,
    execution::GraphExecutor,
    queue::{InboundQueue, Message},
    store::VariableStore,
    synchronization::{AckOutcome, Arrival, ReleaseGate, RoundBarrier},
};

/// The phases of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Collecting,
    Consolidating,
    Releasing,
    Stopped,
}

/// Observability counters published by the aggregation loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundStats {
    /// The index of the round currently collecting.
    pub round: u64,
    /// Rounds whose subgraph ran, successfully or not.
    pub consolidated: u64,
    /// Rounds whose subgraph reported an error.
    pub failed: u64,
    /// Data messages received by the last consolidated round.
    pub last_received: usize,
}

/// The single consumer of the inbound queue, owns every round's variables.
///
/// It cycles through collecting, consolidating and releasing until a terminate message
/// arrives or the release gate is shut down.
pub struct AggregationLoop {
    queue: InboundQueue,
    gate: ReleaseGate,
    barrier: RoundBarrier,
    store: VariableStore,
    executor: Box<dyn GraphExecutor>,
    subgraph: SubgraphSpec,
    expected_acks: usize,
    stats: Arc<Mutex<RoundStats>>,
}

impl AggregationLoop {
    /// Creates a new `AggregationLoop` positioned at round 0.
    ///
    /// # Arguments
    /// * `queue` - The consumer half of the inbound queue.
    /// * `gate` - The release gate shared with the connection handlers.
    /// * `variables` - The declared variables, round 0 works on a child of them.
    /// * `executor` - The graph executor run once per round.
    /// * `subgraph` - The subgraph handed to the executor.
    /// * `fan_in` - The amount of distinct senders that complete a round.
    /// * `expected_acks` - The amount of fetches that release a round.
    pub fn new(
        queue: InboundQueue,
        gate: ReleaseGate,
        variables: &VariableStore,
        executor: Box<dyn GraphExecutor>,
        subgraph: SubgraphSpec,
        fan_in: NonZeroUsize,
        expected_acks: usize,
    ) -> Self {
        Self {
            queue,
            gate,
            barrier: RoundBarrier::new(fan_in),
            store: variables.create_child(),
            executor,
            subgraph,
            expected_acks,
            stats: Arc::default(),
        }
    }

    /// Returns a shared view of the counters this loop publishes.
    pub fn stats(&self) -> Arc<Mutex<RoundStats>> {
        Arc::clone(&self.stats)
    }

    /// Runs rounds until stopped.
    ///
    /// On exit the inbound queue is closed and the release gate is shut down, whatever the
    /// reason.
    ///
    /// # Returns
    /// The final counters, or an `AggregationErr` if a data message named an undeclared
    /// variable.
    pub async fn run(mut self) -> Result<RoundStats, AggregationErr> {
        let mut phase = Phase::Collecting;

        let outcome = loop {
            phase = match phase {
                Phase::Collecting => match self.collect().await {
                    Ok(next) => next,
                    Err(e) => break Err(e),
                },
                Phase::Consolidating => self.consolidate(),
                Phase::Releasing => self.release().await,
                Phase::Stopped => break Ok(self.snapshot()),
            };
        };

        self.queue.close();
        self.gate.shutdown();
        outcome
    }

    fn snapshot(&self) -> RoundStats {
        *self.stats.lock()
    }

    /// Drains the inbound queue into the round's store until the round completes.
    async fn collect(&mut self) -> Result<Phase, AggregationErr> {
        let round = self.barrier.round();

        while let Some(Message {
            sender,
            name,
            tensor,
        }) = self.queue.pop().await
        {
            match MessageKind::classify(&name) {
                MessageKind::Terminate => {
                    info!(round = round; "received terminate message and exit");
                    return Ok(Phase::Stopped);
                }
                MessageKind::BatchBarrier => match self.barrier.arrive(sender) {
                    Arrival::Complete => {
                        debug!(round = round, sender = sender; "recv last batch barrier");
                        return Ok(Phase::Consolidating);
                    }
                    Arrival::Counted { barriers } => {
                        debug!(round = round, sender = sender, barriers = barriers; "recv batch barrier");
                    }
                    Arrival::Duplicate => {
                        warn!(round = round, sender = sender; "ignoring duplicate batch barrier");
                    }
                },
                MessageKind::Data => {
                    debug!(round = round, sender = sender; "received grad: {name}");
                    self.barrier.note_received();

                    if self.store.set(&name, tensor).is_err() {
                        error!(round = round; "can not find server side var: {name}");
                        return Err(AggregationErr::UnknownVariable { round, name });
                    }
                }
            }
        }

        info!(round = round; "inbound queue closed, stopping");
        Ok(Phase::Stopped)
    }

    /// Runs the subgraph over the round's store, failures are logged and tolerated.
    fn consolidate(&mut self) -> Phase {
        let round = self.barrier.round();
        let received = self.barrier.received();
        info!(round = round; "recv {received} parameters for one barrier");

        let Self {
            executor,
            subgraph,
            store,
            ..
        } = self;

        let mut run = || executor.run(subgraph, store);
        let res = match Handle::current().runtime_flavor() {
            RuntimeFlavor::CurrentThread => run(),
            _ => task::block_in_place(run),
        };

        let mut stats = self.stats.lock();
        stats.consolidated += 1;
        stats.last_received = received;

        if let Err(e) = res {
            error!(round = round; "run sub program error {e}");
            stats.failed += 1;
        }

        Phase::Releasing
    }

    /// Publishes the consolidated store and waits for the workers to fetch it.
    async fn release(&mut self) -> Phase {
        let round = self.barrier.round();
        let consolidated = Arc::new(mem::take(&mut self.store));

        self.gate.open(round, Arc::clone(&consolidated));
        debug!(round = round, expected = self.expected_acks; "release gate open");

        match self.gate.wait_for_acks(self.expected_acks).await {
            AckOutcome::Stopped => {
                info!(round = round; "stopped while waiting for acks");
                Phase::Stopped
            }
            AckOutcome::Acked => {
                self.gate.reset();
                self.barrier.next_round();
                self.store = consolidated.create_child();
                self.stats.lock().round = self.barrier.round();
                Phase::Collecting
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use comms::msg::BATCH_BARRIER_MESSAGE;
    use tokio::{task::JoinHandle, time};

    use super::*;
    use crate::{
        execution::{ExecErr, ExecErrKind},
        queue::{self, QueueSender, SenderId},
        store::Tensor,
        synchronization::GateErr,
    };

    struct Harness {
        queue: QueueSender,
        gate: ReleaseGate,
        calls: Arc<AtomicUsize>,
        stats: Arc<Mutex<RoundStats>>,
        task: JoinHandle<Result<RoundStats, AggregationErr>>,
    }

    impl Harness {
        fn spawn<E>(fan_in: usize, expected_acks: usize, mut executor: E) -> Self
        where
            E: FnMut(&mut VariableStore) -> Result<(), ExecErr> + Send + 'static,
        {
            let mut variables = VariableStore::new();
            variables.declare("grad_a", Tensor::zeros(vec![2]));
            variables.declare("grad_b", Tensor::zeros(vec![2]));

            let calls = Arc::new(AtomicUsize::new(0));
            let counted = {
                let calls = Arc::clone(&calls);
                move |_: &SubgraphSpec, store: &mut VariableStore| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    executor(store)
                }
            };

            let (queue, inbound) = queue::inbound();
            let gate = ReleaseGate::new();
            let aggregation = AggregationLoop::new(
                inbound,
                gate.clone(),
                &variables,
                Box::new(counted),
                SubgraphSpec::default(),
                NonZeroUsize::new(fan_in).unwrap(),
                expected_acks,
            );
            let stats = aggregation.stats();

            Self {
                queue,
                gate,
                calls,
                stats,
                task: tokio::spawn(aggregation.run()),
            }
        }

        fn data(&self, sender: SenderId, name: &str, values: &[f32]) {
            let msg = Message::new(sender, name, Tensor::from_slice(values));
            self.queue.push(msg).unwrap();
        }

        fn barrier(&self, sender: SenderId) {
            let msg = Message::control(sender, BATCH_BARRIER_MESSAGE);
            self.queue.push(msg).unwrap();
        }

        fn terminate(&self) {
            self.queue.push(Message::terminate()).unwrap();
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn round(&self) -> u64 {
            self.stats.lock().round
        }

        async fn fetch(&self, last_seen: &mut Option<u64>) -> Result<Vec<Tensor>, GateErr> {
            let names = ["grad_a".to_string(), "grad_b".to_string()];
            self.gate.wait_for_result(&names, last_seen).await
        }
    }

    fn noop(_: &mut VariableStore) -> Result<(), ExecErr> {
        Ok(())
    }

    /// Lets the paused clock run until every task is idle.
    async fn settle() {
        time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn three_workers_complete_a_round() {
        let harness = Harness::spawn(3, 3, noop);

        harness.data(0, "grad_a", &[1., 1.]);
        harness.data(1, "grad_b", &[2., 2.]);
        harness.data(2, "grad_a", &[3., 3.]);
        settle().await;
        assert!(!harness.gate.is_open());

        for sender in 0..3 {
            harness.barrier(sender);
        }

        let expected = [Tensor::from_slice(&[3., 3.]), Tensor::from_slice(&[2., 2.])];
        for _ in 0..3 {
            let res = harness.fetch(&mut None).await.unwrap();
            assert_eq!(res, expected);
        }

        settle().await;
        assert_eq!(harness.calls(), 1);
        assert_eq!(harness.round(), 1);
        assert!(!harness.gate.is_open());

        harness.terminate();
        let stats = harness.task.await.unwrap().unwrap();
        assert_eq!(stats.consolidated, 1);
        assert_eq!(stats.last_received, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_barriers_do_not_complete_a_round() {
        let harness = Harness::spawn(2, 2, noop);

        harness.barrier(0);
        harness.barrier(0);
        settle().await;

        assert_eq!(harness.calls(), 0);
        assert!(!harness.gate.is_open());

        harness.barrier(1);
        settle().await;

        assert_eq!(harness.calls(), 1);
        assert!(harness.gate.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn terminate_abandons_an_incomplete_round() {
        let harness = Harness::spawn(2, 2, noop);

        harness.data(0, "grad_a", &[1., 1.]);
        harness.barrier(0);
        harness.terminate();

        let stats = harness.task.await.unwrap().unwrap();
        assert_eq!(harness.calls.load(Ordering::SeqCst), 0);
        assert_eq!(stats.consolidated, 0);
        assert!(harness.gate.is_stopped());
        assert!(harness.queue.push(Message::terminate()).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn messages_sent_while_releasing_land_in_the_next_round() {
        let harness = Harness::spawn(1, 1, noop);
        let mut seen = None;

        harness.data(0, "grad_a", &[1., 1.]);
        harness.barrier(0);
        settle().await;
        assert!(harness.gate.is_open());

        harness.data(0, "grad_a", &[5., 5.]);
        let first = harness.fetch(&mut seen).await.unwrap();
        assert_eq!(first[0], Tensor::from_slice(&[1., 1.]));

        harness.barrier(0);
        let second = harness.fetch(&mut seen).await.unwrap();
        assert_eq!(second[0], Tensor::from_slice(&[5., 5.]));
        assert_eq!(seen, Some(1));
        assert_eq!(harness.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn values_carry_over_between_rounds() {
        let harness = Harness::spawn(1, 1, noop);
        let mut seen = None;

        harness.data(0, "grad_b", &[4., 4.]);
        harness.barrier(0);
        harness.fetch(&mut seen).await.unwrap();

        harness.data(0, "grad_a", &[6., 6.]);
        harness.barrier(0);
        let res = harness.fetch(&mut seen).await.unwrap();

        assert_eq!(res[0], Tensor::from_slice(&[6., 6.]));
        assert_eq!(res[1], Tensor::from_slice(&[4., 4.]));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_consolidation_still_releases() {
        let harness = Harness::spawn(1, 1, |store: &mut VariableStore| {
            store.set("grad_b", Tensor::from_slice(&[7., 7.]))?;
            Err(ExecErr::new(ExecErrKind::Other, "boom"))
        });

        harness.data(0, "grad_a", &[1., 1.]);
        harness.barrier(0);

        let res = harness.fetch(&mut None).await.unwrap();
        assert_eq!(res[1], Tensor::from_slice(&[7., 7.]));

        settle().await;
        let stats = *harness.stats.lock();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.consolidated, 1);
        assert_eq!(stats.round, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_variable_is_a_hard_error() {
        let harness = Harness::spawn(1, 1, noop);
        harness.data(3, "grad_z", &[1.]);

        let err = harness.task.await.unwrap().unwrap_err();
        assert_eq!(
            err,
            AggregationErr::UnknownVariable {
                round: 0,
                name: "grad_z".into()
            }
        );
        assert!(harness.gate.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_aborts_the_ack_wait() {
        let harness = Harness::spawn(1, 2, noop);

        harness.barrier(0);
        harness.fetch(&mut None).await.unwrap();
        settle().await;
        assert_eq!(harness.round(), 0);

        harness.gate.shutdown();

        let stats = harness.task.await.unwrap().unwrap();
        assert_eq!(stats.consolidated, 1);
        assert_eq!(stats.round, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn a_stalled_round_waits_forever() {
        let harness = Harness::spawn(2, 2, noop);

        harness.barrier(0);
        time::sleep(Duration::from_secs(3600)).await;

        assert!(!harness.task.is_finished());
        assert_eq!(harness.calls(), 0);

        harness.terminate();
        assert!(harness.task.await.unwrap().is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn consolidation_runs_in_place_on_the_multi_thread_runtime() {
        let harness = Harness::spawn(1, 1, |store: &mut VariableStore| {
            let sum: Vec<f32> = {
                let a = store.get("grad_a").unwrap().values();
                let b = store.get("grad_b").unwrap().values();
                a.iter().zip(b).map(|(a, b)| a + b).collect()
            };
            store.set("grad_b", Tensor::from_slice(&sum))?;
            Ok(())
        });

        harness.data(0, "grad_a", &[1., 2.]);
        harness.data(0, "grad_b", &[3., 4.]);
        harness.barrier(0);

        let res = harness.fetch(&mut None).await.unwrap();
        assert_eq!(res[1], Tensor::from_slice(&[4., 6.]));

        harness.terminate();
        assert!(harness.task.await.unwrap().is_ok());
    }
}
