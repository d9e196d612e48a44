use std::{
    error::Error,
    fmt::{self, Display},
    sync::Arc,
};

use tokio::sync::watch;

use crate::store::{Tensor, VariableStore};

/// Errors returned to a worker waiting on the release gate.
#[derive(Debug, Clone, PartialEq)]
pub enum GateErr {
    /// The server stopped before or while waiting.
    Stopped,
    /// The requested name isn't a variable of the consolidated store.
    UnknownVariable(String),
}

impl Display for GateErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => f.write_str("the aggregation server is stopped"),
            Self::UnknownVariable(name) => write!(f, "can not find server side var: {name}"),
        }
    }
}

impl Error for GateErr {}

/// The outcome of waiting for the workers' acknowledgements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Acked,
    Stopped,
}

#[derive(Debug, Default)]
struct GateState {
    open: Option<(u64, Arc<VariableStore>)>,
    acks: usize,
    stopped: bool,
}

/// Holds the workers until a round is consolidated and counts their acknowledgements.
#[derive(Debug, Clone)]
pub struct ReleaseGate {
    state: Arc<watch::Sender<GateState>>,
}

impl Default for ReleaseGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReleaseGate {
    /// Creates a new, closed `ReleaseGate`.
    pub fn new() -> Self {
        let (state, _) = watch::channel(GateState::default());
        Self {
            state: Arc::new(state),
        }
    }

    /// Opens the gate publishing the consolidated store of `round`.
    ///
    /// # Arguments
    /// * `round` - The index of the consolidated round.
    /// * `store` - The consolidated variables, read-only from here on.
    pub fn open(&self, round: u64, store: Arc<VariableStore>) {
        self.state.send_modify(|state| {
            state.open = Some((round, store));
            state.acks = 0;
        });
    }

    /// Closes the gate and zeroes the acknowledgements for the next round.
    pub fn reset(&self) {
        self.state.send_modify(|state| {
            state.open = None;
            state.acks = 0;
        });
    }

    /// Marks the gate as stopped, waking every waiter.
    pub fn shutdown(&self) {
        self.state.send_modify(|state| state.stopped = true);
    }

    /// Waits until the gate opens for a round newer than `last_seen` and reads `names` from it.
    ///
    /// Every successful wait acknowledges the round exactly once, even when a name is unknown.
    ///
    /// # Arguments
    /// * `names` - The variables to read from the consolidated store.
    /// * `last_seen` - The last round this caller acknowledged, updated on success.
    ///
    /// # Returns
    /// The requested tensors in order, or a `GateErr`.
    pub async fn wait_for_result(
        &self,
        names: &[String],
        last_seen: &mut Option<u64>,
    ) -> Result<Vec<Tensor>, GateErr> {
        let seen = *last_seen;
        let newer = |open: &Option<(u64, Arc<VariableStore>)>| {
            open.as_ref()
                .is_some_and(|(round, _)| seen.is_none_or(|seen| *round > seen))
        };
        let mut rx = self.state.subscribe();

        // The round may be released between waking up and acking, so the ack and the read
        // happen under the same write lock and the wait restarts if the round moved on.
        let (round, store) = loop {
            rx.wait_for(|state| state.stopped || newer(&state.open))
                .await
                .map_err(|_| GateErr::Stopped)?;

            let mut claimed = None;
            self.state.send_if_modified(|state| match &state.open {
                Some((round, store)) if !state.stopped && newer(&state.open) => {
                    claimed = Some((*round, Arc::clone(store)));
                    state.acks += 1;
                    true
                }
                _ => false,
            });

            match claimed {
                Some(claimed) => break claimed,
                None if self.is_stopped() => return Err(GateErr::Stopped),
                None => {}
            }
        };
        *last_seen = Some(round);

        names
            .iter()
            .map(|name| {
                store
                    .get(name)
                    .cloned()
                    .ok_or_else(|| GateErr::UnknownVariable(name.clone()))
            })
            .collect()
    }

    /// Waits until `expected` acknowledgements arrived or the gate was shut down.
    ///
    /// # Arguments
    /// * `expected` - The amount of acknowledgements that release the round.
    pub async fn wait_for_acks(&self, expected: usize) -> AckOutcome {
        let mut rx = self.state.subscribe();

        match rx
            .wait_for(|state| state.stopped || state.acks >= expected)
            .await
        {
            Ok(state) if !state.stopped => AckOutcome::Acked,
            _ => AckOutcome::Stopped,
        }
    }

    pub fn acks(&self) -> usize {
        self.state.borrow().acks
    }

    pub fn is_open(&self) -> bool {
        self.state.borrow().open.is_some()
    }

    pub fn is_stopped(&self) -> bool {
        self.state.borrow().stopped
    }
}
