//! Phase-scoped fan-out with a join barrier
//!
//! One task per agent is spawned onto a [`JoinSet`]. Each task owns its
//! outcome slot, so nothing is shared between tasks and no lock is needed.
//! [`FanOut::run`] returns only once every task has finished, successful or
//! not; a failing agent never cancels its siblings.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::outcome::{RolloutOutcome, Stage};
use crate::config::NodeRef;

#[derive(Debug, Clone, Default)]
pub struct FanOut {
    limit: Option<Arc<Semaphore>>,
}

impl FanOut {
    /// No bound on concurrent agents
    pub fn unbounded() -> Self {
        Self { limit: None }
    }

    /// At most `max` agents in flight at once (`0` is treated as `1`)
    pub fn bounded(max: usize) -> Self {
        Self {
            limit: Some(Arc::new(Semaphore::new(max.max(1)))),
        }
    }

    pub fn from_limit(max: Option<usize>) -> Self {
        match max {
            Some(max) => Self::bounded(max),
            None => Self::unbounded(),
        }
    }

    /// Run `task` for every agent and wait for all of them.
    ///
    /// Outcomes are returned in the order of `agents`. A task that returns
    /// `Err` becomes a failed outcome carrying the error text.
    pub async fn run<F, Fut, E>(
        &self,
        stage: Stage,
        agents: &[NodeRef],
        task: F,
    ) -> Vec<RolloutOutcome>
    where
        F: Fn(NodeRef) -> Fut,
        Fut: Future<Output = Result<String, E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let mut set = JoinSet::new();

        for (index, node) in agents.iter().enumerate() {
            let limit = self.limit.clone();
            let fut = task(node.clone());
            let node = node.clone();

            set.spawn(async move {
                // The semaphore is never closed, so acquisition only fails
                // if it were; run unthrottled in that case.
                let _permit = match limit {
                    Some(sem) => sem.acquire_owned().await.ok(),
                    None => None,
                };

                let outcome = match fut.await {
                    Ok(detail) => {
                        info!(" * {} completed on {}", stage, node.public_address);
                        RolloutOutcome::ok(&node, stage, detail)
                    }
                    Err(e) => {
                        warn!(" * {} failed on {}: {}", stage, node.public_address, e);
                        RolloutOutcome::failed(&node, stage, e.to_string())
                    }
                };
                (index, outcome)
            });
        }

        debug!("Waiting for {} {} task(s)", agents.len(), stage);

        let mut slots: Vec<Option<RolloutOutcome>> = vec![None; agents.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, outcome)) => {
                    if let Some(slot) = slots.get_mut(index) {
                        *slot = Some(outcome);
                    }
                }
                Err(e) => warn!("{} task aborted: {}", stage, e),
            }
        }

        // A task that panicked left its slot empty; attribute it anyway.
        slots
            .into_iter()
            .zip(agents)
            .map(|(slot, node)| {
                slot.unwrap_or_else(|| RolloutOutcome::failed(node, stage, "task panicked"))
            })
            .collect()
    }
}
