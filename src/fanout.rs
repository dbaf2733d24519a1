//! Fan-out / fan-in over a set of chains
//!
//! One future per chain, joined on all outcomes. A failing chain never
//! removes or hides the others.

use crate::error::{OrchestratorError, OrchestratorResult};

use futures::future::join_all;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Per-chain result of a fan-out
#[derive(Debug)]
pub struct ChainOutcome<T> {
    pub chain_id: u64,
    pub result: OrchestratorResult<T>,
}

impl<T> ChainOutcome<T> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn ok(&self) -> Option<&T> {
        self.result.as_ref().ok()
    }

    pub fn err(&self) -> Option<&OrchestratorError> {
        self.result.as_ref().err()
    }
}

/// Serializable view of an outcome for the API
#[derive(Debug, Serialize)]
pub struct OutcomeView<'a, T: Serialize> {
    pub chain_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<&'a T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<'a, T: Serialize> From<&'a ChainOutcome<T>> for OutcomeView<'a, T> {
    fn from(outcome: &'a ChainOutcome<T>) -> Self {
        Self {
            chain_id: outcome.chain_id,
            value: outcome.ok(),
            error: outcome.err().map(|e| e.to_string()),
        }
    }
}

/// Run `op` for every chain concurrently and collect every outcome in input order
pub async fn fan_out<T, F, Fut>(
    operation: &str,
    chain_ids: &[u64],
    per_chain_timeout: Option<Duration>,
    op: F,
) -> Vec<ChainOutcome<T>>
where
    F: Fn(u64) -> Fut,
    Fut: Future<Output = OrchestratorResult<T>>,
{
    let calls = chain_ids.iter().map(|&chain_id| {
        let fut = op(chain_id);
        async move {
            let result = match per_chain_timeout {
                Some(limit) => match tokio::time::timeout(limit, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(OrchestratorError::Timeout {
                        operation: format!("{} on chain {}", operation, chain_id),
                    }),
                },
                None => fut.await,
            };

            if let Err(ref e) = result {
                warn!("{} failed on chain {}: {}", operation, chain_id, e);
                crate::metrics::record_fanout_failure(operation, chain_id);
            }

            ChainOutcome { chain_id, result }
        }
    });

    join_all(calls).await
}

/// Collapse outcomes into all values, or `PartialFanOutFailure` if any chain failed
pub fn require_all<T>(outcomes: Vec<ChainOutcome<T>>) -> OrchestratorResult<Vec<(u64, T)>> {
    let mut succeeded = Vec::with_capacity(outcomes.len());
    let mut failed = Vec::new();

    for outcome in outcomes {
        match outcome.result {
            Ok(value) => succeeded.push((outcome.chain_id, value)),
            Err(e) => failed.push((outcome.chain_id, e.to_string())),
        }
    }

    if failed.is_empty() {
        Ok(succeeded)
    } else {
        Err(OrchestratorError::PartialFanOutFailure {
            succeeded: succeeded.into_iter().map(|(id, _)| id).collect(),
            failed,
        })
    }
}
