//! Parallel dispatch of one logical request to many predictors.
//!
//! Each call runs on its own task under the same timeout and is isolated:
//! a timeout, error or panic only nulls that predictor's slot. The
//! orchestrator waits for every task to settle, then writes results in a
//! single pass, so a dropped (timed-out) call can never leak a late result.

use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::predictors::Predictor;
use crate::types::{AugurError, RawResponse};

/// Slack on top of the call timeout before a task that never yields is aborted.
const JOIN_GRACE: Duration = Duration::from_millis(250);

/// Outcome of one fan-out round.
#[derive(Debug, Clone, Default)]
pub struct FanOutResult {
    /// One slot per dispatched predictor; `None` on timeout or failure.
    pub results: BTreeMap<String, Option<RawResponse>>,
    pub success_count: usize,
}

pub struct FanOutOrchestrator {
    predictors: BTreeMap<String, Arc<dyn Predictor>>,
}

impl FanOutOrchestrator {
    /// Build the registry. On a duplicate name the first registration wins.
    pub fn new(predictors: Vec<Arc<dyn Predictor>>) -> Self {
        let mut registry: BTreeMap<String, Arc<dyn Predictor>> = BTreeMap::new();
        for p in predictors {
            let name = p.name().to_string();
            if registry.contains_key(&name) {
                warn!(predictor = %name, "Duplicate predictor name ignored");
                continue;
            }
            registry.insert(name, p);
        }
        Self {
            predictors: registry,
        }
    }

    /// Registered names, in dispatch order.
    pub fn predictor_names(&self) -> Vec<String> {
        self.predictors.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.predictors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predictors.is_empty()
    }

    /// Call every predictor named in `requests` with its prompt.
    ///
    /// Registered predictors without a request are not called and do not
    /// appear in the result; neither do request names nobody registered.
    /// Zero successes is a normal outcome, not an error.
    pub async fn dispatch_all(
        &self,
        requests: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> FanOutResult {
        let started = Instant::now();

        let mut spawned: Vec<(String, JoinHandle<Option<RawResponse>>)> = Vec::new();
        for (name, prompt) in requests {
            match self.predictors.get(name) {
                Some(predictor) => {
                    let handle = tokio::spawn(invoke(
                        name.clone(),
                        Arc::clone(predictor),
                        prompt.clone(),
                        timeout,
                    ));
                    spawned.push((name.clone(), handle));
                }
                None => warn!(predictor = %name, "No predictor registered for request"),
            }
        }

        debug!(count = spawned.len(), timeout_ms = timeout.as_millis() as u64, "Fan-out dispatch");

        let settled = join_all(
            spawned
                .into_iter()
                .map(|(name, handle)| settle(name, handle, timeout)),
        )
        .await;

        let mut result = FanOutResult::default();
        for (name, outcome) in settled {
            if outcome.is_some() {
                result.success_count += 1;
            }
            result.results.insert(name, outcome);
        }

        info!(
            dispatched = result.results.len(),
            succeeded = result.success_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Fan-out complete"
        );

        result
    }
}

/// Wait for one spawned call. A panicked task, or one still running past
/// the timeout plus grace, is logged and yields `None`.
async fn settle(
    name: String,
    mut handle: JoinHandle<Option<RawResponse>>,
    timeout: Duration,
) -> (String, Option<RawResponse>) {
    let joined = tokio::time::timeout(timeout + JOIN_GRACE, &mut handle).await;
    let failure = match joined {
        Ok(Ok(outcome)) => return (name, outcome),
        Ok(Err(join_error)) => AugurError::PredictorFailure {
            predictor: name.clone(),
            message: if join_error.is_panic() {
                "task panicked".to_string()
            } else {
                "task cancelled".to_string()
            },
        },
        Err(_) => {
            handle.abort();
            AugurError::PredictorTimeout {
                predictor: name.clone(),
                timeout_ms: timeout.as_millis() as u64,
            }
        }
    };

    warn!(predictor = %name, error = %failure, "Predictor call failed");
    (name, None)
}

/// One guarded call. Failures are logged here and never propagate.
async fn invoke(
    name: String,
    predictor: Arc<dyn Predictor>,
    prompt: String,
    timeout: Duration,
) -> Option<RawResponse> {
    let started = Instant::now();

    let failure = match tokio::time::timeout(timeout, predictor.predict(&prompt)).await {
        Ok(Ok(response)) if response.success => {
            debug!(
                predictor = %name,
                model = %response.model_identifier,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Predictor answered"
            );
            return Some(response);
        }
        Ok(Ok(response)) => AugurError::PredictorFailure {
            predictor: name.clone(),
            message: format!("{} reported failure", response.model_identifier),
        },
        Ok(Err(e)) => AugurError::PredictorFailure {
            predictor: name.clone(),
            message: format!("{e:#}"),
        },
        Err(_) => AugurError::PredictorTimeout {
            predictor: name.clone(),
            timeout_ms: timeout.as_millis() as u64,
        },
    };

    warn!(predictor = %name, error = %failure, "Predictor call failed");
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
