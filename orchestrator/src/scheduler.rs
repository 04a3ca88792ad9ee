use crate::batch::{get_batches, Batch, BatchError, BatchState};
use crate::config::{ConfigError, FailurePolicy, OrchestratorConfig};
use crate::executor::{BatchRequest, ExecutorError};
use crate::model::{BatchTiming, DataSourceRef, QueryResult, Request, Response};
use crate::registry::ExecutorRegistry;
use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use timerange::TimeRange;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    InvalidRequest(#[from] BatchError),
    BatchFailed {
        datasource: DataSourceRef,
        source: ExecutorError,
    },
    Cancelled,
    Timeout(Duration),
    TaskFailed(#[from] JoinError),
    Stalled(Vec<String>),
}

impl Display for OrchestratorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OrchestratorError::InvalidRequest(e) => {
                write!(f, "Invalid request: {}", e)
            }
            OrchestratorError::BatchFailed { datasource, source } => {
                write!(
                    f,
                    "Batch for datasource {} ({}) failed: {}",
                    datasource.uid, datasource.type_name, source
                )
            }
            OrchestratorError::Cancelled => {
                write!(f, "Request was cancelled")
            }
            OrchestratorError::Timeout(t) => {
                write!(f, "Request timed out after {:?}", t)
            }
            OrchestratorError::TaskFailed(e) => {
                write!(f, "Batch task failed: {}", e)
            }
            OrchestratorError::Stalled(refs) => {
                write!(f, "Queries {} could never be started", refs.join(", "))
            }
        }
    }
}

struct BatchOutcome {
    index: usize,
    result: Result<Response, ExecutorError>,
    elapsed: Duration,
}

/// Runs requests against the executors of a registry. Batches without
/// pending dependencies run concurrently, one task each.
pub struct Orchestrator {
    registry: Arc<ExecutorRegistry>,
    failure_policy: FailurePolicy,
    request_timeout: Option<Duration>,
}

impl Orchestrator {
    pub fn new(registry: Arc<ExecutorRegistry>) -> Orchestrator {
        Orchestrator {
            registry,
            failure_policy: FailurePolicy::default(),
            request_timeout: None,
        }
    }

    pub fn from_config(
        config: &OrchestratorConfig,
        registry: Arc<ExecutorRegistry>,
    ) -> Result<Orchestrator, ConfigError> {
        Ok(Orchestrator {
            registry,
            failure_policy: config.failure_policy,
            request_timeout: config.request_timeout()?,
        })
    }

    pub fn with_failure_policy(mut self, failure_policy: FailurePolicy) -> Orchestrator {
        self.failure_policy = failure_policy;
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Orchestrator {
        self.request_timeout = Some(request_timeout);
        self
    }

    pub async fn handle_request(
        &self,
        request: Request,
        cancellation: CancellationToken,
    ) -> Result<Response, OrchestratorError> {
        let mut batches = get_batches(&request.queries)?;
        let excluded: HashSet<String> = request
            .queries
            .iter()
            .filter(|q| q.exclude)
            .map(|q| q.ref_id.clone())
            .collect();

        // Cancelled on every exit path, including early returns.
        let token = cancellation.child_token();
        let _guard = token.clone().drop_guard();
        let deadline = self.request_timeout.map(|t| Instant::now() + t);

        let mut tasks = JoinSet::new();
        let mut response = Response::new();
        self.launch_ready(
            &mut batches,
            &response,
            &request.time_range,
            &token,
            &mut tasks,
        );

        while !tasks.is_empty() {
            let joined = tokio::select! {
                biased;
                _ = cancellation.cancelled() => {
                    debug!("Request cancelled by caller with {} batches in flight", tasks.len());
                    token.cancel();
                    return Err(OrchestratorError::Cancelled);
                }
                _ = wait_until(deadline) => {
                    warn!("Request timed out with {} batches in flight", tasks.len());
                    token.cancel();
                    return Err(OrchestratorError::Timeout(self.request_timeout.unwrap_or_default()));
                }
                joined = tasks.join_next() => joined,
            };
            let outcome = match joined {
                Some(Ok(outcome)) => outcome,
                Some(Err(e)) => {
                    token.cancel();
                    return Err(OrchestratorError::TaskFailed(e));
                }
                None => break,
            };

            let batch = &mut batches[outcome.index];
            batch.mark_done();
            match outcome.result {
                Ok(result) => {
                    debug!(
                        "Batch for datasource {} finished in {:?}",
                        batch.datasource.uid, outcome.elapsed
                    );
                    merge_batch_response(batch, result, &mut response);
                    response.timings.push(BatchTiming {
                        datasource: batch.datasource.clone(),
                        ref_ids: batch.ref_ids(),
                        elapsed: outcome.elapsed,
                    });
                }
                Err(e) => {
                    warn!("Batch for datasource {} failed: {}", batch.datasource.uid, e);
                    match self.failure_policy {
                        FailurePolicy::AbortRequest => {
                            token.cancel();
                            return Err(OrchestratorError::BatchFailed {
                                datasource: batch.datasource.clone(),
                                source: e,
                            });
                        }
                        FailurePolicy::Isolate => {
                            for ref_id in batch.ref_ids() {
                                response.insert(QueryResult::from_error(&ref_id, &e));
                            }
                        }
                    }
                }
            }

            self.launch_ready(
                &mut batches,
                &response,
                &request.time_range,
                &token,
                &mut tasks,
            );
        }

        let stalled: Vec<String> = batches
            .iter()
            .filter(|b| b.state != BatchState::Done)
            .flat_map(|b| b.ref_ids())
            .collect();
        if !stalled.is_empty() {
            return Err(OrchestratorError::Stalled(stalled));
        }

        response.results.retain(|ref_id, _| !excluded.contains(ref_id));
        Ok(response)
    }

    fn launch_ready(
        &self,
        batches: &mut [Batch],
        response: &Response,
        time_range: &TimeRange,
        token: &CancellationToken,
        tasks: &mut JoinSet<BatchOutcome>,
    ) {
        for (index, batch) in batches.iter_mut().enumerate() {
            if !batch.is_ready(&response.results) {
                continue;
            }
            batch.mark_started();
            debug!(
                "Starting batch for datasource {} with queries {:?}",
                batch.datasource.uid,
                batch.ref_ids()
            );

            let executor = match self.registry.resolve(&batch.datasource) {
                Ok(e) => e,
                Err(e) => {
                    tasks.spawn(async move {
                        BatchOutcome {
                            index,
                            result: Err(e),
                            elapsed: Duration::ZERO,
                        }
                    });
                    continue;
                }
            };

            let dependencies: HashMap<String, QueryResult> = batch
                .depends
                .iter()
                .filter_map(|d| response.get(d).map(|r| (d.clone(), r.clone())))
                .collect();
            let task_token = token.child_token();
            let batch_request = BatchRequest {
                datasource: batch.datasource.clone(),
                queries: batch.queries.clone(),
                time_range: time_range.clone(),
                dependencies,
                cancellation: task_token.clone(),
            };
            tasks.spawn(async move {
                let started = Instant::now();
                let result = tokio::select! {
                    _ = task_token.cancelled() => Err(ExecutorError::Cancelled),
                    r = executor.query(batch_request) => r,
                };
                BatchOutcome {
                    index,
                    result,
                    elapsed: started.elapsed(),
                }
            });
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

fn merge_batch_response(batch: &Batch, mut result: Response, response: &mut Response) {
    for ref_id in batch.ref_ids() {
        match result.results.remove(&ref_id) {
            Some(mut r) => {
                r.ref_id = ref_id;
                response.insert(r);
            }
            None => {
                warn!(
                    "Datasource {} returned no result for {}",
                    batch.datasource.uid, ref_id
                );
                response.insert(QueryResult::from_error(
                    &ref_id,
                    "datasource returned no result for this query",
                ));
            }
        }
    }
    for stray in result.results.keys() {
        warn!(
            "Dropping result for {} from datasource {}, it was not part of the batch",
            stray, batch.datasource.uid
        );
    }
}
