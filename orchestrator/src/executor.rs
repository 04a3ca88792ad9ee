use crate::model::{DataSourceRef, Query, QueryResult, Response};
use async_trait::async_trait;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use thiserror::Error;
use timerange::TimeRange;
use tokio_util::sync::CancellationToken;

/// Everything an executor gets for one batch. `dependencies` holds the
/// results of the queries in other batches this batch depends on.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub datasource: DataSourceRef,
    pub queries: Vec<Query>,
    pub time_range: TimeRange,
    pub dependencies: HashMap<String, QueryResult>,
    pub cancellation: CancellationToken,
}

impl BatchRequest {
    pub fn ref_ids(&self) -> Vec<String> {
        self.queries.iter().map(|q| q.ref_id.clone()).collect()
    }
}

#[derive(Error, Debug)]
pub enum ExecutorError {
    UnknownType(String),
    QueryFailed(String),
    Cancelled,
    Other(#[from] Box<dyn Error + Send + Sync>),
}

impl Display for ExecutorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutorError::UnknownType(t) => {
                write!(f, "No executor registered for datasource type {}", t)
            }
            ExecutorError::QueryFailed(s) => {
                write!(f, "Query failed: {}", s)
            }
            ExecutorError::Cancelled => {
                write!(f, "Query execution was cancelled")
            }
            ExecutorError::Other(e) => {
                write!(f, "Executor error: {}", e)
            }
        }
    }
}

/// A datasource backend. One call executes one whole batch, and the returned
/// response is keyed by RefID.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn query(&self, request: BatchRequest) -> Result<Response, ExecutorError>;
}
