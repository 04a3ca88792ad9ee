use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

pub mod batch;
pub mod config;
pub mod executor;
pub mod model;
pub mod registry;
pub mod scheduler;

pub use batch::{get_batches, Batch, BatchError, BatchState};
pub use config::{ConfigError, DataSourceSettings, FailurePolicy, OrchestratorConfig};
pub use executor::{BatchRequest, Executor, ExecutorError};
pub use model::{
    BatchTiming, ColumnKind, DataSourceRef, Query, QueryResult, Request, Response, Table,
    TableColumn, TimeSeries,
};
pub use registry::{ExecutorFactory, ExecutorRegistry};
pub use scheduler::{Orchestrator, OrchestratorError};
pub use tokio_util::sync::CancellationToken;
