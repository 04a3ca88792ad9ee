use crate::macros::{Dialect, Fill, MacroEngine, MacroError};
use async_trait::async_trait;
use log::{debug, warn};
use orchestrator::{
    BatchRequest, ConfigError, DataSourceSettings, Executor, ExecutorError, ExecutorRegistry,
    Query, QueryResult, Response, Table,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use timerange::{default_interval, Interval, TimeRange};
use tokio::task::JoinSet;

#[derive(Error, Debug)]
pub enum SqlEngineError {
    UnsupportedDialect(String),
    Config(#[from] ConfigError),
    Payload(#[from] serde_json::Error),
    MissingSql,
    Macro(#[from] MacroError),
    Connection(Box<dyn Error + Send + Sync>),
}

impl Display for SqlEngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlEngineError::UnsupportedDialect(t) => {
                write!(f, "No SQL dialect for datasource type {}", t)
            }
            SqlEngineError::Config(e) => {
                write!(f, "Bad datasource settings: {}", e)
            }
            SqlEngineError::Payload(e) => {
                write!(f, "Could not read query: {}", e)
            }
            SqlEngineError::MissingSql => {
                write!(f, "Query has no rawSql")
            }
            SqlEngineError::Macro(e) => {
                write!(f, "Macro interpolation failed: {}", e)
            }
            SqlEngineError::Connection(e) => {
                write!(f, "Database error: {}", e)
            }
        }
    }
}

/// The database side of an SQL datasource.
#[async_trait]
pub trait SqlConnection: Send + Sync {
    async fn query(&self, sql: &str) -> Result<Table, Box<dyn Error + Send + Sync>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryFormat {
    TimeSeries,
    #[default]
    Table,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlQueryPayload {
    #[serde(default)]
    pub raw_sql: String,
    #[serde(default)]
    pub format: QueryFormat,
}

pub struct SqlQueryEngine {
    uid: String,
    dialect: Dialect,
    min_interval: Option<Duration>,
    connection: Arc<dyn SqlConnection>,
}

impl SqlQueryEngine {
    pub fn new(uid: &str, dialect: Dialect, connection: Arc<dyn SqlConnection>) -> SqlQueryEngine {
        SqlQueryEngine {
            uid: uid.to_string(),
            dialect,
            min_interval: None,
            connection,
        }
    }

    pub fn from_settings(
        settings: &DataSourceSettings,
        connection: Arc<dyn SqlConnection>,
    ) -> Result<SqlQueryEngine, SqlEngineError> {
        let dialect =
            Dialect::from_type_name(&settings.type_name, settings.json_flag("timescaledb"))
                .ok_or_else(|| SqlEngineError::UnsupportedDialect(settings.type_name.clone()))?;
        Ok(SqlQueryEngine {
            uid: settings.uid.clone(),
            dialect,
            min_interval: settings.min_interval()?,
            connection,
        })
    }

    pub fn with_min_interval(mut self, min_interval: Duration) -> SqlQueryEngine {
        self.min_interval = Some(min_interval);
        self
    }

    /// The query's own interval when it has one, otherwise `(to - from) / 60`
    /// rounded. Never below the datasource minimum.
    pub fn interval_for(&self, query: &Query, time_range: &TimeRange) -> Interval {
        let min = self.min_interval.unwrap_or_default();
        match query.interval_ms {
            Some(ms) if ms > 0 => {
                let explicit = Duration::from_millis(ms.unsigned_abs());
                Interval::new(explicit.max(min))
            }
            _ => Interval::new(default_interval(time_range).max(min)),
        }
    }

    fn prepare(&self, query: &Query, time_range: &TimeRange) -> Result<PreparedQuery, SqlEngineError> {
        let payload: SqlQueryPayload = serde_json::from_value(query.payload.clone())?;
        if payload.raw_sql.trim().is_empty() {
            return Err(SqlEngineError::MissingSql);
        }
        let interval = self.interval_for(query, time_range);
        let engine = MacroEngine::new(self.dialect, time_range.clone(), interval.clone());
        let interpolated = engine.interpolate(&payload.raw_sql)?;
        debug!(
            "Interpolated query {} for datasource {}: {}",
            query.ref_id, self.uid, interpolated.sql
        );
        Ok(PreparedQuery {
            ref_id: query.ref_id.clone(),
            sql: interpolated.sql,
            fill: interpolated.fill,
            format: payload.format,
            interval,
        })
    }
}

struct PreparedQuery {
    ref_id: String,
    sql: String,
    fill: Option<Fill>,
    format: QueryFormat,
    interval: Interval,
}

impl PreparedQuery {
    fn meta(&self) -> serde_json::Value {
        json!({
            "executedQueryString": self.sql,
            "format": self.format,
            "interval": self.interval.text,
            "fill": self.fill,
        })
    }
}

async fn run_prepared(connection: Arc<dyn SqlConnection>, prepared: PreparedQuery) -> QueryResult {
    match connection.query(&prepared.sql).await {
        Ok(table) => {
            let mut result = QueryResult::new(&prepared.ref_id);
            result.tables.push(table);
            result.meta = Some(prepared.meta());
            result
        }
        Err(e) => {
            warn!("Query {} failed: {}", prepared.ref_id, e);
            let mut result =
                QueryResult::from_error(&prepared.ref_id, SqlEngineError::Connection(e));
            result.meta = Some(prepared.meta());
            result
        }
    }
}

#[async_trait]
impl Executor for SqlQueryEngine {
    async fn query(&self, request: BatchRequest) -> Result<Response, ExecutorError> {
        let mut response = Response::new();
        let mut running = JoinSet::new();
        for query in &request.queries {
            match self.prepare(query, &request.time_range) {
                Ok(prepared) => {
                    running.spawn(run_prepared(self.connection.clone(), prepared));
                }
                Err(e) => {
                    debug!("Query {} could not be prepared: {}", query.ref_id, e);
                    response.insert(QueryResult::from_error(&query.ref_id, e));
                }
            }
        }

        loop {
            tokio::select! {
                _ = request.cancellation.cancelled() => {
                    return Err(ExecutorError::Cancelled);
                }
                joined = running.join_next() => match joined {
                    Some(Ok(result)) => response.insert(result),
                    Some(Err(e)) => return Err(ExecutorError::Other(Box::new(e))),
                    None => break,
                },
            }
        }
        Ok(response)
    }
}

/// Registers an SQL engine for `type_name`. `connect` opens the database
/// side for each configured datasource.
pub fn register_sql_engine<F>(registry: &mut ExecutorRegistry, type_name: &str, connect: F)
where
    F: Fn(&DataSourceSettings) -> Result<Arc<dyn SqlConnection>, ExecutorError>
        + Send
        + Sync
        + 'static,
{
    registry.register(type_name, move |settings| {
        let connection = connect(settings)?;
        let engine = SqlQueryEngine::from_settings(settings, connection)
            .map_err(|e| ExecutorError::Other(Box::new(e)))?;
        Ok(Arc::new(engine) as Arc<dyn Executor>)
    });
}
