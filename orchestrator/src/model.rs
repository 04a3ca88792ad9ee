use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::time::Duration;
use timerange::TimeRange;

/// Identifies one datasource instance. Queries sharing a ref are executed
/// together in one batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DataSourceRef {
    pub uid: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

impl DataSourceRef {
    pub fn new(uid: &str, type_name: &str) -> DataSourceRef {
        DataSourceRef {
            uid: uid.to_string(),
            type_name: type_name.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub ref_id: String,
    pub datasource: DataSourceRef,
    #[serde(default)]
    pub depends: Vec<String>,
    /// Executed, visible to dependents, but left out of the final response.
    #[serde(default)]
    pub exclude: bool,
    #[serde(default)]
    pub interval_ms: Option<i64>,
    #[serde(default)]
    pub max_data_points: Option<i64>,
    #[serde(default)]
    pub payload: Value,
}

impl Query {
    pub fn new(ref_id: &str, datasource: DataSourceRef) -> Query {
        Query {
            ref_id: ref_id.to_string(),
            datasource,
            depends: vec![],
            exclude: false,
            interval_ms: None,
            max_data_points: None,
            payload: Value::Null,
        }
    }

    pub fn with_depends(mut self, depends: &[&str]) -> Query {
        self.depends = depends.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Query {
        self.payload = payload;
        self
    }

    pub fn with_interval_ms(mut self, interval_ms: i64) -> Query {
        self.interval_ms = Some(interval_ms);
        self
    }

    pub fn excluded(mut self) -> Query {
        self.exclude = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub queries: Vec<Query>,
    pub time_range: TimeRange,
}

impl Request {
    pub fn new(queries: Vec<Query>, time_range: TimeRange) -> Request {
        Request {
            queries,
            time_range,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Time,
    Number,
    String,
    Bool,
    Null,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableColumn {
    pub name: String,
    pub kind: ColumnKind,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<TableColumn>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: Vec<TableColumn>) -> Table {
        Table {
            columns,
            rows: vec![],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TimeSeries {
    pub name: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// (value, epoch milliseconds)
    pub points: Vec<(Option<f64>, i64)>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub ref_id: String,
    pub error: Option<String>,
    #[serde(default)]
    pub series: Vec<TimeSeries>,
    #[serde(default)]
    pub tables: Vec<Table>,
    pub meta: Option<Value>,
}

impl QueryResult {
    pub fn new(ref_id: &str) -> QueryResult {
        QueryResult {
            ref_id: ref_id.to_string(),
            ..Default::default()
        }
    }

    pub fn from_error(ref_id: &str, error: impl Display) -> QueryResult {
        QueryResult {
            ref_id: ref_id.to_string(),
            error: Some(error.to_string()),
            ..Default::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchTiming {
    pub datasource: DataSourceRef,
    pub ref_ids: Vec<String>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Response {
    pub results: HashMap<String, QueryResult>,
    #[serde(default)]
    pub timings: Vec<BatchTiming>,
}

impl Response {
    pub fn new() -> Response {
        Response::default()
    }

    pub fn insert(&mut self, result: QueryResult) {
        self.results.insert(result.ref_id.clone(), result);
    }

    pub fn get(&self, ref_id: &str) -> Option<&QueryResult> {
        self.results.get(ref_id)
    }
}
