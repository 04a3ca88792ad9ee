use crate::model::DataSourceRef;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use timerange::{parse_interval, TimeRangeError};

#[derive(Error, Debug)]
pub enum ConfigError {
    ReadError(#[from] std::io::Error),
    ParseError(#[from] serde_yaml::Error),
    InvalidInterval { field: String, source: TimeRangeError },
    DuplicateDataSource(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(e) => write!(f, "Could not read config: {}", e),
            ConfigError::ParseError(e) => write!(f, "Could not parse config: {}", e),
            ConfigError::InvalidInterval { field, source } => {
                write!(f, "Invalid interval in {}: {}", field, source)
            }
            ConfigError::DuplicateDataSource(uid) => {
                write!(f, "Datasource uid {} is configured more than once", uid)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceSettings {
    pub uid: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub url: Option<String>,
    /// Minimum interval, e.g. `10s` or `>1m`.
    #[serde(default)]
    pub time_interval: Option<String>,
    #[serde(default)]
    pub json_data: Value,
}

impl DataSourceSettings {
    pub fn from_ref(datasource: &DataSourceRef) -> DataSourceSettings {
        DataSourceSettings {
            uid: datasource.uid.clone(),
            type_name: datasource.type_name.clone(),
            url: None,
            time_interval: None,
            json_data: Value::Null,
        }
    }

    pub fn reference(&self) -> DataSourceRef {
        DataSourceRef::new(&self.uid, &self.type_name)
    }

    pub fn min_interval(&self) -> Result<Option<Duration>, ConfigError> {
        match &self.time_interval {
            None => Ok(None),
            Some(s) if s.trim().is_empty() => Ok(None),
            Some(s) => parse_interval(s)
                .map(Some)
                .map_err(|source| ConfigError::InvalidInterval {
                    field: format!("datasource {}", self.uid),
                    source,
                }),
        }
    }

    pub fn json_flag(&self, key: &str) -> bool {
        self.json_data
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// What happens to a request when one of its batches fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Return the first batch error and cancel everything still running.
    #[default]
    AbortRequest,
    /// Record errors on the failed batch's RefIDs and keep going.
    Isolate,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(default)]
    pub request_timeout: Option<String>,
    #[serde(default)]
    pub datasources: Vec<DataSourceSettings>,
}

impl OrchestratorConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<OrchestratorConfig, ConfigError> {
        let config: OrchestratorConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<OrchestratorConfig, ConfigError> {
        let yaml = std::fs::read_to_string(path)?;
        OrchestratorConfig::from_yaml_str(&yaml)
    }

    pub fn request_timeout(&self) -> Result<Option<Duration>, ConfigError> {
        match &self.request_timeout {
            None => Ok(None),
            Some(s) => parse_interval(s)
                .map(Some)
                .map_err(|source| ConfigError::InvalidInterval {
                    field: "request_timeout".to_string(),
                    source,
                }),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for ds in &self.datasources {
            if !seen.insert(ds.uid.as_str()) {
                return Err(ConfigError::DuplicateDataSource(ds.uid.clone()));
            }
            ds.min_interval()?;
        }
        self.request_timeout()?;
        Ok(())
    }
}
