use crate::config::{DataSourceSettings, OrchestratorConfig};
use crate::executor::{Executor, ExecutorError};
use crate::model::DataSourceRef;
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub type ExecutorFactory =
    Arc<dyn Fn(&DataSourceSettings) -> Result<Arc<dyn Executor>, ExecutorError> + Send + Sync>;

/// Maps datasource types to executor factories. Executors are built lazily
/// the first time a datasource is used and then reused for later batches.
#[derive(Default)]
pub struct ExecutorRegistry {
    factories: HashMap<String, ExecutorFactory>,
    datasources: HashMap<String, DataSourceSettings>,
    instances: Mutex<HashMap<DataSourceRef, Arc<dyn Executor>>>,
}

impl ExecutorRegistry {
    pub fn new() -> ExecutorRegistry {
        ExecutorRegistry::default()
    }

    pub fn from_config(config: &OrchestratorConfig) -> ExecutorRegistry {
        let mut registry = ExecutorRegistry::new();
        for ds in &config.datasources {
            registry.add_datasource(ds.clone());
        }
        registry
    }

    pub fn register<F>(&mut self, type_name: &str, factory: F)
    where
        F: Fn(&DataSourceSettings) -> Result<Arc<dyn Executor>, ExecutorError>
            + Send
            + Sync
            + 'static,
    {
        self.factories
            .insert(type_name.to_string(), Arc::new(factory));
    }

    pub fn add_datasource(&mut self, settings: DataSourceSettings) {
        self.datasources.insert(settings.uid.clone(), settings);
    }

    pub fn settings_for(&self, datasource: &DataSourceRef) -> DataSourceSettings {
        match self.datasources.get(&datasource.uid) {
            Some(s) if s.type_name == datasource.type_name => s.clone(),
            _ => DataSourceSettings::from_ref(datasource),
        }
    }

    pub fn resolve(&self, datasource: &DataSourceRef) -> Result<Arc<dyn Executor>, ExecutorError> {
        let mut instances = self
            .instances
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(e) = instances.get(datasource) {
            return Ok(e.clone());
        }
        let factory = self
            .factories
            .get(&datasource.type_name)
            .ok_or_else(|| ExecutorError::UnknownType(datasource.type_name.clone()))?;
        debug!(
            "Creating executor for datasource {} of type {}",
            datasource.uid, datasource.type_name
        );
        let executor = factory(&self.settings_for(datasource))?;
        instances.insert(datasource.clone(), executor.clone());
        Ok(executor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::BatchRequest;
    use crate::model::Response;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Nothing;

    #[async_trait]
    impl Executor for Nothing {
        async fn query(&self, _: BatchRequest) -> Result<Response, ExecutorError> {
            Ok(Response::new())
        }
    }

    #[test]
    fn test_instances_are_cached_per_datasource() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();
        let mut registry = ExecutorRegistry::new();
        registry.register("postgres", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Nothing) as Arc<dyn Executor>)
        });
        let a = DataSourceRef::new("a", "postgres");
        let b = DataSourceRef::new("b", "postgres");
        registry.resolve(&a).unwrap();
        registry.resolve(&a).unwrap();
        registry.resolve(&b).unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unknown_type_is_an_error() {
        let registry = ExecutorRegistry::new();
        let res = registry.resolve(&DataSourceRef::new("a", "influx"));
        assert!(matches!(res, Err(ExecutorError::UnknownType(t)) if t == "influx"));
    }

    #[test]
    fn test_settings_come_from_configured_datasource() {
        let mut registry = ExecutorRegistry::new();
        registry.add_datasource(DataSourceSettings {
            uid: "pg".to_string(),
            type_name: "postgres".to_string(),
            url: Some("postgres://db:5432/metrics".to_string()),
            time_interval: Some("10s".to_string()),
            json_data: serde_json::json!({"timescaledb": true}),
        });
        let settings = registry.settings_for(&DataSourceRef::new("pg", "postgres"));
        assert!(settings.json_flag("timescaledb"));
        let fallback = registry.settings_for(&DataSourceRef::new("other", "postgres"));
        assert_eq!(fallback.url, None);
    }
}
