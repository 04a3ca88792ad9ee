use async_trait::async_trait;
use log::debug;
use orchestrator::{ColumnKind, Table, TableColumn};
use serde_json::Value;
use sqleng::SqlConnection;
use std::collections::HashMap;
use std::error::Error;
use std::sync::Mutex;

/// A database that knows a few tables by name and answers any statement
/// reading `FROM <table>` with that table's full contents.
#[derive(Default)]
pub struct InMemoryDatabase {
    pub tables: HashMap<String, Table>,
    executed: Mutex<Vec<String>>,
}

impl InMemoryDatabase {
    pub fn new() -> InMemoryDatabase {
        InMemoryDatabase::default()
    }

    pub fn with_table(
        mut self,
        name: &str,
        columns: &[(&str, ColumnKind)],
        rows: Vec<Vec<Value>>,
    ) -> InMemoryDatabase {
        let mut table = Table::new(
            columns
                .iter()
                .map(|(n, k)| TableColumn {
                    name: n.to_string(),
                    kind: *k,
                })
                .collect(),
        );
        table.rows = rows;
        self.tables.insert(name.to_string(), table);
        self
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    // The first `FROM <known table>`, or the leading word for pipe-style
    // queries such as `Perf | where ...`.
    fn table_name<'a>(&self, sql: &'a str) -> Option<&'a str> {
        let upper = sql.to_ascii_uppercase();
        let from_clause = upper
            .match_indices("FROM ")
            .filter_map(|(at, m)| sql[at + m.len()..].split_whitespace().next())
            .find(|name| self.tables.contains_key(*name));
        from_clause.or_else(|| {
            sql.split_whitespace()
                .next()
                .filter(|name| self.tables.contains_key(*name))
        })
    }
}

#[async_trait]
impl SqlConnection for InMemoryDatabase {
    async fn query(&self, sql: &str) -> Result<Table, Box<dyn Error + Send + Sync>> {
        if let Ok(mut executed) = self.executed.lock() {
            executed.push(sql.to_string());
        }
        let name = self
            .table_name(sql)
            .ok_or("statement reads no known table")?;
        debug!("Serving table {} from memory", name);
        self.tables
            .get(name)
            .cloned()
            .ok_or_else(|| format!("relation \"{}\" does not exist", name).into())
    }
}
