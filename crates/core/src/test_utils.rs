use crate::backend::{ConnectionDescriptor, Engine, QueryExecutor, ResultSet, StaticConnectionResolver};
use crate::config::AppConfig;
use async_trait::async_trait;
use querygate_shared::ExecutionError;
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// Executor that records every statement and answers with a single row.
#[derive(Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<String>>,
}

impl RecordingExecutor {
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl QueryExecutor for RecordingExecutor {
    async fn execute(
        &self,
        _connection: &ConnectionDescriptor,
        query: &str,
        _params: &[Value],
        _row_limit: usize,
    ) -> Result<ResultSet, ExecutionError> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(query.to_string());
        Ok(ResultSet {
            columns: vec!["result".to_string()],
            rows: vec![vec![Value::from(1)]],
            ..ResultSet::default()
        })
    }
}

/// In-memory SQLite descriptor named `name`.
pub fn sqlite_descriptor(name: &str) -> ConnectionDescriptor {
    ConnectionDescriptor {
        name: name.to_string(),
        engine: Engine::Sqlite,
        host: None,
        port: None,
        database: Some(":memory:".to_string()),
        schema: None,
        username: None,
        password: None,
        source: "test",
    }
}

/// App state over a single `main` connection backed by a [`RecordingExecutor`].
pub fn create_test_app_state(config: AppConfig) -> (Arc<crate::AppState>, Arc<RecordingExecutor>) {
    let executor = Arc::new(RecordingExecutor::default());
    let resolver = Arc::new(StaticConnectionResolver::new([sqlite_descriptor("main")]));
    let state = Arc::new(crate::AppState::new(config, resolver, executor.clone()));
    (state, executor)
}
