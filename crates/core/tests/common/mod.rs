#![allow(dead_code)]

use async_trait::async_trait;
use querygate_core::backend::{
    ColumnInfo, ConnectionDescriptor, Engine, QueryExecutor, ResultSet, StaticConnectionResolver,
    TableInfo,
};
use querygate_core::gateway::{QueryGateway, SecurityOptions};
use querygate_shared::ExecutionError;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub connection: String,
    pub query: String,
    pub params: Vec<Value>,
}

/// Executor double: records every call and answers with a canned result,
/// an error, or after a delay.
pub struct MockExecutor {
    pub calls: Arc<Mutex<Vec<RecordedCall>>>,
    pub result: ResultSet,
    pub failure: Option<ExecutionError>,
    pub delay: Duration,
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            result: ResultSet {
                columns: vec!["id".to_string(), "name".to_string()],
                column_types: vec!["INTEGER".to_string(), "TEXT".to_string()],
                rows: vec![vec![Value::from(1), Value::from("Alice")]],
                ..ResultSet::default()
            },
            failure: None,
            delay: Duration::ZERO,
        }
    }
}

impl MockExecutor {
    pub fn failing(err: ExecutionError) -> Self {
        Self {
            failure: Some(err),
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub async fn recorded(&self) -> Vec<RecordedCall> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl QueryExecutor for MockExecutor {
    async fn execute(
        &self,
        connection: &ConnectionDescriptor,
        query: &str,
        params: &[Value],
        row_limit: usize,
    ) -> Result<ResultSet, ExecutionError> {
        self.calls.lock().await.push(RecordedCall {
            connection: connection.name.clone(),
            query: query.to_string(),
            params: params.to_vec(),
        });
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(ref err) = self.failure {
            return Err(err.clone());
        }
        let mut result = self.result.clone();
        if result.rows.len() > row_limit {
            result.rows.truncate(row_limit);
            result.truncated = true;
        }
        Ok(result)
    }

    async fn schemas(&self, _connection: &ConnectionDescriptor) -> Result<Vec<String>, ExecutionError> {
        Ok(vec!["public".to_string(), "audit".to_string()])
    }

    async fn tables(
        &self,
        _connection: &ConnectionDescriptor,
        schema: &str,
    ) -> Result<Vec<TableInfo>, ExecutionError> {
        Ok(vec![TableInfo {
            name: format!("{}_users", schema),
            ..TableInfo::default()
        }])
    }

    async fn columns(
        &self,
        _connection: &ConnectionDescriptor,
        _schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnInfo>, ExecutionError> {
        if table != "orders" {
            return Err(ExecutionError::Database(format!("table '{}' not found", table)));
        }
        Ok(vec![
            ColumnInfo {
                name: "id".to_string(),
                data_type: "integer".to_string(),
                is_primary: true,
                ..ColumnInfo::default()
            },
            ColumnInfo {
                name: "user_id".to_string(),
                data_type: "integer".to_string(),
                is_foreign_key: true,
                referenced_table: Some("users".to_string()),
                referenced_column: Some("id".to_string()),
                ..ColumnInfo::default()
            },
        ])
    }
}

pub fn descriptor(name: &str) -> ConnectionDescriptor {
    ConnectionDescriptor {
        name: name.to_string(),
        engine: Engine::Postgres,
        host: Some("localhost".to_string()),
        port: Some(5432),
        database: Some("app".to_string()),
        schema: None,
        username: Some("app".to_string()),
        password: Some("hunter2".to_string()),
        source: "test",
    }
}

pub fn resolver(names: &[&str]) -> Arc<StaticConnectionResolver> {
    Arc::new(StaticConnectionResolver::new(
        names.iter().map(|n| descriptor(n)).collect::<Vec<_>>(),
    ))
}

pub fn gateway(
    options: SecurityOptions,
    names: &[&str],
    executor: Arc<MockExecutor>,
) -> QueryGateway {
    QueryGateway::new(options, resolver(names), executor)
}
