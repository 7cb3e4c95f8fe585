//! Database-facing collaborators: where connections come from and how
//! statements are run against them.

pub mod resolver;
pub mod sqlite;

use async_trait::async_trait;
use querygate_shared::ExecutionError;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

pub use resolver::{ConnectionResolver, EnvConnectionResolver, StaticConnectionResolver};
pub use sqlite::SqliteExecutor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Engine {
    Postgres,
    MySql,
    MariaDb,
    Sqlite,
    MongoDb,
    Redis,
    ElasticSearch,
    ClickHouse,
}

impl Engine {
    #[must_use]
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Some(Self::Postgres),
            "mysql" => Some(Self::MySql),
            "mariadb" => Some(Self::MariaDb),
            "sqlite" | "sqlite3" => Some(Self::Sqlite),
            "mongodb" | "mongo" => Some(Self::MongoDb),
            "redis" => Some(Self::Redis),
            "elasticsearch" | "elastic" | "es" => Some(Self::ElasticSearch),
            "clickhouse" => Some(Self::ClickHouse),
            _ => None,
        }
    }

    #[must_use]
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::Postgres => Some(5432),
            Self::MySql | Self::MariaDb => Some(3306),
            Self::MongoDb => Some(27017),
            Self::Redis => Some(6379),
            Self::ElasticSearch => Some(9200),
            Self::ClickHouse => Some(9000),
            Self::Sqlite => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
            Self::MariaDb => "mariadb",
            Self::Sqlite => "sqlite",
            Self::MongoDb => "mongodb",
            Self::Redis => "redis",
            Self::ElasticSearch => "elasticsearch",
            Self::ClickHouse => "clickhouse",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved connection target. Credentials never serialise.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub engine: Engine,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(skip)]
    pub username: Option<String>,
    #[serde(skip)]
    pub password: Option<String>,
    pub source: &'static str,
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("name", &self.name)
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("schema", &self.schema)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// Rows returned by an executor. Write statements report `rows_affected`
/// and leave `rows` empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub column_types: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub rows_affected: Option<u64>,
    /// Set when more rows existed than the caller's row limit.
    pub truncated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableInfo {
    pub name: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub is_primary: bool,
    pub is_foreign_key: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referenced_table: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referenced_column: Option<String>,
}

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Runs one statement, reading at most `row_limit` rows.
    async fn execute(
        &self,
        connection: &ConnectionDescriptor,
        query: &str,
        params: &[Value],
        row_limit: usize,
    ) -> Result<ResultSet, ExecutionError>;

    /// Whether this executor can reach connections of `engine` at all.
    fn supports(&self, _engine: Engine) -> bool {
        true
    }

    async fn schemas(&self, connection: &ConnectionDescriptor) -> Result<Vec<String>, ExecutionError> {
        Err(ExecutionError::Unsupported(connection.engine.to_string()))
    }

    async fn tables(
        &self,
        connection: &ConnectionDescriptor,
        _schema: &str,
    ) -> Result<Vec<TableInfo>, ExecutionError> {
        Err(ExecutionError::Unsupported(connection.engine.to_string()))
    }

    /// Columns of `table` in declaration order. An unknown table is an error,
    /// not an empty list.
    async fn columns(
        &self,
        connection: &ConnectionDescriptor,
        _schema: &str,
        _table: &str,
    ) -> Result<Vec<ColumnInfo>, ExecutionError> {
        Err(ExecutionError::Unsupported(connection.engine.to_string()))
    }
}
