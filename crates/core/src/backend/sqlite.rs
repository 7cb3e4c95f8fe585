use super::{ColumnInfo, ConnectionDescriptor, Engine, QueryExecutor, ResultSet, TableInfo};
use crate::sql::classify;
use async_trait::async_trait;
use futures::TryStreamExt;
use querygate_shared::ExecutionError;
use serde_json::Value;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{Column, ConnectOptions, Connection, Row, TypeInfo, ValueRef};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::str::FromStr;
use std::time::Duration;

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Runs statements against SQLite files. Opens a fresh connection per call.
#[derive(Debug, Clone)]
pub struct SqliteExecutor {
    busy_timeout: Duration,
    read_only: bool,
}

impl Default for SqliteExecutor {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
            read_only: false,
        }
    }
}

impl SqliteExecutor {
    /// Opens every statement connection with `SQLITE_OPEN_READONLY`.
    #[must_use]
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    fn connect_options(&self, path: &str, read_only: bool) -> Result<SqliteConnectOptions, ExecutionError> {
        let opts = if path == ":memory:" {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| ExecutionError::Database(e.to_string()))?
        } else {
            SqliteConnectOptions::new().filename(path)
        };
        Ok(opts.busy_timeout(self.busy_timeout).read_only(read_only))
    }

    async fn open(
        &self,
        connection: &ConnectionDescriptor,
        read_only: bool,
    ) -> Result<SqliteConnection, ExecutionError> {
        if !self.supports(connection.engine) {
            return Err(ExecutionError::Unsupported(connection.engine.to_string()));
        }
        let path = connection.database.as_deref().ok_or_else(|| {
            ExecutionError::ConnectionNotFound(format!(
                "connection '{}' has no database path",
                connection.name
            ))
        })?;

        self.connect_options(path, read_only)?
            .connect()
            .await
            .map_err(Self::map_err)
    }

    fn bind_param<'q>(query: SqliteQuery<'q>, value: &'q Value) -> SqliteQuery<'q> {
        match value {
            Value::Null => query.bind(Option::<String>::None),
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => query.bind(i),
                None => query.bind(n.as_f64()),
            },
            Value::String(s) => query.bind(s.as_str()),
            other => query.bind(other.to_string()),
        }
    }

    /// Storage classes are dynamic in SQLite, so decode by the value's own
    /// type rather than the declared column type.
    fn extract_value(row: &SqliteRow, idx: usize) -> Value {
        let Ok(raw) = row.try_get_raw(idx) else {
            return Value::Null;
        };
        if raw.is_null() {
            return Value::Null;
        }
        let storage = raw.type_info().name().to_string();

        match storage.as_str() {
            "INTEGER" | "BOOLEAN" => row
                .try_get_unchecked::<i64, _>(idx)
                .map_or(Value::Null, Value::from),
            "REAL" | "NUMERIC" => row
                .try_get_unchecked::<f64, _>(idx)
                .map_or(Value::Null, Value::from),
            "BLOB" => row
                .try_get_unchecked::<Vec<u8>, _>(idx)
                .map_or(Value::Null, |bytes| Value::String(hex_encode(&bytes))),
            _ => row
                .try_get_unchecked::<String, _>(idx)
                .map_or(Value::Null, Value::String),
        }
    }

    fn map_err(e: sqlx::Error) -> ExecutionError {
        ExecutionError::Database(e.to_string())
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

async fn close(conn: SqliteConnection) {
    if let Err(e) = conn.close().await {
        tracing::debug!(error = %e, "Failed to close SQLite connection cleanly");
    }
}

#[async_trait]
impl QueryExecutor for SqliteExecutor {
    async fn execute(
        &self,
        connection: &ConnectionDescriptor,
        query: &str,
        params: &[Value],
        row_limit: usize,
    ) -> Result<ResultSet, ExecutionError> {
        let mut conn = self.open(connection, self.read_only).await?;

        let mut statement = sqlx::query(query);
        for param in params {
            statement = Self::bind_param(statement, param);
        }

        let result = if classify(query).is_write() {
            statement
                .execute(&mut conn)
                .await
                .map(|done| ResultSet {
                    rows_affected: Some(done.rows_affected()),
                    ..ResultSet::default()
                })
                .map_err(Self::map_err)
        } else {
            let mut set = ResultSet::default();
            let mut rows = statement.fetch(&mut conn);
            loop {
                match rows.try_next().await {
                    Ok(Some(row)) => {
                        if set.columns.is_empty() {
                            for col in row.columns() {
                                set.columns.push(col.name().to_string());
                                set.column_types.push(col.type_info().name().to_string());
                            }
                        }
                        if set.rows.len() >= row_limit {
                            set.truncated = true;
                            break;
                        }
                        set.rows.push(
                            (0..row.columns().len())
                                .map(|idx| Self::extract_value(&row, idx))
                                .collect(),
                        );
                    }
                    Ok(None) => break,
                    Err(e) => return Err(Self::map_err(e)),
                }
            }
            drop(rows);
            Ok(set)
        };

        close(conn).await;
        result
    }

    fn supports(&self, engine: Engine) -> bool {
        engine == Engine::Sqlite
    }

    /// `main` plus any `ATTACH`ed database.
    async fn schemas(&self, connection: &ConnectionDescriptor) -> Result<Vec<String>, ExecutionError> {
        let mut conn = self.open(connection, true).await?;
        let result = sqlx::query_scalar::<_, String>(
            "SELECT name FROM pragma_database_list WHERE name <> 'temp' ORDER BY seq",
        )
        .fetch_all(&mut conn)
        .await
        .map_err(Self::map_err);
        close(conn).await;
        result
    }

    async fn tables(
        &self,
        connection: &ConnectionDescriptor,
        schema: &str,
    ) -> Result<Vec<TableInfo>, ExecutionError> {
        let mut conn = self.open(connection, true).await?;
        let sql = format!(
            "SELECT name, type FROM {}.sqlite_master \
             WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' ORDER BY name",
            quote_ident(schema)
        );
        let result = sqlx::query(&sql)
            .fetch_all(&mut conn)
            .await
            .and_then(|rows| {
                rows.iter()
                    .map(|row| -> Result<TableInfo, sqlx::Error> {
                        let kind: String = row.try_get("type")?;
                        Ok(TableInfo {
                            name: row.try_get("name")?,
                            attributes: BTreeMap::from([("type".to_string(), kind)]),
                        })
                    })
                    .collect()
            })
            .map_err(Self::map_err);
        close(conn).await;
        result
    }

    async fn columns(
        &self,
        connection: &ConnectionDescriptor,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnInfo>, ExecutionError> {
        let mut conn = self.open(connection, true).await?;
        let result = Self::read_columns(&mut conn, schema, table).await;
        close(conn).await;

        let columns = result.map_err(Self::map_err)?;
        if columns.is_empty() {
            return Err(ExecutionError::Database(format!(
                "table '{}' not found in schema '{}'",
                table, schema
            )));
        }
        Ok(columns)
    }
}

impl SqliteExecutor {
    async fn read_columns(
        conn: &mut SqliteConnection,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnInfo>, sqlx::Error> {
        // column -> (referenced table, referenced column)
        let mut foreign: HashMap<String, (String, Option<String>)> = HashMap::new();
        let fk_rows = sqlx::query(
            "SELECT \"from\", \"table\", \"to\" FROM pragma_foreign_key_list(?, ?)",
        )
        .bind(table)
        .bind(schema)
        .fetch_all(&mut *conn)
        .await?;
        for row in fk_rows {
            foreign.insert(row.try_get("from")?, (row.try_get("table")?, row.try_get("to")?));
        }

        let rows = sqlx::query("SELECT name, type, pk FROM pragma_table_info(?, ?) ORDER BY cid")
            .bind(table)
            .bind(schema)
            .fetch_all(&mut *conn)
            .await?;

        rows.iter()
            .map(|row| -> Result<ColumnInfo, sqlx::Error> {
                let name: String = row.try_get("name")?;
                let pk: i64 = row.try_get("pk")?;
                let reference = foreign.get(&name).cloned();
                Ok(ColumnInfo {
                    data_type: row.try_get("type")?,
                    is_primary: pk > 0,
                    is_foreign_key: reference.is_some(),
                    referenced_table: reference.as_ref().map(|(t, _)| t.clone()),
                    referenced_column: reference.and_then(|(_, c)| c),
                    name,
                })
            })
            .collect()
    }
}
