use crate::backend::resolver::select_connection_name;
use crate::backend::{ColumnInfo, ConnectionDescriptor, ConnectionResolver, QueryExecutor, TableInfo};
use crate::confirmation::{ConfirmationStore, PendingConfirmation};
use crate::sql::{
    classify, destructive_keyword, has_multiple_statements, mentions_write, validate,
    ValidationPolicy,
};
use querygate_shared::{
    ConfirmationError, ExecutionError, QueryGateError, QueryGateResult, SecurityLevel,
    StatementType,
};
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Per-server query policy. Read-only takes precedence over confirm-writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityOptions {
    pub read_only: bool,
    pub confirm_writes: bool,
    pub security_level: SecurityLevel,
    pub query_timeout: Duration,
    pub max_rows: usize,
    pub allow_multi_statement: bool,
    pub allow_drop: bool,
    pub default_connection: Option<String>,
    /// Empty allows every connection.
    pub allowed_connections: Vec<String>,
}

impl Default for SecurityOptions {
    fn default() -> Self {
        Self {
            read_only: false,
            confirm_writes: true,
            security_level: SecurityLevel::Standard,
            query_timeout: Duration::from_secs(30),
            max_rows: 1000,
            allow_multi_statement: false,
            allow_drop: false,
            default_connection: None,
            allowed_connections: Vec::new(),
        }
    }
}

impl SecurityOptions {
    /// Whether write statements wait for an explicit confirmation.
    #[must_use]
    pub fn confirmation_enabled(&self) -> bool {
        self.confirm_writes && !self.read_only
    }

    #[must_use]
    pub fn validation_policy(&self) -> ValidationPolicy {
        ValidationPolicy {
            allow_write: !self.read_only,
            level: self.security_level,
            allow_multi_statement: self.allow_multi_statement,
            // confirmation is the gate for DROP/TRUNCATE when enabled
            allow_destructive: self.allow_drop || self.confirmation_enabled(),
        }
    }

    #[must_use]
    pub fn is_connection_allowed(&self, name: &str) -> bool {
        self.allowed_connections.is_empty() || self.allowed_connections.iter().any(|c| c == name)
    }
}

/// Result of a statement that actually ran.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryRows {
    pub connection: String,
    pub columns: Vec<String>,
    pub column_types: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub rows_affected: Option<u64>,
    pub warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaListing {
    pub connection: String,
    pub schemas: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableListing {
    pub connection: String,
    pub schema: String,
    pub tables: Vec<TableInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnListing {
    pub connection: String,
    pub schema: String,
    pub table: String,
    pub columns: Vec<ColumnInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Executed(QueryRows),
    ConfirmationRequired(PendingConfirmation),
}

/// Orchestrates allow-list, validation, confirmation and execution for every
/// tool call.
pub struct QueryGateway {
    options: SecurityOptions,
    confirmations: Arc<ConfirmationStore>,
    resolver: Arc<dyn ConnectionResolver>,
    executor: Arc<dyn QueryExecutor>,
}

impl QueryGateway {
    pub fn new(
        options: SecurityOptions,
        resolver: Arc<dyn ConnectionResolver>,
        executor: Arc<dyn QueryExecutor>,
    ) -> Self {
        Self {
            options,
            confirmations: Arc::new(ConfirmationStore::default()),
            resolver,
            executor,
        }
    }

    #[must_use]
    pub fn with_confirmation_store(mut self, store: Arc<ConfirmationStore>) -> Self {
        self.confirmations = store;
        self
    }

    #[must_use]
    pub fn options(&self) -> &SecurityOptions {
        &self.options
    }

    #[must_use]
    pub fn confirmations(&self) -> &ConfirmationStore {
        &self.confirmations
    }

    #[must_use]
    pub fn resolver(&self) -> &dyn ConnectionResolver {
        self.resolver.as_ref()
    }

    #[must_use]
    pub fn can_execute(&self, engine: crate::backend::Engine) -> bool {
        self.executor.supports(engine)
    }

    /// Connections the allow-list lets callers see.
    #[must_use]
    pub fn available_connections(&self) -> Vec<String> {
        self.resolver
            .list()
            .into_iter()
            .filter(|name| self.options.is_connection_allowed(name))
            .collect()
    }

    fn resolve_connection_name(&self, requested: Option<&str>) -> QueryGateResult<String> {
        let available = self.available_connections();
        let name = select_connection_name(
            requested,
            self.options.default_connection.as_deref(),
            &available,
        )?;
        if !self.options.is_connection_allowed(&name) {
            warn!(connection = %name, "Connection rejected by allow-list");
            return Err(QueryGateError::ConnectionNotAllowed(name));
        }
        Ok(name)
    }

    /// Validates a statement and either runs it or parks it behind a
    /// confirmation token.
    pub async fn handle_query(
        &self,
        connection: Option<&str>,
        query: &str,
        params: &[Value],
    ) -> QueryGateResult<QueryOutcome> {
        let name = self.resolve_connection_name(connection)?;

        if let Err(reason) = validate(query, &self.options.validation_policy()) {
            warn!(connection = %name, category = reason.category(), "Query blocked: {}", reason);
            return Err(reason.into());
        }
        self.resolve_executable(&name)?;

        let statement = classify(query);
        if self.options.confirmation_enabled() && needs_confirmation(statement, query) {
            let (token, expires_at) =
                self.confirmations
                    .create(query.trim(), &name, params.to_vec());
            info!(connection = %name, token = %token, statement = %statement, "Confirmation required");
            return Ok(QueryOutcome::ConfirmationRequired(PendingConfirmation {
                token,
                query: query.trim().to_string(),
                connection: name,
                params: params.to_vec(),
                expires_at,
            }));
        }

        self.execute(&name, query, params)
            .await
            .map(QueryOutcome::Executed)
    }

    /// Runs a previously parked statement. The token is consumed only after a
    /// successful execution so transient failures can be retried.
    pub async fn handle_confirm(&self, token: &str) -> QueryGateResult<QueryRows> {
        if !self.options.confirmation_enabled() {
            return Err(ConfirmationError::Disabled.into());
        }

        let pending = self.confirmations.peek(token.trim())?;

        if !self.options.is_connection_allowed(&pending.connection) {
            warn!(connection = %pending.connection, token = %pending.token, "Confirmed connection no longer allowed");
            return Err(ConfirmationError::ConnectionNotAllowed(pending.connection).into());
        }

        let pending = self.confirmations.claim(&pending.token)?;
        let claim = ClaimGuard {
            store: &self.confirmations,
            token: &pending.token,
        };
        match self
            .execute(&pending.connection, &pending.query, &pending.params)
            .await
        {
            Ok(rows) => {
                self.confirmations.consume(claim.token);
                info!(connection = %pending.connection, token = %pending.token, "Confirmed statement executed");
                Ok(rows)
            }
            Err(e) => {
                warn!(connection = %pending.connection, token = %pending.token, category = e.category(), "Confirmed statement failed, token kept for retry");
                Err(e)
            }
        }
    }

    #[must_use]
    pub fn list_pending(&self) -> Vec<PendingConfirmation> {
        self.confirmations.list()
    }

    /// Schemas on a connection.
    pub async fn list_schemas(&self, connection: Option<&str>) -> QueryGateResult<SchemaListing> {
        let name = self.resolve_connection_name(connection)?;
        let descriptor = self.resolve_executable(&name)?;
        let schemas = self
            .with_timeout(&name, self.executor.schemas(&descriptor))
            .await?;
        Ok(SchemaListing {
            connection: name,
            schemas,
        })
    }

    /// Tables in `schema`, or in the connection's default schema.
    pub async fn list_tables(
        &self,
        connection: Option<&str>,
        schema: Option<&str>,
    ) -> QueryGateResult<TableListing> {
        let name = self.resolve_connection_name(connection)?;
        let descriptor = self.resolve_executable(&name)?;
        let schema = self.pick_schema(&name, &descriptor, schema).await?;
        let tables = self
            .with_timeout(&name, self.executor.tables(&descriptor, &schema))
            .await?;
        Ok(TableListing {
            connection: name,
            schema,
            tables,
        })
    }

    /// Columns of `table` with primary and foreign key markers.
    pub async fn describe_table(
        &self,
        connection: Option<&str>,
        schema: Option<&str>,
        table: &str,
    ) -> QueryGateResult<ColumnListing> {
        let table = table.trim();
        if table.is_empty() {
            return Err(QueryGateError::InvalidInput("table is required".to_string()));
        }
        let name = self.resolve_connection_name(connection)?;
        let descriptor = self.resolve_executable(&name)?;
        let schema = self.pick_schema(&name, &descriptor, schema).await?;
        let columns = self
            .with_timeout(&name, self.executor.columns(&descriptor, &schema, table))
            .await?;
        Ok(ColumnListing {
            connection: name,
            schema,
            table: table.to_string(),
            columns,
        })
    }

    /// Requested schema, then the connection's configured one, then the
    /// first schema the database reports.
    async fn pick_schema(
        &self,
        name: &str,
        descriptor: &ConnectionDescriptor,
        requested: Option<&str>,
    ) -> QueryGateResult<String> {
        let non_blank = |s: &str| Some(s.trim()).filter(|s| !s.is_empty()).map(str::to_string);
        let explicit = requested
            .and_then(non_blank)
            .or_else(|| descriptor.schema.as_deref().and_then(non_blank));
        if let Some(schema) = explicit {
            return Ok(schema);
        }
        let schemas = self
            .with_timeout(name, self.executor.schemas(descriptor))
            .await?;
        schemas.into_iter().next().ok_or_else(|| {
            ExecutionError::Database("no schemas found in database".to_string()).into()
        })
    }

    fn resolve_executable(&self, name: &str) -> QueryGateResult<ConnectionDescriptor> {
        let descriptor = self.resolver.resolve(name)?;
        if !self.executor.supports(descriptor.engine) {
            warn!(connection = %name, engine = %descriptor.engine, "No executor for engine");
            return Err(ExecutionError::Unsupported(descriptor.engine.to_string()).into());
        }
        Ok(descriptor)
    }

    async fn with_timeout<T, F>(&self, name: &str, call: F) -> QueryGateResult<T>
    where
        F: Future<Output = Result<T, ExecutionError>>,
    {
        let timeout = self.options.query_timeout;
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => {
                let secs = (timeout.as_millis() as u64).div_ceil(1000);
                warn!(connection = %name, timeout_secs = secs, "Query timed out");
                Err(ExecutionError::Timeout(secs).into())
            }
        }
    }

    async fn execute(&self, name: &str, query: &str, params: &[Value]) -> QueryGateResult<QueryRows> {
        let descriptor = self.resolve_executable(name)?;
        let max_rows = self.options.max_rows;

        let result = self
            .with_timeout(
                name,
                self.executor.execute(&descriptor, query, params, max_rows),
            )
            .await?;

        let warning = result.truncated.then(|| {
            format!(
                "Results limited to {} rows. Add a LIMIT clause to narrow the query.",
                max_rows
            )
        });

        Ok(QueryRows {
            connection: name.to_string(),
            columns: result.columns,
            column_types: result.column_types,
            rows: result.rows,
            rows_affected: result.rows_affected,
            warning,
        })
    }
}

/// Statements that wait for a token in confirm mode: anything not read-only
/// by its leading keyword, plus text that hides a write behind a read.
fn needs_confirmation(statement: StatementType, query: &str) -> bool {
    !statement.is_read_only()
        || destructive_keyword(query).is_some()
        || has_multiple_statements(query)
        || (statement == StatementType::With && mentions_write(query))
}

/// Releases a claimed token when confirmation ends without consuming it,
/// including when the caller's future is dropped mid-execution.
struct ClaimGuard<'a> {
    store: &'a ConfirmationStore,
    token: &'a str,
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        // no-op for a consumed token
        self.store.release(self.token);
    }
}
