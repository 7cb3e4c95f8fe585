use super::classify;
use querygate_shared::{SecurityLevel, StatementType, ValidationError};

/// Engine functions and clauses refused at `Strict`: file I/O, backend
/// termination, bulk copy and remote execution.
pub const DANGEROUS_FUNCTIONS: &[&str] = &[
    "PG_TERMINATE_BACKEND",
    "PG_READ_FILE",
    "PG_WRITE_FILE",
    "LO_IMPORT",
    "LO_EXPORT",
    "LOAD_FILE",
    "INTO OUTFILE",
    "INTO DUMPFILE",
    "XP_CMDSHELL",
    "OPENROWSET",
    "OPENDATASOURCE",
    "LOAD_EXTENSION",
    "WRITEFILE",
    "READFILE",
    "URL(",
    "FILE(",
    "REMOTE(",
    "UTL_FILE",
    "UTL_HTTP",
    "COPY",
];

/// Per-call policy knobs for [`validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ValidationPolicy {
    pub allow_write: bool,
    pub level: SecurityLevel,
    pub allow_multi_statement: bool,
    pub allow_destructive: bool,
}

impl ValidationPolicy {
    #[must_use]
    pub fn read_only(level: SecurityLevel) -> Self {
        Self {
            level,
            ..Self::default()
        }
    }
}

/// First of `DROP `/`TRUNCATE ` found anywhere in the text, in any case.
#[must_use]
pub fn destructive_keyword(query: &str) -> Option<&'static str> {
    let upper = query.to_ascii_uppercase();
    ["DROP", "TRUNCATE"]
        .into_iter()
        .find(|keyword| upper.contains(&format!("{} ", keyword)))
}

/// A `;` anywhere but as the final character.
#[must_use]
pub fn has_multiple_statements(query: &str) -> bool {
    let query = query.trim();
    query.strip_suffix(';').unwrap_or(query).contains(';')
}

/// Applies policy to a statement. The first failing check wins; the order is
/// fixed so the reported reason is predictable.
pub fn validate(query: &str, policy: &ValidationPolicy) -> Result<(), ValidationError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(ValidationError::Empty);
    }

    let upper = query.to_ascii_uppercase();

    // Scans the whole text, not just the leading keyword: catches DROP
    // smuggled behind a semicolon even when multi-statement is allowed.
    if !policy.allow_destructive {
        if let Some(keyword) = destructive_keyword(query) {
            return Err(ValidationError::DestructiveOperation(format!(
                "{} detected (use --confirm-writes or --allow-drop to enable)",
                keyword
            )));
        }
    }

    if query.contains("--") || query.contains("/*") {
        return Err(ValidationError::CommentDetected);
    }

    if !policy.allow_multi_statement && has_multiple_statements(query) {
        return Err(ValidationError::MultipleStatements);
    }

    if policy.level == SecurityLevel::Strict {
        if let Some(function) = DANGEROUS_FUNCTIONS.iter().find(|f| upper.contains(**f)) {
            return Err(ValidationError::DangerousFunction((*function).to_string()));
        }
    }

    let statement = classify(query);

    if policy.allow_write {
        if policy.level == SecurityLevel::Minimal
            && statement == StatementType::Delete
            && !upper.split_ascii_whitespace().any(|word| word == "WHERE")
        {
            return Err(ValidationError::DestructiveOperation(
                "DELETE without WHERE clause".to_string(),
            ));
        }
        return Ok(());
    }

    if statement.is_read_only() {
        return Ok(());
    }
    if statement == StatementType::Unknown && policy.level == SecurityLevel::Minimal {
        return Ok(());
    }
    Err(ValidationError::WriteNotAllowed(statement))
}
