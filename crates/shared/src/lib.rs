use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod error;

pub use error::{
    ConfirmationError, ExecutionError, QueryGateError, QueryGateResult, RateLimitExceeded,
    ValidationError,
};

/// Package version reported by the MCP `initialize` handshake.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Coarse statement tag derived from the leading keyword of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatementType {
    Select,
    Insert,
    Update,
    Delete,
    Drop,
    Create,
    Alter,
    Truncate,
    Show,
    Describe,
    Explain,
    With,
    Unknown,
}

impl StatementType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Select => "SELECT",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Drop => "DROP",
            Self::Create => "CREATE",
            Self::Alter => "ALTER",
            Self::Truncate => "TRUNCATE",
            Self::Show => "SHOW",
            Self::Describe => "DESCRIBE",
            Self::Explain => "EXPLAIN",
            Self::With => "WITH",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Statements that never modify data.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            Self::Select | Self::Show | Self::Describe | Self::Explain | Self::With
        )
    }

    /// Statements that modify data or schema.
    #[must_use]
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::Insert
                | Self::Update
                | Self::Delete
                | Self::Drop
                | Self::Create
                | Self::Alter
                | Self::Truncate
        )
    }
}

impl fmt::Display for StatementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strictness tier for statement validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    /// Blocks writes and a denylist of dangerous engine functions.
    Strict,
    /// Blocks writes.
    #[default]
    Standard,
    /// Permits writes; blocks only unqualified DELETE.
    Minimal,
}

impl SecurityLevel {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Standard => "standard",
            Self::Minimal => "minimal",
        }
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "standard" => Ok(Self::Standard),
            "minimal" => Ok(Self::Minimal),
            other => Err(format!(
                "unknown security level '{}': expected strict, standard or minimal",
                other
            )),
        }
    }
}

/// Which rate-limit window produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitType {
    Qps,
    Daily,
}

impl LimitType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Qps => "qps",
            Self::Daily => "daily",
        }
    }
}

impl fmt::Display for LimitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_type_partitions() {
        let all = [
            StatementType::Select,
            StatementType::Insert,
            StatementType::Update,
            StatementType::Delete,
            StatementType::Drop,
            StatementType::Create,
            StatementType::Alter,
            StatementType::Truncate,
            StatementType::Show,
            StatementType::Describe,
            StatementType::Explain,
            StatementType::With,
            StatementType::Unknown,
        ];
        for ty in all {
            assert!(
                !(ty.is_read_only() && ty.is_write()),
                "{} cannot be both read-only and write",
                ty
            );
        }
        assert!(!StatementType::Unknown.is_read_only());
        assert!(!StatementType::Unknown.is_write());
    }

    #[test]
    fn test_security_level_parsing() {
        assert_eq!("STRICT".parse::<SecurityLevel>(), Ok(SecurityLevel::Strict));
        assert_eq!(" minimal ".parse::<SecurityLevel>(), Ok(SecurityLevel::Minimal));
        assert!("paranoid".parse::<SecurityLevel>().is_err());
        assert_eq!(SecurityLevel::default(), SecurityLevel::Standard);
    }

    #[test]
    fn test_serde_tags() {
        assert_eq!(
            serde_json::to_string(&StatementType::Describe).unwrap(),
            "\"DESCRIBE\""
        );
        assert_eq!(serde_json::to_string(&LimitType::Qps).unwrap(), "\"qps\"");
        assert_eq!(
            serde_json::to_string(&SecurityLevel::Strict).unwrap(),
            "\"strict\""
        );
    }
}
