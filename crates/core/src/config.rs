use crate::gateway::SecurityOptions;
use crate::middleware::RateLimitConfig;
use anyhow::Context;
use querygate_shared::SecurityLevel;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub read_only: bool,
    /// Route write statements through a confirmation token instead of
    /// running them directly.
    pub confirm_writes: bool,
    pub security_level: SecurityLevel,
    pub query_timeout_secs: u64,
    pub max_rows: usize,
    pub allow_multi_statement: bool,
    pub allow_drop: bool,
    pub default_connection: Option<String>,
    /// Empty means every resolvable connection is allowed.
    pub allowed_connections: Vec<String>,
    pub rate_limit: RateLimitConfig,
    pub bind_address: String,
    pub port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            read_only: false,
            confirm_writes: true,
            security_level: SecurityLevel::Standard,
            query_timeout_secs: 30,
            max_rows: 1000,
            allow_multi_statement: false,
            allow_drop: false,
            default_connection: None,
            allowed_connections: Vec::new(),
            rate_limit: RateLimitConfig {
                enabled: false,
                qps: 10,
                daily: 1000,
                bypass_token: None,
            },
            bind_address: "127.0.0.1".to_string(),
            port: 3100,
        }
    }
}

fn env_bool(name: &str, default: bool) -> anyhow::Result<bool> {
    match env::var(name) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" | "" => Ok(false),
            other => anyhow::bail!("{} must be a boolean (got '{}')", name, other),
        },
        Err(_) => Ok(default),
    }
}

fn env_opt(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[must_use]
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let read_only = env_bool("QUERYGATE_READ_ONLY", defaults.read_only)?;
        let confirm_writes = env_bool("QUERYGATE_CONFIRM_WRITES", defaults.confirm_writes)?;

        let security_level = match env_opt("QUERYGATE_SECURITY_LEVEL") {
            Some(raw) => raw
                .parse::<SecurityLevel>()
                .map_err(|e| anyhow::anyhow!("Invalid QUERYGATE_SECURITY_LEVEL: {}", e))?,
            None => defaults.security_level,
        };

        let query_timeout_secs = env::var("QUERYGATE_QUERY_TIMEOUT_SECS")
            .unwrap_or_else(|_| defaults.query_timeout_secs.to_string())
            .parse::<u64>()
            .context("Failed to parse QUERYGATE_QUERY_TIMEOUT_SECS")?;

        if query_timeout_secs == 0 || query_timeout_secs > 300 {
            anyhow::bail!(
                "QUERYGATE_QUERY_TIMEOUT_SECS must be between 1 and 300 (got {})",
                query_timeout_secs
            );
        }

        let max_rows = env::var("QUERYGATE_MAX_ROWS")
            .unwrap_or_else(|_| defaults.max_rows.to_string())
            .parse::<usize>()
            .context("Failed to parse QUERYGATE_MAX_ROWS")?;

        if max_rows == 0 {
            anyhow::bail!("QUERYGATE_MAX_ROWS must be greater than 0");
        }

        let allow_multi_statement = env_bool(
            "QUERYGATE_ALLOW_MULTI_STATEMENT",
            defaults.allow_multi_statement,
        )?;
        let allow_drop = env_bool("QUERYGATE_ALLOW_DROP", defaults.allow_drop)?;
        let default_connection = env_opt("QUERYGATE_DEFAULT_CONNECTION");
        let allowed_connections = env_opt("QUERYGATE_ALLOWED_CONNECTIONS")
            .map(|raw| parse_list(&raw))
            .unwrap_or_default();

        let rate_limit = RateLimitConfig {
            enabled: env_bool("QUERYGATE_RATE_LIMIT_ENABLED", defaults.rate_limit.enabled)?,
            qps: env::var("QUERYGATE_RATE_LIMIT_QPS")
                .unwrap_or_else(|_| defaults.rate_limit.qps.to_string())
                .parse::<u32>()
                .context("Failed to parse QUERYGATE_RATE_LIMIT_QPS")?,
            daily: env::var("QUERYGATE_RATE_LIMIT_DAILY")
                .unwrap_or_else(|_| defaults.rate_limit.daily.to_string())
                .parse::<u32>()
                .context("Failed to parse QUERYGATE_RATE_LIMIT_DAILY")?,
            bypass_token: env_opt("QUERYGATE_RATE_LIMIT_BYPASS_TOKEN"),
        };

        if let Some(ref token) = rate_limit.bypass_token {
            if token.len() < 16 {
                tracing::warn!(
                    "QUERYGATE_RATE_LIMIT_BYPASS_TOKEN is shorter than recommended minimum (16 chars)"
                );
            }
        }

        let port_str = env::var("QUERYGATE_PORT").unwrap_or_else(|_| defaults.port.to_string());
        let port = port_str.parse::<u16>().map_err(|_| {
            anyhow::anyhow!(
                "Invalid QUERYGATE_PORT value '{}': must be an integer between 1 and 65535",
                port_str
            )
        })?;

        if port == 0 {
            anyhow::bail!("Invalid QUERYGATE_PORT value '0': must be between 1 and 65535");
        }

        // Loopback by default; 0.0.0.0 must be set explicitly.
        let bind_address = match env::var("QUERYGATE_BIND_ADDRESS") {
            Ok(addr) => {
                addr.parse::<std::net::IpAddr>().with_context(|| {
                    format!(
                        "Invalid QUERYGATE_BIND_ADDRESS '{}': must be a valid IP address (e.g., '127.0.0.1' or '::1')",
                        addr
                    )
                })?;
                addr
            }
            Err(_) => defaults.bind_address,
        };

        if read_only && confirm_writes {
            tracing::debug!("Read-only mode active: write confirmation has no effect");
        }

        Ok(Self {
            read_only,
            confirm_writes,
            security_level,
            query_timeout_secs,
            max_rows,
            allow_multi_statement,
            allow_drop,
            default_connection,
            allowed_connections,
            rate_limit,
            bind_address,
            port,
        })
    }

    #[must_use]
    pub fn security_options(&self) -> SecurityOptions {
        SecurityOptions {
            read_only: self.read_only,
            confirm_writes: self.confirm_writes,
            security_level: self.security_level,
            query_timeout: Duration::from_secs(self.query_timeout_secs),
            max_rows: self.max_rows,
            allow_multi_statement: self.allow_multi_statement,
            allow_drop: self.allow_drop,
            default_connection: self.default_connection.clone(),
            allowed_connections: self.allowed_connections.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Env vars are process-global; serialise tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct EnvGuard(&'static str);

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            std::env::remove_var(self.0);
        }
    }

    fn set(name: &'static str, value: &str) -> EnvGuard {
        std::env::set_var(name, value);
        EnvGuard(name)
    }

    #[test]
    fn test_defaults() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let config = AppConfig::load().unwrap();
        assert!(!config.read_only);
        assert!(config.confirm_writes);
        assert_eq!(config.security_level, SecurityLevel::Standard);
        assert_eq!(config.query_timeout_secs, 30);
        assert_eq!(config.max_rows, 1000);
        assert_eq!(config.rate_limit.qps, 10);
        assert_eq!(config.rate_limit.daily, 1000);
        assert_eq!(config.port, 3100);
        assert_eq!(config.bind_address, "127.0.0.1");
    }

    #[test]
    fn test_allowed_connections_parsing() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let _g = set("QUERYGATE_ALLOWED_CONNECTIONS", " prod , staging ,, ");

        let config = AppConfig::load().unwrap();
        assert_eq!(config.allowed_connections, vec!["prod", "staging"]);
    }

    #[test]
    fn test_security_level_and_flags() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let _a = set("QUERYGATE_SECURITY_LEVEL", "Strict");
        let _b = set("QUERYGATE_READ_ONLY", "yes");
        let _c = set("QUERYGATE_RATE_LIMIT_DAILY", "0");

        let config = AppConfig::load().unwrap();
        assert_eq!(config.security_level, SecurityLevel::Strict);
        assert!(config.read_only);
        assert_eq!(config.rate_limit.daily, 0);
    }

    #[test]
    fn test_rejects_out_of_range_timeout() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let _g = set("QUERYGATE_QUERY_TIMEOUT_SECS", "301");
        let err = AppConfig::load().unwrap_err();
        assert!(err.to_string().contains("between 1 and 300"));
    }

    #[test]
    fn test_rejects_bad_values() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        {
            let _g = set("QUERYGATE_SECURITY_LEVEL", "paranoid");
            assert!(AppConfig::load().is_err());
        }
        {
            let _g = set("QUERYGATE_CONFIRM_WRITES", "maybe");
            assert!(AppConfig::load().is_err());
        }
        {
            let _g = set("QUERYGATE_BIND_ADDRESS", "localhost");
            assert!(AppConfig::load().is_err());
        }
        {
            let _g = set("QUERYGATE_MAX_ROWS", "0");
            assert!(AppConfig::load().is_err());
        }
    }

    #[test]
    fn test_security_options_mapping() {
        let config = AppConfig {
            allow_drop: true,
            query_timeout_secs: 7,
            ..AppConfig::default()
        };
        let opts = config.security_options();
        assert!(opts.allow_drop);
        assert_eq!(opts.query_timeout, Duration::from_secs(7));
    }
}
