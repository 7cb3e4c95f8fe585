use crate::config::{parse_list, AppConfig};
use clap::{Parser, Subcommand, ValueEnum};
use querygate_shared::SecurityLevel;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "querygate",
    version = env!("CARGO_PKG_VERSION"),
    about = "querygate - SQL security and confirmation gateway for MCP clients"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the MCP tools (stdio by default)
    Serve(ServeArgs),
    /// Print version information
    Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Transport {
    /// Line-delimited JSON-RPC on stdin/stdout
    #[default]
    Stdio,
    /// JSON-RPC over `POST /mcp`
    Http,
}

#[derive(Debug, Clone, Default, clap::Args)]
pub struct ServeArgs {
    #[arg(long, value_enum, default_value_t = Transport::Stdio)]
    pub transport: Transport,
    /// Reject every statement that is not read-only
    #[arg(long, conflicts_with = "allow_write")]
    pub read_only: bool,
    /// Execute writes directly without a confirmation step
    #[arg(long)]
    pub allow_write: bool,
    /// Admit DROP and TRUNCATE statements
    #[arg(long)]
    pub allow_drop: bool,
    /// strict, standard or minimal
    #[arg(long)]
    pub security_level: Option<SecurityLevel>,
    /// Connection used when a tool call names none
    #[arg(long = "connection")]
    pub default_connection: Option<String>,
    /// Comma-separated allow-list of connection names
    #[arg(long)]
    pub allowed_connections: Option<String>,
    /// HTTP port (http transport only)
    #[arg(long)]
    pub port: Option<u16>,
}

impl ServeArgs {
    /// Flags win over environment values.
    pub fn apply(&self, config: &mut AppConfig) {
        if self.read_only {
            config.read_only = true;
        }
        if self.allow_write {
            config.read_only = false;
            config.confirm_writes = false;
        }
        if self.allow_drop {
            config.allow_drop = true;
        }
        if let Some(level) = self.security_level {
            config.security_level = level;
        }
        if let Some(ref name) = self.default_connection {
            config.default_connection = Some(name.trim().to_string()).filter(|n| !n.is_empty());
        }
        if let Some(ref raw) = self.allowed_connections {
            config.allowed_connections = parse_list(raw);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
    }
}

pub async fn dispatch(cmd: Commands) -> anyhow::Result<()> {
    match cmd {
        Commands::Serve(args) => {
            let mut config = AppConfig::load()?;
            args.apply(&mut config);
            if config.port == 0 {
                anyhow::bail!("--port must be between 1 and 65535");
            }
            info!(transport = ?args.transport, "Starting querygate");
            crate::run_server(config, args.transport).await
        }
        Commands::Version => {
            println!("querygate v{}", env!("CARGO_PKG_VERSION"));
            println!("shared vocabulary v{}", querygate_shared::SDK_VERSION);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> ServeArgs {
        let cli = Cli::try_parse_from(std::iter::once("querygate").chain(args.iter().copied()))
            .unwrap();
        match cli.command {
            Some(Commands::Serve(args)) => args,
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn test_serve_defaults() {
        let args = parse(&["serve"]);
        assert_eq!(args.transport, Transport::Stdio);
        let mut config = AppConfig::default();
        args.apply(&mut config);
        assert!(config.confirm_writes);
        assert!(!config.read_only);
    }

    #[test]
    fn test_allow_write_disables_confirmation() {
        let args = parse(&["serve", "--allow-write", "--transport", "http"]);
        assert_eq!(args.transport, Transport::Http);
        let mut config = AppConfig {
            read_only: true,
            ..AppConfig::default()
        };
        args.apply(&mut config);
        assert!(!config.read_only);
        assert!(!config.confirm_writes);
    }

    #[test]
    fn test_overrides() {
        let args = parse(&[
            "serve",
            "--read-only",
            "--security-level",
            "strict",
            "--connection",
            "prod",
            "--allowed-connections",
            "prod, staging",
            "--allow-drop",
        ]);
        let mut config = AppConfig::default();
        args.apply(&mut config);
        assert!(config.read_only);
        assert!(config.allow_drop);
        assert_eq!(config.security_level, SecurityLevel::Strict);
        assert_eq!(config.default_connection.as_deref(), Some("prod"));
        assert_eq!(config.allowed_connections, vec!["prod", "staging"]);
    }

    #[test]
    fn test_read_only_conflicts_with_allow_write() {
        let result = Cli::try_parse_from(["querygate", "serve", "--read-only", "--allow-write"]);
        assert!(result.is_err());
    }
}
