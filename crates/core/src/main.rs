use clap::Parser;
use querygate_core::cli::{Commands, ServeArgs};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if dotenvy::dotenv().is_err() {
        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                let _ = dotenvy::from_path(dir.join(".env"));
            }
        }
    }

    // stdout carries the JSON-RPC stream on the stdio transport
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = querygate_core::cli::Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Commands::Serve(ServeArgs::default()));
    querygate_core::cli::dispatch(command).await
}
