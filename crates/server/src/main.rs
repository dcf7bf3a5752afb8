use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

mod api;
mod config;
mod middleware;

use config::{AppState, ServerConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Transport {
    /// JSON-RPC over HTTP POST at /mcp
    Http,
    /// Newline-delimited JSON-RPC on stdin/stdout
    Stdio,
}

#[derive(Parser, Debug)]
#[command(name = "kgserve")]
#[command(about = "Tool server for echo, key/value memory and knowledge graph operations", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "kgserve.toml")]
    config: PathBuf,

    /// Data directory for local storage
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Transport to serve tools over
    #[arg(short, long, value_enum, default_value_t = Transport::Http)]
    transport: Transport,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs always go to stderr so stdout stays clean for the stdio transport
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kgserve=info,tower_http=debug".into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("Starting kgserve");
    tracing::info!("Data directory: {}", args.data_dir.display());

    // Load configuration
    let config = ServerConfig::load(&args.config, args.data_dir)?;
    let state = AppState::new(&config).await?;

    match args.transport {
        Transport::Stdio => state.mcp.serve_stdio().await?,
        Transport::Http => {
            let addr = format!("{}:{}", args.host, args.port);
            tracing::info!("Starting API server on {}", addr);
            api::serve(&addr, state).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["kgserve"]);
        assert_eq!(args.port, 8080);
        assert_eq!(args.host, "127.0.0.1");
        assert_eq!(args.transport, Transport::Http);
    }

    #[test]
    fn test_args_stdio() {
        let args = Args::parse_from(["kgserve", "--transport", "stdio", "-c", "other.toml"]);
        assert_eq!(args.transport, Transport::Stdio);
        assert_eq!(args.config, PathBuf::from("other.toml"));
    }
}
