//! JavaBridge Server - standalone TCP server for PHP bridge connections.
//!
//! Serves the built-in native classes. Embedders with their own classes
//! build a `Registry` and start `javabridge_core::BridgeServer` directly.

use anyhow::{Context, Result};
use clap::Parser;
use javabridge_core::{BridgeServer, Registry, ServerConfig};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "javabridge-server")]
#[command(about = "Bridge server for PHP clients")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to
    #[arg(long)]
    host: Option<String>,

    /// Maximum number of pooled worker threads
    #[arg(long)]
    pool_size: Option<usize>,

    /// JSON configuration file; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

impl Args {
    fn server_config(&self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ServerConfig::default(),
        };
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(pool_size) = self.pool_size {
            config.pool_size = pool_size;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting JavaBridge server");
    let config = args.server_config()?;

    let registry = Registry::with_builtins();
    let mut server = BridgeServer::start(registry, &config).await?;

    // Print port for the launching process to read (intentional stdout)
    println!("BRIDGE_PORT={}", server.port);

    info!("Bridge server running on {}", server.addr());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");
    server.shutdown();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_flags_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"port": 9267, "pool_size": 4}}"#).unwrap();

        let args = Args::parse_from([
            "javabridge-server",
            "--config",
            file.path().to_str().unwrap(),
            "--pool-size",
            "8",
        ]);
        let config = args.server_config().unwrap();
        assert_eq!(config.port, 9267);
        assert_eq!(config.pool_size, 8);
    }

    #[test]
    fn test_defaults_without_file() {
        let args = Args::parse_from(["javabridge-server"]);
        let config = args.server_config().unwrap();
        assert_eq!(config, ServerConfig::default());
    }
}
