//! FaaS HTTP server binary.
//!
//! Serves the handler files under a root directory on one port until
//! SIGTERM/SIGINT, then drains in-flight requests and exits.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use faas_server::config::validation::validate_config;
use faas_server::config::{apply_env, load_config, ConfigError, Environment, ServerConfig};
use faas_server::lifecycle::{install_panic_hook, ServerRegistry};
use faas_server::observability::{logging, metrics};
use faas_server::Server;

#[derive(Debug, Parser)]
#[command(name = "faas-server", version, about = "Serve file-based function handlers over HTTP")]
struct Cli {
    /// Directory holding the handler files.
    #[arg(default_value = ".")]
    root: PathBuf,

    /// Server config file (TOML).
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    port: Option<u16>,

    #[arg(long)]
    host: Option<String>,

    /// Runtime mode, overrides `FaasEnv`.
    #[arg(short, long)]
    env: Option<Environment>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => {
            let mut config = ServerConfig::default();
            apply_env(&mut config, |key| std::env::var(key).ok());
            config
        }
    };
    if let Some(port) = cli.port {
        config.listener.port = port;
    }
    if let Some(host) = cli.host {
        config.listener.host = host;
    }
    if let Some(env) = cli.env {
        config.mode.env = env;
    }
    validate_config(&config).map_err(ConfigError::Validation)?;

    let guard = logging::init(&config);

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr);
    }

    let server = Server::builder(cli.root).config(config).log_guard(guard).build();
    install_panic_hook(server.reporter());

    let registry = ServerRegistry::new();
    registry.register(server.clone());

    server.listen().await?;
    server.closed().await;
    registry.unregister(&server);

    Ok(())
}
