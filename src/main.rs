//! tsgate — caching reverse-proxy gateway for time-series databases.
//!
//! Startup sequence: parse flags, initialize logging, load and
//! validate configuration, build the load balancer runtime (backends,
//! health targets, pool, mechanism), then serve. A config watcher
//! rebuilds the runtime wholesale on file change; a rejected config
//! leaves the running generation untouched.

use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use clap::Parser;
use tokio::net::TcpListener;

use tsgate::alb::{build_runtime, MechanismRegistry};
use tsgate::config::{load_config, ConfigWatcher, GatewayConfig};
use tsgate::http::HttpServer;
use tsgate::observability::{logging, metrics};
use tsgate::timeseries::ProviderRegistry;

#[derive(Parser, Debug)]
#[command(name = "tsgate", version, about = "Load-balancing gateway for time-series databases")]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when
    /// omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    logging::init_logging(&config.observability.log_level);
    tracing::info!("tsgate v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        mechanism = %config.alb.mechanism,
        backends = config.backends.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let registry = Arc::new(MechanismRegistry::new());
    let providers = Arc::new(ProviderRegistry::new());
    let runtime = build_runtime(&config, &registry, &providers, None).await?;
    let runtime = Arc::new(ArcSwap::from_pointee(runtime));

    // hot reload: a validated new config replaces the whole runtime;
    // the old generation is stopped only after the swap
    let _watch_handle = match &args.config {
        Some(path) => {
            let (watcher, mut updates) = ConfigWatcher::new(path);
            let handle = watcher.run()?;
            let runtime = runtime.clone();
            let registry = registry.clone();
            let providers = providers.clone();
            tokio::spawn(async move {
                while let Some(new_config) = updates.recv().await {
                    match build_runtime(&new_config, &registry, &providers, None).await {
                        Ok(new_runtime) => {
                            let old = runtime.swap(Arc::new(new_runtime));
                            old.stop().await;
                            metrics::record_config_reload(true);
                            tracing::info!("Configuration reload applied");
                        }
                        Err(e) => {
                            metrics::record_config_reload(false);
                            tracing::error!(
                                error = %e,
                                "Rejected new configuration, keeping current runtime"
                            );
                        }
                    }
                }
            });
            Some(handle)
        }
        None => None,
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let server = HttpServer::new(&config.listener, runtime.clone());
    server.run(listener).await?;

    runtime.load().stop().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
