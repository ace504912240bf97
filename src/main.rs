mod config;
mod http;
mod sandbox;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::sandbox::{Executor, FetchProxy};

fn print_help() {
    println!(
        "\
jsbox v{}

A JavaScript playground server. Runs untrusted snippets in per-request
V8 isolates and returns captured console output.

USAGE:
    jsbox [OPTIONS] [CONFIG_PATH]

ARGUMENTS:
    CONFIG_PATH    Path to TOML configuration file [default: config/jsbox.toml]
                   Missing file falls back to built-in defaults.

OPTIONS:
    -h, --help       Print this help message and exit
    -V, --version    Print version and exit

ENVIRONMENT VARIABLES:
    Variables are referenced in the config file via ${{VAR_NAME}} syntax.

    RUST_LOG         Log level filter for tracing
                     (e.g. debug, jsbox=debug,warn)

EXAMPLES:
    jsbox                         # uses config/jsbox.toml
    jsbox /etc/jsbox/jsbox.toml   # custom config path
    RUST_LOG=debug jsbox          # with debug logging",
        env!("CARGO_PKG_VERSION"),
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    // Handle --help / --version before anything else
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("jsbox v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {}
        }
    }

    // Initialize logging (RUST_LOG=debug for debug mode)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("jsbox=info")),
        )
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/jsbox.toml".to_string());

    let config = if Path::new(&config_path).exists() {
        info!("Loading configuration from {config_path}");
        Config::load(&config_path)?
    } else {
        warn!("Config file {config_path} not found, using defaults");
        Config::default()
    };

    info!(
        "Execution limits: {} MB heap, {} ms sync timeout, {} ms async wait, {} chars max",
        config.execution.memory_limit_mb,
        config.execution.timeout_ms,
        config.execution.async_wait_ms,
        config.execution.max_code_length,
    );
    if config.fetch.enabled {
        info!(
            "Fetch: enabled, {} ms per call, allowed domains: {}",
            config.fetch.timeout_ms,
            if config.fetch.allow_all_domains {
                "all".to_string()
            } else {
                config.fetch.allowed_domains.join(", ")
            }
        );
    } else {
        info!("Fetch: disabled");
    }
    info!("Isolation strength: {:?}", config.execution.strength);

    let fetch = Arc::new(FetchProxy::new(config.fetch.clone()));
    let executor = Arc::new(Executor::new(config.execution.clone(), fetch));
    let app = http::router(executor, config.server.request_limit_bytes);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    info!("Listening on http://{addr}");
    info!("API endpoints:");
    info!("  POST /api/execute  - run a snippet");
    info!("  GET  /api/examples - example catalog");
    info!("  GET  /api/health   - health check");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received, exiting");
        })
        .await
        .context("server error")?;

    Ok(())
}
