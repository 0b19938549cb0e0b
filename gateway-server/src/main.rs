//! # Ultrafast Gateway Binary
//!
//! This is the main binary entry point for the Ultrafast Gateway server.
//! It provides a high-performance AI gateway that unifies multiple LLM providers
//! through a single, enterprise-grade API.
//!
//! ## Usage
//!
//! ```bash
//! # Basic usage with default configuration
//! gateway-server
//!
//! # Custom configuration file
//! gateway-server --config my-config.toml
//!
//! # Custom host and port
//! gateway-server --host 0.0.0.0 --port 8080
//!
//! # Debug logging
//! gateway-server --log-level debug
//! ```
//!
//! ## Command Line Arguments
//!
//! - `--config, -c`: Path to configuration file (default: config.toml)
//! - `--port, -p`: Server port (default: 3000)
//! - `--host`: Server host address (default: 127.0.0.1)
//! - `--log-level`: Logging level (default: info)
//! - `--log-dir`: Directory for billing/audit JSONL log rows (default: none, tracing only)
//!
//! ## Exit Codes
//!
//! - `0`: clean shutdown
//! - `1`: configuration error (bad file, failed schema validation, bad `--host`)
//! - `2`: fatal runtime error at startup (server construction failure, bind failure)
//!
//! ## Configuration
//!
//! The gateway uses TOML configuration files. See the documentation for
//! detailed configuration options and examples.
//!
//! ## Environment Variables
//!
//! The following environment variables can be used to override configuration:
//!
//! - `GATEWAY_CONFIG_PATH`: Path to configuration file
//! - `GATEWAY_HOST`: Server host address
//! - `GATEWAY_PORT`: Server port
//! - `RUST_LOG`: Logging level
//!
//! ## Health Check
//!
//! Once started, the server provides a health check endpoint at `/health`
//! that returns the service status and uptime information.

use clap::Parser;
use std::net::SocketAddr;
use gateway_server::{config::Config, server::create_server};

/// Command line arguments for the Ultrafast Gateway server.
///
/// This struct defines all the command line options that can be passed
/// to the gateway binary, with sensible defaults for production use.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file.
    ///
    /// The configuration file should be in TOML format and contain
    /// server settings, provider configurations, and authentication
    /// parameters.
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Port number for the HTTP server.
    ///
    /// The gateway will listen for incoming requests on this port.
    /// Make sure the port is available and not blocked by firewall.
    #[arg(short, long, default_value_t = 3000)]
    port: u16,

    /// Host address to bind the server to.
    ///
    /// Use "0.0.0.0" to bind to all interfaces, or "127.0.0.1"
    /// for localhost only. For production, consider using a reverse
    /// proxy like nginx.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Logging level for the application.
    ///
    /// Available levels: trace, debug, info, warn, error
    /// Use "debug" for development and "info" for production.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Directory to write billing/audit JSONL log rows to.
    ///
    /// When unset, audit rows go through `tracing` only. Overrides
    /// `logging.request_log_dir` in the config file and `GATEWAY_LOG_DIR`.
    #[arg(long)]
    log_dir: Option<String>,
}

/// Main entry point for the Ultrafast Gateway server.
///
/// This function:
/// 1. Parses command line arguments
/// 2. Initializes logging and tracing
/// 3. Loads and validates configuration
/// 4. Creates and starts the HTTP server
/// 5. Handles graceful shutdown
///
/// Exit codes: 0 on a clean shutdown, 1 on a configuration error, 2 on a
/// fatal runtime error encountered while starting up (bind failure, server
/// construction failure). Matches the CLI contract other deployments of
/// this gateway rely on for process-supervisor restart policies.
#[tokio::main]
async fn main() -> std::process::ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(&args.log_level)
        .init();

    let mut config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, path = %args.config, "failed to load configuration");
            return std::process::ExitCode::from(1);
        }
    };

    if let Some(log_dir) = args.log_dir.clone() {
        config.logging.request_log_dir = Some(log_dir);
    }

    if let Err(err) = config.validate() {
        tracing::error!(error = %err, "configuration failed validation");
        return std::process::ExitCode::from(1);
    }

    let (app, distributor) = match create_server(config).await {
        Ok(parts) => parts,
        Err(err) => {
            tracing::error!(error = %err, "failed to construct the gateway server");
            return std::process::ExitCode::from(2);
        }
    };

    let addr = match args.host.parse() {
        Ok(ip) => SocketAddr::new(ip, args.port),
        Err(err) => {
            tracing::error!(error = %err, host = %args.host, "invalid --host address");
            return std::process::ExitCode::from(1);
        }
    };
    tracing::info!("Starting Ultrafast Gateway server on {}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, %addr, "failed to bind listener");
            return std::process::ExitCode::from(2);
        }
    };

    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Drain the log batcher's remaining buffer before exiting so a
    // SIGTERM/ctrl-c shutdown doesn't silently drop the last few audit rows.
    distributor.shutdown().await;

    if let Err(err) = serve_result {
        tracing::error!(error = %err, "gateway server exited with an error");
        return std::process::ExitCode::from(2);
    }

    std::process::ExitCode::SUCCESS
}

/// Resolves once a ctrl-c or (on Unix) SIGTERM is received, so the server
/// stops accepting new connections and `main` can drain the log batcher.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received, draining in-flight requests");
}
