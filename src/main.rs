//! pve-exporter
//!
//! Prometheus exporter for Proxmox VE with tracing logging.
//! This is the main entry point that resolves the configuration and serves
//! the scrape endpoint.

mod cli;
mod config;
mod handlers;
mod state;
mod telemetry;

use axum::{routing::get, Router};
use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use pve_exporter::CollectorOptions;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::{net::TcpListener, signal};
use tracing::{error, info, level_filters::LevelFilter};

use cli::{Args, LogLevel};
use config::{resolve_config, validate_effective_config, Config};
use handlers::{metrics_handler, pve_handler, root_handler};
use state::{AppState, SharedState};

/// Initializes tracing logging subsystem with configured log level.
fn setup_logging(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let log_level = match args.log_level {
        LogLevel::Off => LevelFilter::OFF,
        LogLevel::Error => LevelFilter::ERROR,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Debug => LevelFilter::DEBUG,
        LogLevel::Trace => LevelFilter::TRACE,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Logging initialized with level: {:?}", args.log_level);
    Ok(())
}

/// Helper function to load and validate configuration.
/// Exits the process with error code 1 if validation fails.
fn load_validated_config(args: &Args) -> Config {
    let config = match resolve_config(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Configuration invalid: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = validate_effective_config(&config) {
        eprintln!("❌ Configuration invalid: {}", e);
        std::process::exit(1);
    }
    config
}

/// Resolves when SIGINT or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.check_config {
        let config = load_validated_config(&args);
        println!("✅ Configuration is valid");
        println!(
            "   {} module(s) from {}: {}",
            config.modules.len(),
            config.source,
            config.modules.keys().cloned().collect::<Vec<_>>().join(", ")
        );
        let tls = if config.tls_enabled() {
            "enabled"
        } else {
            "disabled"
        };
        println!("   TLS: {}", tls);
        return Ok(());
    }

    setup_logging(&args)?;
    let config = load_validated_config(&args);

    let collectors = CollectorOptions::from(&args.collectors);
    let guest_agent = args.guest_agent_options();
    info!(
        "Loaded {} module(s) from {}",
        config.modules.len(),
        config.source
    );
    info!("Collectors: {:?}", collectors);
    info!(
        "Guest agent probes: {} workers, {:?} timeout",
        guest_agent.workers, guest_agent.timeout
    );
    if !collectors.storage {
        info!("Storage content collector disabled (enable with --collector.storage)");
    }

    let state: SharedState = Arc::new(AppState::new(
        config.clone(),
        collectors,
        guest_agent,
        args.metrics_api,
        args.metrics_target,
    )?);

    let bind_ip: IpAddr = config.bind.parse()?;
    let addr = SocketAddr::new(bind_ip, config.port);

    let app = Router::new()
        .route("/", get(root_handler))
        .route("/pve", get(pve_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    match (&config.tls_cert_path, &config.tls_key_path) {
        (Some(cert_path), Some(key_path)) => {
            info!("Loading TLS certificate from: {}", cert_path.display());
            info!("Loading TLS private key from: {}", key_path.display());

            let tls_config = RustlsConfig::from_pem_file(cert_path, key_path)
                .await
                .map_err(|e| {
                    error!("Failed to load TLS configuration: {}", e);
                    e
                })?;

            info!("pve-exporter listening on https://{}", addr);

            let server = axum_server::bind_rustls(addr, tls_config).serve(app.into_make_service());

            tokio::select! {
                result = server => {
                    if let Err(e) = result {
                        error!("Server error: {}", e);
                        return Err(e.into());
                    }
                }
                _ = shutdown_signal() => {
                    info!("Shutdown signal received, exiting...");
                }
            }
        }
        _ => {
            let listener = TcpListener::bind(addr).await?;
            info!("pve-exporter listening on http://{}", addr);

            let server = axum::serve(listener, app);

            tokio::select! {
                result = server => {
                    if let Err(e) = result {
                        error!("Server error: {}", e);
                        return Err(e.into());
                    }
                }
                _ = shutdown_signal() => {
                    info!("Shutdown signal received, exiting...");
                }
            }
        }
    }

    info!("pve-exporter stopped gracefully");
    Ok(())
}
