//! Upload Gate - session and API key gated file upload service
//!
//! Accounts log in through signed session cookies; upload clients present
//! API keys. Every request passes the rate limiter, session resolution,
//! CSRF verification and the access guards of its route group.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use config::{LogFormat, LogTarget};
use upload_gate::{api, config, db, middleware, services, AppConfig, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();

    // Check for --help flag
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        print_help();
        return Ok(());
    }

    // Check for --version flag
    if args.iter().any(|arg| arg == "--version" || arg == "-V") {
        println!("Upload Gate {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Check for --init-config flag
    if let Some(pos) = args.iter().position(|arg| arg == "--init-config") {
        let path = args
            .get(pos + 1)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("config.yaml"));
        if path.exists() {
            anyhow::bail!("Refusing to overwrite existing file: {:?}", path);
        }
        AppConfig::create_default_config(&path)
            .with_context(|| format!("Failed to write configuration to {:?}", path))?;
        println!("Wrote default configuration to {:?}", path);
        println!("Change session.secret and api_keys.secret before starting the server.");
        return Ok(());
    }

    // Load configuration first (before logging, so we know log format)
    let config = AppConfig::load().context("Failed to load configuration")?;

    // The guard must be kept alive for the duration of the program
    // to ensure log messages are flushed to files
    let _log_guard = init_logging(&config);

    info!(environment = ?config.environment, "Upload Gate starting up");
    if !config.csrf_active() {
        info!("CSRF verification is disabled");
    }

    ensure_data_directory(&config)?;

    info!("Initializing stores");
    let stores = db::init_stores(&config.database)
        .await
        .context("Failed to initialize stores")?;

    let state = AppState::new(config.clone(), stores);

    // Background sweeps
    middleware::spawn_rate_limit_cleanup(state.rate_limits.clone());
    if config.session.purge_interval_secs > 0 {
        services::session::spawn_session_purge(
            state.auth.sessions.clone(),
            Duration::from_secs(config.session.purge_interval_secs),
        );
    }

    let app = api::router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address configuration")?;

    info!("Starting HTTP server on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("HTTP server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Initialize the logging/tracing infrastructure
fn init_logging(config: &AppConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{prelude::*, EnvFilter};

    let log_config = &config.logging;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&log_config.level));

    let (file_writer, guard) = match log_config.target {
        LogTarget::Console => (None, None),
        LogTarget::File | LogTarget::Both => {
            let (writer, guard) = create_file_writer(log_config);
            (Some(writer), Some(guard))
        }
    };

    let console = matches!(log_config.target, LogTarget::Console | LogTarget::Both)
        .then(|| format_layer(&log_config.format, std::io::stdout));
    let file = file_writer.map(|writer| format_layer(&log_config.format, writer));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(file)
        .init();

    guard
}

/// One formatting layer in the configured format
fn format_layer<S, W>(
    format: &LogFormat,
    writer: W,
) -> Box<dyn tracing_subscriber::Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    W: for<'w> tracing_subscriber::fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    use tracing_subscriber::{fmt, Layer};

    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_writer(writer)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .with_writer(writer)
            .boxed(),
    }
}

/// Create a file writer with optional daily rotation
fn create_file_writer(
    log_config: &config::LoggingConfig,
) -> (
    tracing_appender::non_blocking::NonBlocking,
    tracing_appender::non_blocking::WorkerGuard,
) {
    if let Err(e) = std::fs::create_dir_all(&log_config.log_dir) {
        eprintln!(
            "Warning: Failed to create log directory {:?}: {}",
            log_config.log_dir, e
        );
    }

    let file_appender = if log_config.daily_rotation {
        tracing_appender::rolling::daily(&log_config.log_dir, &log_config.log_prefix)
    } else {
        tracing_appender::rolling::never(&log_config.log_dir, &log_config.log_prefix)
    };

    tracing_appender::non_blocking(file_appender)
}

/// Ensure the data and upload directories exist
fn ensure_data_directory(config: &AppConfig) -> Result<()> {
    // Extract directory from database URL
    if let Some(path) = config.database.url.strip_prefix("sqlite://") {
        let path = path.split('?').next().unwrap_or(path);
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create data directory")?;
                info!("Created data directory: {:?}", parent);
            }
        }
    }

    let uploads = &config.uploads.directory;
    if !uploads.exists() {
        std::fs::create_dir_all(uploads).context("Failed to create upload directory")?;
        info!("Created upload directory: {:?}", uploads);
    }
    Ok(())
}

fn print_help() {
    println!(
        r#"Upload Gate {}

USAGE:
    upload-gate [OPTIONS]

OPTIONS:
    -h, --help              Print this help message
    -V, --version           Print version information
    --init-config [PATH]    Write a default configuration file to PATH
                            (default: config.yaml) and exit

ENVIRONMENT:
    UPLOAD_GATE_CONFIG  Path to configuration file (default: config.yaml)
    UPLOAD_GATE_ENV     development | production | test
    IP, PORT            Listen address
    PROXY               Trust X-Forwarded-For / X-Real-IP
    DATABASE_URL        SQLite URL, or "memory"
    COOKIE_SECRET       Session cookie signing secret
    COOKIE_NAME         Session cookie name
    API_KEY_SECRET      Key for hashing API keys
    SIGNUPS             Enable or disable account signups
    RUST_LOG            Log filter

CONFIGURATION:
    The application looks for configuration files in the following order:
    1. Path specified by UPLOAD_GATE_CONFIG environment variable
    2. ./config.yaml
    3. ./config/config.yaml
    4. /etc/upload-gate/config.yaml
    5. <user config dir>/upload-gate/config.yaml"#,
        env!("CARGO_PKG_VERSION")
    );
}
