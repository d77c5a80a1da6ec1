use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use enterprise_sso::{AppState, build_app, config::SsoServiceConfig, db::DbPool, observability};

/// Config file picked up from the working directory when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "enterprise-sso.toml";

/// How often expired AuthnRequest IDs are pruned from the replay ledger.
const EXPIRY_PRUNE_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// CLI arguments for the enterprise SSO service
#[derive(Parser, Debug)]
#[command(version, about = "Multi-tenant enterprise SSO service", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file (defaults to ./enterprise-sso.toml if it exists)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Start the HTTP server (default)
    Serve,
    /// Run database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command {
        Some(Command::Migrate) => run_migrate(args.config.as_deref()).await,
        Some(Command::Serve) | None => run_server(args.config.as_deref()).await,
    }
}

/// Resolve and load the configuration, exiting on error.
fn load_config(explicit_path: Option<&str>) -> (SsoServiceConfig, Option<PathBuf>) {
    let path = match explicit_path {
        Some(path) => Some(PathBuf::from(path)),
        None => Some(PathBuf::from(DEFAULT_CONFIG_FILE)).filter(|p| p.exists()),
    };

    let result = match &path {
        Some(path) => SsoServiceConfig::from_file(path),
        None => SsoServiceConfig::from_str(""),
    };

    match result {
        Ok(config) => (config, path),
        Err(e) => {
            match &path {
                Some(path) => eprintln!("Failed to load config from {}: {}", path.display(), e),
                None => eprintln!("Invalid default configuration: {}", e),
            }
            std::process::exit(1);
        }
    }
}

fn init_tracing(config: &SsoServiceConfig) {
    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run_server(explicit_config_path: Option<&str>) {
    let (config, config_path) = load_config(explicit_config_path);
    init_tracing(&config);

    match &config_path {
        Some(path) => tracing::info!(config_file = %path.display(), "Starting enterprise SSO"),
        None => tracing::warn!("No config file found; starting with defaults"),
    }

    if config.database.is_none() {
        tracing::warn!("No database configured; logins will fail until [database] is set");
    }

    let state = match AppState::new(config.clone()).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize application state");
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let prune_task = state.db.clone().map(spawn_expiry_pruning);
    let db = state.db.clone();
    let app = build_app(&config, state);

    let bind_addr = SocketAddr::new(config.server.host, config.server.port);
    let listener = match tokio::net::TcpListener::bind(bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(address = %bind_addr, error = %e, "Failed to bind");
            std::process::exit(1);
        }
    };
    tracing::info!(address = %bind_addr, "Server listening");

    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    if let Some(task) = prune_task {
        task.abort();
    }
    if let Some(db) = db {
        db.close().await;
    }

    match result {
        Ok(()) => tracing::info!("Server stopped"),
        Err(e) => {
            tracing::error!(error = %e, "Server error");
            std::process::exit(1);
        }
    }
}

/// Periodically drop AuthnRequest IDs and enterprise sessions past their expiry.
fn spawn_expiry_pruning(db: Arc<DbPool>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(EXPIRY_PRUNE_INTERVAL);
        loop {
            interval.tick().await;
            let now = chrono::Utc::now();
            match db.authn_requests().delete_expired(now).await {
                Ok(0) => {}
                Ok(count) => tracing::debug!(count, "Pruned expired AuthnRequest IDs"),
                Err(e) => tracing::warn!(error = %e, "Failed to prune AuthnRequest IDs"),
            }
            match db.sessions().delete_expired(now).await {
                Ok(0) => {}
                Ok(count) => tracing::debug!(count, "Pruned expired enterprise sessions"),
                Err(e) => tracing::warn!(error = %e, "Failed to prune enterprise sessions"),
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

async fn run_migrate(explicit_config_path: Option<&str>) {
    let (config, config_path) = load_config(explicit_config_path);
    init_tracing(&config);

    if let Some(path) = &config_path {
        tracing::info!(config_file = %path.display(), "Running database migrations");
    }

    if config.database.is_none() {
        eprintln!("Error: Database is not configured. Nothing to migrate.");
        std::process::exit(1);
    }

    match DbPool::from_config(&config.database).await {
        Ok(pool) => match pool.run_migrations().await {
            Ok(()) => {
                tracing::info!("Database migrations completed successfully");
                pool.close().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Database migrations failed");
                eprintln!("Error: Database migrations failed: {}", e);
                std::process::exit(1);
            }
        },
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to database");
            eprintln!("Error: Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    }
}
