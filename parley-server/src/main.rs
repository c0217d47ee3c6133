//! Parley chat server

mod args;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use args::Args;
use parley_server::auth::AuthService;
use parley_server::constants::{DEBUG_LOG_FILTER, DEFAULT_LOG_FILTER, SESSION_PURGE_INTERVAL};
use parley_server::db::{self, Database};
use parley_server::hub::Hub;
use parley_server::server::Server;
use parley_server::session::{SessionStore, SqliteStore};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.debug);
    info!(version = env!("CARGO_PKG_VERSION"), "starting parleyd");

    let database = setup_db(args.database).await;

    let session_backend = SqliteStore::new(database.pool.clone());
    spawn_session_purge(session_backend.clone());

    let ttl = Duration::from_secs(args.session_ttl_hours.saturating_mul(3600));
    let sessions = SessionStore::new(session_backend, ttl);
    let auth = Arc::new(AuthService::new(database.users.clone(), sessions, false));
    let hub = Arc::new(Hub::new());

    let addr = SocketAddr::new(args.bind, args.port);
    let server = match Server::bind(addr, hub, auth).await {
        Ok(server) => server,
        Err(e) => {
            error!(%addr, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        setup_shutdown_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.run(shutdown_rx).await;
    database.pool.close().await;
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` wins over the built-in default filter.
fn init_logging(debug: bool) {
    let default = if debug {
        DEBUG_LOG_FILTER
    } else {
        DEFAULT_LOG_FILTER
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn setup_db(database_path: Option<PathBuf>) -> Database {
    let db_path = match database_path {
        Some(path) => path,
        None => match db::default_database_path() {
            Ok(path) => path,
            Err(e) => {
                error!(error = %e, "no database path");
                std::process::exit(1);
            }
        },
    };

    let pool = match db::init_db(&db_path).await {
        Ok(pool) => pool,
        Err(e) => {
            error!(path = %db_path.display(), error = %e, "failed to open database");
            std::process::exit(1);
        }
    };
    info!(path = %db_path.display(), "database ready");

    #[cfg(unix)]
    if let Err(e) = set_secure_permissions(&db_path) {
        warn!(path = %db_path.display(), error = %e, "could not restrict database permissions");
    }

    Database::new(pool)
}

/// Restrict the database file to its owner (0o600)
#[cfg(unix)]
fn set_secure_permissions(path: &std::path::Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

/// Periodically delete expired session rows
fn spawn_session_purge(store: SqliteStore) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SESSION_PURGE_INTERVAL);
        loop {
            interval.tick().await;
            match store.purge_expired().await {
                Ok(0) => {}
                Ok(count) => debug!(count, "purged expired sessions"),
                Err(e) => warn!(error = %e, "session purge failed"),
            }
        }
    });
}

/// Wait for Ctrl+C or SIGTERM
async fn setup_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {},
                    _ = sigint.recv() => {},
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "failed to install signal handlers, using ctrl-c");
            }
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
