//! Command-line argument parsing

use clap::Parser;
use std::path::PathBuf;

use parley_client::constants::DEFAULT_SERVER_URL;

/// Get default database path help text for current platform
fn default_database_help() -> String {
    #[cfg(target_os = "linux")]
    return "Database file path (default: ~/.local/share/parley/parley.db)".to_string();

    #[cfg(target_os = "macos")]
    return "Database file path (default: ~/Library/Application Support/parley/parley.db)"
        .to_string();

    #[cfg(target_os = "windows")]
    return "Database file path (default: %APPDATA%\\parley\\parley.db)".to_string();

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    return "Database file path (overrides platform default)".to_string();
}

/// Parley terminal chat client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Real-time endpoint of the server
    #[arg(short, long, env = "PARLEY_SERVER", default_value = DEFAULT_SERVER_URL)]
    pub server: String,

    /// Account name
    #[arg(short, long, env = "PARLEY_USERNAME")]
    pub username: String,

    /// Account password, also used to unlock the local history
    #[arg(short, long, env = "PARLEY_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// Existing session token (skips login)
    #[arg(long, env = "PARLEY_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Create the account before connecting
    #[arg(long, default_value = "false", conflicts_with = "token")]
    pub signup: bool,

    /// Database file path (overrides platform default)
    #[arg(short, long, env = "PARLEY_DATABASE", help = default_database_help())]
    pub database: Option<PathBuf>,

    /// Directory for the log file (defaults to the database directory)
    #[arg(long, env = "PARLEY_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, default_value = "false")]
    pub debug: bool,
}
