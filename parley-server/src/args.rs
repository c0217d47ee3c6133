//! Command-line argument parsing

use clap::Parser;
use parley_common::{DEFAULT_PORT, DEFAULT_SESSION_TTL_HOURS};
use std::net::IpAddr;
use std::path::PathBuf;

/// Get default database path help text for current platform
fn default_database_help() -> String {
    #[cfg(target_os = "linux")]
    return "Database file path (default: ~/.local/share/parleyd/parley.db)".to_string();

    #[cfg(target_os = "macos")]
    return "Database file path (default: ~/Library/Application Support/parleyd/parley.db)"
        .to_string();

    #[cfg(target_os = "windows")]
    return "Database file path (default: %APPDATA%\\parleyd\\parley.db)".to_string();

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    return "Database file path (overrides platform default)".to_string();
}

/// Parley chat server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// IP address to bind to (IPv4 or IPv6)
    #[arg(short, long, env = "PARLEY_BIND", default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Port to listen on
    #[arg(short, long, env = "PARLEY_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Database file path (overrides platform default)
    #[arg(short, long, env = "PARLEY_DATABASE", help = default_database_help())]
    pub database: Option<PathBuf>,

    /// Lifetime of a session token in hours
    #[arg(long, default_value_t = DEFAULT_SESSION_TTL_HOURS)]
    pub session_ttl_hours: u64,

    /// Enable debug logging
    #[arg(long, default_value = "false")]
    pub debug: bool,
}
