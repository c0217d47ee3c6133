//! Client constants

use std::time::Duration;

/// Real-time endpoint used when `--server` is not given
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:8080/ws";

/// Application directory name under the platform data dir
pub const APP_DIR_NAME: &str = "parley";

/// Local database file name
pub const DATABASE_FILENAME: &str = "parley.db";

/// Prefix of the per-user log file (`client_<username>.log`)
pub const LOG_FILE_PREFIX: &str = "client_";

/// Default log filter when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "parley_client=info,parley=info";

/// Log filter used with `--debug`
pub const DEBUG_LOG_FILTER: &str = "parley_client=debug,parley=debug";

/// Upper bound for opening a WebSocket connection
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long `close` waits for the server's close frame
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

// Reconnect policy
pub const RECONNECT_MAX_ATTEMPTS: u32 = 3;
pub const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);
pub const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(10);

// Key derivation defaults for new vault records
pub const DEFAULT_KDF_MEMORY_KIB: u32 = 64 * 1024;
pub const DEFAULT_KDF_ITERATIONS: u32 = 1;
pub const DEFAULT_KDF_SALT_LENGTH: usize = 16;

/// Derived key length in bytes (AES-192)
pub const DEFAULT_KEY_LENGTH: usize = 24;
