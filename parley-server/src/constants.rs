//! Server constants

use std::time::Duration;

/// Upper bound for a single write to one recipient during fan-out
pub const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// How long `close` waits for the peer to acknowledge a close frame
pub const CLOSE_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a client has to complete the WebSocket handshake
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the `/auth` endpoint waits for the request frame
pub const AUTH_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between sweeps of expired session rows
pub const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Directory under the platform data dir holding the server database
pub const DATA_DIR_NAME: &str = "parleyd";

/// Database file name
pub const DATABASE_FILENAME: &str = "parley.db";

/// Key prefix for `user -> token` session rows
pub const SESSION_USER_PREFIX: &str = "user:";

/// Key prefix for `token -> user` session rows
pub const SESSION_TOKEN_PREFIX: &str = "session:";

/// Number of random bytes in a session token
pub const SESSION_TOKEN_BYTES: usize = 32;

/// Default log filter when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "parley_server=info,parleyd=info";

/// Log filter used with `--debug`
pub const DEBUG_LOG_FILTER: &str = "parley_server=debug,parleyd=debug";

// Close reasons sent to peers
pub const CLOSE_REASON_SHUTDOWN: &str = "server shutting down";
pub const CLOSE_REASON_UNAUTHORIZED: &str = "invalid session";
pub const CLOSE_REASON_PROTOCOL: &str = "protocol error";
pub const CLOSE_REASON_DELIVERY_FAILED: &str = "delivery failed";
