//! Application-wide constants for nagome.
//!
//! Every timeout, queue depth and retry limit lives here so the
//! concurrency model can be read in one place. Constants are grouped by
//! the layer that uses them.

use std::time::Duration;

// ============================================================================
// Live connection
// ============================================================================

/// Upper bound for dialing the comment server.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline for a single write on the comment socket (including flush).
pub const CONNECTION_WRITE_DEADLINE: Duration = Duration::from_secs(5);

/// Idle time before the first TCP keepalive probe on the comment socket,
/// and the interval between probes after that.
pub const CONNECTION_KEEPALIVE_PERIOD: Duration = Duration::from_secs(60);

/// Delimiter terminating every frame on the comment socket.
pub const FRAME_DELIMITER: u8 = b'\0';

/// Largest frame the comment socket decoder will buffer (1 MB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Number of past comments requested when a thread is opened.
pub const COMMENT_HISTORY_COUNT: u32 = 100;

/// Comments per post-key block on the comment server.
pub const COMMENTS_PER_BLOCK: u32 = 100;

// ============================================================================
// Broadcast protocol
// ============================================================================

/// HTTP client request timeout for every broadcast API call.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Total attempts allowed for `FetchInformation` (first try included).
pub const FETCH_INFORMATION_RETRY_LIMIT: u32 = 3;

/// Delay before a transient `FetchInformation` failure is retried.
pub const FETCH_INFORMATION_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Minimum spacing between user-info API requests.
pub const USER_FETCH_INTERVAL: Duration = Duration::from_millis(500);

// ============================================================================
// Plugins
// ============================================================================

/// Depth of each plugin's outbound message queue.
pub const PLUGIN_OUTBOUND_QUEUE_DEPTH: usize = 3;

/// Delay after the last write before a plugin's writer is flushed.
///
/// Bursts of messages written within this window share one flush.
pub const PLUGIN_FLUSH_DELAY: Duration = Duration::from_millis(50);

/// Upper bound for the last flush when a plugin closes.
pub const PLUGIN_FINAL_FLUSH_TIMEOUT: Duration = Duration::from_millis(500);

/// How long a TCP plugin has to send `Direct.No` after connecting.
pub const PLUGIN_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default TCP port plugins dial to reach the hub.
pub const DEFAULT_TCP_PORT: u16 = 8025;

/// Index of the main plugin. Losing it shuts the hub down.
pub const MAIN_PLUGIN_NO: usize = 0;

/// Name given to the main plugin.
pub const MAIN_PLUGIN_NAME: &str = "main";

// ============================================================================
// Hub
// ============================================================================

/// Number of router workers draining the inbound message channel.
pub const ROUTER_WORKER_COUNT: usize = 5;

/// How long the binary waits for leftover blocking work (a parked stdin
/// read) after the hub has stopped.
pub const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ============================================================================
// Files
// ============================================================================

/// Settings slots file inside the save directory.
pub const SETTINGS_FILE_NAME: &str = "settings.yml";

/// Account file inside the save directory.
pub const ACCOUNT_FILE_NAME: &str = "userData.yml";

/// Log file inside the save directory.
pub const LOG_FILE_NAME: &str = "info.log";

/// Directory (inside the save directory) holding one folder per plugin.
pub const PLUGIN_DIR_NAME: &str = "plugin";

/// Manifest file name inside each plugin folder.
pub const PLUGIN_MANIFEST_NAME: &str = "plugin.yml";

/// Application name reported by `App.Version`.
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// Application version reported by `App.Version`.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
