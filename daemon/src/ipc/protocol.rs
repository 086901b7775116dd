//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::events::DaemonEvent;
use crate::hotkey::HotkeyBinding;
use crate::lifecycle::{ControllerStatus, LifecycleState};

/// Largest frame either side will accept
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Requests from UI to daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Request current daemon status
    GetStatus,

    /// Replace the hotkey binding and persist it on success
    Reconfigure { binding: HotkeyBinding },

    /// Ping to check connectivity
    Ping,

    /// Subscribe to daemon event notifications
    Subscribe,

    /// Shut the daemon down
    Quit,
}

/// Responses from daemon to UI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current daemon status
    Status(DaemonStatus),

    /// The new binding is registered and saved
    Reconfigured { binding: String },

    /// Pong response to ping
    Pong,

    /// Subscription confirmed
    Subscribed,

    /// Shutdown has been requested
    Quitting,

    /// Error response
    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Push notification from daemon to UI (for subscribed clients)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    Event { event: DaemonEvent },
}

/// Full daemon status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    pub pid: u32,

    /// Lifecycle controller state
    pub state: LifecycleState,

    /// Configured binding, e.g. `ctrl+shift+l`
    pub binding: Option<String>,

    /// Whether hotkey is registered
    pub hotkey_registered: bool,

    /// Why the hotkey is unavailable, with a suggested remedy
    pub last_error: Option<String>,
    pub remedy: Option<String>,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl DaemonStatus {
    pub fn from_controller(status: ControllerStatus, uptime_secs: u64) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            pid: std::process::id(),
            state: status.state,
            binding: status.binding,
            hotkey_registered: status.hotkey_registered,
            last_error: status.last_error,
            remedy: status.remedy,
            uptime_secs,
        }
    }
}
