//! Events published by the lifecycle controller
//!
//! Delivered to in-process subscribers over a `tokio::sync::broadcast`
//! channel and pushed to subscribed IPC clients.

use serde::{Deserialize, Serialize};

/// Something UI collaborators may want to react to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonEvent {
    /// The hotkey was pressed; bring the window to the foreground
    HotkeyFired,

    /// A binding is registered and its listener is running
    HotkeyRegistered { binding: String },

    /// The binding was released (reconfiguration or shutdown)
    HotkeyUnregistered { binding: String },

    /// Hotkey detection is off; the rest of the process keeps running
    HotkeyDisabled {
        /// What failed
        reason: String,
        /// What the user can do about it
        remedy: String,
    },

    /// Teardown has begun
    ShuttingDown,
}

impl std::fmt::Display for DaemonEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DaemonEvent::HotkeyFired => write!(f, "HOTKEY_FIRED"),
            DaemonEvent::HotkeyRegistered { binding } => {
                write!(f, "HOTKEY_REGISTERED ({})", binding)
            }
            DaemonEvent::HotkeyUnregistered { binding } => {
                write!(f, "HOTKEY_UNREGISTERED ({})", binding)
            }
            DaemonEvent::HotkeyDisabled { reason, .. } => {
                write!(f, "HOTKEY_DISABLED ({})", reason)
            }
            DaemonEvent::ShuttingDown => write!(f, "SHUTTING_DOWN"),
        }
    }
}
