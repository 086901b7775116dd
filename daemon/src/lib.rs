//! snaplog-daemon: singleton guard and global hotkey manager for SnapLog
//!
//! - `lock`: pid marker file guaranteeing one running instance per user
//! - `hotkey`: cross-platform global hotkey registration and listening
//! - `lifecycle`: startup, hot reconfiguration and teardown ordering
//! - `ipc`: Unix socket for the UI (status, reconfigure, fire notifications)

pub mod config;
pub mod events;
pub mod hotkey;
#[cfg(unix)]
pub mod ipc;
pub mod lifecycle;
pub mod lock;
pub mod notify;
