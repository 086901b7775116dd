//! Lifecycle controller
//!
//! Owns the singleton lock, the registered hotkey and its listener, and
//! moves them through:
//!
//! ```text
//! Idle -> Locked -> HotkeyActive <-> Reconfiguring -> ShuttingDown -> Idle
//!                \-> HotkeyDisabled <-/
//! ```
//!
//! `HotkeyDisabled` is the degraded state: the process keeps its lock and
//! keeps running, but no hotkey is registered.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::events::DaemonEvent;
use crate::hotkey::{
    HotkeyBackend, HotkeyBinding, HotkeyError, ListenerHandle, ListenerState, OnFire,
    RegisteredHotkey, Registrar,
};
use crate::lock::{LockError, LockHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    Locked,
    HotkeyActive,
    /// Running and locked, hotkey detection off
    HotkeyDisabled,
    Reconfiguring,
    ShuttingDown,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Idle => write!(f, "Idle"),
            LifecycleState::Locked => write!(f, "Locked"),
            LifecycleState::HotkeyActive => write!(f, "HotkeyActive"),
            LifecycleState::HotkeyDisabled => write!(f, "HotkeyDisabled"),
            LifecycleState::Reconfiguring => write!(f, "Reconfiguring"),
            LifecycleState::ShuttingDown => write!(f, "ShuttingDown"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Hotkey(#[from] HotkeyError),

    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },

    #[error("lifecycle worker is not running")]
    WorkerGone,

    #[error("failed to spawn lifecycle worker: {0}")]
    WorkerSpawn(String),
}

/// Point-in-time view of the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerStatus {
    pub state: LifecycleState,
    /// Most recently requested binding
    pub binding: Option<String>,
    pub hotkey_registered: bool,
    pub listener: Option<ListenerState>,
    /// Why the hotkey is disabled, if it is
    pub last_error: Option<String>,
    pub remedy: Option<String>,
    pub lock_held: bool,
}

pub struct LifecycleController<B: HotkeyBackend> {
    state: LifecycleState,
    lock_path: PathBuf,
    lock: Option<LockHandle>,
    registrar: Registrar<B>,
    hotkey: Option<RegisteredHotkey<B::Registration>>,
    listener: Option<ListenerHandle>,
    binding: Option<HotkeyBinding>,
    on_fire: OnFire,
    event_tx: broadcast::Sender<DaemonEvent>,
    last_error: Option<(String, &'static str)>,
}

impl<B: HotkeyBackend> LifecycleController<B> {
    /// `on_fire` runs on the listener thread for every press and must not
    /// call back into the controller.
    pub fn new(
        backend: B,
        lock_path: impl AsRef<Path>,
        on_fire: OnFire,
        event_tx: broadcast::Sender<DaemonEvent>,
    ) -> Self {
        Self {
            state: LifecycleState::Idle,
            lock_path: lock_path.as_ref().to_owned(),
            lock: None,
            registrar: Registrar::new(backend),
            hotkey: None,
            listener: None,
            binding: None,
            on_fire,
            event_tx,
            last_error: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn binding(&self) -> Option<&HotkeyBinding> {
        self.binding.as_ref()
    }

    pub fn lock_held(&self) -> bool {
        self.lock.as_ref().is_some_and(LockHandle::is_held)
    }

    pub fn is_hotkey_active(&self) -> bool {
        self.hotkey.is_some() && self.listener.is_some()
    }

    pub fn status(&self) -> ControllerStatus {
        ControllerStatus {
            state: self.state,
            binding: self.binding.as_ref().map(ToString::to_string),
            hotkey_registered: self.hotkey.is_some(),
            listener: self.listener.as_ref().map(ListenerHandle::state),
            last_error: self.last_error.as_ref().map(|(reason, _)| reason.clone()),
            remedy: self.last_error.as_ref().map(|(_, remedy)| remedy.to_string()),
            lock_held: self.lock_held(),
        }
    }

    /// Acquire the lock, then register `binding` and start listening
    ///
    /// Only a lock failure is returned. A hotkey failure leaves the
    /// controller in `HotkeyDisabled` with the lock still held.
    pub fn start(&mut self, binding: HotkeyBinding) -> Result<(), LifecycleError> {
        if self.state != LifecycleState::Idle {
            return Err(LifecycleError::InvalidState {
                operation: "start",
                state: self.state,
            });
        }

        let lock = LockHandle::acquire(&self.lock_path)?;
        self.lock = Some(lock);
        self.transition(LifecycleState::Locked);

        // Already logged and published; not fatal
        let _ = self.bring_up(binding);
        Ok(())
    }

    /// Replace the active binding
    ///
    /// Valid from `HotkeyActive` and from `HotkeyDisabled`. If the new
    /// binding is refused the controller ends up in `HotkeyDisabled`; the
    /// previous binding is not restored.
    pub fn reconfigure(&mut self, binding: HotkeyBinding) -> Result<(), LifecycleError> {
        if !matches!(
            self.state,
            LifecycleState::HotkeyActive | LifecycleState::HotkeyDisabled
        ) {
            return Err(LifecycleError::InvalidState {
                operation: "reconfigure",
                state: self.state,
            });
        }

        info!(
            from = ?self.binding.as_ref().map(ToString::to_string),
            to = %binding,
            "reconfiguring hotkey"
        );
        self.transition(LifecycleState::Reconfiguring);
        self.tear_down_hotkey();

        self.bring_up(binding).map_err(LifecycleError::Hotkey)
    }

    /// Tear down whatever is up, in reverse order, releasing the lock last
    ///
    /// Valid from any state and idempotent. Failures are logged only.
    pub fn shutdown(&mut self) {
        if self.state == LifecycleState::Idle && self.lock.is_none() {
            debug!("shutdown requested while idle, nothing to do");
            return;
        }

        self.transition(LifecycleState::ShuttingDown);
        let _ = self.event_tx.send(DaemonEvent::ShuttingDown);

        self.tear_down_hotkey();

        if let Some(mut lock) = self.lock.take() {
            lock.release();
        }

        self.transition(LifecycleState::Idle);
        info!("lifecycle shutdown complete");
    }

    /// Register and start listening; ends in `HotkeyActive` or `HotkeyDisabled`
    fn bring_up(&mut self, binding: HotkeyBinding) -> Result<(), HotkeyError> {
        self.binding = Some(binding.clone());

        match self.activate(&binding) {
            Ok(()) => {
                self.last_error = None;
                self.transition(LifecycleState::HotkeyActive);
                let _ = self.event_tx.send(DaemonEvent::HotkeyRegistered {
                    binding: binding.to_string(),
                });
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, remedy = e.remedy(), "hotkey unavailable, continuing without it");
                self.last_error = Some((e.to_string(), e.remedy()));
                self.transition(LifecycleState::HotkeyDisabled);
                let _ = self.event_tx.send(DaemonEvent::HotkeyDisabled {
                    reason: e.to_string(),
                    remedy: e.remedy().to_string(),
                });
                Err(e)
            }
        }
    }

    fn activate(&mut self, binding: &HotkeyBinding) -> Result<(), HotkeyError> {
        let mut hotkey = self.registrar.register(binding)?;

        match self.registrar.start_listener(&mut hotkey, self.fire_callback()) {
            Ok(listener) => {
                self.hotkey = Some(hotkey);
                self.listener = Some(listener);
                Ok(())
            }
            Err(e) => {
                self.registrar.unregister(Some(hotkey));
                Err(e)
            }
        }
    }

    /// Stop the listener, then unregister. Panics in either step are contained.
    fn tear_down_hotkey(&mut self) {
        let listener = self.listener.take();
        let registrar = &mut self.registrar;
        if panic::catch_unwind(AssertUnwindSafe(|| registrar.stop_listener(listener))).is_err() {
            warn!("stopping the hotkey listener panicked");
        }

        if let Some(hotkey) = self.hotkey.take() {
            let binding = hotkey.binding().to_string();
            let registrar = &mut self.registrar;
            if panic::catch_unwind(AssertUnwindSafe(|| registrar.unregister(Some(hotkey)))).is_err()
            {
                warn!(%binding, "unregistering the hotkey panicked");
            }
            let _ = self.event_tx.send(DaemonEvent::HotkeyUnregistered { binding });
        }
    }

    fn fire_callback(&self) -> OnFire {
        let on_fire = Arc::clone(&self.on_fire);
        let event_tx = self.event_tx.clone();
        Arc::new(move || {
            on_fire();
            let _ = event_tx.send(DaemonEvent::HotkeyFired);
        })
    }

    fn transition(&mut self, to: LifecycleState) {
        if self.state != to {
            info!(from = %self.state, to = %to, "lifecycle transition");
            self.state = to;
        }
    }
}

impl<B: HotkeyBackend> Drop for LifecycleController<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
