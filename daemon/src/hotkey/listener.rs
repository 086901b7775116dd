//! Hotkey event listener
//!
//! Each listener runs on a dedicated thread and calls `on_fire` for every
//! hotkey press. Two models share the same handle:
//!
//! - push: the native layer sends [`Signal`]s over a channel and the
//!   listener thread blocks on `recv` (macOS, X11).
//! - pull: the listener thread blocks in the platform's message retrieval
//!   call (Windows `GetMessageW`).
//!
//! Stopping injects a wake-up into whichever primitive the thread blocks on,
//! then waits at most [`STOP_TIMEOUT`] for the thread to exit.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::backend::HotkeyError;

/// Callback invoked on the listener thread for every hotkey press
///
/// Must return promptly and must not wait on the lifecycle controller;
/// UI work belongs on the UI's own thread.
pub type OnFire = Arc<dyn Fn() + Send + Sync>;

/// Upper bound on how long `stop` waits for the listener thread
pub const STOP_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerState {
    Created,
    Running,
    Stopping,
    Stopped,
}

/// Messages on a push-model notification channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Signal {
    Fired,
    Shutdown,
}

/// Decides whether an observed fire reaches the callback
///
/// The state lock is held while `on_fire` runs, so once `request_stop`
/// returns no further callback can start.
pub(crate) struct FireGate {
    state: Mutex<ListenerState>,
    on_fire: OnFire,
    suppressed: AtomicU64,
}

impl FireGate {
    pub(crate) fn new(on_fire: OnFire) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ListenerState::Created),
            on_fire,
            suppressed: AtomicU64::new(0),
        })
    }

    pub(crate) fn arm(&self) {
        let mut state = self.lock();
        if *state == ListenerState::Created {
            *state = ListenerState::Running;
        }
    }

    /// Deliver one fire. Returns whether the callback ran.
    pub(crate) fn fire(&self) -> bool {
        let state = self.lock();
        if *state != ListenerState::Running {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            debug!(state = ?*state, "hotkey fire observed but suppressed");
            return false;
        }

        if panic::catch_unwind(AssertUnwindSafe(|| (self.on_fire)())).is_err() {
            error!("hotkey callback panicked");
        }
        drop(state);
        true
    }

    fn request_stop(&self) {
        let mut state = self.lock();
        if matches!(*state, ListenerState::Created | ListenerState::Running) {
            *state = ListenerState::Stopping;
        }
    }

    fn mark_stopped(&self) {
        *self.lock() = ListenerState::Stopped;
    }

    fn state(&self) -> ListenerState {
        *self.lock()
    }

    fn suppressed(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ListenerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Wake-up injected into the listener's blocking primitive on stop
pub(crate) type Waker = Box<dyn FnOnce() + Send>;

/// Owner of a running listener thread
pub struct ListenerHandle {
    gate: Arc<FireGate>,
    wake: Option<Waker>,
    /// Disconnects when the listener thread exits
    done: Receiver<()>,
    thread: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    pub(crate) fn new(
        gate: Arc<FireGate>,
        wake: Waker,
        done: Receiver<()>,
        thread: JoinHandle<()>,
    ) -> Self {
        Self {
            gate,
            wake: Some(wake),
            done,
            thread: Some(thread),
        }
    }

    pub fn state(&self) -> ListenerState {
        self.gate.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ListenerState::Running
    }

    /// Fires that arrived while the listener was not running
    pub fn suppressed_fires(&self) -> u64 {
        self.gate.suppressed()
    }

    /// Stop the listener and wait (bounded) for its thread to exit
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(wake) = self.wake.take() else {
            return;
        };

        self.gate.request_stop();
        wake();

        match self.done.recv_timeout(STOP_TIMEOUT) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(thread) = self.thread.take() {
                    if thread.join().is_err() {
                        warn!("hotkey listener thread panicked");
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    timeout_ms = STOP_TIMEOUT.as_millis() as u64,
                    "hotkey listener did not exit in time, detaching"
                );
                self.thread.take();
            }
        }

        self.gate.mark_stopped();
        debug!("hotkey listener stopped");
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("state", &self.state())
            .finish()
    }
}

/// Spawn a push-model listener reading `events`
///
/// `wake` must feed the same channel; stop sends `Signal::Shutdown` on it.
#[cfg_attr(windows, allow(dead_code))]
pub(crate) fn spawn_push(
    events: Receiver<Signal>,
    wake: Sender<Signal>,
    on_fire: OnFire,
) -> Result<ListenerHandle, HotkeyError> {
    let gate = FireGate::new(on_fire);
    let thread_gate = Arc::clone(&gate);
    let (done_tx, done_rx) = mpsc::channel::<()>();
    gate.arm();

    let thread = thread::Builder::new()
        .name("hotkey-listener".to_string())
        .spawn(move || {
            let _done = done_tx;
            info!("hotkey listener thread started");

            while let Ok(signal) = events.recv() {
                match signal {
                    Signal::Fired => {
                        thread_gate.fire();
                    }
                    Signal::Shutdown => break,
                }
            }

            info!("hotkey listener thread stopped");
        })
        .map_err(|e| HotkeyError::ThreadSpawn(e.to_string()))?;

    Ok(ListenerHandle::new(
        gate,
        Box::new(move || {
            let _ = wake.send(Signal::Shutdown);
        }),
        done_rx,
        thread,
    ))
}
