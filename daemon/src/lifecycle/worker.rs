//! Single-worker command queue in front of the controller
//!
//! The controller lives on its own thread and handles one command at a
//! time, so a reconfigure can never interleave with another reconfigure or
//! with shutdown. Callers talk to it through a cloneable [`ControllerHandle`].

use std::thread::{self, JoinHandle};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::hotkey::{HotkeyBackend, HotkeyBinding};

use super::controller::{ControllerStatus, LifecycleController, LifecycleError};

const QUEUE_DEPTH: usize = 16;

enum Command {
    Reconfigure {
        binding: HotkeyBinding,
        reply: oneshot::Sender<Result<(), LifecycleError>>,
    },
    Status {
        reply: oneshot::Sender<ControllerStatus>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable client for the lifecycle worker
#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<Command>,
}

impl ControllerHandle {
    /// Swap the hotkey binding; the error is for the UI to report
    pub async fn reconfigure(&self, binding: HotkeyBinding) -> Result<(), LifecycleError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Reconfigure { binding, reply }).await?;
        rx.await.map_err(|_| LifecycleError::WorkerGone)?
    }

    pub async fn status(&self) -> Result<ControllerStatus, LifecycleError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Status { reply }).await?;
        rx.await.map_err(|_| LifecycleError::WorkerGone)
    }

    /// Tear down and stop the worker. Waits for teardown to finish.
    pub async fn shutdown(&self) -> Result<(), LifecycleError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Shutdown { reply }).await?;
        rx.await.map_err(|_| LifecycleError::WorkerGone)
    }

    async fn send(&self, command: Command) -> Result<(), LifecycleError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| LifecycleError::WorkerGone)
    }
}

/// Move `controller` onto a dedicated worker thread
///
/// The worker shuts the controller down when asked to, or when every
/// handle has been dropped.
pub fn spawn<B: HotkeyBackend>(
    mut controller: LifecycleController<B>,
) -> Result<(ControllerHandle, JoinHandle<()>), LifecycleError> {
    let (tx, mut rx) = mpsc::channel::<Command>(QUEUE_DEPTH);

    let thread = thread::Builder::new()
        .name("lifecycle-worker".to_string())
        .spawn(move || {
            info!(state = %controller.state(), "lifecycle worker started");

            while let Some(command) = rx.blocking_recv() {
                match command {
                    Command::Reconfigure { binding, reply } => {
                        let result = controller.reconfigure(binding);
                        let _ = reply.send(result);
                    }
                    Command::Status { reply } => {
                        let _ = reply.send(controller.status());
                    }
                    Command::Shutdown { reply } => {
                        controller.shutdown();
                        let _ = reply.send(());
                        break;
                    }
                }
            }

            debug!("lifecycle worker queue closed");
            controller.shutdown();
            info!("lifecycle worker stopped");
        })
        .map_err(|e| LifecycleError::WorkerSpawn(e.to_string()))?;

    Ok((ControllerHandle { tx }, thread))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkey::testing::FakeBackend;
    use crate::hotkey::Key;
    use crate::lifecycle::controller::tests::{binding, temp_lock};
    use crate::lifecycle::LifecycleState;
    use std::sync::Arc;
    use tokio::sync::broadcast;

    fn started(name: &str) -> (ControllerHandle, JoinHandle<()>, FakeBackend, std::path::PathBuf) {
        let probe = FakeBackend::new();
        let lock_path = temp_lock(name);
        let (event_tx, _) = broadcast::channel(16);
        let mut controller =
            LifecycleController::new(probe.clone(), &lock_path, Arc::new(|| {}), event_tx);
        controller.start(binding(Key::L)).unwrap();
        let (handle, thread) = spawn(controller).unwrap();
        (handle, thread, probe, lock_path)
    }

    #[test]
    fn test_commands_are_served_in_order() {
        let (handle, thread, probe, lock_path) = started("order");

        tokio_test::block_on(async {
            handle.reconfigure(binding(Key::S)).await.unwrap();
            let status = handle.status().await.unwrap();
            assert_eq!(status.state, LifecycleState::HotkeyActive);
            assert_eq!(status.binding.as_deref(), Some("ctrl+shift+s"));

            handle.shutdown().await.unwrap();
        });

        thread.join().unwrap();
        assert_eq!(probe.active_count(), 0);
        assert!(!lock_path.exists());

        let err = tokio_test::block_on(handle.status()).unwrap_err();
        assert!(matches!(err, LifecycleError::WorkerGone));
        let _ = std::fs::remove_dir_all(lock_path.parent().unwrap());
    }

    #[test]
    fn test_dropping_all_handles_shuts_down() {
        let (handle, thread, probe, lock_path) = started("drop");
        let clone = handle.clone();
        drop(handle);
        drop(clone);

        thread.join().unwrap();
        assert_eq!(probe.active_count(), 0);
        assert!(!lock_path.exists());
        let _ = std::fs::remove_dir_all(lock_path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_reconfigures_never_overlap() {
        let (handle, thread, probe, lock_path) = started("concurrent");

        let mut tasks = Vec::new();
        for key in Key::ALL.iter().copied().cycle().take(10) {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move { handle.reconfigure(binding(key)).await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
            assert!(probe.active_count() <= 1);
        }

        let status = handle.status().await.unwrap();
        assert!(status.hotkey_registered);
        assert_eq!(probe.active_count(), 1);

        handle.shutdown().await.unwrap();
        tokio::task::spawn_blocking(move || thread.join().unwrap())
            .await
            .unwrap();
        let _ = std::fs::remove_dir_all(lock_path.parent().unwrap());
    }
}
