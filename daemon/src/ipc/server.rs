//! Unix domain socket server for IPC
//!
//! Provides request-response communication and push notifications of
//! daemon events to subscribed clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::events::DaemonEvent;
use crate::hotkey::HotkeyError;
use crate::lifecycle::{ControllerHandle, LifecycleError, ShutdownSignal};

use super::protocol::{DaemonStatus, Notification, Request, Response, MAX_FRAME_LEN};

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    state: Arc<ServerState>,
    shutdown_tx: broadcast::Sender<()>,
}

/// Shared server state
struct ServerState {
    controller: ControllerHandle,
    events: broadcast::Sender<DaemonEvent>,
    settings_path: PathBuf,
    quit: ShutdownSignal,
    start_time: Instant,
}

impl Server {
    /// Create a new IPC server
    pub fn new(
        socket_path: &Path,
        controller: ControllerHandle,
        events: broadcast::Sender<DaemonEvent>,
        settings_path: PathBuf,
        quit: ShutdownSignal,
    ) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // We hold the singleton lock, so any existing socket is stale
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        let state = Arc::new(ServerState {
            controller,
            events,
            settings_path,
            quit,
            start_time: Instant::now(),
        });

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            state,
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let state = Arc::clone(&self.state);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, state) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    ///
    /// Frames are read on a separate task so that event pushes and request
    /// handling can be multiplexed on the write half.
    async fn handle_client(stream: UnixStream, state: Arc<ServerState>) -> Result<()> {
        let (mut reader, mut writer) = stream.into_split();
        let (req_tx, mut req_rx) = mpsc::channel::<Result<Request, String>>(16);

        let read_task = tokio::spawn(async move {
            loop {
                match read_frame(&mut reader).await {
                    Ok(Some(frame)) => {
                        let parsed =
                            serde_json::from_slice::<Request>(&frame).map_err(|e| e.to_string());
                        if req_tx.send(parsed).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("client disconnected");
                        break;
                    }
                    Err(e) => {
                        warn!(?e, "failed to read client frame");
                        break;
                    }
                }
            }
        });

        let mut events: Option<broadcast::Receiver<DaemonEvent>> = None;

        let result = loop {
            tokio::select! {
                request = req_rx.recv() => {
                    let Some(request) = request else {
                        break Ok(());
                    };
                    let response = match request {
                        Ok(request) => {
                            debug!(?request, "received request");
                            let subscribe = matches!(request, Request::Subscribe);
                            let response = Self::process_request(request, &state).await;
                            if subscribe && events.is_none() {
                                events = Some(state.events.subscribe());
                                debug!("client subscribed to notifications");
                            }
                            response
                        }
                        Err(e) => Response::error("bad_request", e),
                    };
                    if let Err(e) = send_message(&mut writer, &response).await {
                        break Err(e);
                    }
                }
                event = next_event(&mut events) => {
                    match event {
                        Ok(event) => {
                            let note = Notification::Event { event };
                            if let Err(e) = send_message(&mut writer, &note).await {
                                break Err(e);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "subscriber lagged behind daemon events");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            events = None;
                        }
                    }
                }
            }
        };

        read_task.abort();
        result
    }

    /// Process a request and return a response
    async fn process_request(request: Request, state: &ServerState) -> Response {
        match request {
            Request::Ping => Response::Pong,

            Request::GetStatus => match state.controller.status().await {
                Ok(status) => Response::Status(DaemonStatus::from_controller(
                    status,
                    state.start_time.elapsed().as_secs(),
                )),
                Err(e) => Response::error("unavailable", e.to_string()),
            },

            Request::Reconfigure { binding } => {
                match state.controller.reconfigure(binding.clone()).await {
                    Ok(()) => {
                        info!(%binding, "hotkey changed via IPC");
                        match Settings::from_binding(&binding).save(&state.settings_path) {
                            Ok(()) => Response::Reconfigured {
                                binding: binding.to_string(),
                            },
                            Err(e) => Response::error(
                                "persist_failed",
                                format!("hotkey {binding} is active but was not saved: {e:#}"),
                            ),
                        }
                    }
                    Err(e) => reconfigure_error(e),
                }
            }

            Request::Subscribe => Response::Subscribed,

            Request::Quit => {
                info!("quit requested via IPC");
                state.quit.trigger();
                Response::Quitting
            }
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

fn reconfigure_error(e: LifecycleError) -> Response {
    match e {
        LifecycleError::Hotkey(inner) => {
            let code = match inner {
                HotkeyError::RegistrationDenied { .. } => "registration_denied",
                _ => "listener_failed",
            };
            Response::error(code, format!("{inner}; {}", inner.remedy()))
        }
        LifecycleError::InvalidState { .. } => Response::error("invalid_state", e.to_string()),
        other => Response::error("unavailable", other.to_string()),
    }
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<DaemonEvent>>,
) -> Result<DaemonEvent, broadcast::error::RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Read one length-prefixed frame; `None` on a clean disconnect
pub(crate) async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        anyhow::bail!("message too large ({len} bytes)");
    }

    let mut msg_buf = vec![0u8; len];
    reader.read_exact(&mut msg_buf).await?;
    Ok(Some(msg_buf))
}

/// Send a length-prefixed JSON message
pub(crate) async fn send_message<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let msg_bytes = serde_json::to_vec(msg)?;
    let msg_len = (msg_bytes.len() as u32).to_le_bytes();

    writer.write_all(&msg_len).await?;
    writer.write_all(&msg_bytes).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkey::testing::FakeBackend;
    use crate::hotkey::{HotkeyBinding, Key, Modifier};
    use crate::lifecycle::{self, LifecycleController};
    use std::time::{Duration, SystemTime};

    struct Harness {
        dir: PathBuf,
        server: Arc<Server>,
        handle: ControllerHandle,
        probe: FakeBackend,
        quit: ShutdownSignal,
    }

    impl Harness {
        async fn connect(&self) -> UnixStream {
            UnixStream::connect(self.dir.join("daemon.sock")).await.unwrap()
        }

        async fn finish(self) {
            self.server.shutdown().await;
            self.handle.shutdown().await.unwrap();
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    async fn harness(name: &str) -> Harness {
        let nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        // Keep the path short; Unix socket paths are length-limited
        let dir = std::env::temp_dir().join(format!("sl-ipc-{name}-{nanos}"));

        let probe = FakeBackend::new();
        let (event_tx, _) = broadcast::channel(64);
        let mut controller = LifecycleController::new(
            probe.clone(),
            dir.join("snaplog.lock"),
            Arc::new(|| {}),
            event_tx.clone(),
        );
        controller.start(HotkeyBinding::default()).unwrap();
        let (handle, _thread) = lifecycle::spawn(controller).unwrap();

        let quit = ShutdownSignal::new();
        let server = Arc::new(
            Server::new(
                &dir.join("daemon.sock"),
                handle.clone(),
                event_tx,
                dir.join("settings.json"),
                quit.clone(),
            )
            .unwrap(),
        );
        let runner = Arc::clone(&server);
        tokio::spawn(async move {
            let _ = runner.run().await;
        });

        Harness {
            dir,
            server,
            handle,
            probe,
            quit,
        }
    }

    async fn roundtrip(stream: &mut UnixStream, request: &Request) -> serde_json::Value {
        send_message(stream, request).await.unwrap();
        recv_json(stream).await
    }

    async fn recv_json(stream: &mut UnixStream) -> serde_json::Value {
        let frame = tokio::time::timeout(Duration::from_secs(2), read_frame(stream))
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        serde_json::from_slice(&frame).unwrap()
    }

    #[tokio::test]
    async fn test_ping_and_status() {
        let h = harness("status").await;
        let mut stream = h.connect().await;

        let pong = roundtrip(&mut stream, &Request::Ping).await;
        assert_eq!(pong["type"], "pong");

        let status = roundtrip(&mut stream, &Request::GetStatus).await;
        assert_eq!(status["type"], "status");
        assert_eq!(status["state"], "hotkey_active");
        assert_eq!(status["binding"], "ctrl+shift+l");
        assert_eq!(status["hotkey_registered"], true);
        assert_eq!(status["pid"], std::process::id());

        h.finish().await;
    }

    #[tokio::test]
    async fn test_reconfigure_persists_settings() {
        let h = harness("reconf").await;
        let mut stream = h.connect().await;

        let binding = HotkeyBinding::new([Modifier::Alt], Key::Space);
        let resp = roundtrip(
            &mut stream,
            &Request::Reconfigure {
                binding: binding.clone(),
            },
        )
        .await;
        assert_eq!(resp["type"], "reconfigured");
        assert_eq!(resp["binding"], "alt+space");
        assert_eq!(h.probe.active_bindings(), vec![binding.clone()]);
        assert_eq!(Settings::load(&h.dir.join("settings.json")).binding(), binding);

        h.finish().await;
    }

    #[tokio::test]
    async fn test_reconfigure_normalizes_modifier_names() {
        let h = harness("names").await;
        let mut stream = h.connect().await;

        let raw = br#"{"type":"reconfigure","binding":{"modifiers":["ctrl","hyper","ctrl"],"key":"l"}}"#;
        stream
            .write_all(&(raw.len() as u32).to_le_bytes())
            .await
            .unwrap();
        stream.write_all(raw).await.unwrap();
        let resp = recv_json(&mut stream).await;
        assert_eq!(resp["type"], "reconfigured");
        assert_eq!(resp["binding"], "ctrl+l");

        let saved = Settings::load(&h.dir.join("settings.json"));
        assert_eq!(saved.hotkey_modifiers, vec!["ctrl".to_string()]);

        h.finish().await;
    }

    #[tokio::test]
    async fn test_denied_reconfigure_reports_error() {
        let h = harness("denied").await;
        let binding = HotkeyBinding::new([Modifier::Shift], Key::T);
        h.probe.deny(binding.clone());
        let mut stream = h.connect().await;

        let resp = roundtrip(&mut stream, &Request::Reconfigure { binding }).await;
        assert_eq!(resp["type"], "error");
        assert_eq!(resp["code"], "registration_denied");
        assert!(!h.dir.join("settings.json").exists());

        let status = roundtrip(&mut stream, &Request::GetStatus).await;
        assert_eq!(status["state"], "hotkey_disabled");

        h.finish().await;
    }

    #[tokio::test]
    async fn test_subscriber_receives_fires() {
        let h = harness("sub").await;
        let mut stream = h.connect().await;

        let resp = roundtrip(&mut stream, &Request::Subscribe).await;
        assert_eq!(resp["type"], "subscribed");

        assert!(h.probe.fire());
        let note = recv_json(&mut stream).await;
        assert_eq!(note["type"], "event");
        assert_eq!(note["event"]["type"], "hotkey_fired");

        h.finish().await;
    }

    #[tokio::test]
    async fn test_bad_request_keeps_connection() {
        let h = harness("bad").await;
        let mut stream = h.connect().await;

        let garbage = b"{\"type\":\"launch_rockets\"}";
        stream
            .write_all(&(garbage.len() as u32).to_le_bytes())
            .await
            .unwrap();
        stream.write_all(garbage).await.unwrap();
        let resp = recv_json(&mut stream).await;
        assert_eq!(resp["code"], "bad_request");

        let pong = roundtrip(&mut stream, &Request::Ping).await;
        assert_eq!(pong["type"], "pong");

        h.finish().await;
    }

    #[tokio::test]
    async fn test_quit_triggers_shutdown() {
        let h = harness("quit").await;
        let mut stream = h.connect().await;

        let resp = roundtrip(&mut stream, &Request::Quit).await;
        assert_eq!(resp["type"], "quitting");
        tokio::time::timeout(Duration::from_secs(1), h.quit.wait())
            .await
            .unwrap();

        h.finish().await;
    }
}
