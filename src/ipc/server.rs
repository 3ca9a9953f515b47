//! Unix domain socket server for IPC
//!
//! Provides request-response access to the coordinator and push
//! notifications of mode and control-mode changes to subscribed clients.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::command::HISTORY_LIMIT;
use crate::events::{topics, Event, MessageBus};
use crate::runtime::CoordinatorHandle;

use super::protocol::{read_frame, write_frame, Notification, Request, Response};

const NOTIFICATION_CAPACITY: usize = 64;
const OUTBOX_CAPACITY: usize = 32;

/// Aborts its task when dropped, so a cancelled client handler takes its
/// writer and notification forwarder down with it
struct TaskGuard(JoinHandle<()>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: UnixListener,
    handle: CoordinatorHandle,
    notifications: broadcast::Sender<Notification>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Bind the socket and start collecting notifications from `bus`
    pub fn new(socket_path: &Path, handle: CoordinatorHandle, bus: &MessageBus) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        for topic in [topics::MODE_CHANGED, topics::CONTROL_CHANGED] {
            let tx = notifications.clone();
            bus.subscribe(topic, move |event: &Event| {
                if let Some(notification) = Notification::from_event(event) {
                    // No subscribed clients is not an error
                    let _ = tx.send(notification);
                }
                Ok(())
            });
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener,
            handle,
            notifications,
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let handle = self.handle.clone();
                    let notifications = self.notifications.clone();
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, handle, notifications) => {
                                if let Err(e) = result {
                                    warn!(error = %e, "client handler error");
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
    /// Responses and notifications share one outbox drained by a writer
    /// task, so a subscribed client never sees interleaved frames.
    async fn handle_client(
        stream: UnixStream,
        handle: CoordinatorHandle,
        notifications: broadcast::Sender<Notification>,
    ) -> Result<()> {
        let (mut reader, writer) = stream.into_split();
        let (outbox, outbox_rx) = mpsc::channel::<Vec<u8>>(OUTBOX_CAPACITY);
        let mut writer_task = TaskGuard(tokio::spawn(Self::write_loop(writer, outbox_rx)));
        let mut forwarder: Option<TaskGuard> = None;

        let result = loop {
            let body = match read_frame(&mut reader).await {
                Ok(Some(body)) => body,
                Ok(None) => {
                    debug!("client disconnected");
                    break Ok(());
                }
                Err(e) => break Err(e),
            };

            let response = match serde_json::from_slice::<Request>(&body) {
                Ok(request) => {
                    debug!(?request, "received request");
                    if matches!(request, Request::Subscribe) && forwarder.is_none() {
                        debug!("client subscribed to notifications");
                        forwarder = Some(TaskGuard(Self::forward_notifications(
                            notifications.subscribe(),
                            outbox.clone(),
                        )));
                    }
                    Self::process_request(request, &handle).await
                }
                Err(e) => Response::error("INVALID_REQUEST", format!("failed to parse request: {}", e)),
            };

            let frame = serde_json::to_vec(&response).context("failed to encode response")?;
            if outbox.send(frame).await.is_err() {
                break Ok(());
            }
        };

        // Flush queued responses before the connection closes
        drop(forwarder);
        drop(outbox);
        let _ = (&mut writer_task.0).await;
        result
    }

    async fn write_loop(mut writer: OwnedWriteHalf, mut outbox: mpsc::Receiver<Vec<u8>>) {
        while let Some(frame) = outbox.recv().await {
            if let Err(e) = write_frame(&mut writer, &frame).await {
                debug!(error = %e, "client write failed");
                break;
            }
        }
    }

    fn forward_notifications(
        mut rx: broadcast::Receiver<Notification>,
        outbox: mpsc::Sender<Vec<u8>>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let notification = match rx.recv().await {
                    Ok(notification) => notification,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "notification receiver lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Ok(frame) = serde_json::to_vec(&notification) else {
                    continue;
                };
                if outbox.send(frame).await.is_err() {
                    break;
                }
            }
        })
    }

    /// Process a request and return a response
    async fn process_request(request: Request, handle: &CoordinatorHandle) -> Response {
        match request {
            Request::Ping => Response::Pong,

            Request::GetStatus => match handle.status().await {
                Ok(status) => Response::Status { status },
                Err(e) => Response::error("UNAVAILABLE", e.to_string()),
            },

            Request::Execute { name, args, source } => {
                if source.is_internal() {
                    return Response::error(
                        "SOURCE_RESERVED",
                        format!("source '{}' is reserved for the daemon", source),
                    );
                }
                Response::Result(handle.execute(&name, args, source).await)
            }

            Request::Voice { text } => Response::Result(handle.voice(&text).await),

            Request::GetControlMode => Response::ControlMode {
                mode: handle.control_mode(),
                previous: None,
            },

            Request::SetControlMode { mode } => {
                let previous = handle.set_control_mode(mode);
                Response::ControlMode {
                    mode,
                    previous: Some(previous),
                }
            }

            Request::History { limit } => match handle.history(limit.min(HISTORY_LIMIT)).await {
                Ok(entries) => Response::History { entries },
                Err(e) => Response::error("UNAVAILABLE", e.to_string()),
            },

            Request::Subscribe => Response::Subscribed,
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
