use super::endpoint::Endpoint;
use super::transport::{FrameSink, Link, Transport};
use crate::subscription::protocol::{ControlFrame, InboundFrame};
use anyhow::Result;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Lifecycle state of the shared connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

/// Observable connection status
///
/// `epoch` is incremented on every transition into `Open`, so two statuses
/// with the same epoch refer to the same underlying link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub epoch: u64,
}

impl ConnectionStatus {
    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }
}

/// Receives what the connection hears and decides what to replay on open.
pub trait FrameRouter: Send + Sync + 'static {
    /// Frames written on a freshly opened link before anything else
    fn on_open(&self, epoch: u64) -> Vec<ControlFrame>;

    /// Deliver one inbound frame. Called in arrival order from the
    /// connection task and must not block.
    fn route(&self, frame: InboundFrame);
}

/// Commands sent from the public API to the background connection task.
enum Command {
    Frame { text: String, epoch: u64 },
    Shutdown,
}

enum Outcome {
    Closed,
    Shutdown,
}

/// Owns the single shared connection to the real-time endpoint
///
/// The background task is spawned lazily on first use and keeps the link up
/// until [`ConnectionManager::shutdown`]: every close or failed attempt is
/// followed by a reconnect after a fixed delay.
pub struct ConnectionManager {
    endpoint: Endpoint,
    reconnect_delay: Duration,
    transport: Arc<dyn Transport>,
    router: Arc<dyn FrameRouter>,
    status_tx: Arc<watch::Sender<ConnectionStatus>>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    cmd_rx: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(
        endpoint: Endpoint,
        reconnect_delay: Duration,
        transport: Arc<dyn Transport>,
        router: Arc<dyn FrameRouter>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = watch::channel(ConnectionStatus {
            state: ConnectionState::Disconnected,
            epoch: 0,
        });

        Self {
            endpoint,
            reconnect_delay,
            transport,
            router,
            status_tx: Arc::new(status_tx),
            cmd_tx,
            cmd_rx: Mutex::new(Some(cmd_rx)),
            task: Mutex::new(None),
        }
    }

    /// Spawn the connection task if it is not running yet.
    ///
    /// Must be called from within a tokio runtime. No-op after the first
    /// call, including after shutdown.
    pub fn start(&self) {
        let Some(cmd_rx) = self.cmd_rx.lock().take() else {
            return;
        };

        self.status_tx
            .send_modify(|status| status.state = ConnectionState::Connecting);

        let worker = Worker {
            endpoint: self.endpoint.clone(),
            reconnect_delay: self.reconnect_delay,
            transport: Arc::clone(&self.transport),
            router: Arc::clone(&self.router),
            status_tx: Arc::clone(&self.status_tx),
            cmd_rx,
            epoch: 0,
            attempt: 0,
        };

        info!(endpoint = %self.endpoint, "Starting connection manager");
        *self.task.lock() = Some(tokio::spawn(worker.run()));
    }

    /// Best-effort send. Returns false when the frame was dropped because the
    /// connection is not open (or could not be serialized).
    pub fn send<T: Serialize>(&self, frame: &T) -> bool {
        self.start();

        let status = self.status();
        if !status.is_open() {
            debug!(state = ?status.state, "Connection not open, dropping frame");
            return false;
        }

        let text = match serde_json::to_string(frame) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Failed to serialize outbound frame");
                return false;
            }
        };

        self.cmd_tx
            .send(Command::Frame {
                text,
                epoch: status.epoch,
            })
            .is_ok()
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status_tx.borrow()
    }

    pub fn state(&self) -> ConnectionState {
        self.status().state
    }

    pub fn is_open(&self) -> bool {
        self.status().is_open()
    }

    /// Watch status transitions (state and epoch)
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Close the connection and stop reconnecting. Waits for the task to exit.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown);

        // Never started: make sure it never will be
        drop(self.cmd_rx.lock().take());

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Connection task ended abnormally");
            }
        }

        self.status_tx
            .send_modify(|status| status.state = ConnectionState::Disconnected);
    }
}

// ── Background connection task ──────────────────────────────────────────────

struct Worker {
    endpoint: Endpoint,
    reconnect_delay: Duration,
    transport: Arc<dyn Transport>,
    router: Arc<dyn FrameRouter>,
    status_tx: Arc<watch::Sender<ConnectionStatus>>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    epoch: u64,
    attempt: u64,
}

impl Worker {
    async fn run(mut self) {
        loop {
            self.attempt += 1;
            self.set_state(ConnectionState::Connecting);
            debug!(endpoint = %self.endpoint, attempt = self.attempt, "Connecting");

            let connected = tokio::select! {
                result = self.transport.connect(&self.endpoint) => Some(result),
                () = discard_until_shutdown(&mut self.cmd_rx) => None,
            };

            let outcome = match connected {
                None => Outcome::Shutdown,
                Some(Ok(link)) => self.serve(link).await,
                Some(Err(e)) => {
                    warn!(
                        endpoint = %self.endpoint,
                        attempt = self.attempt,
                        error = %e,
                        "Connection attempt failed"
                    );
                    Outcome::Closed
                }
            };

            if let Outcome::Shutdown = outcome {
                break;
            }

            self.set_state(ConnectionState::Disconnected);
            info!(
                delay_ms = self.reconnect_delay.as_millis() as u64,
                "Reconnecting after delay"
            );

            let shutdown = tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay) => false,
                () = discard_until_shutdown(&mut self.cmd_rx) => true,
            };
            if shutdown {
                break;
            }
        }

        self.set_state(ConnectionState::Disconnected);
        info!(endpoint = %self.endpoint, "Connection manager stopped");
    }

    /// Drive one open link until it closes or shutdown is requested.
    async fn serve(&mut self, link: Link) -> Outcome {
        let Link {
            mut sink,
            mut stream,
        } = link;

        self.epoch += 1;
        self.attempt = 0;
        let epoch = self.epoch;
        self.status_tx.send_replace(ConnectionStatus {
            state: ConnectionState::Open,
            epoch,
        });
        info!(endpoint = %self.endpoint, epoch, "Connection open");

        let replay = self.router.on_open(epoch);
        if !replay.is_empty() {
            info!(count = replay.len(), epoch, "Replaying subscriptions");
        }
        for frame in &replay {
            if let Err(e) = write_frame(&mut sink, frame).await {
                warn!(error = %e, epoch, topic = %frame.topic(), "Replay failed, dropping connection");
                return Outcome::Closed;
            }
        }

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Frame { text, epoch: queued_in }) if queued_in == epoch => {
                        if let Err(e) = sink.send(text).await {
                            warn!(error = %e, epoch, "Send failed, dropping connection");
                            return Outcome::Closed;
                        }
                    }
                    Some(Command::Frame { .. }) => {
                        debug!(epoch, "Dropping frame queued for a previous connection");
                    }
                    Some(Command::Shutdown) | None => {
                        self.set_state(ConnectionState::Closing);
                        if let Err(e) = sink.close().await {
                            debug!(error = %e, "Error while closing connection");
                        }
                        return Outcome::Shutdown;
                    }
                },
                frame = stream.next() => match frame {
                    Some(Ok(text)) => self.router.route(InboundFrame::parse(&text)),
                    Some(Err(e)) => {
                        warn!(error = %e, epoch, "Connection error");
                        return Outcome::Closed;
                    }
                    None => {
                        info!(epoch, "Connection closed by server");
                        return Outcome::Closed;
                    }
                },
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.status_tx.send_modify(|status| status.state = state);
    }
}

/// Drop frames while no link is open; resolves once shutdown is requested.
async fn discard_until_shutdown(cmd_rx: &mut mpsc::UnboundedReceiver<Command>) {
    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            Command::Frame { .. } => debug!("Connection not open, dropping frame"),
            Command::Shutdown => return,
        }
    }
}

async fn write_frame(sink: &mut FrameSink, frame: &ControlFrame) -> Result<()> {
    let text = serde_json::to_string(frame)?;
    sink.send(text).await
}
