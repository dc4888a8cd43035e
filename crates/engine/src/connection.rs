//! Engine connection manager.
//!
//! [`EngineConnection`] owns the engine process and its command socket and
//! moves through `Disconnected -> Connecting -> Connected`. A failed write
//! triggers exactly one recovery cycle: drop the socket, stop the process
//! (subject to [`RestartPolicy`]), wait the cooldown, reconnect and retry
//! the write once. If that retry fails too the caller gets
//! [`EngineError::Unreachable`]; there is no further looping.
//!
//! The whole connect-or-retry sequence runs under one mutex, so concurrent
//! callers are serialised and a half-open channel is never shared.

use std::io;
use std::time::Duration;

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, watch, Mutex};

use crate::command::EngineCommand;
use crate::config::{EngineConfig, Endpoint, RestartPolicy};
use crate::connector::{Connector, EngineStream, TcpConnector};
use crate::error::EngineError;
use crate::events::EngineEvent;
use crate::process::{EngineProcess, Launch, ProcessSupervisor};

/// Broadcast channel capacity for connection events.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// State of the engine command socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketState {
    Disconnected,
    Connecting,
    Connected,
}

/// How a command reached the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Written on the existing (or freshly opened) socket.
    Direct,
    /// Written after the one-shot reconnect following a failed write.
    Recovered,
}

/// Resources guarded by the connection mutex.
struct Channel {
    process: Box<dyn ProcessSupervisor>,
    connector: Box<dyn Connector>,
    stream: Option<EngineStream>,
    closed: bool,
}

/// Single persistent command channel to the compute engine.
///
/// Created once at startup and shared as `Arc<EngineConnection>` between
/// the dispatch facade and the status poller.
pub struct EngineConnection {
    endpoint: Endpoint,
    settle: Duration,
    cooldown: Duration,
    restart_policy: RestartPolicy,
    channel: Mutex<Channel>,
    state_tx: watch::Sender<SocketState>,
    event_tx: broadcast::Sender<EngineEvent>,
}

impl EngineConnection {
    /// Manager for the real engine executable over TCP.
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_parts(
            config,
            Box::new(EngineProcess::new(config)),
            Box::new(TcpConnector::new(config.connect_timeout)),
        )
    }

    /// Manager with a custom process supervisor and transport.
    pub fn with_parts(
        config: &EngineConfig,
        process: Box<dyn ProcessSupervisor>,
        connector: Box<dyn Connector>,
    ) -> Self {
        let (state_tx, _) = watch::channel(SocketState::Disconnected);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            endpoint: config.endpoint.clone(),
            settle: config.settle,
            cooldown: config.cooldown,
            restart_policy: config.restart_policy,
            channel: Mutex::new(Channel {
                process,
                connector,
                stream: None,
                closed: false,
            }),
            state_tx,
            event_tx,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Current socket state.
    pub fn state(&self) -> SocketState {
        *self.state_tx.borrow()
    }

    /// Observe socket state changes.
    pub fn watch_state(&self) -> watch::Receiver<SocketState> {
        self.state_tx.subscribe()
    }

    /// Subscribe to process and socket events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    /// Make sure the engine is running and the socket is open.
    ///
    /// A no-op when already connected. Launches the engine if needed and
    /// waits the settle interval before dialing.
    pub async fn connect(&self) -> Result<(), EngineError> {
        let mut channel = self.channel.lock().await;
        if channel.closed {
            return Err(EngineError::Closed);
        }
        self.connect_locked(&mut channel).await
    }

    /// Send a typed command.
    pub async fn send(&self, command: &EngineCommand) -> Result<Delivery, EngineError> {
        tracing::debug!(job_id = %command.job_id(), verb = command.verb(), "Sending engine command");
        self.send_command(&command.to_string()).await
    }

    /// Write one command line to the engine.
    ///
    /// Connects first if needed (propagating that failure). On a write
    /// failure performs the single reconnect-and-retry cycle.
    pub async fn send_command(&self, command: &str) -> Result<Delivery, EngineError> {
        let line = command.trim_end_matches('\n');
        if line.contains('\n') {
            return Err(EngineError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "engine commands must be a single line",
            )));
        }
        let mut frame = String::with_capacity(line.len() + 1);
        frame.push_str(line);
        frame.push('\n');

        let mut channel = self.channel.lock().await;
        if channel.closed {
            return Err(EngineError::Closed);
        }

        self.connect_locked(&mut channel).await?;

        let first_error = match write_frame(&mut channel, &frame).await {
            Ok(()) => return Ok(Delivery::Direct),
            Err(e) => e,
        };

        tracing::warn!(
            endpoint = %self.endpoint,
            error = %first_error,
            "Engine command write failed, recovering channel",
        );
        self.recover_locked(&mut channel, &first_error).await;

        if let Err(e) = self.connect_locked(&mut channel).await {
            tracing::error!(endpoint = %self.endpoint, error = %e, "Engine reconnect failed");
            return Err(EngineError::Unreachable(format!(
                "reconnect after write failure failed: {e}"
            )));
        }

        match write_frame(&mut channel, &frame).await {
            Ok(()) => {
                tracing::info!(endpoint = %self.endpoint, "Engine command delivered after reconnect");
                Ok(Delivery::Recovered)
            }
            Err(e) => {
                tracing::error!(endpoint = %self.endpoint, error = %e, "Engine retry write failed");
                self.drop_stream(&mut channel, &e);
                Err(EngineError::Unreachable(format!("retry write failed: {e}")))
            }
        }
    }

    /// Close the socket and terminate the engine process.
    ///
    /// Further commands fail with [`EngineError::Closed`].
    pub async fn shutdown(&self) {
        let mut channel = self.channel.lock().await;
        if channel.closed {
            return;
        }
        channel.closed = true;

        if let Some(mut stream) = channel.stream.take() {
            let _ = stream.shutdown().await;
            self.publish(EngineEvent::Disconnected {
                reason: "shutdown".into(),
            });
        }
        self.set_state(SocketState::Disconnected);

        match channel.process.terminate().await {
            Ok(()) => self.publish(EngineEvent::ProcessTerminated),
            Err(e) => tracing::error!(error = %e, "Failed to terminate engine process"),
        }
        tracing::info!("Engine connection shut down");
    }

    // ---- private helpers ----

    async fn connect_locked(&self, channel: &mut Channel) -> Result<(), EngineError> {
        if channel.stream.is_some() {
            return Ok(());
        }
        self.set_state(SocketState::Connecting);

        match channel.process.ensure_running().await {
            Ok(Launch::Started { pid }) => {
                self.publish(EngineEvent::ProcessLaunched { pid });
                tracing::info!(
                    pid,
                    settle_ms = self.settle.as_millis() as u64,
                    "Waiting for engine to bind its listener",
                );
                tokio::time::sleep(self.settle).await;
            }
            Ok(Launch::AlreadyRunning) => {}
            Err(e) => {
                tracing::error!(error = %e, "Engine launch failed");
                self.set_state(SocketState::Disconnected);
                return Err(e);
            }
        }

        match channel.connector.connect(&self.endpoint).await {
            Ok(stream) => {
                channel.stream = Some(stream);
                self.set_state(SocketState::Connected);
                self.publish(EngineEvent::Connected {
                    endpoint: self.endpoint.to_string(),
                });
                tracing::info!(endpoint = %self.endpoint, "Connected to engine");
                Ok(())
            }
            Err(source) => {
                tracing::warn!(endpoint = %self.endpoint, error = %source, "Engine connect failed");
                self.set_state(SocketState::Disconnected);
                Err(EngineError::Connect {
                    endpoint: self.endpoint.to_string(),
                    source,
                })
            }
        }
    }

    /// Tear down after a failed write and wait the cooldown.
    async fn recover_locked(&self, channel: &mut Channel, cause: &io::Error) {
        self.drop_stream(channel, cause);

        let restart = match self.restart_policy {
            RestartPolicy::Always => true,
            RestartPolicy::WhenExited => !channel.process.is_alive(),
        };

        if restart {
            match channel.process.terminate().await {
                Ok(()) => self.publish(EngineEvent::ProcessTerminated),
                Err(e) => tracing::warn!(error = %e, "Failed to terminate engine process"),
            }
        } else {
            tracing::info!("Engine process still alive, reopening socket only");
        }

        self.publish(EngineEvent::RetryScheduled {
            cooldown_ms: self.cooldown.as_millis() as u64,
        });
        tokio::time::sleep(self.cooldown).await;
    }

    fn drop_stream(&self, channel: &mut Channel, cause: &io::Error) {
        channel.stream = None;
        self.set_state(SocketState::Disconnected);
        self.publish(EngineEvent::Disconnected {
            reason: cause.to_string(),
        });
    }

    fn set_state(&self, state: SocketState) {
        self.state_tx.send_replace(state);
    }

    fn publish(&self, event: EngineEvent) {
        let _ = self.event_tx.send(event);
    }
}

async fn write_frame(channel: &mut Channel, frame: &str) -> io::Result<()> {
    let stream = channel
        .stream
        .as_mut()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no engine socket"))?;
    stream.write_all(frame.as_bytes()).await?;
    stream.flush().await
}
