//! The connection task: owns the socket and drives the connection state
//! machine.
//!
//! ```text
//!                 Connect
//! Disconnected ─────────────→ Connecting ──open──→ Connected
//!      ▲                        │    ▲                 │
//!      │ exhausted /            │    │ delay           │ close / error
//!      │ origin rejected        ▼    │ elapsed         ▼
//!      └──────────────────── Reconnecting ◄────────────┘
//!
//! any state ──Destroy──→ Destroyed
//! ```
//!
//! The [`RpcClient`](crate::RpcClient) talks to the task only through
//! [`Command`]s. Everything the task owns (socket, correlator, backoff
//! counter) is touched from this one task, so none of it needs a lock. The
//! shared [`ConnectionState`] is a read-mostly mirror for the facade.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use arena_rpc_backoff::{ReconnectConfig, ReconnectScheduler};
use arena_rpc_protocol::{Codec, Inbound, JsonCodec, Request, RequestId};
use arena_rpc_session::OriginGuard;
use arena_rpc_transport::{Connection, Connector, TransportError};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::correlator::{Reply, RequestCorrelator};
use crate::events::{ClientEvent, ClientEventBus, publish};
use crate::RpcError;

/// Lifecycle state of a client's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Terminal.
    Destroyed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

pub(crate) type SharedState = Arc<RwLock<ConnectionState>>;

/// Reads the shared state. A poisoned lock still holds a valid state.
pub(crate) fn read_state(state: &SharedState) -> ConnectionState {
    *state.read().unwrap_or_else(|e| e.into_inner())
}

fn write_state(state: &SharedState, next: ConnectionState) {
    *state.write().unwrap_or_else(|e| e.into_inner()) = next;
}

/// Moves to `next` unless the state is already `Destroyed`, which is
/// terminal. Check and write share one guard so a concurrent `destroy()`
/// cannot be overwritten.
fn transition(state: &SharedState, next: ConnectionState) -> bool {
    let mut current = state.write().unwrap_or_else(|e| e.into_inner());
    let previous = *current;
    if previous == next || previous == ConnectionState::Destroyed {
        return false;
    }
    *current = next;
    drop(current);
    debug!(from = %previous, to = %next, "state change");
    true
}

type Waiter = oneshot::Sender<Result<(), RpcError>>;

/// Commands sent from the facade to the connection task.
pub(crate) enum Command {
    /// Open the connection (or join an attempt already in flight).
    Connect { reply: Waiter },
    /// Send a request and deliver its settlement to `reply`.
    Call {
        request: Request,
        timeout: Duration,
        reply: Reply,
    },
    /// Close the connection and stay disconnected until the next `Connect`.
    Disconnect {
        reason: String,
        reply: oneshot::Sender<()>,
    },
    /// Close everything and stop the task.
    Destroy,
}

/// Everything the task needs to open a connection.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionSettings {
    pub url: String,
    pub origin_host: String,
    pub development: bool,
    pub origin_guard: OriginGuard,
    pub connect_timeout: Duration,
    pub reconnect: ReconnectConfig,
}

/// What interrupted a wait while not connected.
enum Interrupt {
    Disconnect {
        reason: String,
        reply: oneshot::Sender<()>,
    },
    Destroy,
}

/// Why serving an open connection stopped.
enum ServeEnd {
    Lost(String),
    Disconnect {
        reason: String,
        reply: oneshot::Sender<()>,
    },
    Destroy,
}

/// Where the task goes after a connect cycle.
enum Next {
    Idle,
    Destroy,
}

/// The connection actor.
pub(crate) struct ConnectionManager<C: Connector> {
    connector: C,
    settings: ConnectionSettings,
    scheduler: ReconnectScheduler,
    correlator: RequestCorrelator,
    codec: JsonCodec,
    events: ClientEventBus,
    state: SharedState,
    /// `connect()` callers waiting for the current cycle to open or fail.
    waiters: Vec<Waiter>,
}

impl<C: Connector> ConnectionManager<C> {
    /// Spawns the task and returns its command sender.
    ///
    /// Must be called from within a Tokio runtime.
    pub(crate) fn spawn(
        connector: C,
        settings: ConnectionSettings,
        events: ClientEventBus,
        state: SharedState,
    ) -> mpsc::UnboundedSender<Command> {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (correlator, expired_rx) = RequestCorrelator::new();
        let manager = Self {
            connector,
            scheduler: ReconnectScheduler::new(settings.reconnect.clone()),
            settings,
            correlator,
            codec: JsonCodec,
            events,
            state,
            waiters: Vec::new(),
        };
        tokio::spawn(manager.run(command_rx, expired_rx));
        command_tx
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut expired: mpsc::UnboundedReceiver<RequestId>,
    ) {
        debug!(url = %self.settings.url, "connection task started");
        loop {
            // Disconnected: nothing happens until a command arrives.
            match commands.recv().await {
                None | Some(Command::Destroy) => break,
                Some(Command::Connect { reply }) => self.waiters.push(reply),
                Some(Command::Call { request, reply, .. }) => {
                    debug!(id = %request.id, method = %request.method, "call while disconnected");
                    let _ = reply.send(Err(RpcError::NotConnected));
                    continue;
                }
                Some(Command::Disconnect { reply, .. }) => {
                    let _ = reply.send(());
                    continue;
                }
            }

            match self.connect_cycle(&mut commands, &mut expired).await {
                Next::Idle => {}
                Next::Destroy => break,
            }
        }
        self.shutdown(&mut commands);
    }

    /// Runs from `Connecting` until the client is `Disconnected` again
    /// (caller disconnect, origin rejection, exhaustion) or destroyed.
    async fn connect_cycle(
        &mut self,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        expired: &mut mpsc::UnboundedReceiver<RequestId>,
    ) -> Next {
        loop {
            self.set_state(ConnectionState::Connecting);

            if let Err(rejected) = self
                .settings
                .origin_guard
                .validate(&self.settings.origin_host, self.settings.development)
            {
                self.fail_waiters(|| RpcError::Origin(rejected.clone()));
                publish(&self.events, ClientEvent::Error(RpcError::Origin(rejected)));
                self.scheduler.reset();
                self.set_state(ConnectionState::Disconnected);
                return Next::Idle;
            }

            let connect_timeout = self.settings.connect_timeout;
            let attempt = tokio::time::timeout(
                connect_timeout,
                self.connector.connect(&self.settings.url),
            );
            let opened = match race(attempt, commands, &mut self.waiters).await {
                Ok(Ok(Ok(conn))) => Some(conn),
                Ok(Ok(Err(e))) => {
                    warn!(url = %self.settings.url, error = %e, "connection attempt failed");
                    publish(&self.events, ClientEvent::Error(e.into()));
                    None
                }
                Ok(Err(_elapsed)) => {
                    warn!(url = %self.settings.url, timeout_ms = connect_timeout.as_millis() as u64, "connection attempt timed out");
                    let e = TransportError::Timeout(connect_timeout);
                    publish(&self.events, ClientEvent::Error(e.into()));
                    None
                }
                Err(interrupt) => return self.interrupted(interrupt),
            };

            if let Some(conn) = opened {
                self.scheduler.reset();
                self.set_state(ConnectionState::Connected);
                info!(conn = %conn.id(), url = %self.settings.url, "connected");
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
                publish(&self.events, ClientEvent::Connected);

                let reason = match self.serve(&conn, commands, expired).await {
                    ServeEnd::Lost(reason) => reason,
                    ServeEnd::Disconnect { reason, reply } => {
                        close_quietly(&conn).await;
                        self.left_connected(&reason);
                        self.scheduler.reset();
                        self.set_state(ConnectionState::Disconnected);
                        info!(reason = %reason, "disconnected by caller");
                        publish(&self.events, ClientEvent::Disconnected { reason });
                        let _ = reply.send(());
                        return Next::Idle;
                    }
                    ServeEnd::Destroy => {
                        close_quietly(&conn).await;
                        return Next::Destroy;
                    }
                };

                self.left_connected(&reason);
                warn!(conn = %conn.id(), reason = %reason, "connection lost");
                publish(&self.events, ClientEvent::Disconnected { reason });
            }

            let Some((attempt, delay)) = self.scheduler.record_failure() else {
                let attempts = self.scheduler.config().max_attempts;
                error!(attempts, url = %self.settings.url, "max reconnect attempts exceeded");
                self.scheduler.reset();
                self.set_state(ConnectionState::Disconnected);
                self.fail_waiters(|| RpcError::MaxReconnectAttemptsExceeded { attempts });
                publish(
                    &self.events,
                    ClientEvent::Error(RpcError::MaxReconnectAttemptsExceeded { attempts }),
                );
                return Next::Idle;
            };

            self.set_state(ConnectionState::Reconnecting);
            info!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting");
            publish(&self.events, ClientEvent::Reconnecting { attempt, delay });

            if let Err(interrupt) = race(tokio::time::sleep(delay), commands, &mut self.waiters).await {
                return self.interrupted(interrupt);
            }
        }
    }

    /// Pumps frames, commands and call timeouts while connected.
    async fn serve(
        &mut self,
        conn: &C::Connection,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        expired: &mut mpsc::UnboundedReceiver<RequestId>,
    ) -> ServeEnd {
        loop {
            tokio::select! {
                frame = conn.recv() => match frame {
                    Ok(Some(bytes)) => self.handle_frame(&bytes),
                    Ok(None) => return ServeEnd::Lost("closed by server".to_owned()),
                    Err(e) => {
                        warn!(conn = %conn.id(), error = %e, "receive failed");
                        return ServeEnd::Lost(e.to_string());
                    }
                },
                command = commands.recv() => match command {
                    None | Some(Command::Destroy) => return ServeEnd::Destroy,
                    Some(Command::Disconnect { reason, reply }) => {
                        return ServeEnd::Disconnect { reason, reply };
                    }
                    Some(Command::Connect { reply }) => {
                        let _ = reply.send(Ok(()));
                    }
                    Some(Command::Call { request, timeout, reply }) => {
                        if let Err(reason) = self.send_call(conn, request, timeout, reply).await {
                            return ServeEnd::Lost(reason);
                        }
                    }
                },
                Some(id) = expired.recv() => {
                    if let Some(err) = self.correlator.expire(id) {
                        publish(&self.events, ClientEvent::Error(err));
                    }
                }
            }
        }
    }

    /// Registers and sends one call. A send failure means the connection is
    /// gone; the call is rejected with the rest by `reject_all`.
    async fn send_call(
        &mut self,
        conn: &C::Connection,
        request: Request,
        timeout: Duration,
        reply: Reply,
    ) -> Result<(), String> {
        let bytes = match self.codec.encode(&request) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(id = %request.id, error = %e, "failed to encode request");
                let _ = reply.send(Err(e.into()));
                return Ok(());
            }
        };

        if let Err(e) = self
            .correlator
            .register(request.id, request.method.as_str(), timeout, reply)
        {
            warn!(id = %request.id, error = %e, "request not registered");
            return Ok(());
        }

        debug!(id = %request.id, method = %request.method, pending = self.correlator.len(), "sending request");
        conn.send(&bytes).await.map_err(|e| {
            warn!(conn = %conn.id(), id = %request.id, error = %e, "send failed");
            e.to_string()
        })
    }

    fn handle_frame(&mut self, bytes: &[u8]) {
        match self.codec.decode_inbound(bytes) {
            Err(e) => {
                warn!(error = %e, len = bytes.len(), "dropping malformed frame");
                publish(&self.events, ClientEvent::Error(e.into()));
            }
            Ok(Inbound::Notification(outcome)) => {
                debug!("notification received");
                publish(&self.events, ClientEvent::Message(outcome));
            }
            Ok(Inbound::Response { id, outcome }) => match self.correlator.settle(id, outcome) {
                Ok(()) => {}
                Err(e) if e.is_security_relevant() => {
                    error!(%id, error = %e, "response id mismatch, dropping frame");
                    publish(&self.events, ClientEvent::Error(e));
                }
                Err(e) => {
                    warn!(%id, error = %e, "unmatched response");
                    publish(&self.events, ClientEvent::Error(e));
                }
            },
        }
    }

    /// Bookkeeping shared by every way of leaving `Connected`.
    fn left_connected(&mut self, reason: &str) {
        let rejected = self.correlator.reject_all(reason);
        if rejected > 0 {
            warn!(rejected, reason, "pending calls rejected");
        }
    }

    fn interrupted(&mut self, interrupt: Interrupt) -> Next {
        match interrupt {
            Interrupt::Destroy => Next::Destroy,
            Interrupt::Disconnect { reason, reply } => {
                info!(reason = %reason, "connection attempt cancelled by caller");
                self.fail_waiters(|| RpcError::ConnectionClosed(reason.clone()));
                self.scheduler.reset();
                self.set_state(ConnectionState::Disconnected);
                let _ = reply.send(());
                Next::Idle
            }
        }
    }

    fn fail_waiters(&mut self, make_error: impl Fn() -> RpcError) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(make_error()));
        }
    }

    fn set_state(&self, next: ConnectionState) {
        transition(&self.state, next);
    }

    fn shutdown(&mut self, commands: &mut mpsc::UnboundedReceiver<Command>) {
        self.correlator.reject_all("client destroyed");
        self.fail_waiters(|| RpcError::Destroyed);
        write_state(&self.state, ConnectionState::Destroyed);

        // Settle anything that raced the shutdown.
        commands.close();
        while let Ok(command) = commands.try_recv() {
            match command {
                Command::Connect { reply } => {
                    let _ = reply.send(Err(RpcError::Destroyed));
                }
                Command::Call { reply, .. } => {
                    let _ = reply.send(Err(RpcError::Destroyed));
                }
                Command::Disconnect { reply, .. } => {
                    let _ = reply.send(());
                }
                Command::Destroy => {}
            }
        }
        info!(url = %self.settings.url, "connection task stopped");
    }
}

/// Drives `fut` while answering commands that can be handled without a
/// connection. `Disconnect` and `Destroy` drop `fut` and return.
async fn race<F: Future>(
    fut: F,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    waiters: &mut Vec<Waiter>,
) -> Result<F::Output, Interrupt> {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            output = &mut fut => return Ok(output),
            command = commands.recv() => match command {
                None | Some(Command::Destroy) => return Err(Interrupt::Destroy),
                Some(Command::Disconnect { reason, reply }) => {
                    return Err(Interrupt::Disconnect { reason, reply });
                }
                Some(Command::Connect { reply }) => waiters.push(reply),
                Some(Command::Call { request, reply, .. }) => {
                    debug!(id = %request.id, method = %request.method, "call while not connected");
                    let _ = reply.send(Err(RpcError::NotConnected));
                }
            },
        }
    }
}

async fn close_quietly<T: Connection>(conn: &T) {
    if let Err(e) = conn.close().await {
        debug!(conn = %conn.id(), error = %e, "close failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
        assert_eq!(ConnectionState::Destroyed.to_string(), "destroyed");
    }

    #[test]
    fn test_set_state_never_leaves_destroyed() {
        let state: SharedState = Arc::new(RwLock::new(ConnectionState::Destroyed));
        let (correlator, _expired) = RequestCorrelator::new();
        let manager = ConnectionManager {
            connector: arena_rpc_transport::WebSocketConnector,
            settings: ConnectionSettings {
                url: "ws://localhost/rpc/ws".into(),
                origin_host: "localhost".into(),
                development: true,
                origin_guard: OriginGuard::default(),
                connect_timeout: Duration::from_secs(1),
                reconnect: ReconnectConfig::default(),
            },
            scheduler: ReconnectScheduler::default(),
            correlator,
            codec: JsonCodec,
            events: ClientEventBus::new(),
            state: Arc::clone(&state),
            waiters: Vec::new(),
        };

        manager.set_state(ConnectionState::Connecting);
        assert_eq!(read_state(&state), ConnectionState::Destroyed);
    }

    #[test]
    fn test_transition_concurrent_destroy_is_never_overwritten() {
        for _ in 0..50 {
            let state: SharedState = Arc::new(RwLock::new(ConnectionState::Disconnected));
            let workers: Vec<_> = (0..4)
                .map(|i| {
                    let state = Arc::clone(&state);
                    std::thread::spawn(move || {
                        for n in 0..500 {
                            let next = if (n + i) % 2 == 0 {
                                ConnectionState::Connecting
                            } else {
                                ConnectionState::Reconnecting
                            };
                            transition(&state, next);
                        }
                    })
                })
                .collect();

            write_state(&state, ConnectionState::Destroyed);
            for worker in workers {
                worker.join().unwrap();
            }
            assert_eq!(read_state(&state), ConnectionState::Destroyed);
        }
    }

    #[test]
    fn test_transition_same_state_is_noop() {
        let state: SharedState = Arc::new(RwLock::new(ConnectionState::Connected));
        assert!(!transition(&state, ConnectionState::Connected));
        assert!(transition(&state, ConnectionState::Reconnecting));
        assert_eq!(read_state(&state), ConnectionState::Reconnecting);
    }
}
