//! `RpcClient` builder and the public call surface.
//!
//! The client is a thin handle: it validates what it can locally (destroyed,
//! connected, session) and forwards everything else to the connection task.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use arena_rpc_backoff::ReconnectConfig;
use arena_rpc_events::Subscription;
use arena_rpc_protocol::{Request, RequestId};
use arena_rpc_session::{OriginGuard, SessionConfig, SessionError, SessionSnapshot, SessionStore};
use arena_rpc_transport::{Connector, WebSocketConnector};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::connection::{
    Command, ConnectionManager, ConnectionSettings, ConnectionState, SharedState, read_state,
};
use crate::events::{ClientEvent, ClientEventBus, EventKind};
use crate::game::{GameApi, methods};
use crate::RpcError;

/// Default per-call timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on a single connection attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Path of the RPC endpoint on the game server.
pub const DEFAULT_PATH: &str = "/rpc/ws";

/// Client configuration. Usually assembled through [`RpcClientBuilder`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server `host[:port]`.
    pub host: String,
    /// Use `wss://` instead of `ws://`.
    pub secure: bool,
    pub path: String,
    /// Host checked by the origin guard. Defaults to `host`.
    pub origin_host: Option<String>,
    /// Development mode relaxes the origin guard to loopback and cloud IDE
    /// hosts. Defaults to on in debug builds.
    pub development: bool,
    /// Production origin allow-list.
    pub allowed_origins: Vec<String>,
    pub default_timeout: Duration,
    pub connect_timeout: Duration,
    pub reconnect: ReconnectConfig,
    pub session: SessionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost:8080".to_string(),
            secure: false,
            path: DEFAULT_PATH.to_string(),
            origin_host: None,
            development: cfg!(debug_assertions),
            allowed_origins: Vec::new(),
            default_timeout: DEFAULT_CALL_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect: ReconnectConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl ClientConfig {
    /// The WebSocket URL, `{ws|wss}://{host}{path}`.
    pub fn url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{scheme}://{}{}", self.host, self.path)
    }

    fn settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            url: self.url(),
            origin_host: self.origin_host.clone().unwrap_or_else(|| self.host.clone()),
            development: self.development,
            origin_guard: OriginGuard::new(&self.allowed_origins),
            connect_timeout: self.connect_timeout,
            reconnect: self.reconnect.clone(),
        }
    }
}

/// Builder for configuring an [`RpcClient`].
///
/// # Example
///
/// ```rust,no_run
/// use arena_rpc::prelude::*;
///
/// # async fn demo() -> Result<(), RpcError> {
/// let client = RpcClient::builder()
///     .host("play.example.com")
///     .secure(true)
///     .development(false)
///     .allow_origin("play.example.com")
///     .build();
/// client.connect().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct RpcClientBuilder {
    config: ClientConfig,
}

impl RpcClientBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the server `host[:port]`.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.config.secure = secure;
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.config.path = path.into();
        self
    }

    /// Sets the host checked by the origin guard.
    pub fn origin_host(mut self, host: impl Into<String>) -> Self {
        self.config.origin_host = Some(host.into());
        self
    }

    pub fn development(mut self, development: bool) -> Self {
        self.config.development = development;
        self
    }

    /// Adds a host to the production origin allow-list.
    pub fn allow_origin(mut self, host: impl Into<String>) -> Self {
        self.config.allowed_origins.push(host.into());
        self
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn reconnect(mut self, config: ReconnectConfig) -> Self {
        self.config.reconnect = config;
        self
    }

    pub fn session(mut self, config: SessionConfig) -> Self {
        self.config.session = config;
        self
    }

    /// Builds the client over WebSockets and starts its connection task.
    ///
    /// Must be called from within a Tokio runtime. The client does not
    /// connect until [`RpcClient::connect`] is called.
    pub fn build(self) -> RpcClient {
        self.build_with_connector(WebSocketConnector)
    }

    /// Like [`build`](Self::build), with a custom [`Connector`].
    pub fn build_with_connector<C: Connector>(self, connector: C) -> RpcClient {
        let state: SharedState = Arc::new(RwLock::new(ConnectionState::Disconnected));
        let events = ClientEventBus::new();
        let commands = ConnectionManager::spawn(
            connector,
            self.config.settings(),
            events.clone(),
            Arc::clone(&state),
        );
        tracing::debug!(url = %self.config.url(), "rpc client created");

        RpcClient {
            commands,
            state,
            session: Mutex::new(SessionStore::new(self.config.session.clone())),
            events,
            next_id: AtomicU64::new(1),
            destroyed: AtomicBool::new(false),
            default_timeout: self.config.default_timeout,
        }
    }
}

/// A JSON-RPC client over one persistent WebSocket.
///
/// `RpcClient` is `Send + Sync`; share it behind an `Arc` to call from
/// several tasks at once. Dropping it stops the connection task.
pub struct RpcClient {
    commands: mpsc::UnboundedSender<Command>,
    state: SharedState,
    session: Mutex<SessionStore>,
    events: ClientEventBus,
    next_id: AtomicU64,
    destroyed: AtomicBool,
    default_timeout: Duration,
}

impl RpcClient {
    /// Creates a new builder.
    pub fn builder() -> RpcClientBuilder {
        RpcClientBuilder::new()
    }

    /// Opens the connection.
    ///
    /// Resolves once the socket is open. If attempts fail, this waits
    /// through the reconnect schedule and fails only when retries are
    /// exhausted, the origin is rejected, or the client is disconnected or
    /// destroyed meanwhile.
    pub async fn connect(&self) -> Result<(), RpcError> {
        self.ensure_alive()?;
        let (reply, rx) = oneshot::channel();
        self.send(Command::Connect { reply })?;
        rx.await.unwrap_or(Err(RpcError::Destroyed))
    }

    /// Calls `method` and waits for its result.
    ///
    /// `params` must be a JSON object or `None`; `session_id` is added to
    /// it. `timeout` defaults to the configured default (10 s).
    ///
    /// # Errors
    /// Fails without touching the network with [`RpcError::Destroyed`],
    /// [`RpcError::NotConnected`], a [`SessionError`] (every method except
    /// `joinGame` needs a live session), or invalid params. Otherwise the
    /// error is the call's settlement: server error, timeout, or connection
    /// loss.
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, RpcError> {
        self.ensure_alive()?;
        if !self.is_connected() {
            return Err(RpcError::NotConnected);
        }

        let session_id = {
            let mut store = self.lock_session();
            if method == methods::JOIN_GAME {
                // Joining needs no session; a live one is passed along.
                (!store.is_expired())
                    .then(|| store.token().map(str::to_owned))
                    .flatten()
            } else {
                Some(store.validate_for_request()?.to_owned())
            }
        };

        let id = RequestId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let request = Request::new(id, method, params, session_id.as_deref())?;
        let timeout = timeout.unwrap_or(self.default_timeout);

        let (reply, rx) = oneshot::channel();
        self.send(Command::Call {
            request,
            timeout,
            reply,
        })?;
        match rx.await {
            Ok(result) => result,
            Err(_) if self.is_destroyed() => Err(RpcError::Destroyed),
            Err(_) => Err(RpcError::ConnectionClosed(
                "connection task stopped".to_owned(),
            )),
        }
    }

    /// Closes the connection and clears the session. Pending calls are
    /// rejected. The client can [`connect`](Self::connect) again later.
    pub async fn disconnect(&self, reason: impl Into<String>) {
        if self.is_destroyed() {
            return;
        }
        self.lock_session().clear();
        let (reply, rx) = oneshot::channel();
        if self
            .send(Command::Disconnect {
                reason: reason.into(),
                reply,
            })
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    /// Permanently shuts the client down: closes the socket, rejects
    /// pending calls, cancels any reconnect, clears the session and drops
    /// every event handler. Calling it again does nothing.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.commands.send(Command::Destroy);
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = ConnectionState::Destroyed;
        self.lock_session().clear();
        self.events.clear();
        tracing::info!("rpc client destroyed");
    }

    pub fn is_connected(&self) -> bool {
        !self.is_destroyed() && self.state() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        read_state(&self.state)
    }

    /// The current session, or `None` if there is none.
    pub fn session(&self) -> Option<SessionSnapshot> {
        self.lock_session().snapshot()
    }

    /// Stores the session token carried by a `joinGame` result.
    pub fn set_session_from_join(&self, result: &Value) -> Result<(), SessionError> {
        self.lock_session().set_from_join(result)
    }

    pub fn clear_session(&self) {
        self.lock_session().clear();
    }

    /// Registers an event handler. See [`ClientEventBus::on`].
    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription<EventKind, ClientEvent>
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.events.on(kind, handler)
    }

    pub fn events(&self) -> &ClientEventBus {
        &self.events
    }

    /// Typed wrappers for the game methods.
    pub fn game(&self) -> GameApi<'_> {
        GameApi::new(self)
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    fn ensure_alive(&self) -> Result<(), RpcError> {
        if self.is_destroyed() {
            Err(RpcError::Destroyed)
        } else {
            Ok(())
        }
    }

    fn send(&self, command: Command) -> Result<(), RpcError> {
        self.commands.send(command).map_err(|_| RpcError::Destroyed)
    }

    // Session methods never panic while holding the lock.
    fn lock_session(&self) -> MutexGuard<'_, SessionStore> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("state", &self.state())
            .field("destroyed", &self.is_destroyed())
            .finish_non_exhaustive()
    }
}
