use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::http::connection::ConnectionSettings;
use crate::http::request::Method;
use crate::routing::{Handler, HandlerRegistry, RouteError};
use crate::server::listener::{accept_loop, Acceptor, ServeContext};
use crate::server::netinfo::reachable_url;
use crate::server::shutdown::Shutdown;
use crate::server::tracker::ConnectionTracker;
use crate::server::ServerError;

/// How long aborted connection tasks get to unwind after the grace period.
const ABORT_SETTLE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl ServerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerState::Stopped => "stopped",
            ServerState::Starting => "starting",
            ServerState::Running => "running",
            ServerState::Stopping => "stopping",
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot published on every state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStatus {
    pub state: ServerState,
    /// Bound address while running.
    pub local_addr: Option<SocketAddr>,
    /// URL clients can use while running.
    pub url: Option<String>,
}

impl ServerStatus {
    fn stopped() -> Self {
        Self {
            state: ServerState::Stopped,
            local_addr: None,
            url: None,
        }
    }
}

struct Running {
    shutdown: Shutdown,
    acceptor: JoinHandle<()>,
    tracker: ConnectionTracker,
    local_addr: SocketAddr,
}

/// An embedded HTTP server driven by host lifecycle events.
///
/// Routes are registered up front; the first [`Server::start`] freezes
/// them. The server can then be started and stopped any number of times.
///
/// ```no_run
/// # use localbackend::{Config, Server};
/// # use localbackend::http::response::Response;
/// # use localbackend::routing::handler;
/// # async fn demo() -> anyhow::Result<()> {
/// let server = Server::new(Config::default());
/// server.get("/ping", handler::sync(|_req| Response::ok("pong")))?;
/// server.on_host_foreground().await?;
/// // ...
/// server.on_host_terminate().await;
/// # Ok(())
/// # }
/// ```
pub struct Server {
    config: Config,
    registry: HandlerRegistry,
    /// Held for the whole of a start or stop, so transitions never
    /// interleave.
    transition: Mutex<Option<Running>>,
    status: watch::Sender<ServerStatus>,
}

impl Server {
    pub fn new(config: Config) -> Self {
        let (status, _) = watch::channel(ServerStatus::stopped());
        Self {
            config,
            registry: HandlerRegistry::new(),
            transition: Mutex::new(None),
            status,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Binds `handler` to `method` and `pattern`. Fails once the server has
    /// been started.
    pub fn register(
        &self,
        method: Method,
        pattern: &str,
        handler: impl Handler,
    ) -> Result<(), RouteError> {
        self.registry.register(method, pattern, handler)
    }

    pub fn get(&self, pattern: &str, handler: impl Handler) -> Result<(), RouteError> {
        self.register(Method::GET, pattern, handler)
    }

    pub fn post(&self, pattern: &str, handler: impl Handler) -> Result<(), RouteError> {
        self.register(Method::POST, pattern, handler)
    }

    pub fn put(&self, pattern: &str, handler: impl Handler) -> Result<(), RouteError> {
        self.register(Method::PUT, pattern, handler)
    }

    pub fn delete(&self, pattern: &str, handler: impl Handler) -> Result<(), RouteError> {
        self.register(Method::DELETE, pattern, handler)
    }

    pub fn options(&self, pattern: &str, handler: impl Handler) -> Result<(), RouteError> {
        self.register(Method::OPTIONS, pattern, handler)
    }

    /// Starts accepting connections and returns the bound address. Calling
    /// this while running returns the current address and does nothing
    /// else. On a bind failure the server stays stopped.
    pub async fn start(&self) -> Result<SocketAddr, ServerError> {
        let mut running = self.transition.lock().await;
        if let Some(run) = running.as_ref() {
            debug!(address = %run.local_addr, "start ignored, already running");
            return Ok(run.local_addr);
        }

        self.publish(ServerState::Starting, None);
        let router = self.registry.freeze();

        let bound = Acceptor::bind(&self.config).and_then(|acceptor| {
            let local_addr = acceptor.local_addr().map_err(|source| ServerError::Bind {
                addr: self.config.listen_addr(),
                source,
            })?;
            Ok((acceptor, local_addr))
        });
        let (acceptor, local_addr) = match bound {
            Ok(bound) => bound,
            Err(err) => {
                self.publish(ServerState::Stopped, None);
                return Err(err);
            }
        };

        let shutdown = Shutdown::new();
        let tracker = ConnectionTracker::new();
        let ctx = ServeContext {
            router,
            settings: Arc::new(ConnectionSettings::from(&self.config)),
            shutdown: shutdown.subscribe(),
            tracker: tracker.clone(),
        };
        let acceptor = tokio::spawn(accept_loop(acceptor, ctx));

        *running = Some(Running {
            shutdown,
            acceptor,
            tracker,
            local_addr,
        });
        self.publish(ServerState::Running, Some(local_addr));
        Ok(local_addr)
    }

    /// Stops accepting, lets in-flight requests finish within the grace
    /// period, then aborts whatever is left. Does nothing when stopped.
    pub async fn stop(&self) {
        let mut running = self.transition.lock().await;
        let Some(run) = running.take() else {
            debug!("stop ignored, not running");
            return;
        };

        self.publish(ServerState::Stopping, Some(run.local_addr));
        run.shutdown.trigger();

        if let Err(err) = run.acceptor.await {
            warn!(error = %err, "accept loop did not exit cleanly");
        }

        let grace = self.config.shutdown_grace_period;
        if !run.tracker.wait_idle(grace).await {
            let aborted = run.tracker.abort_all();
            warn!(
                aborted,
                grace_ms = grace.as_millis() as u64,
                "grace period elapsed, aborting connections"
            );
            if !run.tracker.wait_idle(ABORT_SETTLE).await {
                warn!(remaining = run.tracker.len(), "connections still unwinding");
            }
        }

        self.publish(ServerState::Stopped, None);
    }

    /// The host came to the foreground: make sure the server is running.
    pub async fn on_host_foreground(&self) -> Result<SocketAddr, ServerError> {
        self.start().await
    }

    /// The host went to the background. Stops the server unless
    /// `stop_on_background` is off.
    pub async fn on_host_background(&self) {
        if self.config.stop_on_background {
            self.stop().await;
        } else {
            debug!("host in background, server keeps running");
        }
    }

    pub async fn on_host_terminate(&self) {
        self.stop().await;
    }

    pub fn state(&self) -> ServerState {
        self.status.borrow().state
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.status.borrow().local_addr
    }

    /// Receives a [`ServerStatus`] on every state change.
    pub fn subscribe(&self) -> watch::Receiver<ServerStatus> {
        self.status.subscribe()
    }

    fn publish(&self, state: ServerState, local_addr: Option<SocketAddr>) {
        let url = match state {
            ServerState::Running => local_addr.map(reachable_url),
            _ => None,
        };
        match (&url, local_addr) {
            (Some(url), Some(addr)) => info!(state = %state, address = %addr, url = %url, "server state changed"),
            _ => info!(state = %state, "server state changed"),
        }
        self.status.send_replace(ServerStatus {
            state,
            local_addr,
            url,
        });
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("state", &self.state())
            .field("local_addr", &self.local_addr())
            .field("registry", &self.registry)
            .finish()
    }
}
