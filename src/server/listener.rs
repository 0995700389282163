use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::http::connection::{Connection, ConnectionSettings};
use crate::routing::Router;
use crate::server::shutdown::ShutdownSignal;
use crate::server::tracker::ConnectionTracker;
use crate::server::{AcceptError, ServerError};

const BACKLOG: u32 = 1024;
const MIN_BACKOFF: Duration = Duration::from_millis(5);
const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// A bound listening socket with an optional limit on concurrent
/// connections.
pub struct Acceptor {
    listener: TcpListener,
    limit: Option<Arc<Semaphore>>,
}

impl Acceptor {
    pub fn bind(config: &Config) -> Result<Self, ServerError> {
        let addr_text = config.listen_addr();
        let bind_error = |source| ServerError::Bind {
            addr: addr_text.clone(),
            source,
        };

        let addr: SocketAddr = addr_text.parse().map_err(|_| {
            bind_error(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "not a socket address",
            ))
        })?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(bind_error)?;
        socket.set_reuseaddr(true).map_err(bind_error)?;
        socket.bind(addr).map_err(bind_error)?;
        let listener = socket.listen(BACKLOG).map_err(bind_error)?;

        let limit = (config.max_connections > 0)
            .then(|| Arc::new(Semaphore::new(config.max_connections)));

        info!(
            address = %listener.local_addr().map_err(bind_error)?,
            max_connections = config.max_connections,
            "listener bound"
        );

        Ok(Self { listener, limit })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Waits for the next connection. When the connection limit is reached
    /// this waits for a slot first. Returns [`AcceptError::ServerStopped`]
    /// as soon as shutdown is signalled.
    pub async fn accept(
        &self,
        shutdown: &mut ShutdownSignal,
    ) -> Result<(TcpStream, SocketAddr, Option<OwnedSemaphorePermit>), AcceptError> {
        let next = async {
            let permit = match &self.limit {
                Some(limit) => Some(
                    Arc::clone(limit)
                        .acquire_owned()
                        .await
                        .map_err(|_| AcceptError::ServerStopped)?,
                ),
                None => None,
            };
            let (stream, peer) = self.listener.accept().await?;
            Ok((stream, peer, permit))
        };

        tokio::select! {
            biased;
            _ = shutdown.recv() => Err(AcceptError::ServerStopped),
            accepted = next => accepted,
        }
    }
}

/// Everything a connection task needs, shared across the accept loop.
#[derive(Clone)]
pub(crate) struct ServeContext {
    pub router: Arc<Router>,
    pub settings: Arc<ConnectionSettings>,
    pub shutdown: ShutdownSignal,
    pub tracker: ConnectionTracker,
}

/// Accepts connections until shutdown, spawning one task per connection.
pub(crate) async fn accept_loop(acceptor: Acceptor, ctx: ServeContext) {
    let mut shutdown = ctx.shutdown.clone();
    let mut backoff = MIN_BACKOFF;

    loop {
        match acceptor.accept(&mut shutdown).await {
            Ok((stream, peer, permit)) => {
                backoff = MIN_BACKOFF;
                if let Err(err) = stream.set_nodelay(true) {
                    debug!(%peer, error = %err, "failed to set TCP_NODELAY");
                }
                spawn_connection(stream, peer, permit, &ctx);
            }
            Err(AcceptError::ServerStopped) => {
                debug!("accept loop stopped");
                break;
            }
            Err(AcceptError::Io(err)) => {
                // Typically EMFILE or a connection reset before accept.
                warn!(error = %err, backoff_ms = backoff.as_millis() as u64, "accept failed");
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}

fn spawn_connection(
    stream: TcpStream,
    peer: SocketAddr,
    permit: Option<OwnedSemaphorePermit>,
    ctx: &ServeContext,
) {
    let guard = ctx.tracker.register(peer);
    let id = guard.id();
    debug!(id, %peer, "connection accepted");

    let mut conn = Connection::new(
        stream,
        peer,
        Arc::clone(&ctx.router),
        Arc::clone(&ctx.settings),
        ctx.shutdown.clone(),
    );

    let task = tokio::spawn(async move {
        let _guard = guard;
        let _permit = permit;
        if let Err(err) = conn.run().await {
            debug!(id, %peer, error = %err, "connection ended with error");
        }
        debug!(id, %peer, served = conn.served(), "connection closed");
    });
    ctx.tracker.attach(id, task.abort_handle());

    tokio::spawn(async move {
        if let Err(err) = task.await {
            if err.is_panic() {
                warn!(id, %peer, "connection task panicked");
            }
        }
    });
}
