//! Server lifecycle, connection acceptance and bookkeeping.
//!
//! A [`Server`] owns its configuration, its handler registry and, while
//! running, one accept loop plus one task per connection:
//!
//! ```text
//!   Acceptor ──accept──▶ Connection task ──▶ Router ──▶ Handler
//!      │                      │
//!      └── ShutdownSignal ────┘   (ConnectionTracker drains on stop)
//! ```

pub mod lifecycle;
pub mod listener;
pub mod netinfo;
pub mod shutdown;
pub mod tracker;

use crate::routing::RouteError;
use std::io;
use thiserror::Error;

pub use lifecycle::{Server, ServerState, ServerStatus};
pub use shutdown::{Shutdown, ShutdownSignal};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Route(#[from] RouteError),
}

#[derive(Debug, Error)]
pub enum AcceptError {
    #[error("server stopped")]
    ServerStopped,
    #[error("accept failed: {0}")]
    Io(#[from] io::Error),
}
