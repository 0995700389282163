//! localbackend - Embedded HTTP/1.1 server for host applications
//!
//! A host app registers request handlers, then drives the server through
//! its own lifecycle events (foreground, background, terminate). The
//! server accepts TCP connections, parses requests, routes them to the
//! registered handlers and writes the responses back.

pub mod api;
pub mod config;
pub mod http;
pub mod routing;
pub mod server;

pub use config::Config;
pub use server::{Server, ServerError, ServerState, ServerStatus};
