//! Request routing.
//!
//! The host registers `(method, pattern, handler)` triples with a
//! [`HandlerRegistry`] before the server starts. Starting the server freezes
//! the registry into an immutable [`Router`] that connection tasks share
//! through an `Arc` and read without locking.
//!
//! Patterns are made of literal segments and named parameters:
//!
//! ```text
//! /api/items           literal only
//! /api/items/{id}      binds `id` to any single non-empty segment
//! ```
//!
//! When several patterns match a path the one with more literal segments
//! wins, then the one with the longer literal prefix. Two overlapping
//! patterns that this rule cannot order are rejected at registration.

pub mod handler;
pub mod pattern;
pub mod registry;
pub mod router;

use crate::http::request::Method;
use thiserror::Error;

pub use handler::{BoxFuture, Handler, SyncHandler};
pub use pattern::{PathParams, PathPattern};
pub use registry::HandlerRegistry;
pub use router::{Resolution, Router, RouterBuilder};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("route {method:?} {pattern} is ambiguous with {existing}")]
    Conflict {
        method: Method,
        pattern: String,
        existing: String,
    },
    #[error("invalid route pattern {pattern:?}: {reason}")]
    InvalidPattern {
        pattern: String,
        reason: &'static str,
    },
    #[error("routes cannot be registered after the server has started")]
    RegistryFrozen,
}
