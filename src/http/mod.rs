//! HTTP protocol implementation.
//!
//! HTTP/1.1 with keep-alive, pipelining, chunked bodies and streamed
//! request bodies.
//!
//! # Architecture
//!
//! The HTTP layer is organized into several submodules:
//!
//! - **`connection`**: The per-connection request-response state machine
//! - **`parser`**: Request head parsing and incremental body decoding
//! - **`request`**: HTTP request representation handed to handlers
//! - **`body`**: Materialized or streamed request bodies
//! - **`headers`**: Case-insensitive, order-preserving header map
//! - **`query`**: Query string and path decoding
//! - **`response`**: HTTP response representation with builder pattern
//! - **`writer`**: Serializes and writes HTTP responses to the client
//! - **`cors`**: Cross-origin headers added to every response
//!
//! # Connection State Machine
//!
//! Each client connection goes through a state machine:
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← Wait for a complete request head
//!        └──────┬──────┘
//!               │ Request received
//!               ▼
//!        ┌──────────────────┐
//!        │   Processing     │ ← Route, run handler, stream body
//!        └──────┬───────────┘
//!               │ Response ready
//!               ▼
//!        ┌──────────────────┐
//!        │    Writing       │ ← Send response to client
//!        └──────┬───────────┘
//!               │ Response sent
//!               ├─ Keep-Alive → Reading (same connection)
//!               └─ Close → Closed
//! ```
//!
//! Parse errors and shutdown force `Close`. So does a streamed request body
//! that the handler left unread.

pub mod body;
pub mod connection;
pub mod cors;
pub mod headers;
pub mod parser;
pub mod query;
pub mod request;
pub mod response;
pub mod writer;
