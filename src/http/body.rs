//! Request bodies.
//!
//! A body is either already materialized (it arrived together with the
//! request head) or a stream fed by the connection task. The stream is
//! backed by a channel of capacity one and the connection waits for that
//! slot to free up before it reads from the socket again, so a slow
//! handler applies backpressure to the client instead of the server
//! buffering the whole upload.

use crate::http::parser::ParseError;
use bytes::{Bytes, BytesMut};
use std::io;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum BodyError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("i/o error while reading request body: {0}")]
    Io(#[from] io::Error),
    #[error("timed out waiting for request body")]
    Timeout,
    #[error("connection closed before the request body was complete")]
    Incomplete,
}

pub(crate) enum Frame {
    Data(Bytes),
    End,
    Error(BodyError),
}

/// Request body handed to a handler.
#[derive(Debug)]
pub struct Body {
    kind: Kind,
}

#[derive(Debug)]
enum Kind {
    Full(Bytes),
    Stream(StreamState),
}

#[derive(Debug)]
struct StreamState {
    rx: mpsc::Receiver<Frame>,
    finished: bool,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Frame::Data(b) => write!(f, "Data({} bytes)", b.len()),
            Frame::End => f.write_str("End"),
            Frame::Error(e) => write!(f, "Error({e})"),
        }
    }
}

impl Body {
    pub fn empty() -> Self {
        Self::full(Bytes::new())
    }

    pub fn full(bytes: impl Into<Bytes>) -> Self {
        Self {
            kind: Kind::Full(bytes.into()),
        }
    }

    /// Creates a streaming body and the sender the connection feeds it with.
    pub(crate) fn channel() -> (BodySender, Body) {
        let (tx, rx) = mpsc::channel(1);
        let body = Body {
            kind: Kind::Stream(StreamState {
                rx,
                finished: false,
            }),
        };
        (BodySender { tx }, body)
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.kind, Kind::Stream(_))
    }

    /// Bytes of a materialized body; `None` while it is still a stream.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.kind {
            Kind::Full(bytes) => Some(bytes.as_ref()),
            Kind::Stream(_) => None,
        }
    }

    /// Returns the next chunk, or `None` once the body is exhausted.
    ///
    /// A materialized body yields its bytes as a single chunk.
    pub async fn chunk(&mut self) -> Option<Result<Bytes, BodyError>> {
        match &mut self.kind {
            Kind::Full(bytes) => {
                if bytes.is_empty() {
                    None
                } else {
                    Some(Ok(std::mem::take(bytes)))
                }
            }
            Kind::Stream(state) => {
                if state.finished {
                    return None;
                }
                match state.rx.recv().await {
                    Some(Frame::Data(bytes)) => Some(Ok(bytes)),
                    Some(Frame::End) => {
                        state.finished = true;
                        None
                    }
                    Some(Frame::Error(err)) => {
                        state.finished = true;
                        Some(Err(err))
                    }
                    None => {
                        state.finished = true;
                        Some(Err(BodyError::Incomplete))
                    }
                }
            }
        }
    }

    /// Reads the rest of the body into memory and keeps it, turning a
    /// stream into a materialized body.
    pub async fn materialize(&mut self) -> Result<&[u8], BodyError> {
        if self.is_streaming() {
            let mut buf = BytesMut::new();
            while let Some(chunk) = self.chunk().await {
                buf.extend_from_slice(&chunk?);
            }
            self.kind = Kind::Full(buf.freeze());
        }
        Ok(self.as_bytes().unwrap_or_default())
    }

    /// Consumes the body and returns all remaining bytes.
    pub async fn to_bytes(mut self) -> Result<Bytes, BodyError> {
        self.materialize().await?;
        match self.kind {
            Kind::Full(bytes) => Ok(bytes),
            Kind::Stream(_) => Ok(Bytes::new()),
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::full(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::full(bytes)
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Self::full(Bytes::from_static(s.as_bytes()))
    }
}

/// Connection-side half of a streaming body.
#[derive(Debug)]
pub(crate) struct BodySender {
    tx: mpsc::Sender<Frame>,
}

/// The handler dropped its body before reading all of it.
#[derive(Debug)]
pub(crate) struct ReceiverGone;

impl BodySender {
    /// Waits until the handler has taken the previous chunk.
    pub(crate) async fn ready(&self) -> Result<(), ReceiverGone> {
        self.tx.reserve().await.map(drop).map_err(|_| ReceiverGone)
    }

    pub(crate) async fn send_data(&self, bytes: Bytes) -> Result<(), ReceiverGone> {
        self.tx
            .send(Frame::Data(bytes))
            .await
            .map_err(|_| ReceiverGone)
    }

    pub(crate) async fn finish(&self) {
        let _ = self.tx.send(Frame::End).await;
    }

    pub(crate) async fn fail(&self, err: BodyError) {
        let _ = self.tx.send(Frame::Error(err)).await;
    }
}
