use crate::http::headers::HeaderMap;
use crate::http::request::Version;
use crate::http::response::{Response, ResponseBody, StatusCode};
use bytes::Bytes;
use std::future::Future;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

const HTTP_VERSION: &str = "HTTP/1.1";
const SERVER_NAME: &str = concat!("localbackend/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("failed to write response: {0}")]
    Io(#[from] io::Error),
    #[error("timed out writing response")]
    Timeout,
}

/// Per-request facts the writer needs besides the response itself.
#[derive(Debug, Clone, Copy)]
pub struct WriteContext {
    /// Version of the request being answered.
    pub version: Version,
    /// HEAD requests get headers only.
    pub head_request: bool,
    /// Whether the connection may stay open, before looking at the body.
    pub keep_alive: bool,
    /// Limit applied to each individual socket write.
    pub write_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    /// Content-Length delimited (including zero-length).
    Length,
    Chunked,
    /// Body ends when the connection closes (streamed body to HTTP/1.0).
    CloseDelimited,
    /// No body on the wire at all.
    None,
}

/// Decides whether a connection stays open after this exchange.
///
/// An explicit `Connection: close` from either side wins. Otherwise
/// HTTP/1.1 stays open and HTTP/1.0 only when the client asked for
/// `keep-alive`.
pub fn negotiate_keep_alive(
    version: Version,
    request_headers: &HeaderMap,
    response_headers: &HeaderMap,
) -> bool {
    if response_headers.has_token("Connection", "close")
        || request_headers.has_token("Connection", "close")
    {
        return false;
    }
    match version {
        Version::Http11 => true,
        Version::Http10 => request_headers.has_token("Connection", "keep-alive"),
    }
}

/// Serializes a response and writes it to a stream.
pub struct ResponseWriter {
    head: Vec<u8>,
    body: ResponseBody,
    framing: Framing,
    keep_alive: bool,
    write_timeout: Option<Duration>,
}

impl ResponseWriter {
    pub fn new(response: Response, ctx: WriteContext) -> Self {
        let Response {
            status,
            mut headers,
            body,
        } = response;

        let mut framing = match (&body, status.allows_body()) {
            (_, false) => Framing::None,
            (ResponseBody::Stream(_), _) if ctx.version == Version::Http11 => Framing::Chunked,
            (ResponseBody::Stream(_), _) => Framing::CloseDelimited,
            _ => Framing::Length,
        };

        headers.remove("Transfer-Encoding");
        match framing {
            Framing::Length => {
                let len = body.len().unwrap_or(0);
                headers.insert("Content-Length", len.to_string());
            }
            Framing::Chunked => {
                headers.remove("Content-Length");
                headers.insert("Transfer-Encoding", "chunked");
            }
            Framing::CloseDelimited => {
                headers.remove("Content-Length");
            }
            Framing::None => {
                if status != StatusCode::NOT_MODIFIED {
                    headers.remove("Content-Length");
                }
            }
        }

        let keep_alive = ctx.keep_alive && framing != Framing::CloseDelimited;
        headers.insert("Connection", if keep_alive { "keep-alive" } else { "close" });
        if !headers.contains("Server") {
            headers.insert("Server", SERVER_NAME);
        }

        let body = if ctx.head_request || framing == Framing::None {
            if ctx.head_request && framing == Framing::Chunked {
                // Nothing follows the head, so the chunked header would lie.
                headers.remove("Transfer-Encoding");
            }
            framing = Framing::None;
            ResponseBody::Empty
        } else {
            body
        };

        Self {
            head: serialize_head(status, &headers),
            body,
            framing,
            keep_alive,
            write_timeout: ctx.write_timeout,
        }
    }

    /// Whether the connection may be reused once this response is written.
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Writes the whole response and flushes. Any failure means the
    /// connection must be discarded.
    pub async fn write_to_stream<W>(self, stream: &mut W) -> Result<(), WriteError>
    where
        W: AsyncWrite + Unpin,
    {
        let limit = self.write_timeout;
        let framing = self.framing;

        match self.body {
            ResponseBody::Full(bytes) if framing == Framing::Length => {
                let mut buf = self.head;
                buf.extend_from_slice(&bytes);
                guarded(limit, stream.write_all(&buf)).await?;
            }
            ResponseBody::Stream(mut rx) => {
                guarded(limit, stream.write_all(&self.head)).await?;
                while let Some(chunk) = rx.recv().await {
                    if chunk.is_empty() {
                        continue;
                    }
                    match framing {
                        Framing::Chunked => {
                            let frame = encode_chunk(&chunk);
                            guarded(limit, stream.write_all(&frame)).await?;
                        }
                        _ => guarded(limit, stream.write_all(&chunk)).await?,
                    }
                }
                if framing == Framing::Chunked {
                    guarded(limit, stream.write_all(b"0\r\n\r\n")).await?;
                }
            }
            _ => {
                guarded(limit, stream.write_all(&self.head)).await?;
            }
        }

        guarded(limit, stream.flush()).await?;
        Ok(())
    }
}

async fn guarded<F>(limit: Option<Duration>, fut: F) -> Result<(), WriteError>
where
    F: Future<Output = io::Result<()>>,
{
    match limit {
        Some(limit) => timeout(limit, fut)
            .await
            .map_err(|_| WriteError::Timeout)?
            .map_err(WriteError::from),
        None => fut.await.map_err(WriteError::from),
    }
}

fn serialize_head(status: StatusCode, headers: &HeaderMap) -> Vec<u8> {
    let mut buf = Vec::with_capacity(128);

    // Status line
    let status_line = format!(
        "{} {} {}\r\n",
        HTTP_VERSION,
        status.as_u16(),
        status.reason_phrase()
    );
    buf.extend_from_slice(status_line.as_bytes());

    // Headers
    for (k, v) in headers.iter() {
        buf.extend_from_slice(k.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(v.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    // Header/body separator
    buf.extend_from_slice(b"\r\n");

    buf
}

fn encode_chunk(chunk: &Bytes) -> Vec<u8> {
    let mut frame = format!("{:x}\r\n", chunk.len()).into_bytes();
    frame.extend_from_slice(chunk);
    frame.extend_from_slice(b"\r\n");
    frame
}

/// Interim response for `Expect: 100-continue`.
pub(crate) const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";
