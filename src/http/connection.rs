use bytes::{Buf, Bytes, BytesMut};
use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;

use crate::config::Config;
use crate::http::body::{Body, BodyError, BodySender};
use crate::http::cors::CorsConfig;
use crate::http::headers::HeaderMap;
use crate::http::parser::{
    parse_request_head, BodyDecoder, Decoded, ParseError, ParseLimits, RequestHead,
};
use crate::http::request::{Method, Request, Version};
use crate::http::response::{Response, StatusCode};
use crate::http::writer::{self, negotiate_keep_alive, ResponseWriter, WriteContext, WriteError};
use crate::routing::{Resolution, Router};
use crate::server::shutdown::ShutdownSignal;

const READ_CHUNK: usize = 8 * 1024;

/// After an error response, unread client bytes are drained for this long
/// so closing the socket does not reset the connection under the response.
const LINGER_TIMEOUT: Duration = Duration::from_millis(250);
const LINGER_MAX_BYTES: usize = 256 * 1024;

/// Per-connection settings derived from the server configuration.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub limits: ParseLimits,
    pub keep_alive_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub loopback_only: bool,
    pub cors: CorsConfig,
}

impl From<&Config> for ConnectionSettings {
    fn from(config: &Config) -> Self {
        Self {
            limits: ParseLimits {
                max_header_bytes: config.max_header_bytes,
                max_body_bytes: config.max_body_bytes,
            },
            keep_alive_timeout: config.keep_alive_timeout,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            loopback_only: config.loopback_only,
            cors: config.cors.clone(),
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Write(#[from] WriteError),
    #[error("connection i/o error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug)]
enum ReadError {
    Parse(ParseError),
    Timeout,
    Io(io::Error),
}

impl From<ParseError> for ReadError {
    fn from(err: ParseError) -> Self {
        ReadError::Parse(err)
    }
}

pub enum ConnectionState {
    Reading,
    Processing(RequestHead),
    Writing(ResponseWriter),
    Closed,
}

/// How a streamed request body ended up.
enum PumpOutcome {
    Complete,
    /// The handler dropped the body before reading all of it.
    Abandoned,
    Failed(ReadError),
}

/// One client connection, served request by request.
pub struct Connection<S = TcpStream> {
    stream: S,
    peer: SocketAddr,
    buffer: BytesMut,
    state: ConnectionState,
    router: Arc<Router>,
    settings: Arc<ConnectionSettings>,
    shutdown: ShutdownSignal,
    served: u64,
    linger: bool,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(
        stream: S,
        peer: SocketAddr,
        router: Arc<Router>,
        settings: Arc<ConnectionSettings>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            stream,
            peer,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            state: ConnectionState::Reading,
            router,
            settings,
            shutdown,
            served: 0,
            linger: false,
        }
    }

    /// Number of responses written so far.
    pub fn served(&self) -> u64 {
        self.served
    }

    pub async fn run(&mut self) -> Result<(), ConnectionError> {
        if self.settings.loopback_only && !is_loopback(self.peer.ip()) {
            tracing::warn!(peer = %self.peer, "rejecting non-loopback client");
            let response = Response::json_error(StatusCode::FORBIDDEN, "Forbidden");
            self.state = ConnectionState::Writing(self.error_writer(response));
        }

        loop {
            match std::mem::replace(&mut self.state, ConnectionState::Closed) {
                ConnectionState::Reading => {
                    self.state = match self.read_head().await {
                        Ok(Some(head)) => ConnectionState::Processing(head),
                        Ok(None) => ConnectionState::Closed,
                        Err(err) => match self.read_failure(err) {
                            Some(response) => ConnectionState::Writing(self.error_writer(response)),
                            None => ConnectionState::Closed,
                        },
                    };
                }

                ConnectionState::Processing(head) => {
                    let writer = self.process(head).await;
                    self.state = ConnectionState::Writing(writer);
                }

                ConnectionState::Writing(writer) => {
                    let keep_alive = writer.keep_alive();
                    if let Err(err) = writer.write_to_stream(&mut self.stream).await {
                        tracing::debug!(peer = %self.peer, error = %err, "failed to write response");
                        return Err(err.into());
                    }
                    self.served += 1;

                    self.state = if keep_alive && !self.shutdown.is_shutdown() {
                        ConnectionState::Reading
                    } else {
                        ConnectionState::Closed
                    };
                }

                ConnectionState::Closed => {
                    let _ = self.stream.shutdown().await;
                    if self.linger {
                        self.drain_input().await;
                    }
                    break;
                }
            }
        }

        Ok(())
    }

    /// Reads until a full request head is buffered. `Ok(None)` means the
    /// connection should close quietly: the peer went away, the idle
    /// timeout expired, or the server is shutting down.
    async fn read_head(&mut self) -> Result<Option<RequestHead>, ReadError> {
        let mut deadline: Option<Instant> = None;

        loop {
            if let Some((head, consumed)) =
                parse_request_head(&self.buffer, &self.settings.limits)?
            {
                self.buffer.advance(consumed);
                return Ok(Some(head));
            }

            // Until the first byte of a request line arrives the connection
            // is idle, whether or not it has served a request yet.
            let idle = self.buffer.iter().all(|b| *b == b'\r' || *b == b'\n');
            let read = if idle {
                let mut shutdown = self.shutdown.clone();
                tokio::select! {
                    _ = shutdown.recv() => return Ok(None),
                    read = tokio::time::timeout(
                        self.settings.keep_alive_timeout,
                        read_into(&mut self.stream, &mut self.buffer),
                    ) => match read {
                        Ok(read) => read,
                        Err(_) => {
                            tracing::debug!(peer = %self.peer, "idle connection timed out");
                            return Ok(None);
                        }
                    },
                }
            } else {
                let deadline =
                    *deadline.get_or_insert_with(|| Instant::now() + self.settings.read_timeout);
                tokio::time::timeout_at(deadline, read_into(&mut self.stream, &mut self.buffer))
                    .await
                    .map_err(|_| ReadError::Timeout)?
            };

            match read {
                Ok(0) => return Ok(None),
                Ok(_) => {}
                Err(err) => return Err(ReadError::Io(err)),
            }
        }
    }

    async fn process(&mut self, head: RequestHead) -> ResponseWriter {
        let started = std::time::Instant::now();
        let method = head.method;
        let version = head.version;
        let target = head.target.clone();
        let request_connection: HeaderMap = head
            .headers
            .get_all("Connection")
            .map(|value| ("Connection", value))
            .collect();
        let expect_continue =
            version == Version::Http11 && head.headers.has_token("Expect", "100-continue");

        let mut decoder = BodyDecoder::new(head.framing, self.settings.limits.max_body_bytes);
        let mut buffered = BytesMut::new();
        let complete = loop {
            match decoder.decode(&mut self.buffer) {
                Ok(Decoded::Data(bytes)) => buffered.extend_from_slice(&bytes),
                Ok(Decoded::Done) => break true,
                Ok(Decoded::NeedMore) => break false,
                Err(err) => return self.reject(&err, method, &target, started),
            }
        };

        let (body, streaming) = if complete {
            (Body::full(buffered.freeze()), None)
        } else {
            let (sender, body) = Body::channel();
            (body, Some((sender, buffered.freeze())))
        };

        let mut request = match Request::from_head(head, body, self.peer, self.shutdown.clone()) {
            Ok(request) => request,
            Err(err) => return self.reject(&err, method, &target, started),
        };

        let handler = match self.router.resolve(method, request.path()) {
            Resolution::Matched { handler, params } => {
                request.set_params(params);
                Some(handler)
            }
            Resolution::NotFound => None,
        };

        // Only invite the upload when someone is going to read it.
        if handler.is_some() && streaming.is_some() && expect_continue {
            if let Err(err) = self.stream.write_all(writer::CONTINUE).await {
                tracing::debug!(peer = %self.peer, error = %err, "failed to send 100 Continue");
            }
        }

        let (response, body_complete) = match handler {
            Some(handler) => {
                let response = handler.call(request);
                match streaming {
                    None => (response.await, true),
                    Some((sender, initial)) => {
                        let pump = pump_body(
                            &mut self.stream,
                            &mut self.buffer,
                            decoder,
                            sender,
                            initial,
                            self.settings.read_timeout,
                        );
                        match drive(response, pump).await {
                            (response, Some(PumpOutcome::Complete)) => (response, true),
                            (_, Some(PumpOutcome::Failed(err))) => {
                                return match self.read_failure(err) {
                                    Some(response) => {
                                        self.log_request(method, &target, response.status, started);
                                        self.error_writer(response)
                                    }
                                    None => self.error_writer(Response::from_body_error(
                                        &BodyError::Incomplete,
                                    )),
                                };
                            }
                            (response, _) => (response, false),
                        }
                    }
                }
            }
            None => {
                drop(request);
                let response = if method == Method::OPTIONS && self.settings.cors.enabled {
                    Response::empty(StatusCode::OK)
                } else {
                    Response::not_found()
                };
                (response, streaming.is_none())
            }
        };

        let mut response = response;
        self.settings.cors.apply(&mut response.headers);
        if !body_complete {
            self.linger = true;
        }

        let keep_alive = body_complete
            && !self.shutdown.is_shutdown()
            && negotiate_keep_alive(version, &request_connection, &response.headers);

        self.log_request(method, &target, response.status, started);

        ResponseWriter::new(
            response,
            WriteContext {
                version,
                head_request: method == Method::HEAD,
                keep_alive,
                write_timeout: Some(self.settings.write_timeout),
            },
        )
    }

    /// Maps a failed read to the response owed to the client, if any.
    fn read_failure(&self, err: ReadError) -> Option<Response> {
        match err {
            ReadError::Parse(err) => {
                if err.is_too_large() {
                    tracing::warn!(peer = %self.peer, error = %err, "rejecting oversized request");
                } else {
                    tracing::debug!(peer = %self.peer, error = %err, "rejecting request");
                }
                Some(Response::from_parse_error(&err))
            }
            ReadError::Timeout => {
                tracing::debug!(peer = %self.peer, "timed out reading request");
                Some(Response::json_error(
                    StatusCode::REQUEST_TIMEOUT,
                    "Request Timeout",
                ))
            }
            ReadError::Io(err) => {
                tracing::debug!(peer = %self.peer, error = %err, "read failed");
                None
            }
        }
    }

    fn reject(
        &mut self,
        err: &ParseError,
        method: Method,
        target: &str,
        started: std::time::Instant,
    ) -> ResponseWriter {
        let response = self
            .read_failure(ReadError::Parse(err.clone()))
            .unwrap_or_else(|| Response::from_parse_error(err));
        self.log_request(method, target, response.status, started);
        self.error_writer(response)
    }

    /// A writer for a response after which the connection closes.
    fn error_writer(&mut self, mut response: Response) -> ResponseWriter {
        self.linger = true;
        self.settings.cors.apply(&mut response.headers);
        ResponseWriter::new(
            response,
            WriteContext {
                version: Version::Http11,
                head_request: false,
                keep_alive: false,
                write_timeout: Some(self.settings.write_timeout),
            },
        )
    }

    async fn drain_input(&mut self) {
        let mut scratch = [0u8; 4096];
        let drain = async {
            let mut total = 0;
            while total < LINGER_MAX_BYTES {
                match self.stream.read(&mut scratch).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => total += n,
                }
            }
        };
        let _ = tokio::time::timeout(LINGER_TIMEOUT, drain).await;
    }

    fn log_request(
        &self,
        method: Method,
        target: &str,
        status: StatusCode,
        started: std::time::Instant,
    ) {
        tracing::info!(
            peer = %self.peer,
            method = method.as_str(),
            path = target,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request"
        );
    }
}

/// Runs the handler while feeding its body from the socket. Returns the
/// response and, if the body pump finished, how it ended.
async fn drive<H, P>(handler: H, pump: P) -> (Response, Option<PumpOutcome>)
where
    H: Future<Output = Response>,
    P: Future<Output = PumpOutcome>,
{
    tokio::pin!(handler);
    tokio::pin!(pump);
    let mut outcome = None;

    let response = loop {
        tokio::select! {
            response = &mut handler => break response,
            result = &mut pump, if outcome.is_none() => {
                let failed = matches!(result, PumpOutcome::Failed(_));
                outcome = Some(result);
                if failed {
                    // The handler sees the error through its body; its
                    // response is replaced by the caller.
                    break Response::empty(StatusCode::BAD_REQUEST);
                }
            }
        }
    };

    if outcome.is_none() {
        // The handler may have read the last chunk without waiting for the
        // end marker. Give the pump one poll to record that.
        outcome = std::future::poll_fn(|cx| match Pin::as_mut(&mut pump).poll(cx) {
            Poll::Ready(outcome) => Poll::Ready(Some(outcome)),
            Poll::Pending => Poll::Ready(None),
        })
        .await;
    }

    (response, outcome)
}

/// Moves body chunks from the socket to the handler, reading from the
/// socket only once the handler has taken the previous chunk.
async fn pump_body<S>(
    stream: &mut S,
    buffer: &mut BytesMut,
    mut decoder: BodyDecoder,
    sender: BodySender,
    initial: Bytes,
    read_timeout: Duration,
) -> PumpOutcome
where
    S: AsyncRead + Unpin,
{
    if !initial.is_empty() && sender.send_data(initial).await.is_err() {
        return PumpOutcome::Abandoned;
    }

    loop {
        match decoder.decode(buffer) {
            Ok(Decoded::Data(bytes)) => {
                if sender.send_data(bytes).await.is_err() {
                    return PumpOutcome::Abandoned;
                }
            }
            Ok(Decoded::Done) => {
                sender.finish().await;
                return PumpOutcome::Complete;
            }
            Ok(Decoded::NeedMore) => {
                if sender.ready().await.is_err() {
                    return PumpOutcome::Abandoned;
                }
                match tokio::time::timeout(read_timeout, read_into(stream, buffer)).await {
                    Ok(Ok(0)) => {
                        let err = decoder
                            .eof()
                            .err()
                            .unwrap_or(ParseError::Malformed("request body truncated"));
                        sender.fail(BodyError::Parse(err.clone())).await;
                        return PumpOutcome::Failed(ReadError::Parse(err));
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(err)) => {
                        sender.fail(BodyError::Incomplete).await;
                        return PumpOutcome::Failed(ReadError::Io(err));
                    }
                    Err(_) => {
                        sender.fail(BodyError::Timeout).await;
                        return PumpOutcome::Failed(ReadError::Timeout);
                    }
                }
            }
            Err(err) => {
                sender.fail(BodyError::Parse(err.clone())).await;
                return PumpOutcome::Failed(ReadError::Parse(err));
            }
        }
    }
}

async fn read_into<S>(stream: &mut S, buffer: &mut BytesMut) -> io::Result<usize>
where
    S: AsyncRead + Unpin,
{
    buffer.reserve(READ_CHUNK);
    stream.read_buf(buffer).await
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => {
            v6.is_loopback() || v6.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback())
        }
    }
}
