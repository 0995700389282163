use crate::http::body::BodyError;
use crate::http::headers::HeaderMap;
use crate::http::parser::ParseError;
use bytes::Bytes;
use serde::Serialize;
use tokio::sync::mpsc;

/// HTTP status code, always within 100..=599.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatusCode(u16);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(200);
    pub const CREATED: StatusCode = StatusCode(201);
    pub const NO_CONTENT: StatusCode = StatusCode(204);
    pub const NOT_MODIFIED: StatusCode = StatusCode(304);
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    pub const FORBIDDEN: StatusCode = StatusCode(403);
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    pub const REQUEST_TIMEOUT: StatusCode = StatusCode(408);
    pub const PAYLOAD_TOO_LARGE: StatusCode = StatusCode(413);
    pub const REQUEST_HEADER_FIELDS_TOO_LARGE: StatusCode = StatusCode(431);
    pub const INTERNAL_SERVER_ERROR: StatusCode = StatusCode(500);

    /// Returns `None` outside 100..=599.
    pub fn from_u16(code: u16) -> Option<Self> {
        (100..=599).contains(&code).then_some(StatusCode(code))
    }

    /// Returns the numeric HTTP status code.
    ///
    /// ```
    /// # use localbackend::http::response::StatusCode;
    /// assert_eq!(StatusCode::OK.as_u16(), 200);
    /// assert_eq!(StatusCode::NOT_FOUND.as_u16(), 404);
    /// ```
    pub fn as_u16(&self) -> u16 {
        self.0
    }

    /// Returns the standard reason phrase, or a generic one for the class
    /// when the code is not a well-known one.
    ///
    /// ```
    /// # use localbackend::http::response::StatusCode;
    /// assert_eq!(StatusCode::OK.reason_phrase(), "OK");
    /// assert_eq!(StatusCode::from_u16(299).unwrap().reason_phrase(), "Success");
    /// ```
    pub fn reason_phrase(&self) -> &'static str {
        match self.0 {
            100 => "Continue",
            101 => "Switching Protocols",
            200 => "OK",
            201 => "Created",
            202 => "Accepted",
            204 => "No Content",
            206 => "Partial Content",
            301 => "Moved Permanently",
            302 => "Found",
            303 => "See Other",
            304 => "Not Modified",
            307 => "Temporary Redirect",
            308 => "Permanent Redirect",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            408 => "Request Timeout",
            409 => "Conflict",
            411 => "Length Required",
            413 => "Payload Too Large",
            415 => "Unsupported Media Type",
            422 => "Unprocessable Entity",
            429 => "Too Many Requests",
            431 => "Request Header Fields Too Large",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            505 => "HTTP Version Not Supported",
            100..=199 => "Informational",
            200..=299 => "Success",
            300..=399 => "Redirection",
            400..=499 => "Client Error",
            _ => "Server Error",
        }
    }

    /// 1xx, 204 and 304 responses never carry a body.
    pub fn allows_body(&self) -> bool {
        !matches!(self.0, 100..=199 | 204 | 304)
    }
}

/// Response payload.
#[derive(Debug, Default)]
pub enum ResponseBody {
    #[default]
    Empty,
    Full(Bytes),
    /// Chunks produced while the response is being written. The writer uses
    /// chunked transfer-encoding for HTTP/1.1 clients.
    Stream(mpsc::Receiver<Bytes>),
}

impl ResponseBody {
    /// Creates a streamed body and the sender that feeds it. The response
    /// ends when every sender is dropped.
    pub fn channel(capacity: usize) -> (mpsc::Sender<Bytes>, ResponseBody) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, ResponseBody::Stream(rx))
    }

    /// Length of a fully materialized body.
    pub fn len(&self) -> Option<usize> {
        match self {
            ResponseBody::Empty => Some(0),
            ResponseBody::Full(bytes) => Some(bytes.len()),
            ResponseBody::Stream(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }
}

impl From<Vec<u8>> for ResponseBody {
    fn from(bytes: Vec<u8>) -> Self {
        ResponseBody::Full(bytes.into())
    }
}

impl From<Bytes> for ResponseBody {
    fn from(bytes: Bytes) -> Self {
        ResponseBody::Full(bytes)
    }
}

impl From<String> for ResponseBody {
    fn from(s: String) -> Self {
        ResponseBody::Full(s.into())
    }
}

impl From<&'static str> for ResponseBody {
    fn from(s: &'static str) -> Self {
        ResponseBody::Full(Bytes::from_static(s.as_bytes()))
    }
}

/// An HTTP response produced by a handler and consumed once by the writer.
#[derive(Debug)]
pub struct Response {
    /// The HTTP status code
    pub status: StatusCode,
    /// HTTP headers
    pub headers: HeaderMap,
    /// Response body
    pub body: ResponseBody,
}

/// Builder for constructing HTTP responses in a fluent style.
///
/// ```
/// # use localbackend::http::response::{ResponseBuilder, StatusCode};
/// let response = ResponseBuilder::new(StatusCode::OK)
///     .header("Content-Type", "application/json")
///     .body("{}")
///     .build();
/// assert_eq!(response.headers.get("content-length"), Some("2"));
/// ```
pub struct ResponseBuilder {
    status: StatusCode,
    headers: HeaderMap,
    body: ResponseBody,
}

impl ResponseBuilder {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: ResponseBody::Empty,
        }
    }

    /// Adds or replaces a header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key, value);
        self
    }

    /// Adds a header without replacing existing values of the same name.
    pub fn append_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(key, value);
        self
    }

    pub fn body(mut self, body: impl Into<ResponseBody>) -> Self {
        self.body = body.into();
        self
    }

    /// Builds the final Response.
    ///
    /// Adds the Content-Length header for materialized bodies if not
    /// already present.
    pub fn build(mut self) -> Response {
        if let Some(len) = self.body.len() {
            if !self.headers.contains("Content-Length") && self.status.allows_body() {
                self.headers.insert("Content-Length", len.to_string());
            }
        }

        Response {
            status: self.status,
            headers: self.headers,
            body: self.body,
        }
    }
}

impl Response {
    pub fn builder(status: StatusCode) -> ResponseBuilder {
        ResponseBuilder::new(status)
    }

    /// Creates a simple 200 OK response with the given body.
    pub fn ok(body: impl Into<ResponseBody>) -> Self {
        Self::text(StatusCode::OK, body)
    }

    /// A `text/plain` response.
    pub fn text(status: StatusCode, body: impl Into<ResponseBody>) -> Self {
        ResponseBuilder::new(status)
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body)
            .build()
    }

    /// A response with no body.
    pub fn empty(status: StatusCode) -> Self {
        ResponseBuilder::new(status).build()
    }

    /// Serializes `value` as an `application/json` body. Falls back to a 500
    /// when serialization fails.
    pub fn json<T: Serialize + ?Sized>(status: StatusCode, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => ResponseBuilder::new(status)
                .header("Content-Type", "application/json")
                .body(body)
                .build(),
            Err(err) => {
                tracing::error!(error = %err, "failed to serialize JSON response");
                Self::internal_error()
            }
        }
    }

    /// A JSON `{"error": message}` body.
    pub fn json_error(status: StatusCode, message: &str) -> Self {
        Self::json(status, &serde_json::json!({ "error": message }))
    }

    /// A streamed response; write chunks into the returned sender.
    pub fn stream(status: StatusCode, capacity: usize) -> (mpsc::Sender<Bytes>, Self) {
        let (tx, body) = ResponseBody::channel(capacity);
        (tx, ResponseBuilder::new(status).body(body).build())
    }

    /// Creates a 404 Not Found response.
    pub fn not_found() -> Self {
        Self::json_error(StatusCode::NOT_FOUND, "Not Found")
    }

    /// Creates a 500 Internal Server Error response.
    pub fn internal_error() -> Self {
        ResponseBuilder::new(StatusCode::INTERNAL_SERVER_ERROR)
            .header("Content-Type", "application/json")
            .body(r#"{"error":"Internal Server Error"}"#)
            .build()
    }

    /// The response sent when a request cannot be parsed. Always closes the
    /// connection.
    pub fn from_parse_error(err: &ParseError) -> Self {
        let (status, code) = match err {
            ParseError::Malformed(_) => (StatusCode::BAD_REQUEST, "MALFORMED_REQUEST"),
            ParseError::HeadTooLarge { .. } => (
                StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
                "REQUEST_TOO_LARGE",
            ),
            ParseError::BodyTooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, "REQUEST_TOO_LARGE"),
        };
        let mut response = Self::json(
            status,
            &serde_json::json!({ "error": err.to_string(), "code": code }),
        );
        response.headers.insert("Connection", "close");
        response
    }

    /// Maps a failed body read to the response a handler should return.
    pub fn from_body_error(err: &BodyError) -> Self {
        match err {
            BodyError::Parse(parse) => Self::from_parse_error(parse),
            BodyError::Timeout => Self::json_error(StatusCode::REQUEST_TIMEOUT, "Request Timeout"),
            BodyError::Io(_) | BodyError::Incomplete => {
                Self::json_error(StatusCode::BAD_REQUEST, "Incomplete request body")
            }
        }
    }
}
