use crate::http::body::Body;
use crate::http::headers::HeaderMap;
use crate::http::parser::{ParseError, RequestHead};
use crate::http::query::{self, QueryParams};
use crate::routing::PathParams;
use crate::server::shutdown::ShutdownSignal;
use std::net::SocketAddr;

/// HTTP request methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// OPTIONS - Describe communication options
    OPTIONS,
    /// PATCH - Partial modification of a resource
    PATCH,
}

impl Method {
    /// Parses an HTTP method from a string.
    ///
    /// Method names are case-sensitive.
    ///
    /// ```
    /// # use localbackend::http::request::Method;
    /// assert_eq!(Method::from_str("GET"), Some(Method::GET));
    /// assert_eq!(Method::from_str("get"), None);
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Method::GET),
            "POST" => Some(Method::POST),
            "PUT" => Some(Method::PUT),
            "DELETE" => Some(Method::DELETE),
            "HEAD" => Some(Method::HEAD),
            "OPTIONS" => Some(Method::OPTIONS),
            "PATCH" => Some(Method::PATCH),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::OPTIONS => "OPTIONS",
            Method::PATCH => "PATCH",
        }
    }
}

/// Protocol version from the request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "HTTP/1.1" => Some(Version::Http11),
            "HTTP/1.0" => Some(Version::Http10),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

/// A parsed HTTP request as seen by a handler.
///
/// Everything except the body is fixed once the request has been read off
/// the wire. The body is a stream that the handler consumes on demand
/// through [`Request::body_mut`].
#[derive(Debug)]
pub struct Request {
    method: Method,
    target: String,
    path: String,
    version: Version,
    query: QueryParams,
    headers: HeaderMap,
    params: PathParams,
    body: Body,
    peer: Option<SocketAddr>,
    shutdown: ShutdownSignal,
}

impl Request {
    /// Builds a request from a parsed head. Fails when the target's path
    /// does not percent-decode to UTF-8.
    pub(crate) fn from_head(
        head: RequestHead,
        body: Body,
        peer: SocketAddr,
        shutdown: ShutdownSignal,
    ) -> Result<Self, ParseError> {
        let mut request = RequestBuilder::new()
            .method(head.method)
            .version(head.version)
            .body(body)
            .peer(peer)
            .shutdown(shutdown);
        request.headers = head.headers;
        request.target(head.target).build()
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// Raw request target as it appeared on the request line.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Percent-decoded path, without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn query(&self) -> &QueryParams {
        &self.query
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Retrieves a header value by name, ignoring case.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    /// Parameters bound by the matched route pattern.
    pub fn params(&self) -> &PathParams {
        &self.params
    }

    /// Shorthand for `params().get(name)`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    pub(crate) fn set_params(&mut self, params: PathParams) {
        self.params = params;
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    /// Materialized body bytes. Empty for a body that is still a stream.
    pub fn body_bytes(&self) -> &[u8] {
        self.body.as_bytes().unwrap_or_default()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Signal that fires when the server begins shutting down. Long-running
    /// handlers should watch it and wrap up within the grace period.
    pub fn shutdown(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    /// Whether the client asked to keep the connection open.
    ///
    /// HTTP/1.1 defaults to keep-alive unless `Connection: close` is sent;
    /// HTTP/1.0 defaults to close unless `Connection: keep-alive` is sent.
    pub fn keep_alive(&self) -> bool {
        if self.headers.has_token("Connection", "close") {
            return false;
        }
        match self.version {
            Version::Http11 => true,
            Version::Http10 => self.headers.has_token("Connection", "keep-alive"),
        }
    }
}

/// Builder for constructing Request objects, mainly for tests and for
/// handlers that forward synthetic requests.
pub struct RequestBuilder {
    method: Option<Method>,
    target: Option<String>,
    version: Version,
    headers: HeaderMap,
    body: Body,
    peer: Option<SocketAddr>,
    shutdown: ShutdownSignal,
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            method: None,
            target: None,
            version: Version::Http11,
            headers: HeaderMap::new(),
            body: Body::empty(),
            peer: None,
            shutdown: ShutdownSignal::never(),
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Request target: a path with an optional query string, or an
    /// absolute `http://` URL.
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(key, value);
        self
    }

    pub fn body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    pub fn peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn build(self) -> Result<Request, ParseError> {
        let method = self.method.ok_or(ParseError::Malformed("method missing"))?;
        let target = self.target.ok_or(ParseError::Malformed("target missing"))?;

        let (path, query) = split_origin_form(&target)?;
        let decoded = query::decode_path(&path)
            .ok_or(ParseError::Malformed("path is not valid percent-encoded UTF-8"))?
            .into_owned();
        let query = query.as_deref().map(QueryParams::parse).unwrap_or_default();

        Ok(Request {
            method,
            path: decoded,
            target,
            version: self.version,
            query,
            headers: self.headers,
            params: PathParams::default(),
            body: self.body,
            peer: self.peer,
            shutdown: self.shutdown,
        })
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Reduces absolute-form targets to origin form and splits off the query.
fn split_origin_form(target: &str) -> Result<(String, Option<String>), ParseError> {
    if target.starts_with("http://") {
        let url = url::Url::parse(target)
            .map_err(|_| ParseError::Malformed("invalid absolute request target"))?;
        return Ok((url.path().to_string(), url.query().map(str::to_string)));
    }

    if target == "*" {
        return Ok(("*".to_string(), None));
    }

    let (path, query) = query::split_target(target);
    Ok((path.to_string(), query.map(str::to_string)))
}
