//! Shared helpers for the integration tests: a raw TCP client that parses
//! responses the way an HTTP client would, and server setup.

#![allow(dead_code)]

use localbackend::api::{self, items::ItemStore};
use localbackend::{Config, Server};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Config bound to an ephemeral loopback port with short timeouts.
pub fn test_config() -> Config {
    Config {
        port: 0,
        shutdown_grace_period: Duration::from_millis(500),
        keep_alive_timeout: Duration::from_secs(2),
        ..Config::default()
    }
}

/// Starts a server with the items API and `/ping` registered.
pub async fn start_api_server(config: Config) -> (Server, SocketAddr) {
    let server = Server::new(config);
    api::register_routes(&server, Arc::new(ItemStore::seeded())).unwrap();
    let addr = server.start().await.unwrap();
    (server, addr)
}

#[derive(Debug)]
pub struct TestResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    pub fn closes(&self) -> bool {
        self.header("Connection")
            .is_some_and(|v| v.eq_ignore_ascii_case("close"))
    }
}

pub struct TestClient {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self {
            stream,
            buf: Vec::new(),
        }
    }

    pub async fn send(&mut self, raw: &[u8]) {
        self.stream.write_all(raw).await.unwrap();
    }

    /// Sends a request with a `Content-Length` body.
    pub async fn request(&mut self, method: &str, path: &str, body: Option<&str>) -> TestResponse {
        let mut raw = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n");
        if let Some(body) = body {
            raw.push_str("Content-Type: application/json\r\n");
            raw.push_str(&format!("Content-Length: {}\r\n\r\n{body}", body.len()));
        } else {
            raw.push_str("\r\n");
        }
        self.send(raw.as_bytes()).await;
        self.read_response().await.expect("connection closed")
    }

    async fn fill(&mut self) -> usize {
        let mut chunk = [0u8; 4096];
        let n = tokio::time::timeout(IO_TIMEOUT, self.stream.read(&mut chunk))
            .await
            .expect("timed out waiting for the server")
            .unwrap_or(0);
        self.buf.extend_from_slice(&chunk[..n]);
        n
    }

    /// Reads one response. `None` when the server closed the connection
    /// before sending anything.
    pub async fn read_response(&mut self) -> Option<TestResponse> {
        self.read_response_inner(true).await
    }

    /// Reads a response to a HEAD request, which has no body.
    pub async fn read_head_response(&mut self) -> Option<TestResponse> {
        self.read_response_inner(false).await
    }

    async fn read_response_inner(&mut self, with_body: bool) -> Option<TestResponse> {
        let head_end = loop {
            if let Some(pos) = find(&self.buf, b"\r\n\r\n") {
                break pos;
            }
            if self.fill().await == 0 {
                return None;
            }
        };

        let head = String::from_utf8(self.buf[..head_end].to_vec()).unwrap();
        self.buf.drain(..head_end + 4);

        let mut lines = head.split("\r\n");
        let status_line = lines.next().unwrap();
        let status: u16 = status_line.split(' ').nth(1).unwrap().parse().unwrap();
        let headers: Vec<(String, String)> = lines
            .map(|line| {
                let (k, v) = line.split_once(':').unwrap();
                (k.trim().to_string(), v.trim().to_string())
            })
            .collect();

        let mut response = TestResponse {
            status,
            headers,
            body: Vec::new(),
        };

        if !with_body || status == 204 || status == 304 || (100..200).contains(&status) {
            return Some(response);
        }

        if response
            .header("Transfer-Encoding")
            .is_some_and(|v| v.eq_ignore_ascii_case("chunked"))
        {
            response.body = self.read_chunked().await;
        } else if let Some(len) = response.header("Content-Length") {
            let len: usize = len.parse().unwrap();
            while self.buf.len() < len {
                assert!(self.fill().await > 0, "body truncated");
            }
            response.body = self.buf.drain(..len).collect();
        } else {
            while self.fill().await > 0 {}
            response.body = std::mem::take(&mut self.buf);
        }

        Some(response)
    }

    async fn read_chunked(&mut self) -> Vec<u8> {
        let mut body = Vec::new();
        loop {
            let line_end = loop {
                if let Some(pos) = find(&self.buf, b"\r\n") {
                    break pos;
                }
                assert!(self.fill().await > 0, "chunked body truncated");
            };
            let size_line = String::from_utf8(self.buf[..line_end].to_vec()).unwrap();
            let size = usize::from_str_radix(size_line.split(';').next().unwrap().trim(), 16)
                .unwrap();
            self.buf.drain(..line_end + 2);

            while self.buf.len() < size + 2 {
                assert!(self.fill().await > 0, "chunked body truncated");
            }
            body.extend(self.buf.drain(..size));
            self.buf.drain(..2);

            if size == 0 {
                return body;
            }
        }
    }

    /// True once the server has closed its side of the connection.
    pub async fn is_closed(&mut self) -> bool {
        if !self.buf.is_empty() {
            return false;
        }
        let mut chunk = [0u8; 64];
        match tokio::time::timeout(IO_TIMEOUT, self.stream.read(&mut chunk)).await {
            Ok(Ok(0)) | Ok(Err(_)) => true,
            Ok(Ok(n)) => {
                self.buf.extend_from_slice(&chunk[..n]);
                false
            }
            Err(_) => false,
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
