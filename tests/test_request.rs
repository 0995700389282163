use localbackend::http::body::Body;
use localbackend::http::request::{Method, Request, RequestBuilder, Version};

fn get(target: &str) -> RequestBuilder {
    RequestBuilder::new().method(Method::GET).target(target)
}

#[test]
fn test_request_header_retrieval() {
    let req = get("/")
        .header("Host", "example.com")
        .header("Content-Type", "application/json")
        .build()
        .unwrap();

    assert_eq!(req.header("Host"), Some("example.com"));
    assert_eq!(req.header("content-type"), Some("application/json"));
    assert_eq!(req.header("Missing"), None);
}

#[test]
fn test_request_repeated_headers() {
    let req = get("/")
        .header("Accept", "text/html")
        .header("accept", "application/json")
        .build()
        .unwrap();

    assert_eq!(req.header("Accept"), Some("text/html"));
    let all: Vec<&str> = req.headers().get_all("ACCEPT").collect();
    assert_eq!(all, ["text/html", "application/json"]);
}

#[test]
fn test_request_keep_alive_http11_default() {
    // HTTP/1.1 defaults to keep-alive
    let req = get("/").build().unwrap();
    assert!(req.keep_alive());
}

#[test]
fn test_request_keep_alive_http10_default() {
    let req = get("/").version(Version::Http10).build().unwrap();
    assert!(!req.keep_alive());

    let req = get("/")
        .version(Version::Http10)
        .header("Connection", "keep-alive")
        .build()
        .unwrap();
    assert!(req.keep_alive());
}

#[test]
fn test_request_keep_alive_close() {
    let req = get("/").header("Connection", "close").build().unwrap();
    assert!(!req.keep_alive());
}

#[test]
fn test_request_keep_alive_case_insensitive() {
    let req = get("/")
        .version(Version::Http10)
        .header("connection", "Keep-Alive")
        .build()
        .unwrap();
    assert!(req.keep_alive());
}

#[test]
fn test_request_method_from_string() {
    assert_eq!(Method::from_str("GET"), Some(Method::GET));
    assert_eq!(Method::from_str("POST"), Some(Method::POST));
    assert_eq!(Method::from_str("INVALID"), None);
    assert_eq!(Method::from_str("get"), None); // Case-sensitive
}

#[test]
fn test_request_path_and_query() {
    let req = get("/search%20results?q=rust+lang&tag=a&tag=b&empty=")
        .build()
        .unwrap();

    assert_eq!(req.target(), "/search%20results?q=rust+lang&tag=a&tag=b&empty=");
    assert_eq!(req.path(), "/search results");
    assert_eq!(req.query().get("q"), Some("rust lang"));
    assert_eq!(req.query().get_all("tag"), ["a", "b"]);
    assert_eq!(req.query().get("empty"), Some(""));
    assert!(!req.query().contains("missing"));
}

#[test]
fn test_request_plus_in_path_is_literal() {
    let req = get("/a+b").build().unwrap();
    assert_eq!(req.path(), "/a+b");
}

#[test]
fn test_request_invalid_percent_encoding() {
    assert!(get("/bad%zz").build().is_err());
    assert!(get("/bad%ff").build().is_err());
}

#[test]
fn test_request_absolute_form_target() {
    let req = get("http://localhost:8080/api/items?x=1").build().unwrap();

    assert_eq!(req.path(), "/api/items");
    assert_eq!(req.query().get("x"), Some("1"));
}

#[test]
fn test_request_builder_requires_method_and_target() {
    assert!(RequestBuilder::new().target("/").build().is_err());
    assert!(RequestBuilder::new().method(Method::GET).build().is_err());
}

#[tokio::test]
async fn test_request_with_body() {
    let mut req: Request = RequestBuilder::new()
        .method(Method::POST)
        .target("/api")
        .body(Body::from(b"test body content".to_vec()))
        .build()
        .unwrap();

    assert_eq!(req.body_bytes(), b"test body content");
    let bytes = req.body_mut().materialize().await.unwrap();
    assert_eq!(bytes, b"test body content");
}

#[test]
fn test_request_without_server_has_no_shutdown() {
    let req = get("/").build().unwrap();
    assert!(!req.shutdown().is_shutdown());
    assert!(req.peer_addr().is_none());
    assert!(req.params().is_empty());
}
