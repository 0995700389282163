use bytes::BytesMut;
use localbackend::http::parser::{
    parse_request_head, BodyDecoder, BodyFraming, Decoded, ParseError, ParseLimits,
};
use localbackend::http::request::{Method, Version};

fn parse(raw: &[u8]) -> Result<Option<(localbackend::http::parser::RequestHead, usize)>, ParseError> {
    parse_request_head(raw, &ParseLimits::default())
}

/// Decodes a whole body that is already in `buf`.
fn decode_all(framing: BodyFraming, buf: &[u8], limit: usize) -> Result<Vec<u8>, ParseError> {
    let mut decoder = BodyDecoder::new(framing, limit);
    let mut buf = BytesMut::from(buf);
    let mut body = Vec::new();
    loop {
        match decoder.decode(&mut buf)? {
            Decoded::Data(bytes) => body.extend_from_slice(&bytes),
            Decoded::Done => return Ok(body),
            Decoded::NeedMore => return decoder.eof().map(|_| body),
        }
    }
}

#[test]
fn test_parse_simple_get_request() {
    let req = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";
    let (parsed, consumed) = parse(req).unwrap().unwrap();

    assert_eq!(parsed.method, Method::GET);
    assert_eq!(parsed.target, "/");
    assert_eq!(parsed.version, Version::Http11);
    assert_eq!(parsed.headers.get("Host"), Some("example.com"));
    assert_eq!(parsed.framing, BodyFraming::Length(0));
    assert_eq!(consumed, req.len());
}

#[test]
fn test_parse_post_request_with_body() {
    let req = b"POST /api HTTP/1.1\r\nHost: localhost\r\nContent-Length: 5\r\n\r\nhello";
    let (parsed, consumed) = parse(req).unwrap().unwrap();

    assert_eq!(parsed.method, Method::POST);
    assert_eq!(parsed.framing, BodyFraming::Length(5));
    // The body is not part of the head.
    assert_eq!(&req[consumed..], b"hello");

    let body = decode_all(parsed.framing, &req[consumed..], 1024).unwrap();
    assert_eq!(body, b"hello");
}

#[test]
fn test_parse_multiple_headers() {
    let req = b"GET /path HTTP/1.1\r\nHost: example.com\r\nUser-Agent: test-client\r\nAccept: */*\r\n\r\n";
    let (parsed, _) = parse(req).unwrap().unwrap();

    assert_eq!(parsed.headers.get("host"), Some("example.com"));
    assert_eq!(parsed.headers.get("USER-AGENT"), Some("test-client"));
    assert_eq!(parsed.headers.get("Accept"), Some("*/*"));
}

#[test]
fn test_parse_request_with_path_and_query_string() {
    let req = b"GET /search?q=rust HTTP/1.1\r\nHost: example.com\r\n\r\n";
    let (parsed, _) = parse(req).unwrap().unwrap();

    // The raw target keeps the query; splitting happens when building the
    // request.
    assert_eq!(parsed.target, "/search?q=rust");
}

#[test]
fn test_parse_incomplete_request_missing_blank_line() {
    let req = b"GET / HTTP/1.1\r\nHost: example.com\r\n";
    assert!(parse(req).unwrap().is_none());
}

#[test]
fn test_parse_incomplete_body_needs_more() {
    let mut decoder = BodyDecoder::new(BodyFraming::Length(10), 1024);
    let mut buf = BytesMut::from(&b"hello"[..]);

    assert_eq!(
        decoder.decode(&mut buf).unwrap(),
        Decoded::Data(bytes::Bytes::from_static(b"hello"))
    );
    assert_eq!(decoder.decode(&mut buf).unwrap(), Decoded::NeedMore);
    assert!(decoder.eof().is_err());
}

#[test]
fn test_parse_invalid_http_method() {
    let req = b"INVALID / HTTP/1.1\r\nHost: example.com\r\n\r\n";
    assert!(matches!(parse(req), Err(ParseError::Malformed(_))));
}

#[test]
fn test_parse_unsupported_version() {
    let req = b"GET / HTTP/2.0\r\n\r\n";
    assert!(matches!(parse(req), Err(ParseError::Malformed(_))));
}

#[test]
fn test_parse_malformed_header() {
    let req = b"GET / HTTP/1.1\r\nInvalidHeader\r\n\r\n";
    assert!(matches!(parse(req), Err(ParseError::Malformed(_))));
}

#[test]
fn test_parse_header_name_with_whitespace() {
    let req = b"GET / HTTP/1.1\r\nBad Name: x\r\n\r\n";
    assert!(matches!(parse(req), Err(ParseError::Malformed(_))));
}

#[test]
fn test_parse_various_http_methods() {
    let methods = vec![
        ("GET", Method::GET),
        ("POST", Method::POST),
        ("PUT", Method::PUT),
        ("DELETE", Method::DELETE),
        ("HEAD", Method::HEAD),
        ("OPTIONS", Method::OPTIONS),
        ("PATCH", Method::PATCH),
    ];

    for (method_str, expected_method) in methods {
        let req = format!("{} / HTTP/1.1\r\nHost: example.com\r\n\r\n", method_str);
        let (parsed, _) = parse(req.as_bytes()).unwrap().unwrap();
        assert_eq!(parsed.method, expected_method);
    }
}

#[test]
fn test_parse_transfer_encoding_and_content_length_conflict() {
    let req = b"POST / HTTP/1.1\r\nContent-Length: 3\r\nTransfer-Encoding: chunked\r\n\r\n";
    assert!(matches!(parse(req), Err(ParseError::Malformed(_))));
}

#[test]
fn test_parse_conflicting_content_lengths() {
    let req = b"POST / HTTP/1.1\r\nContent-Length: 3\r\nContent-Length: 4\r\n\r\n";
    assert!(matches!(parse(req), Err(ParseError::Malformed(_))));

    let req = b"POST / HTTP/1.1\r\nContent-Length: abc\r\n\r\n";
    assert!(matches!(parse(req), Err(ParseError::Malformed(_))));
}

#[test]
fn test_parse_declared_body_over_limit() {
    let limits = ParseLimits {
        max_header_bytes: 1024,
        max_body_bytes: 10,
    };
    let req = b"POST / HTTP/1.1\r\nContent-Length: 11\r\n\r\n";

    assert_eq!(
        parse_request_head(req, &limits).unwrap_err(),
        ParseError::BodyTooLarge { limit: 10 }
    );

    let req = b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\n";
    assert!(parse_request_head(req, &limits).unwrap().is_some());
}

#[test]
fn test_parse_head_over_limit() {
    let limits = ParseLimits {
        max_header_bytes: 32,
        max_body_bytes: 10,
    };
    let req = b"GET / HTTP/1.1\r\nX-Long-Header: aaaaaaaaaaaaaaaaaaaa\r\n\r\n";

    let err = parse_request_head(req, &limits).unwrap_err();
    assert!(err.is_too_large());
}

#[test]
fn test_parse_request_with_empty_body() {
    let req = b"POST /api HTTP/1.1\r\nContent-Length: 0\r\n\r\n";
    let (parsed, _) = parse(req).unwrap().unwrap();

    let decoder = BodyDecoder::new(parsed.framing, 1024);
    assert!(decoder.is_done());
}

#[test]
fn test_parse_request_with_binary_body() {
    let mut req = b"POST /upload HTTP/1.1\r\nContent-Length: 4\r\n\r\n".to_vec();
    req.extend_from_slice(&[0x00, 0xFF, 0x7F, 0x80]);
    let (parsed, consumed) = parse(&req).unwrap().unwrap();

    let body = decode_all(parsed.framing, &req[consumed..], 1024).unwrap();
    assert_eq!(body, vec![0x00, 0xFF, 0x7F, 0x80]);
}

#[test]
fn test_parse_chunked_body_with_extensions_and_trailers() {
    let req = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
                4;name=value\r\nWiki\r\n5\r\npedia\r\n0\r\nExpires: never\r\n\r\n";
    let (parsed, consumed) = parse(req).unwrap().unwrap();
    assert_eq!(parsed.framing, BodyFraming::Chunked);

    let body = decode_all(parsed.framing, &req[consumed..], 1024).unwrap();
    assert_eq!(body, b"Wikipedia");
}

#[test]
fn test_parse_chunked_body_truncated() {
    let err = decode_all(BodyFraming::Chunked, b"5\r\nhel", 1024).unwrap_err();
    assert_eq!(err, ParseError::Malformed("request body truncated"));
}

#[test]
fn test_parse_header_case_preservation() {
    let req = b"GET / HTTP/1.1\r\nContent-Type: text/html\r\n\r\n";
    let (parsed, _) = parse(req).unwrap().unwrap();

    let (name, value) = parsed.headers.iter().next().unwrap();
    assert_eq!(name, "Content-Type");
    assert_eq!(value, "text/html");
}

#[test]
fn test_parse_leading_blank_lines_are_skipped() {
    let req = b"\r\n\r\nGET /ping HTTP/1.1\r\n\r\n";
    let (parsed, consumed) = parse(req).unwrap().unwrap();

    assert_eq!(parsed.target, "/ping");
    assert_eq!(consumed, req.len());
}

#[test]
fn test_parse_leading_blank_lines_count_toward_head_limit() {
    let limits = ParseLimits {
        max_header_bytes: 64,
        max_body_bytes: 10,
    };

    // Nothing but blank lines, more of them than the limit allows.
    let blank = b"\r\n".repeat(40);
    assert_eq!(
        parse_request_head(&blank, &limits).unwrap_err(),
        ParseError::HeadTooLarge { limit: 64 }
    );

    // A complete request that only fits without its blank-line prefix.
    let mut req = b"\r\n".repeat(30);
    req.extend_from_slice(b"GET /ping HTTP/1.1\r\n\r\n");
    assert_eq!(
        parse_request_head(&req, &limits).unwrap_err(),
        ParseError::HeadTooLarge { limit: 64 }
    );

    let mut req = b"\r\n".repeat(4);
    req.extend_from_slice(b"GET /ping HTTP/1.1\r\n\r\n");
    assert!(parse_request_head(&req, &limits).unwrap().is_some());
}
