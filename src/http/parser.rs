use crate::http::headers::HeaderMap;
use crate::http::request::{Method, Version};
use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

/// Longest chunk-size line we accept before giving up on the body.
const MAX_CHUNK_LINE: usize = 1024;

/// Upper bound for the trailer section of a chunked body.
const MAX_TRAILER_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed request: {0}")]
    Malformed(&'static str),
    #[error("request head exceeds {limit} bytes")]
    HeadTooLarge { limit: usize },
    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },
}

impl ParseError {
    /// Both size violations count as "request too large"; the connection
    /// must be closed afterwards.
    pub fn is_too_large(&self) -> bool {
        matches!(
            self,
            ParseError::HeadTooLarge { .. } | ParseError::BodyTooLarge { .. }
        )
    }
}

/// Size limits enforced while parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseLimits {
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
}

impl Default for ParseLimits {
    fn default() -> Self {
        Self {
            max_header_bytes: 16 * 1024,
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// How the request body is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    Length(usize),
    Chunked,
}

/// Request line and header section, before any body bytes.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub target: String,
    pub version: Version,
    pub headers: HeaderMap,
    pub framing: BodyFraming,
}

/// Parses a request head from the front of `buf`.
///
/// Returns `Ok(None)` while the empty line ending the header section has not
/// arrived yet. On success the second tuple element is the number of bytes
/// consumed, including any blank lines preceding the request line.
pub fn parse_request_head(
    buf: &[u8],
    limits: &ParseLimits,
) -> Result<Option<(RequestHead, usize)>, ParseError> {
    // Stray CRLFs between keep-alive requests are ignored, but they count
    // toward the head limit.
    let skip = buf
        .iter()
        .take_while(|b| **b == b'\r' || **b == b'\n')
        .count();
    let buf_rest = &buf[skip..];

    let Some(headers_end) = find_headers_end(buf_rest) else {
        if buf.len() > limits.max_header_bytes {
            return Err(ParseError::HeadTooLarge {
                limit: limits.max_header_bytes,
            });
        }
        return Ok(None);
    };

    if skip + headers_end + 4 > limits.max_header_bytes {
        return Err(ParseError::HeadTooLarge {
            limit: limits.max_header_bytes,
        });
    }

    let head = std::str::from_utf8(&buf_rest[..headers_end])
        .map_err(|_| ParseError::Malformed("request head is not valid UTF-8"))?;

    let mut lines = head.split("\r\n");

    // Request line
    let request_line = lines
        .next()
        .ok_or(ParseError::Malformed("missing request line"))?;
    let (method, target, version) = parse_request_line(request_line)?;

    // Headers
    let mut headers = HeaderMap::new();
    for line in lines {
        if line.starts_with(' ') || line.starts_with('\t') {
            return Err(ParseError::Malformed("obsolete header line folding"));
        }

        let (name, value) = line
            .split_once(':')
            .ok_or(ParseError::Malformed("header line without a colon"))?;

        if name.is_empty() || !name.bytes().all(is_token_byte) {
            return Err(ParseError::Malformed("invalid header name"));
        }

        headers.append(name, value.trim());
    }

    let framing = body_framing(&headers, limits)?;

    let request = RequestHead {
        method,
        target: target.to_string(),
        version,
        headers,
        framing,
    };

    Ok(Some((request, skip + headers_end + 4)))
}

fn parse_request_line(line: &str) -> Result<(Method, &str, Version), ParseError> {
    let mut parts = line.split(' ');
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ParseError::Malformed("invalid request line"));
    };

    let method = Method::from_str(method).ok_or(ParseError::Malformed("unknown method"))?;
    let version =
        Version::from_str(version).ok_or(ParseError::Malformed("unsupported HTTP version"))?;

    let valid_target = target.starts_with('/')
        || (target == "*" && method == Method::OPTIONS)
        || target.starts_with("http://");
    if !valid_target {
        return Err(ParseError::Malformed("invalid request target"));
    }

    Ok((method, target, version))
}

fn body_framing(headers: &HeaderMap, limits: &ParseLimits) -> Result<BodyFraming, ParseError> {
    if headers.contains("Transfer-Encoding") {
        if headers.contains("Content-Length") {
            return Err(ParseError::Malformed(
                "both Transfer-Encoding and Content-Length present",
            ));
        }

        let mut codings = headers
            .get_all("Transfer-Encoding")
            .flat_map(|v| v.split(','))
            .map(str::trim);
        return match (codings.next(), codings.next()) {
            (Some(coding), None) if coding.eq_ignore_ascii_case("chunked") => {
                Ok(BodyFraming::Chunked)
            }
            _ => Err(ParseError::Malformed("unsupported transfer-encoding")),
        };
    }

    let mut length: Option<usize> = None;
    for value in headers.get_all("Content-Length").flat_map(|v| v.split(',')) {
        let value = value.trim();
        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseError::Malformed("invalid Content-Length"));
        }
        // Digits only, so a failure here means the value overflowed usize.
        let parsed = value.parse::<usize>().map_err(|_| ParseError::BodyTooLarge {
            limit: limits.max_body_bytes,
        })?;
        match length {
            Some(existing) if existing != parsed => {
                return Err(ParseError::Malformed("conflicting Content-Length values"));
            }
            _ => length = Some(parsed),
        }
    }

    let length = length.unwrap_or(0);
    if length > limits.max_body_bytes {
        return Err(ParseError::BodyTooLarge {
            limit: limits.max_body_bytes,
        });
    }

    Ok(BodyFraming::Length(length))
}

fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

// RFC 9110 tchar
fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

/// Result of one [`BodyDecoder::decode`] step.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    Data(Bytes),
    NeedMore,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    Length { remaining: usize },
    ChunkSize,
    ChunkData { remaining: usize },
    ChunkDataEnd,
    Trailers { seen: usize },
    Done,
}

/// Incremental decoder for a request body framed by Content-Length or
/// chunked transfer-encoding.
///
/// The decoder only ever consumes bytes that belong to the current body, so
/// whatever remains in the buffer once it reports [`Decoded::Done`] is the
/// start of the next request.
#[derive(Debug)]
pub struct BodyDecoder {
    state: DecoderState,
    received: usize,
    limit: usize,
}

impl BodyDecoder {
    pub fn new(framing: BodyFraming, limit: usize) -> Self {
        let state = match framing {
            BodyFraming::Length(0) => DecoderState::Done,
            BodyFraming::Length(remaining) => DecoderState::Length { remaining },
            BodyFraming::Chunked => DecoderState::ChunkSize,
        };
        Self {
            state,
            received: 0,
            limit,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == DecoderState::Done
    }

    /// Decodes the next piece of body data from `buf`.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Decoded, ParseError> {
        loop {
            match self.state {
                DecoderState::Done => return Ok(Decoded::Done),

                DecoderState::Length { remaining } => {
                    if buf.is_empty() {
                        return Ok(Decoded::NeedMore);
                    }
                    let n = remaining.min(buf.len());
                    let data = buf.split_to(n).freeze();
                    self.received += n;
                    self.state = match remaining - n {
                        0 => DecoderState::Done,
                        remaining => DecoderState::Length { remaining },
                    };
                    return Ok(Decoded::Data(data));
                }

                DecoderState::ChunkSize => {
                    let Some(line_end) = find_crlf(buf) else {
                        if buf.len() > MAX_CHUNK_LINE {
                            return Err(ParseError::Malformed("chunk size line too long"));
                        }
                        return Ok(Decoded::NeedMore);
                    };

                    let size = parse_chunk_size(&buf[..line_end])?;
                    buf.advance(line_end + 2);

                    if size == 0 {
                        self.state = DecoderState::Trailers { seen: 0 };
                        continue;
                    }
                    if self.received.saturating_add(size) > self.limit {
                        return Err(ParseError::BodyTooLarge { limit: self.limit });
                    }
                    self.state = DecoderState::ChunkData { remaining: size };
                }

                DecoderState::ChunkData { remaining } => {
                    if buf.is_empty() {
                        return Ok(Decoded::NeedMore);
                    }
                    let n = remaining.min(buf.len());
                    let data = buf.split_to(n).freeze();
                    self.received += n;
                    self.state = match remaining - n {
                        0 => DecoderState::ChunkDataEnd,
                        remaining => DecoderState::ChunkData { remaining },
                    };
                    return Ok(Decoded::Data(data));
                }

                DecoderState::ChunkDataEnd => {
                    if buf.len() < 2 {
                        return Ok(Decoded::NeedMore);
                    }
                    if &buf[..2] != b"\r\n" {
                        return Err(ParseError::Malformed("missing CRLF after chunk data"));
                    }
                    buf.advance(2);
                    self.state = DecoderState::ChunkSize;
                }

                DecoderState::Trailers { seen } => {
                    let Some(line_end) = find_crlf(buf) else {
                        if seen + buf.len() > MAX_TRAILER_BYTES {
                            return Err(ParseError::HeadTooLarge {
                                limit: MAX_TRAILER_BYTES,
                            });
                        }
                        return Ok(Decoded::NeedMore);
                    };
                    buf.advance(line_end + 2);
                    self.state = if line_end == 0 {
                        DecoderState::Done
                    } else {
                        DecoderState::Trailers {
                            seen: seen + line_end + 2,
                        }
                    };
                }
            }
        }
    }

    /// Called when the peer closed the connection. A body that is not
    /// complete at that point is truncated.
    pub fn eof(&self) -> Result<(), ParseError> {
        if self.is_done() {
            Ok(())
        } else {
            Err(ParseError::Malformed("request body truncated"))
        }
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<usize, ParseError> {
    let line = std::str::from_utf8(line)
        .map_err(|_| ParseError::Malformed("invalid chunk size line"))?;
    // Chunk extensions are ignored.
    let size = line.split(';').next().unwrap_or_default().trim();
    if size.is_empty() || !size.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ParseError::Malformed("invalid chunk size"));
    }
    usize::from_str_radix(size, 16).map_err(|_| ParseError::Malformed("chunk size overflow"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ParseLimits {
        ParseLimits::default()
    }

    #[test]
    fn parse_simple_get() {
        let req = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";

        let (parsed, consumed) = parse_request_head(req, &limits()).unwrap().unwrap();

        assert_eq!(parsed.target, "/");
        assert_eq!(parsed.headers.get("host"), Some("example.com"));
        assert_eq!(parsed.framing, BodyFraming::Length(0));
        assert_eq!(consumed, req.len());
    }

    #[test]
    fn leading_blank_lines_are_consumed() {
        let req = b"\r\n\r\nGET /a HTTP/1.1\r\n\r\n";
        let (parsed, consumed) = parse_request_head(req, &limits()).unwrap().unwrap();

        assert_eq!(parsed.target, "/a");
        assert_eq!(consumed, req.len());
    }

    #[test]
    fn head_limit_applies_before_terminator_arrives() {
        let limits = ParseLimits {
            max_header_bytes: 32,
            max_body_bytes: 10,
        };
        let req = b"GET / HTTP/1.1\r\nX-Long: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

        assert_eq!(
            parse_request_head(req, &limits).unwrap_err(),
            ParseError::HeadTooLarge { limit: 32 }
        );
    }

    #[test]
    fn rejects_folded_headers() {
        let req = b"GET / HTTP/1.1\r\nX-A: one\r\n two\r\n\r\n";
        assert!(matches!(
            parse_request_head(req, &limits()),
            Err(ParseError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_unknown_transfer_encoding() {
        let req = b"POST / HTTP/1.1\r\nTransfer-Encoding: gzip, chunked\r\n\r\n";
        assert_eq!(
            parse_request_head(req, &limits()).unwrap_err(),
            ParseError::Malformed("unsupported transfer-encoding")
        );
    }

    #[test]
    fn content_length_list_must_agree() {
        let same = b"POST / HTTP/1.1\r\nContent-Length: 3, 3\r\n\r\n";
        let (head, _) = parse_request_head(same, &limits()).unwrap().unwrap();
        assert_eq!(head.framing, BodyFraming::Length(3));

        let differ = b"POST / HTTP/1.1\r\nContent-Length: 3\r\nContent-Length: 4\r\n\r\n";
        assert!(parse_request_head(differ, &limits()).is_err());
    }

    #[test]
    fn chunked_decoding_across_reads() {
        let mut decoder = BodyDecoder::new(BodyFraming::Chunked, 100);
        let mut buf = BytesMut::from(&b"5;ext=1\r\nhel"[..]);

        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            Decoded::Data(Bytes::from_static(b"hel"))
        );
        assert_eq!(decoder.decode(&mut buf).unwrap(), Decoded::NeedMore);

        buf.extend_from_slice(b"lo\r\n0\r\nX-Trailer: 1\r\n\r\nGET");
        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            Decoded::Data(Bytes::from_static(b"lo"))
        );
        assert_eq!(decoder.decode(&mut buf).unwrap(), Decoded::Done);
        assert!(decoder.is_done());
        assert_eq!(&buf[..], b"GET");
    }

    #[test]
    fn chunked_limit_is_inclusive() {
        let mut decoder = BodyDecoder::new(BodyFraming::Chunked, 4);
        let mut buf = BytesMut::from(&b"4\r\nabcd\r\n1\r\ne\r\n"[..]);

        assert!(matches!(decoder.decode(&mut buf), Ok(Decoded::Data(_))));
        assert_eq!(
            decoder.decode(&mut buf).unwrap_err(),
            ParseError::BodyTooLarge { limit: 4 }
        );
    }

    #[test]
    fn length_decoder_leaves_next_request() {
        let mut decoder = BodyDecoder::new(BodyFraming::Length(3), 10);
        let mut buf = BytesMut::from(&b"abcGET /"[..]);

        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            Decoded::Data(Bytes::from_static(b"abc"))
        );
        assert!(decoder.is_done());
        assert_eq!(&buf[..], b"GET /");
    }

    #[test]
    fn truncated_body_is_malformed() {
        let decoder = BodyDecoder::new(BodyFraming::Length(3), 10);
        assert!(decoder.eof().is_err());
    }
}
