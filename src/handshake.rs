//! WebSocket opening handshake
//!
//! [`HandshakeNegotiator`] checks an HTTP upgrade request and either
//! produces the `101 Switching Protocols` response or a rejection carrying
//! the HTTP status to answer with. Both responses are written to the raw
//! socket before any frame is exchanged.
//!
//! The request head itself is parsed with `httparse` into an
//! [`http::HeaderMap`], whose keys are always lower-case.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::{BufMut, Bytes, BytesMut};
use http::header::{CONNECTION, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_VERSION, UPGRADE};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use sha1::{Digest, Sha1};

use crate::WS_GUID;
use crate::error::{Error, Result};

/// Maximum number of request headers accepted by [`parse_request`]
const MAX_HEADERS: usize = 32;

/// Version advertised when rejecting an unsupported one
const PREFERRED_VERSION: u8 = 13;

/// A parsed HTTP request head
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    /// Request method
    pub method: Method,
    /// Request target
    pub path: String,
    /// Request headers (lower-case names)
    pub headers: HeaderMap,
}

/// Parse an HTTP/1.1 request head
///
/// Returns the request and the number of bytes it occupied, or `None` when
/// the head is not complete yet. Bytes after the head belong to the
/// WebSocket stream.
pub fn parse_request(buf: &[u8], max_size: usize) -> Result<Option<(UpgradeRequest, usize)>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);

    match req.parse(buf) {
        Ok(httparse::Status::Complete(len)) => {
            let method = req
                .method
                .and_then(|m| Method::from_bytes(m.as_bytes()).ok())
                .ok_or(Error::InvalidHttp("invalid method"))?;
            let path = req.path.unwrap_or("/").to_string();

            let mut map = HeaderMap::with_capacity(req.headers.len());
            for header in req.headers.iter() {
                let name = HeaderName::from_bytes(header.name.as_bytes())
                    .map_err(|_| Error::InvalidHttp("invalid header name"))?;
                let value = HeaderValue::from_bytes(header.value)
                    .map_err(|_| Error::InvalidHttp("invalid header value"))?;
                map.append(name, value);
            }

            Ok(Some((
                UpgradeRequest {
                    method,
                    path,
                    headers: map,
                },
                len,
            )))
        }
        Ok(httparse::Status::Partial) => {
            if buf.len() > max_size {
                return Err(Error::InvalidHttp("request head too large"));
            }
            Ok(None)
        }
        Err(_) => Err(Error::InvalidHttp("failed to parse HTTP request")),
    }
}

/// Check whether a request asks for a protocol upgrade at all
///
/// Requests without an `upgrade` token in `Connection` are plain HTTP and
/// get `426 Upgrade Required` from the listener.
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    has_token(headers, &CONNECTION, "upgrade")
}

fn has_token(headers: &HeaderMap, name: &HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

/// Generate the Sec-WebSocket-Accept key
///
/// This computes: Base64(SHA-1(key + GUID))
#[inline]
pub fn generate_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Build the `101 Switching Protocols` response
pub fn build_response(accept_key: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(128);

    buf.put_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
    buf.put_slice(b"Upgrade: websocket\r\n");
    buf.put_slice(b"Connection: Upgrade\r\n");
    buf.put_slice(b"Sec-WebSocket-Accept: ");
    buf.put_slice(accept_key.as_bytes());
    buf.put_slice(b"\r\n\r\n");

    buf.freeze()
}

/// A successful negotiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeAccept {
    /// Computed Sec-WebSocket-Accept value
    pub accept_key: String,
    /// Protocol version the client asked for
    pub version: u8,
}

impl HandshakeAccept {
    /// Bytes of the 101 response
    pub fn response(&self) -> Bytes {
        build_response(&self.accept_key)
    }
}

/// A refused upgrade, answered with a plain HTTP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRejection {
    /// Status to answer with
    pub status: StatusCode,
    /// Short explanation, also used as the response body
    pub message: &'static str,
    /// Extra response header
    pub header: Option<(&'static str, String)>,
}

impl HandshakeRejection {
    fn new(status: StatusCode, message: &'static str) -> Self {
        Self {
            status,
            message,
            header: None,
        }
    }

    /// 405, the request method was not GET
    pub fn method_not_allowed() -> Self {
        Self::new(StatusCode::METHOD_NOT_ALLOWED, "Method must be GET")
    }

    /// 400 with the given explanation
    pub fn bad_request(message: &'static str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// 400 advertising the version this server speaks
    pub fn unsupported_version() -> Self {
        Self {
            header: Some(("Sec-WebSocket-Version", PREFERRED_VERSION.to_string())),
            ..Self::bad_request("Missing or invalid 'sec-websocket-version' header")
        }
    }

    /// 426, a plain HTTP request reached the WebSocket endpoint
    pub fn upgrade_required() -> Self {
        Self {
            header: Some(("Upgrade", "websocket".to_string())),
            ..Self::new(StatusCode::UPGRADE_REQUIRED, "Upgrade Required")
        }
    }

    /// 503, the server is shutting down
    pub fn service_unavailable() -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable")
    }

    /// Bytes of the HTTP error response
    pub fn response(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(192);
        let reason = self.status.canonical_reason().unwrap_or("");

        buf.put_slice(format!("HTTP/1.1 {} {}\r\n", self.status.as_u16(), reason).as_bytes());
        buf.put_slice(b"Connection: close\r\n");
        buf.put_slice(b"Content-Type: text/html\r\n");
        buf.put_slice(format!("Content-Length: {}\r\n", self.message.len()).as_bytes());
        if let Some((name, value)) = &self.header {
            buf.put_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }
        buf.put_slice(b"\r\n");
        buf.put_slice(self.message.as_bytes());

        buf.freeze()
    }
}

impl fmt::Display for HandshakeRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handshake rejected ({}): {}", self.status, self.message)
    }
}

impl std::error::Error for HandshakeRejection {}

/// Validates upgrade requests against the accepted protocol versions
#[derive(Debug, Clone)]
pub struct HandshakeNegotiator {
    accepted_versions: Vec<u8>,
}

impl Default for HandshakeNegotiator {
    fn default() -> Self {
        Self::new(vec![13, 8])
    }
}

impl HandshakeNegotiator {
    /// Create a negotiator accepting the given `Sec-WebSocket-Version` values
    pub fn new(accepted_versions: Vec<u8>) -> Self {
        Self { accepted_versions }
    }

    /// Versions this negotiator accepts
    pub fn accepted_versions(&self) -> &[u8] {
        &self.accepted_versions
    }

    /// Validate an upgrade request
    ///
    /// Checks run in a fixed order and the first failure decides the
    /// response: method, `Upgrade`, `Connection`, `Sec-WebSocket-Key`,
    /// `Sec-WebSocket-Version`.
    pub fn negotiate(
        &self,
        method: &Method,
        headers: &HeaderMap,
    ) -> std::result::Result<HandshakeAccept, HandshakeRejection> {
        if *method != Method::GET {
            return Err(HandshakeRejection::method_not_allowed());
        }

        let upgrade = headers.get(UPGRADE).and_then(|v| v.to_str().ok());
        if !upgrade.is_some_and(|v| v.trim().eq_ignore_ascii_case("websocket")) {
            return Err(HandshakeRejection::bad_request(
                "Missing or invalid 'upgrade' header",
            ));
        }

        if !has_token(headers, &CONNECTION, "upgrade") {
            return Err(HandshakeRejection::bad_request(
                "Missing or invalid 'connection' header",
            ));
        }

        let key = headers
            .get(SEC_WEBSOCKET_KEY)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|k| STANDARD.decode(k).is_ok_and(|raw| raw.len() == 16))
            .ok_or_else(|| {
                HandshakeRejection::bad_request("Missing or invalid 'sec-websocket-key' header")
            })?;

        let version = headers
            .get(SEC_WEBSOCKET_VERSION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u8>().ok())
            .filter(|v| self.accepted_versions.contains(v))
            .ok_or_else(HandshakeRejection::unsupported_version)?;

        Ok(HandshakeAccept {
            accept_key: generate_accept_key(key),
            version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

    fn upgrade_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive, Upgrade"));
        headers.insert(SEC_WEBSOCKET_KEY, HeaderValue::from_static(KEY));
        headers.insert(SEC_WEBSOCKET_VERSION, HeaderValue::from_static("13"));
        headers
    }

    #[test]
    fn test_generate_accept_key() {
        // Test vector from RFC 6455
        assert_eq!(generate_accept_key(KEY), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn test_negotiate_success() {
        let accept = HandshakeNegotiator::default()
            .negotiate(&Method::GET, &upgrade_headers())
            .unwrap();
        assert_eq!(accept.accept_key, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        assert_eq!(accept.version, 13);

        let response = accept.response();
        let text = std::str::from_utf8(&response).unwrap();
        assert!(text.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(text.contains("Upgrade: websocket\r\n"));
        assert!(text.contains("Connection: Upgrade\r\n"));
        assert!(text.ends_with("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n"));
    }

    #[test]
    fn test_method_checked_first() {
        let err = HandshakeNegotiator::default()
            .negotiate(&Method::POST, &HeaderMap::new())
            .unwrap_err();
        assert_eq!(err.status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn test_upgrade_header_case_insensitive() {
        let mut headers = upgrade_headers();
        headers.insert(UPGRADE, HeaderValue::from_static("WebSocket"));
        assert!(HandshakeNegotiator::default().negotiate(&Method::GET, &headers).is_ok());

        headers.insert(UPGRADE, HeaderValue::from_static("h2c"));
        let err = HandshakeNegotiator::default()
            .negotiate(&Method::GET, &headers)
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_connection_token() {
        let mut headers = upgrade_headers();
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        let err = HandshakeNegotiator::default()
            .negotiate(&Method::GET, &headers)
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.message.contains("connection"));

        headers.insert(CONNECTION, HeaderValue::from_static("UPGRADE"));
        assert!(HandshakeNegotiator::default().negotiate(&Method::GET, &headers).is_ok());
    }

    #[test]
    fn test_key_must_decode_to_16_bytes() {
        let negotiator = HandshakeNegotiator::default();
        let mut headers = upgrade_headers();

        headers.remove(SEC_WEBSOCKET_KEY);
        assert!(negotiator.negotiate(&Method::GET, &headers).is_err());

        // 15 bytes once decoded
        headers.insert(SEC_WEBSOCKET_KEY, HeaderValue::from_static("AAAAAAAAAAAAAAAAAAAA"));
        let err = negotiator.negotiate(&Method::GET, &headers).unwrap_err();
        assert!(err.message.contains("sec-websocket-key"));

        headers.insert(SEC_WEBSOCKET_KEY, HeaderValue::from_static("not base64 at all!!!!!!!"));
        assert!(negotiator.negotiate(&Method::GET, &headers).is_err());
    }

    #[test]
    fn test_versions() {
        let mut headers = upgrade_headers();
        headers.insert(SEC_WEBSOCKET_VERSION, HeaderValue::from_static("8"));
        assert_eq!(
            HandshakeNegotiator::default()
                .negotiate(&Method::GET, &headers)
                .unwrap()
                .version,
            8
        );

        let strict = HandshakeNegotiator::new(vec![13]);
        let err = strict.negotiate(&Method::GET, &headers).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.header, Some(("Sec-WebSocket-Version", "13".to_string())));

        headers.remove(SEC_WEBSOCKET_VERSION);
        assert!(HandshakeNegotiator::default().negotiate(&Method::GET, &headers).is_err());
    }

    #[test]
    fn test_rejection_response() {
        let response = HandshakeRejection::unsupported_version().response();
        let text = std::str::from_utf8(&response).unwrap();
        assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.contains("Sec-WebSocket-Version: 13\r\n"));

        let body = "Missing or invalid 'sec-websocket-version' header";
        assert!(text.contains(&format!("Content-Length: {}\r\n", body.len())));
        assert!(text.ends_with(&format!("\r\n\r\n{}", body)));

        let response = HandshakeRejection::upgrade_required().response();
        let text = std::str::from_utf8(&response).unwrap();
        assert!(text.starts_with("HTTP/1.1 426 Upgrade Required\r\n"));
        assert!(text.contains("Upgrade: websocket\r\n"));
    }

    #[test]
    fn test_parse_request() {
        let request = b"GET /chat HTTP/1.1\r\n\
            Host: server.example.com\r\n\
            Upgrade: websocket\r\n\
            Connection: Upgrade\r\n\
            Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
            Sec-WebSocket-Version: 13\r\n\
            \r\n";

        let (req, len) = parse_request(request, 8192).unwrap().unwrap();
        assert_eq!(req.method, Method::GET);
        assert_eq!(req.path, "/chat");
        assert_eq!(req.headers.get("sec-websocket-key").unwrap(), KEY);
        assert_eq!(len, request.len());
        assert!(is_upgrade_request(&req.headers));
        assert!(HandshakeNegotiator::default()
            .negotiate(&req.method, &req.headers)
            .is_ok());
    }

    #[test]
    fn test_parse_request_partial() {
        let request = b"GET /chat HTTP/1.1\r\nHost: server.example.com\r\n";
        assert!(parse_request(request, 8192).unwrap().is_none());
        assert!(matches!(
            parse_request(request, 16),
            Err(Error::InvalidHttp(_))
        ));
    }

    #[test]
    fn test_plain_request_is_not_upgrade() {
        let request = b"GET / HTTP/1.1\r\nHost: x\r\n\r\n";
        let (req, _) = parse_request(request, 8192).unwrap().unwrap();
        assert!(!is_upgrade_request(&req.headers));
    }
}
