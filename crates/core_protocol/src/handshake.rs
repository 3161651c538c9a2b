//! HTTP/1.1 upgrade handshake, per `spec.md` §4.1/§6.
//!
//! `GET /ws?token=<bearer>&name=<identity> HTTP/1.1` with `Upgrade:
//! websocket` headers. This module only parses the request and computes
//! the accept key; token validation against the store happens in
//! `core_dispatch`, which owns the database handle.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::HandshakeError;

const MAGIC_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const MAX_HEADER_BYTES: usize = 8 * 1024;

/// The bearer token and worker identity pulled from the upgrade request's
/// query string, plus the `Sec-WebSocket-Key` needed to compute the
/// accept header.
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    pub token: String,
    pub worker_name: String,
    pub key: String,
}

/// Reads and parses the HTTP upgrade request line-by-line until the
/// blank line terminating the header block, then validates the fixed
/// shape `spec.md` §6 requires.
pub async fn read_upgrade_request<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<UpgradeRequest, HandshakeError> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        reader.read_exact(&mut byte).await?;
        buf.push(byte[0]);
        if buf.len() >= 4 && &buf[buf.len() - 4..] == b"\r\n\r\n" {
            break;
        }
        if buf.len() > MAX_HEADER_BYTES {
            return Err(HandshakeError::Malformed("request headers too large"));
        }
    }

    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut request = httparse::Request::new(&mut headers);
    let status = request
        .parse(&buf)
        .map_err(|_| HandshakeError::Malformed("unparseable request"))?;
    if status.is_partial() {
        return Err(HandshakeError::Malformed("incomplete request"));
    }

    if request.method != Some("GET") {
        return Err(HandshakeError::MethodNotAllowed);
    }

    let path = request.path.ok_or(HandshakeError::Malformed("missing path"))?;

    let header_value = |name: &str| -> Option<String> {
        request
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .and_then(|h| std::str::from_utf8(h.value).ok())
            .map(str::to_string)
    };

    let upgrade = header_value("Upgrade").unwrap_or_default();
    let connection = header_value("Connection").unwrap_or_default();
    if !upgrade.eq_ignore_ascii_case("websocket")
        || !connection.to_lowercase().contains("upgrade")
    {
        return Err(HandshakeError::Malformed("missing upgrade headers"));
    }

    let key = header_value("Sec-WebSocket-Key")
        .ok_or(HandshakeError::Malformed("missing Sec-WebSocket-Key"))?;

    let (token, worker_name) = parse_query(path);
    let token = token.ok_or(HandshakeError::Unauthorized)?;
    if token.is_empty() {
        return Err(HandshakeError::Unauthorized);
    }
    let worker_name = worker_name.ok_or(HandshakeError::MissingIdentity)?;
    if worker_name.is_empty() {
        return Err(HandshakeError::MissingIdentity);
    }

    Ok(UpgradeRequest {
        token,
        worker_name,
        key,
    })
}

fn parse_query(path: &str) -> (Option<String>, Option<String>) {
    let query = match path.split_once('?') {
        Some((_, q)) => q,
        None => return (None, None),
    };

    let mut token = None;
    let mut name = None;
    for pair in query.split('&') {
        let (k, v) = match pair.split_once('=') {
            Some(kv) => kv,
            None => (pair, ""),
        };
        match k {
            "token" => token = Some(v.to_string()),
            "name" => name = Some(v.to_string()),
            _ => {}
        }
    }
    (token, name)
}

/// `Sec-WebSocket-Accept = base64(sha1(key || magic_guid))`.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(MAGIC_GUID.as_bytes());
    let digest = hasher.finalize();
    BASE64.encode(digest)
}

/// The `101 Switching Protocols` response that completes the handshake.
pub fn switching_protocols_response(client_key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        accept_key(client_key)
    )
}

/// A minimal rejection response for the given status code.
pub fn rejection_response(status: u16, reason: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        status, reason
    )
}

impl HandshakeError {
    /// Maps this error onto the HTTP status `spec.md` §6 assigns it.
    pub fn status_code(&self) -> u16 {
        match self {
            HandshakeError::MethodNotAllowed => 405,
            HandshakeError::Malformed(_) => 400,
            HandshakeError::Unauthorized => 401,
            HandshakeError::MissingIdentity => 401,
            HandshakeError::Io(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn parses_valid_upgrade_request() {
        let raw = "GET /ws?token=abc123&name=w1 HTTP/1.1\r\n\
                   Host: localhost\r\n\
                   Upgrade: websocket\r\n\
                   Connection: Upgrade\r\n\
                   Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
                   Sec-WebSocket-Version: 13\r\n\r\n";
        let mut cursor = Cursor::new(raw.as_bytes().to_vec());
        let req = read_upgrade_request(&mut cursor).await.unwrap();
        assert_eq!(req.token, "abc123");
        assert_eq!(req.worker_name, "w1");
        assert_eq!(req.key, "dGhlIHNhbXBsZSBub25jZQ==");
    }

    #[tokio::test]
    async fn rejects_missing_identity() {
        let raw = "GET /ws?token=abc123 HTTP/1.1\r\n\
                   Upgrade: websocket\r\n\
                   Connection: Upgrade\r\n\
                   Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n";
        let mut cursor = Cursor::new(raw.as_bytes().to_vec());
        let err = read_upgrade_request(&mut cursor).await.unwrap_err();
        assert!(matches!(err, HandshakeError::MissingIdentity));
    }

    #[tokio::test]
    async fn rejects_non_get() {
        let raw = "POST /ws HTTP/1.1\r\n\r\n";
        let mut cursor = Cursor::new(raw.as_bytes().to_vec());
        let err = read_upgrade_request(&mut cursor).await.unwrap_err();
        assert!(matches!(err, HandshakeError::MethodNotAllowed));
    }

    #[test]
    fn computes_known_accept_key() {
        // The canonical example from RFC 6455 §1.3.
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }
}
