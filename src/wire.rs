//! Minimal HTTP/1.x head reading and writing over a raw connection.
//!
//! The attach and streaming-RPC call paths cannot go through the pooled
//! client: they need ownership of the socket after the header exchange.
//! Instead they dial directly and speak just enough HTTP to get past the
//! response head, using the helpers here.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::dial::Conn;
use crate::error::ClientError;

/// Upper bound on the response head. Anything larger is a protocol error.
const MAX_HEAD_SIZE: usize = 16 * 1024;

/// Basic auth header value for controller keys: empty username, the key as
/// the password.
pub(crate) fn basic_auth(key: &str) -> String {
    use base64::Engine;
    let encoded = base64::engine::general_purpose::STANDARD.encode(format!(":{}", key));
    format!("Basic {}", encoded)
}

/// A parsed response head plus any body bytes read past the header block.
#[derive(Debug)]
pub(crate) struct ResponseHead {
    pub status: u16,
    pub content_length: Option<usize>,
    pub leftover: Bytes,
}

/// Write a full HTTP/1.1 request (head and body) to the connection.
pub(crate) async fn write_request(
    conn: &mut Conn,
    method: &str,
    path: &str,
    host: &str,
    headers: &[(&str, String)],
    body: &[u8],
) -> Result<(), ClientError> {
    let mut head = format!("{} {} HTTP/1.1\r\nHost: {}\r\n", method, path, host);
    for (name, value) in headers {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    if !body.is_empty() {
        head.push_str(&format!("Content-Length: {}\r\n", body.len()));
    }
    head.push_str("\r\n");

    conn.write_all(head.as_bytes())
        .await
        .map_err(|e| ClientError::Transport(format!("write request head: {}", e)))?;
    if !body.is_empty() {
        conn.write_all(body)
            .await
            .map_err(|e| ClientError::Transport(format!("write request body: {}", e)))?;
    }
    conn.flush()
        .await
        .map_err(|e| ClientError::Transport(format!("flush request: {}", e)))?;
    Ok(())
}

/// Write raw bytes to the connection and flush.
pub(crate) async fn write_all(conn: &mut Conn, data: &[u8]) -> Result<(), ClientError> {
    conn.write_all(data)
        .await
        .map_err(|e| ClientError::Transport(format!("write: {}", e)))?;
    conn.flush()
        .await
        .map_err(|e| ClientError::Transport(format!("flush: {}", e)))?;
    Ok(())
}

/// Read the response head off the connection, preserving any bytes that
/// arrived past the blank line.
pub(crate) async fn read_response_head(conn: &mut Conn) -> Result<ResponseHead, ClientError> {
    let mut buf = BytesMut::with_capacity(1024);
    let end = loop {
        if let Some(pos) = find_head_end(&buf) {
            break pos;
        }
        if buf.len() > MAX_HEAD_SIZE {
            return Err(ClientError::Protocol("response head too large".into()));
        }
        let n = conn
            .read_buf(&mut buf)
            .await
            .map_err(|e| ClientError::Transport(format!("read response head: {}", e)))?;
        if n == 0 {
            return Err(ClientError::Protocol(
                "connection closed before response head".into(),
            ));
        }
    };

    let head = buf.split_to(end + 4);
    let head_str = std::str::from_utf8(&head)
        .map_err(|_| ClientError::Protocol("response head is not valid UTF-8".into()))?;
    let mut lines = head_str.split("\r\n");

    let status_line = lines.next().unwrap_or_default();
    let status = parse_status_line(status_line)?;

    let mut content_length = None;
    for line in lines {
        if let Some((name, value)) = line.split_once(':')
            && name.eq_ignore_ascii_case("content-length")
        {
            content_length = value.trim().parse::<usize>().ok();
        }
    }

    Ok(ResponseHead {
        status,
        content_length,
        leftover: buf.freeze(),
    })
}

/// Consume the response body indicated by the head, so an error response is
/// fully read before the connection is discarded. Bodies without a declared
/// length are left to the connection teardown.
pub(crate) async fn drain_body(conn: &mut Conn, head: &ResponseHead) -> Result<(), ClientError> {
    let Some(total) = head.content_length else {
        return Ok(());
    };
    let mut remaining = total.saturating_sub(head.leftover.len());
    let mut buf = [0u8; 4096];
    while remaining > 0 {
        let want = remaining.min(buf.len());
        let n = conn
            .read(&mut buf[..want])
            .await
            .map_err(|e| ClientError::Transport(format!("drain response body: {}", e)))?;
        if n == 0 {
            break;
        }
        remaining -= n;
    }
    Ok(())
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_status_line(line: &str) -> Result<u16, ClientError> {
    let mut parts = line.split_whitespace();
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(ClientError::Protocol(format!(
            "malformed status line: {:?}",
            line
        )));
    }
    parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| ClientError::Protocol(format!("malformed status line: {:?}", line)))
}
