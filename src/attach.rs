//! Duplex attach streams.
//!
//! Attaching to a job turns an HTTP exchange into a raw bidirectional byte
//! pipe: the client sends the job-creation request with the attach media
//! type in `Accept`, and once the server answers 200 the same connection
//! carries the job's stdio in both directions with no further framing.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::dial::{Conn, Dial};
use crate::error::ClientError;
use crate::types::NewJob;
use crate::wire;

/// Media type that asks the controller to hold the connection open for
/// attach after creating the job.
pub const ATTACH_MEDIA_TYPE: &str = "application/vnd.skiff.attach";

/// Create a job and keep the connection as its stdio pipe.
///
/// Goes around the pooled transport on purpose: the connection must not be
/// reused once it carries attach bytes, so it is dialed fresh and owned by
/// the returned stream.
pub(crate) async fn run_attached(
    dial: &dyn Dial,
    host: &str,
    key: &str,
    app_id: &str,
    job: &NewJob,
) -> Result<AttachStream, ClientError> {
    let mut conn = dial.dial().await?;
    let path = format!("/apps/{}/jobs", app_id);
    let body = serde_json::to_vec(job)
        .map_err(|e| ClientError::Encode(format!("JSON encoding failed: {}", e)))?;
    let headers = [
        ("Accept", ATTACH_MEDIA_TYPE.to_string()),
        ("Content-Type", "application/json".to_string()),
        ("Authorization", wire::basic_auth(key)),
    ];
    wire::write_request(&mut conn, "POST", &path, host, &headers, &body).await?;

    let head = wire::read_response_head(&mut conn).await?;
    if head.status != 200 {
        wire::drain_body(&mut conn, &head).await?;
        return Err(ClientError::UnexpectedStatus {
            method: http::Method::POST,
            url: format!("http://{}{}", host, path),
            status: head.status,
        });
    }
    tracing::debug!(app = %app_id, "attached to job");
    Ok(AttachStream {
        leftover: head.leftover,
        conn,
    })
}

/// Raw bidirectional stream to an attached job.
///
/// Reads yield any bytes that arrived along with the response head before
/// touching the socket again, so nothing the server sent is lost. Writes and
/// shutdown go straight to the underlying connection.
pub struct AttachStream {
    leftover: Bytes,
    conn: Conn,
}

impl std::fmt::Debug for AttachStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachStream")
            .field("leftover", &self.leftover.len())
            .finish_non_exhaustive()
    }
}

impl AsyncRead for AttachStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if !this.leftover.is_empty() {
            let n = this.leftover.len().min(buf.remaining());
            buf.put_slice(&this.leftover.split_to(n));
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.conn).poll_read(cx, buf)
    }
}

impl AsyncWrite for AttachStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().conn).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().conn).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().conn).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::DuplexDial;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn job() -> NewJob {
        NewJob {
            release_id: "r1".into(),
            cmd: vec!["sh".into()],
            env: Default::default(),
            tty: true,
        }
    }

    #[tokio::test]
    async fn attach_sends_accept_header_and_streams() {
        let (dial, mut peer) = DuplexDial::pair();
        let server = tokio::spawn(async move {
            let mut head = Vec::new();
            let mut byte = [0u8; 1];
            while !head.ends_with(b"\r\n\r\n") {
                peer.read_exact(&mut byte).await.unwrap();
                head.push(byte[0]);
            }
            let head = String::from_utf8(head).unwrap();
            assert!(head.starts_with("POST /apps/a1/jobs HTTP/1.1\r\n"));
            assert!(head.contains("Accept: application/vnd.skiff.attach\r\n"));
            assert!(head.contains("Authorization: Basic "));

            // Read the JSON body declared by Content-Length.
            let len: usize = head
                .lines()
                .find_map(|l| l.strip_prefix("Content-Length: "))
                .unwrap()
                .parse()
                .unwrap();
            let mut body = vec![0u8; len];
            peer.read_exact(&mut body).await.unwrap();

            // 200 with stdout bytes already trailing the head.
            peer.write_all(b"HTTP/1.1 200 OK\r\n\r\nhello from job\n")
                .await
                .unwrap();

            // Echo stdin back, prefixed.
            let mut input = [0u8; 5];
            peer.read_exact(&mut input).await.unwrap();
            peer.write_all(b"echo:").await.unwrap();
            peer.write_all(&input).await.unwrap();
        });

        let mut stream = run_attached(&dial, "controller.local", "key", "a1", &job())
            .await
            .unwrap();

        // Leftover bytes come out first and in order.
        let mut line = [0u8; 15];
        stream.read_exact(&mut line).await.unwrap();
        assert_eq!(&line, b"hello from job\n");

        stream.write_all(b"input").await.unwrap();
        let mut echoed = [0u8; 10];
        stream.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"echo:input");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn attach_failure_maps_status_and_drains() {
        let (dial, mut peer) = DuplexDial::pair();
        let server = tokio::spawn(async move {
            let mut head = Vec::new();
            let mut byte = [0u8; 1];
            while !head.ends_with(b"\r\n\r\n") {
                peer.read_exact(&mut byte).await.unwrap();
                head.push(byte[0]);
            }
            let len: usize = String::from_utf8(head)
                .unwrap()
                .lines()
                .find_map(|l| l.strip_prefix("Content-Length: "))
                .unwrap()
                .parse()
                .unwrap();
            let mut body = vec![0u8; len];
            peer.read_exact(&mut body).await.unwrap();
            peer.write_all(b"HTTP/1.1 409 Conflict\r\nContent-Length: 8\r\n\r\nconflict")
                .await
                .unwrap();
        });

        let err = run_attached(&dial, "controller.local", "key", "a1", &job())
            .await
            .unwrap_err();
        match err {
            ClientError::UnexpectedStatus {
                method,
                url,
                status,
            } => {
                assert_eq!(method, http::Method::POST);
                assert_eq!(url, "http://controller.local/apps/a1/jobs");
                assert_eq!(status, 409);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn attach_dial_failure_propagates() {
        let err = run_attached(
            &crate::testutil::FailingDial,
            "controller.local",
            "key",
            "a1",
            &job(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
    }
}
