//! Streaming RPC sessions.
//!
//! Streaming procedures (formation updates) do not ride the pooled HTTP
//! transport. Each call dials a dedicated connection, performs a minimal
//! CONNECT handshake against the RPC endpoint, and then speaks a framed
//! record protocol on the raw socket. The framing is behind [`RpcCodec`] so
//! the wire format can be swapped without touching session management;
//! [`JsonLineCodec`] is the default.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::dial::{Conn, Dial};
use crate::error::ClientError;
use crate::events::STREAM_BUFFER;
use crate::wire;

/// Path of the controller's RPC endpoint.
pub const RPC_PATH: &str = "/rpc";

/// Dial a fresh connection and upgrade it to an RPC session.
///
/// Returns the connection plus any record bytes that arrived with the
/// response head. A non-200 answer is mapped through the same status
/// taxonomy as plain API calls.
pub(crate) async fn open_session(
    dial: &dyn Dial,
    host: &str,
    key: &str,
) -> Result<(Conn, Bytes), ClientError> {
    let mut conn = dial.dial().await?;
    let headers = [("Authorization", wire::basic_auth(key))];
    wire::write_request(&mut conn, "CONNECT", RPC_PATH, host, &headers, &[]).await?;

    let head = wire::read_response_head(&mut conn).await?;
    if head.status != 200 {
        wire::drain_body(&mut conn, &head).await?;
        return Err(ClientError::UnexpectedStatus {
            method: http::Method::CONNECT,
            url: format!("http://{}{}", host, RPC_PATH),
            status: head.status,
        });
    }
    tracing::debug!(host = %host, "rpc session established");
    Ok((conn, head.leftover))
}

/// Wire framing for RPC sessions.
///
/// A codec owns the connection for the duration of one streaming call: it
/// writes the request envelope, then decodes response records and forwards
/// them to `tx` until the server ends the stream, the receiver is dropped,
/// or a protocol failure occurs.
#[async_trait]
pub trait RpcCodec: Send + Sync {
    async fn stream_call(
        &self,
        conn: Conn,
        initial: Bytes,
        procedure: &str,
        arg: serde_json::Value,
        tx: mpsc::Sender<serde_json::Value>,
    ) -> Result<(), ClientError>;
}

/// Newline-delimited JSON framing.
///
/// The request envelope is a single line `{"procedure":...,"arg":...}`;
/// every response line is one JSON record. The argument is embedded exactly
/// as given, so cursors round-trip without reformatting.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonLineCodec;

#[async_trait]
impl RpcCodec for JsonLineCodec {
    async fn stream_call(
        &self,
        mut conn: Conn,
        initial: Bytes,
        procedure: &str,
        arg: serde_json::Value,
        tx: mpsc::Sender<serde_json::Value>,
    ) -> Result<(), ClientError> {
        let envelope = serde_json::json!({ "procedure": procedure, "arg": arg });
        let mut line = serde_json::to_vec(&envelope)
            .map_err(|e| ClientError::Encode(format!("JSON encoding failed: {}", e)))?;
        line.push(b'\n');
        wire::write_all(&mut conn, &line).await?;

        let mut buf = BytesMut::from(&initial[..]);
        loop {
            while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                let line = buf.split_to(pos + 1);
                let line = &line[..line.len() - 1];
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                let record: serde_json::Value = serde_json::from_slice(line)?;
                if tx.send(record).await.is_err() {
                    return Ok(());
                }
            }
            let n = conn
                .read_buf(&mut buf)
                .await
                .map_err(|e| ClientError::Transport(format!("rpc stream read: {}", e)))?;
            if n == 0 {
                if buf.iter().any(|b| !b.is_ascii_whitespace()) {
                    return Err(ClientError::Protocol(
                        "rpc stream ended mid-record".into(),
                    ));
                }
                return Ok(());
            }
        }
    }
}

/// Handle to a live streaming RPC call, yielding typed records.
///
/// Same lifecycle contract as [`EventStream`](crate::events::EventStream):
/// the channel closes exactly when the producer has terminated, and
/// [`last_error`](RpcStream::last_error) distinguishes a clean end from a
/// failure.
pub struct RpcStream<T> {
    rx: mpsc::Receiver<serde_json::Value>,
    task: JoinHandle<()>,
    last_error: Arc<Mutex<Option<ClientError>>>,
    failed: bool,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for RpcStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcStream").finish_non_exhaustive()
    }
}

impl<T> RpcStream<T>
where
    T: DeserializeOwned + Send + 'static,
{
    /// Spawn a producer driving `codec` over an established session.
    pub(crate) fn spawn(
        conn: Conn,
        initial: Bytes,
        codec: Arc<dyn RpcCodec>,
        procedure: String,
        arg: serde_json::Value,
    ) -> Self {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let last_error = Arc::new(Mutex::new(None));
        let error_slot = last_error.clone();
        let task = tokio::spawn(async move {
            if let Err(err) = codec.stream_call(conn, initial, &procedure, arg, tx).await {
                tracing::debug!(procedure = %procedure, error = %err, "rpc stream terminated");
                if let Ok(mut slot) = error_slot.lock() {
                    *slot = Some(err);
                }
            }
        });
        Self {
            rx,
            task,
            last_error,
            failed: false,
            _marker: std::marker::PhantomData,
        }
    }

    /// Receive the next record. `None` means the stream is closed; a record
    /// that fails to decode closes the stream, discarding anything already
    /// buffered, and is reported through
    /// [`last_error`](RpcStream::last_error).
    pub async fn recv(&mut self) -> Option<T> {
        if self.failed {
            return None;
        }
        let value = self.rx.recv().await?;
        match serde_json::from_value(value) {
            Ok(record) => Some(record),
            Err(e) => {
                if let Ok(mut slot) = self.last_error.lock() {
                    *slot = Some(ClientError::Decode(e.to_string()));
                }
                self.failed = true;
                self.close();
                self.rx.close();
                None
            }
        }
    }

    /// Stop the producer and release the connection.
    pub fn close(&mut self) {
        self.task.abort();
    }

    /// The error that terminated the stream, if any.
    pub fn last_error(&self) -> Option<ClientError> {
        self.last_error.lock().ok().and_then(|slot| slot.clone())
    }
}

impl<T> Drop for RpcStream<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{DuplexDial, FailingDial};
    use crate::types::FormationUpdate;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn read_line(peer: &mut tokio::io::DuplexStream) -> String {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            peer.read_exact(&mut byte).await.unwrap();
            if byte[0] == b'\n' {
                break;
            }
            line.push(byte[0]);
        }
        String::from_utf8(line).unwrap()
    }

    async fn read_head(peer: &mut tokio::io::DuplexStream) -> String {
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            peer.read_exact(&mut byte).await.unwrap();
            head.push(byte[0]);
        }
        String::from_utf8(head).unwrap()
    }

    #[tokio::test]
    async fn handshake_sends_connect_with_basic_auth() {
        let (dial, mut peer) = DuplexDial::pair();
        let server = tokio::spawn(async move {
            let head = read_head(&mut peer).await;
            assert!(head.starts_with("CONNECT /rpc HTTP/1.1\r\n"));
            assert!(head.contains("Authorization: Basic OnNlY3JldA==\r\n"));
            peer.write_all(b"HTTP/1.1 200 OK\r\n\r\n").await.unwrap();
        });

        let (_conn, initial) = open_session(&dial, "controller.local", "secret")
            .await
            .unwrap();
        assert!(initial.is_empty());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn handshake_rejection_maps_status() {
        let (dial, mut peer) = DuplexDial::pair();
        let server = tokio::spawn(async move {
            read_head(&mut peer).await;
            peer.write_all(b"HTTP/1.1 401 Unauthorized\r\n\r\n")
                .await
                .unwrap();
        });

        let err = open_session(&dial, "controller.local", "wrong")
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            ClientError::UnexpectedStatus { status: 401, .. }
        ));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn handshake_dial_failure_returns_no_session() {
        let err = open_session(&FailingDial, "controller.local", "key")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ClientError::Transport(_)));
    }

    #[tokio::test]
    async fn codec_sends_cursor_verbatim_and_decodes_records() {
        let (dial, mut peer) = DuplexDial::pair();
        let server = tokio::spawn(async move {
            let head = read_head(&mut peer).await;
            assert!(head.starts_with("CONNECT /rpc HTTP/1.1\r\n"));
            peer.write_all(b"HTTP/1.1 200 OK\r\n\r\n").await.unwrap();

            let envelope = read_line(&mut peer).await;
            let envelope: serde_json::Value = serde_json::from_str(&envelope).unwrap();
            assert_eq!(envelope["procedure"], "Controller.StreamFormations");
            assert_eq!(envelope["arg"], "2015-06-01T12:00:00Z");

            peer.write_all(b"{\"app\":{\"id\":\"a1\"},\"processes\":{\"web\":2}}\n")
                .await
                .unwrap();
            peer.write_all(b"{\"app\":{\"id\":\"a2\"},\"processes\":{}}\n")
                .await
                .unwrap();
        });

        let (conn, initial) = open_session(&dial, "controller.local", "key")
            .await
            .unwrap();
        let mut stream = RpcStream::<FormationUpdate>::spawn(
            conn,
            initial,
            Arc::new(JsonLineCodec),
            "Controller.StreamFormations".into(),
            serde_json::json!("2015-06-01T12:00:00Z"),
        );

        let first = stream.recv().await.unwrap();
        assert_eq!(first.app.id, "a1");
        assert_eq!(first.processes.get("web"), Some(&2));
        let second = stream.recv().await.unwrap();
        assert_eq!(second.app.id, "a2");
        assert_eq!(stream.recv().await, None::<FormationUpdate>);
        assert!(stream.last_error().is_none());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn records_in_handshake_leftover_are_not_lost() {
        let (dial, mut peer) = DuplexDial::pair();
        let server = tokio::spawn(async move {
            read_head(&mut peer).await;
            // First record rides along with the response head.
            peer.write_all(b"HTTP/1.1 200 OK\r\n\r\n{\"app\":{\"id\":\"early\"}}\n")
                .await
                .unwrap();
            read_line(&mut peer).await;
            peer.write_all(b"{\"app\":{\"id\":\"late\"}}\n").await.unwrap();
        });

        let (conn, initial) = open_session(&dial, "controller.local", "key")
            .await
            .unwrap();
        assert!(!initial.is_empty());
        let mut stream = RpcStream::<FormationUpdate>::spawn(
            conn,
            initial,
            Arc::new(JsonLineCodec),
            "Controller.StreamFormations".into(),
            serde_json::json!(0),
        );

        assert_eq!(stream.recv().await.unwrap().app.id, "early");
        assert_eq!(stream.recv().await.unwrap().app.id, "late");
        assert_eq!(stream.recv().await, None::<FormationUpdate>);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn truncated_record_is_a_protocol_error() {
        let (dial, mut peer) = DuplexDial::pair();
        let server = tokio::spawn(async move {
            read_head(&mut peer).await;
            peer.write_all(b"HTTP/1.1 200 OK\r\n\r\n").await.unwrap();
            read_line(&mut peer).await;
            peer.write_all(b"{\"app\":{\"id\":\"a1\"}}\n{\"app\":")
                .await
                .unwrap();
        });

        let (conn, initial) = open_session(&dial, "controller.local", "key")
            .await
            .unwrap();
        let mut stream = RpcStream::<FormationUpdate>::spawn(
            conn,
            initial,
            Arc::new(JsonLineCodec),
            "Controller.StreamFormations".into(),
            serde_json::json!(0),
        );

        assert_eq!(stream.recv().await.unwrap().app.id, "a1");
        assert_eq!(stream.recv().await, None::<FormationUpdate>);
        assert!(matches!(
            stream.last_error(),
            Some(ClientError::Protocol(_))
        ));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn decode_failure_discards_already_buffered_records() {
        let (dial, mut peer) = DuplexDial::pair();
        let server = tokio::spawn(async move {
            read_head(&mut peer).await;
            peer.write_all(b"HTTP/1.1 200 OK\r\n\r\n").await.unwrap();
            read_line(&mut peer).await;
            // Bad record followed by a good one, delivered in one burst so
            // the good one is sitting in the channel when decoding fails.
            peer.write_all(b"[1,2,3]\n{\"app\":{\"id\":\"late\"}}\n")
                .await
                .unwrap();
        });

        let (conn, initial) = open_session(&dial, "controller.local", "key")
            .await
            .unwrap();
        let mut stream = RpcStream::<FormationUpdate>::spawn(
            conn,
            initial,
            Arc::new(JsonLineCodec),
            "Controller.StreamFormations".into(),
            serde_json::json!(0),
        );

        assert_eq!(stream.recv().await, None::<FormationUpdate>);
        assert!(matches!(stream.last_error(), Some(ClientError::Decode(_))));
        // The record buffered behind the bad one must never surface.
        assert_eq!(stream.recv().await, None::<FormationUpdate>);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn undecodable_record_closes_with_decode_error() {
        let (dial, mut peer) = DuplexDial::pair();
        let server = tokio::spawn(async move {
            read_head(&mut peer).await;
            peer.write_all(b"HTTP/1.1 200 OK\r\n\r\n").await.unwrap();
            read_line(&mut peer).await;
            // Valid JSON, wrong shape for FormationUpdate.
            peer.write_all(b"[1,2,3]\n").await.unwrap();
        });

        let (conn, initial) = open_session(&dial, "controller.local", "key")
            .await
            .unwrap();
        let mut stream = RpcStream::<FormationUpdate>::spawn(
            conn,
            initial,
            Arc::new(JsonLineCodec),
            "Controller.StreamFormations".into(),
            serde_json::json!(0),
        );

        assert_eq!(stream.recv().await, None::<FormationUpdate>);
        assert!(matches!(stream.last_error(), Some(ClientError::Decode(_))));
        server.await.unwrap();
    }
}
