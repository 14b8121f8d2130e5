//! Server-sent event streaming.
//!
//! The controller pushes long-lived event feeds as `text/event-stream`
//! responses where every event is a single `data: <json>` line. The decoder
//! here is a plain incremental line scanner; [`EventStream`] wraps it in a
//! spawned producer task feeding a bounded channel, so a slow consumer
//! applies backpressure to the HTTP response body.

use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use http_body::Body;
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::ClientError;

/// Buffered items each stream handle holds before the producer blocks.
pub(crate) const STREAM_BUFFER: usize = 32;

/// Incremental decoder for `data:`-framed server-sent events.
///
/// Feed it raw body chunks in any fragmentation; it yields one payload per
/// complete `data: ` line. Blank lines and non-data fields are skipped, and a
/// partial line at the end of a chunk is kept until the rest arrives.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buf: BytesMut,
}

impl SseDecoder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Absorb a chunk and return the payloads of all newly completed
    /// `data:` lines, in arrival order.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buf.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line = self.buf.split_to(pos + 1);
            line.truncate(line.len() - 1);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            if let Some(payload) = line.strip_prefix(b"data: ") {
                payloads.push(Bytes::copy_from_slice(payload));
            }
        }
        payloads
    }

    /// True when a partial line is still buffered.
    #[cfg(test)]
    pub(crate) fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }
}

/// Handle to a live decoded event feed.
///
/// Values arrive in server order. The channel closing (`recv` returning
/// `None`) means the producer terminated: the server ended the stream, a
/// decode failure occurred, or [`close`](EventStream::close) was called.
/// After closure, [`last_error`](EventStream::last_error) tells a clean end
/// apart from a failure.
pub struct EventStream<T> {
    rx: mpsc::Receiver<T>,
    task: JoinHandle<()>,
    last_error: Arc<Mutex<Option<ClientError>>>,
}

impl<T> std::fmt::Debug for EventStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream").finish_non_exhaustive()
    }
}

impl<T> EventStream<T>
where
    T: DeserializeOwned + Send + 'static,
{
    /// Spawn a producer decoding `body` as an SSE feed of JSON values.
    pub(crate) fn spawn<B>(body: B) -> Self
    where
        B: Body<Data = Bytes> + Send + Unpin + 'static,
        B::Error: std::fmt::Display + Send,
    {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let last_error = Arc::new(Mutex::new(None));
        let error_slot = last_error.clone();
        let task = tokio::spawn(async move {
            if let Err(err) = pump_events(body, &tx).await {
                tracing::debug!(error = %err, "event stream terminated");
                if let Ok(mut slot) = error_slot.lock() {
                    *slot = Some(err);
                }
            }
        });
        Self {
            rx,
            task,
            last_error,
        }
    }

    /// Receive the next event. `None` means the stream is closed; check
    /// [`last_error`](EventStream::last_error) to see whether it ended
    /// cleanly.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Stop the producer. Events already buffered can still be received;
    /// after they drain, `recv` returns `None`.
    pub fn close(&mut self) {
        self.task.abort();
    }

    /// The error that terminated the stream, if any.
    pub fn last_error(&self) -> Option<ClientError> {
        self.last_error.lock().ok().and_then(|slot| slot.clone())
    }
}

impl<T> Drop for EventStream<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn pump_events<T, B>(mut body: B, tx: &mpsc::Sender<T>) -> Result<(), ClientError>
where
    T: DeserializeOwned,
    B: Body<Data = Bytes> + Send + Unpin,
    B::Error: std::fmt::Display + Send,
{
    let mut decoder = SseDecoder::new();
    while let Some(frame) = body.frame().await {
        let frame =
            frame.map_err(|e| ClientError::Transport(format!("event stream read: {}", e)))?;
        let Ok(data) = frame.into_data() else {
            continue;
        };
        for payload in decoder.push(&data) {
            let value: T = serde_json::from_slice(&payload)?;
            if tx.send(value).await.is_err() {
                return Ok(());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use http_body::Frame;
    use http_body_util::StreamBody;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Tick {
        a: u32,
    }

    fn body_of(
        chunks: Vec<&'static [u8]>,
    ) -> StreamBody<impl futures::Stream<Item = Result<Frame<Bytes>, std::io::Error>> + Unpin> {
        let frames: Vec<Result<Frame<Bytes>, std::io::Error>> = chunks
            .into_iter()
            .map(|c| Ok(Frame::data(Bytes::from_static(c))))
            .collect();
        StreamBody::new(stream::iter(frames))
    }

    #[test]
    fn decoder_extracts_data_lines() {
        let mut dec = SseDecoder::new();
        let payloads = dec.push(b"data: {\"a\":1}\n\ndata: {\"a\":2}\n");
        assert_eq!(payloads.len(), 2);
        assert_eq!(&payloads[0][..], br#"{"a":1}"#);
        assert_eq!(&payloads[1][..], br#"{"a":2}"#);
        assert!(!dec.has_partial());
    }

    #[test]
    fn decoder_handles_split_lines() {
        let mut dec = SseDecoder::new();
        assert!(dec.push(b"data: {\"a\"").is_empty());
        assert!(dec.has_partial());
        let payloads = dec.push(b":7}\r\n");
        assert_eq!(payloads.len(), 1);
        assert_eq!(&payloads[0][..], br#"{"a":7}"#);
    }

    #[test]
    fn decoder_skips_comments_and_other_fields() {
        let mut dec = SseDecoder::new();
        let payloads = dec.push(b": keepalive\nevent: ping\ndata: {\"a\":3}\n");
        assert_eq!(payloads.len(), 1);
        assert_eq!(&payloads[0][..], br#"{"a":3}"#);
    }

    #[tokio::test]
    async fn stream_yields_events_in_order_then_closes() {
        let body = body_of(vec![b"data: {\"a\":1}\n", b"\n", b"data: {\"a\":2}\n"]);
        let mut events = EventStream::<Tick>::spawn(body);

        assert_eq!(events.recv().await, Some(Tick { a: 1 }));
        assert_eq!(events.recv().await, Some(Tick { a: 2 }));
        assert_eq!(events.recv().await, None);
        assert!(events.last_error().is_none());
    }

    #[tokio::test]
    async fn stream_reassembles_fragmented_chunks() {
        let body = body_of(vec![b"data: {\"a", b"\":9}", b"\ndata: {\"a\":10}\n"]);
        let mut events = EventStream::<Tick>::spawn(body);

        assert_eq!(events.recv().await, Some(Tick { a: 9 }));
        assert_eq!(events.recv().await, Some(Tick { a: 10 }));
        assert_eq!(events.recv().await, None);
    }

    #[tokio::test]
    async fn decode_failure_terminates_with_error() {
        let body = body_of(vec![b"data: {\"a\":1}\ndata: not-json\ndata: {\"a\":2}\n"]);
        let mut events = EventStream::<Tick>::spawn(body);

        assert_eq!(events.recv().await, Some(Tick { a: 1 }));
        assert_eq!(events.recv().await, None);
        assert!(matches!(events.last_error(), Some(ClientError::Decode(_))));
    }

    #[tokio::test]
    async fn close_terminates_promptly() {
        // A body that never ends.
        let frames = stream::unfold((), |()| async {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            let frame: Result<Frame<Bytes>, std::io::Error> =
                Ok(Frame::data(Bytes::from_static(b"data: {\"a\":1}\n")));
            Some((frame, ()))
        });
        let body = StreamBody::new(Box::pin(frames));
        let mut events = EventStream::<Tick>::spawn(body);

        assert_eq!(events.recv().await, Some(Tick { a: 1 }));
        events.close();
        // Drain whatever was buffered; the channel must close without the
        // producer running forever.
        while events.recv().await.is_some() {}
    }
}
