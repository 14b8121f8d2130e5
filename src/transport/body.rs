//! Request body types for the HTTP transport.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use http_body::{Body, Frame};
use pin_project_lite::pin_project;
use serde::Serialize;

use crate::error::ClientError;

pin_project! {
    /// A request body for controller API calls.
    ///
    /// The executor branches on this tag rather than inspecting the payload
    /// at runtime:
    /// - `Empty` for bodyless requests (GET, DELETE)
    /// - `Full` for a value already serialized to JSON
    /// - `Streaming` for a caller-supplied raw byte stream, passed through
    ///   unchanged
    #[project = RequestBodyProj]
    pub enum RequestBody {
        /// Empty request body.
        Empty,
        /// Full request body with all data available.
        Full {
            data: Option<Bytes>,
        },
        /// Raw byte stream passed through without re-encoding.
        Streaming {
            #[pin]
            stream: Pin<Box<dyn Stream<Item = Result<Bytes, ClientError>> + Send>>,
        },
    }
}

impl RequestBody {
    /// Create an empty body.
    pub fn empty() -> Self {
        RequestBody::Empty
    }

    /// Create a body with the given bytes.
    pub fn full(data: Bytes) -> Self {
        RequestBody::Full { data: Some(data) }
    }

    /// Serialize `value` to JSON and wrap it as a full body.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, ClientError> {
        let data = serde_json::to_vec(value)
            .map_err(|e| ClientError::Encode(format!("JSON encoding failed: {}", e)))?;
        Ok(Self::full(Bytes::from(data)))
    }

    /// Create a streaming body from the given byte stream.
    pub fn streaming<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, ClientError>> + Send + 'static,
    {
        RequestBody::Streaming {
            stream: Box::pin(stream),
        }
    }
}

impl Body for RequestBody {
    type Data = Bytes;
    type Error = ClientError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.project() {
            RequestBodyProj::Empty => Poll::Ready(None),
            RequestBodyProj::Full { data } => {
                let result = data.take().map(|d| Ok(Frame::data(d)));
                Poll::Ready(result)
            }
            RequestBodyProj::Streaming { stream } => match stream.poll_next(cx) {
                Poll::Ready(Some(Ok(data))) => Poll::Ready(Some(Ok(Frame::data(data)))),
                Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Pending => Poll::Pending,
            },
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            RequestBody::Empty => true,
            RequestBody::Full { data } => data.is_none(),
            RequestBody::Streaming { .. } => false,
        }
    }

    fn size_hint(&self) -> http_body::SizeHint {
        match self {
            RequestBody::Empty => http_body::SizeHint::with_exact(0),
            RequestBody::Full { data } => match data {
                Some(d) => http_body::SizeHint::with_exact(d.len() as u64),
                None => http_body::SizeHint::with_exact(0),
            },
            RequestBody::Streaming { .. } => http_body::SizeHint::default(),
        }
    }
}

impl Default for RequestBody {
    fn default() -> Self {
        RequestBody::Empty
    }
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestBody::Empty => write!(f, "RequestBody::Empty"),
            RequestBody::Full { data } => f
                .debug_struct("RequestBody::Full")
                .field("data_len", &data.as_ref().map(|d| d.len()))
                .finish(),
            RequestBody::Streaming { .. } => write!(f, "RequestBody::Streaming"),
        }
    }
}
