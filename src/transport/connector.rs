//! Adapter from the dial capability to hyper's connector interface.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use http::Uri;
use hyper_util::client::legacy::connect::{Connected, Connection};
use hyper_util::rt::TokioIo;
use tower_service::Service;

use crate::dial::{Conn, Dial};
use crate::error::ClientError;

/// Connector that ignores the request URI and dials through the client's
/// configured [`Dial`] strategy. The strategy already knows the authoritative
/// target address, so every pooled connection goes through the same policy
/// (direct, pinned TLS, or discovery).
#[derive(Clone)]
pub struct DialConnector {
    dial: Arc<dyn Dial>,
}

impl DialConnector {
    pub fn new(dial: Arc<dyn Dial>) -> Self {
        Self { dial }
    }
}

impl std::fmt::Debug for DialConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DialConnector")
    }
}

impl Service<Uri> for DialConnector {
    type Response = TransportIo;
    type Error = ClientError;
    type Future = Pin<Box<dyn Future<Output = Result<TransportIo, ClientError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _dst: Uri) -> Self::Future {
        let dial = self.dial.clone();
        Box::pin(async move {
            let conn = dial.dial().await?;
            Ok(TransportIo {
                inner: TokioIo::new(conn),
            })
        })
    }
}

/// A dialed connection in the shape hyper's client expects.
pub struct TransportIo {
    inner: TokioIo<Conn>,
}

impl hyper::rt::Read for TransportIo {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: hyper::rt::ReadBufCursor<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl hyper::rt::Write for TransportIo {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, std::io::Error>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), std::io::Error>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl Connection for TransportIo {
    fn connected(&self) -> Connected {
        Connected::new()
    }
}
