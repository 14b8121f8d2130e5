//! Shared helpers for in-memory transport tests.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::DuplexStream;

use crate::dial::{Conn, Dial};
use crate::error::ClientError;

/// A dial strategy backed by one half of an in-memory duplex pipe. The test
/// holds the other half and plays the server side. Dialing a second time
/// fails, which also catches unexpected reconnects.
pub(crate) struct DuplexDial {
    side: Mutex<Option<DuplexStream>>,
}

impl DuplexDial {
    /// Build a dial plus the peer stream the test scripts against.
    pub(crate) fn pair() -> (Self, DuplexStream) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        (
            Self {
                side: Mutex::new(Some(client)),
            },
            server,
        )
    }
}

#[async_trait]
impl Dial for DuplexDial {
    async fn dial(&self) -> Result<Conn, ClientError> {
        let stream = self
            .side
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .ok_or_else(|| ClientError::Transport("duplex already dialed".into()))?;
        Ok(Box::new(stream))
    }
}

/// A dial strategy that always fails, for exercising dial-error paths.
pub(crate) struct FailingDial;

#[async_trait]
impl Dial for FailingDial {
    async fn dial(&self) -> Result<Conn, ClientError> {
        Err(ClientError::Transport("dial refused".into()))
    }
}
