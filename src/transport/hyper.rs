//! Pooled HTTP client over the dial capability.

use std::sync::Arc;
use std::time::Duration;

use hyper::body::Incoming;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};

use super::body::RequestBody;
use super::connector::DialConnector;
use crate::dial::Dial;
use crate::error::ClientError;

type HyperClient = Client<DialConnector, RequestBody>;

/// HTTP transport using hyper_util's legacy client, with every connection
/// established through the client's dial strategy.
///
/// The pool settings are fixed: requests that arrive concurrently use
/// independent connections, idle connections are reaped after 90 seconds.
#[derive(Clone)]
pub struct HttpTransport {
    client: HyperClient,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport").finish_non_exhaustive()
    }
}

impl HttpTransport {
    /// Create a transport bound to the given dial strategy.
    pub fn new(dial: Arc<dyn Dial>) -> Self {
        let mut builder = Client::builder(TokioExecutor::new());
        builder.pool_timer(TokioTimer::new());
        builder.pool_idle_timeout(Duration::from_secs(90));
        builder.pool_max_idle_per_host(32);
        let client = builder.build(DialConnector::new(dial));
        Self { client }
    }

    /// Send an HTTP request and receive a response.
    pub async fn request(
        &self,
        request: http::Request<RequestBody>,
    ) -> Result<http::Response<Incoming>, ClientError> {
        self.client
            .request(request)
            .await
            .map_err(|e| ClientError::Transport(format!("request failed: {}", e)))
    }
}
