//! Client construction.
//!
//! The builder turns a controller URI into a concrete dial strategy:
//!
//! - `http://host[:port]` connects directly (default port 80)
//! - any URI plus a certificate pin connects over pinned TLS (default
//!   port 443); the pin alone decides, since pinning replaces CA trust
//! - `discovery+http://service-name` resolves the host as a logical service
//!   name through the injected registry
//!
//! `https` without a pin is rejected: this client has no CA-based trust
//! path, so a bare `https` URI cannot be honored as written.

use std::sync::Arc;

use crate::client::Client;
use crate::dial::{Dial, DirectDial, DiscoveryDial, PinnedTlsDial, ServiceRegistry};
use crate::error::ClientError;
use crate::rpc::{JsonLineCodec, RpcCodec};

/// Scheme that routes dialing through a service registry.
pub const DISCOVERY_SCHEME: &str = "discovery+http";

/// Builder for [`Client`].
pub struct ClientBuilder {
    uri: String,
    key: String,
    pin: Option<Vec<u8>>,
    registry: Option<Arc<dyn ServiceRegistry>>,
    codec: Arc<dyn RpcCodec>,
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("uri", &self.uri)
            .field("pinned", &self.pin.is_some())
            .finish_non_exhaustive()
    }
}

impl ClientBuilder {
    /// Start building a client for the controller at `uri`.
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            key: String::new(),
            pin: None,
            registry: None,
            codec: Arc::new(JsonLineCodec),
        }
    }

    /// Authentication key, sent as the basic-auth password on every call.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// SHA-256 fingerprint of the controller's certificate. Setting a pin
    /// switches dialing to pinned TLS.
    pub fn pin(mut self, pin: Vec<u8>) -> Self {
        self.pin = Some(pin);
        self
    }

    /// Registry used to resolve `discovery+http` URIs.
    pub fn registry(mut self, registry: Arc<dyn ServiceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Override the RPC wire framing. Defaults to [`JsonLineCodec`].
    pub fn codec(mut self, codec: Arc<dyn RpcCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Resolve the dial strategy and construct the client.
    pub fn build(self) -> Result<Client, ClientError> {
        let target = parse_target(&self.uri, self.pin.is_some())?;
        let host = target.host().to_string();
        let dial: Arc<dyn Dial> = match target {
            Target::Direct(addr) => Arc::new(DirectDial::new(addr)),
            Target::Pinned(addr) => {
                Arc::new(PinnedTlsDial::new(addr, self.pin.unwrap_or_default())?)
            }
            Target::Discovery(service) => {
                let registry = self.registry.ok_or_else(|| {
                    ClientError::Config(format!(
                        "{} uri requires a service registry",
                        DISCOVERY_SCHEME
                    ))
                })?;
                Arc::new(DiscoveryDial::new(service, registry))
            }
        };
        Ok(Client::new(host, self.key, dial, self.codec))
    }
}

/// How the URI maps onto a dial strategy.
#[derive(Debug, PartialEq)]
enum Target {
    Direct(String),
    Pinned(String),
    Discovery(String),
}

impl Target {
    /// Authority used in request URLs and Host headers. All API traffic is
    /// plain HTTP on the wire; TLS, when pinned, wraps the connection below
    /// it.
    fn host(&self) -> &str {
        match self {
            Target::Direct(addr) | Target::Pinned(addr) => addr,
            Target::Discovery(service) => service,
        }
    }
}

fn parse_target(uri: &str, pinned: bool) -> Result<Target, ClientError> {
    let parsed: http::Uri = uri
        .parse()
        .map_err(|e| ClientError::Config(format!("invalid controller uri {:?}: {}", uri, e)))?;
    let host = parsed
        .host()
        .ok_or_else(|| ClientError::Config(format!("controller uri {:?} has no host", uri)))?;
    let scheme = parsed.scheme_str().unwrap_or("http");

    if scheme == DISCOVERY_SCHEME {
        return Ok(Target::Discovery(host.to_string()));
    }
    if pinned {
        let port = parsed.port_u16().unwrap_or(443);
        return Ok(Target::Pinned(format!("{}:{}", host, port)));
    }
    match scheme {
        "http" => {
            let port = parsed.port_u16().unwrap_or(80);
            Ok(Target::Direct(format!("{}:{}", host, port)))
        }
        "https" => Err(ClientError::Config(
            "https uri requires a certificate pin".into(),
        )),
        other => Err(ClientError::Config(format!(
            "unsupported controller uri scheme {:?}",
            other
        ))),
    }
}
