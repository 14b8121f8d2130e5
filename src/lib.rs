//! Client library for the Skiff controller API.
//!
//! The controller is the cluster's source of truth for apps, releases,
//! formations, and jobs. This crate talks to it over three distinct call
//! shapes, all sharing one connection-establishment strategy:
//!
//! - **Plain API calls** ride a pooled hyper client. One request executor
//!   applies authentication and maps response statuses onto
//!   [`ClientError`], so every operation reports failures the same way.
//! - **Server-sent event feeds** ([`EventStream`]) decode `data:` lines
//!   into typed values on a bounded channel.
//! - **Raw-socket sessions** bypass the pool: [`AttachStream`] turns a job
//!   creation into a bidirectional stdio pipe, and [`RpcStream`] carries
//!   streaming procedure calls over a dedicated framed connection.
//!
//! How connections are made is decided once, at build time: direct TCP,
//! TLS pinned to a certificate fingerprint, or resolution through a
//! [`ServiceRegistry`].
//!
//! ```no_run
//! use skiff_controller_client::ClientBuilder;
//!
//! # async fn example() -> Result<(), skiff_controller_client::ClientError> {
//! let client = ClientBuilder::new("http://controller.local")
//!     .key("the-controller-key")
//!     .build()?;
//!
//! let app = client.get_app("my-app").await?;
//! let mut events = client.stream_job_events(&app.id).await?;
//! while let Some(event) = events.recv().await {
//!     println!("job {} is {}", event.job_id, event.state);
//! }
//! # Ok(())
//! # }
//! ```

mod attach;
mod builder;
mod client;
mod dial;
mod error;
mod events;
mod rpc;
mod transport;
pub mod types;
mod wire;

#[cfg(test)]
mod testutil;

pub use attach::{ATTACH_MEDIA_TYPE, AttachStream};
pub use builder::{ClientBuilder, DISCOVERY_SCHEME};
pub use client::Client;
pub use dial::{Conn, Connection, Dial, DirectDial, DiscoveryDial, PinnedTlsDial, ServiceRegistry};
pub use error::ClientError;
pub use events::EventStream;
pub use rpc::{JsonLineCodec, RPC_PATH, RpcCodec, RpcStream};
pub use transport::{DialConnector, HttpTransport, RequestBody};
