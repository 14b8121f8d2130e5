//! HTTP transport bound to a dial strategy.
//!
//! This module wires the configured [`Dial`](crate::dial::Dial) capability
//! into hyper_util's legacy client: [`DialConnector`] adapts the dial into a
//! tower `Service<Uri>`, [`HttpTransport`] owns the pooled client, and
//! [`RequestBody`] is the unified request body type.
//!
//! The transport is immutable after construction and safe to share across
//! concurrent calls; each request draws an independent connection from the
//! pool.

mod body;
mod connector;
mod hyper;

pub use self::body::RequestBody;
pub use self::connector::DialConnector;
pub use self::hyper::HttpTransport;
