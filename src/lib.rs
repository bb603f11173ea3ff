//! quotepool - a pooled outbound HTTP/1.1 client fronted by a quote endpoint.
//!
//! The client keeps a bounded, route-partitioned pool of keep-alive
//! connections, honors `Keep-Alive` timeouts advertised by servers and
//! reaps idle connections on a background thread.

pub mod body;
pub mod client;
pub mod config;
pub mod error;
pub mod helpers;
pub mod logging;
pub mod pool;
pub mod server;

pub use client::HttpClient;
pub use error::{ClientError, Result};
