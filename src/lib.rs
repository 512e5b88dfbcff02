//! # raknet-relay
//!
//! Intercepting UDP relay for RakNet game traffic. Every datagram is
//! forwarded unchanged between clients and one upstream server while the
//! relay decodes what it can: the offline handshake, reliable frames,
//! split payloads and the compressed application batch carrying the login.
//! Decoding is fail-open; a datagram that cannot be decoded is still
//! forwarded byte for byte.
//!
//! ## Layout
//! - [`core`]: cursor and schema primitives
//! - [`protocol`]: framing, packet tables and the per-direction relay port
//! - [`transport`]: the binder and per-connection tasks
//! - [`service`]: event hooks and the flood guard
//! - [`utils`]: compression, logging and metrics

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use config::RelayConfig;
pub use error::{ProtocolError, Result};
pub use transport::RelayBinder;
