//! # Transport Layer
//!
//! UDP plumbing of the relay.
//!
//! ## Components
//! - **Binder**: the client-facing socket, admission and the traffic roll
//! - **Connection**: per-endpoint tasks and the generation-checked registry

pub mod binder;
pub mod connection;

pub use binder::RelayBinder;
pub use connection::{ConnectionHandle, ConnectionId, ConnectionRegistry};
