//! # Protocol Layer
//!
//! RakNet framing and the packet tables the relay decodes against.
//!
//! ## Components
//! - **Envelope**: datagram classification, frame headers, ACK/NAK records
//! - **Fragment**: bounded reassembly of split frames
//! - **Dispatcher**: packet id → (schema, handler) tables per layer and direction
//! - **Handlers**: the standard registrations ([`handlers::ProtocolTables::standard`])
//! - **Port**: per-direction inspector and the shared connection state
//! - **Login / Batch**: application-layer identity extraction and batch unpacking

pub mod address;
pub mod batch;
pub mod dispatcher;
pub mod envelope;
pub mod fragment;
pub mod handlers;
pub mod ids;
pub mod login;
pub mod port;
pub mod reliability;

pub use dispatcher::{Direction, DirectionalTables, PacketTable};
pub use handlers::ProtocolTables;
pub use port::{ClientState, PortContext, RelayPort, SharedState};
