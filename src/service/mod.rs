//! # Relay Services
//!
//! Collaborators the relay consults or notifies:
//! - [`events`]: connection, login and decode-error hooks
//! - [`guard`]: ban list and per-address traffic counters

pub mod events;
pub mod guard;

pub use events::{RelayEvents, TracingEvents};
pub use guard::{BanList, MemoryBanList, TrafficMonitor, TrafficStore};
