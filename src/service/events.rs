use std::net::{IpAddr, SocketAddr};

use tracing::{info, warn};

use crate::protocol::dispatcher::Direction;

/// Hooks the relay calls as it observes traffic.
///
/// Every method has a no-op default. Calls happen on the connection's task,
/// so implementations should return quickly.
pub trait RelayEvents: Send + Sync {
    /// A connection was created for a new client endpoint
    fn on_connected(&self, _id: usize, _peer: SocketAddr) {}

    /// A connection was closed (idle, unbind or explicit close)
    fn on_disconnected(&self, _id: usize, _peer: SocketAddr) {}

    /// A login packet was observed. Name and XUID are absent when the chain
    /// carried no identity token.
    fn on_login(&self, _ip: IpAddr, _name: Option<&str>, _xuid: Option<&str>) {}

    /// A datagram or sub-packet could not be decoded
    fn on_error(&self, _peer: SocketAddr, _direction: Direction, _packet_id: u8, _message: &str) {}
}

/// Logs every event through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEvents;

impl RelayEvents for TracingEvents {
    fn on_connected(&self, id: usize, peer: SocketAddr) {
        info!(id, %peer, "Client connected");
    }

    fn on_disconnected(&self, id: usize, peer: SocketAddr) {
        info!(id, %peer, "Client disconnected");
    }

    fn on_login(&self, ip: IpAddr, name: Option<&str>, xuid: Option<&str>) {
        info!(
            %ip,
            name = name.unwrap_or("<unknown>"),
            xuid = xuid.unwrap_or("<unknown>"),
            "Player login"
        );
    }

    fn on_error(&self, peer: SocketAddr, direction: Direction, packet_id: u8, message: &str) {
        warn!(%peer, "[{direction}:{packet_id:#04x}]: {message}");
    }
}
