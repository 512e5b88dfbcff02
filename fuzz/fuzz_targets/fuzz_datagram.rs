#![no_main]

use std::sync::Arc;

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use once_cell::sync::Lazy;
use raknet_relay::protocol::dispatcher::Direction;
use raknet_relay::protocol::fragment::FragmentLimits;
use raknet_relay::protocol::handlers::ProtocolTables;
use raknet_relay::protocol::port::{ClientState, PortContext, RelayPort, SharedState};
use raknet_relay::service::events::RelayEvents;

struct Silent;

impl RelayEvents for Silent {}

static TABLES: Lazy<Arc<ProtocolTables>> =
    Lazy::new(|| Arc::new(ProtocolTables::standard().unwrap_or_else(|_| ProtocolTables::empty())));

fuzz_target!(|data: &[u8]| {
    // First byte picks direction and starting state, the rest is split
    // into datagrams on 0xff
    let Some((&selector, rest)) = data.split_first() else {
        return;
    };
    let direction = if selector & 1 == 0 {
        Direction::ClientToServer
    } else {
        Direction::ServerToClient
    };
    let ctx = PortContext::new(
        direction,
        std::net::SocketAddr::from(([127, 0, 0, 1], 19132)),
        SharedState::new(),
        Arc::new(Silent),
        Arc::clone(&TABLES),
    );
    if selector & 2 != 0 {
        ctx.state.set(ClientState::Connected);
    }
    let mut port = RelayPort::new(ctx, FragmentLimits::default());
    for datagram in rest.split(|&b| b == 0xff) {
        port.inspect(&Bytes::copy_from_slice(datagram));
    }
});
