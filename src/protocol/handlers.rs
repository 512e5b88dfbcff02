//! Standard packet registrations
//!
//! Three layers, each with a table per direction:
//! - handshake: offline messages exchanged before the session is connected
//! - connected: RakNet control packets inside frames
//! - application: game packets inside frames or batches

use tracing::{debug, trace};

use crate::core::cursor::Cursor;
use crate::core::schema::{Scalar, Schema, Value};
use crate::error::Result;
use crate::protocol::address::{system_address, to_socket_addr};
use crate::protocol::batch::handle_batch;
use crate::protocol::dispatcher::DirectionalTables;
use crate::protocol::ids::{game, raknet};
use crate::protocol::login::{handle_login, handle_server_handshake};
use crate::protocol::port::{ClientState, PortContext};

/// Every dispatch table the relay consults
#[derive(Debug)]
pub struct ProtocolTables {
    pub handshake: DirectionalTables,
    pub connected: DirectionalTables,
    pub application: DirectionalTables,
}

fn long() -> Schema {
    Scalar::I64Be.into()
}

fn magic() -> Schema {
    Scalar::Magic.into()
}

/// Handler for packets that are only decoded, never acted on
fn observe(
    name: &'static str,
) -> impl Fn(&Value, &mut Cursor<'_>, &mut PortContext) -> Result<()> + Clone {
    move |value: &Value, _: &mut Cursor<'_>, ctx: &mut PortContext| {
        trace!(peer = %ctx.peer, direction = %ctx.direction, packet = name, %value, "Observed");
        Ok(())
    }
}

impl ProtocolTables {
    /// Tables with nothing registered
    pub fn empty() -> Self {
        Self {
            handshake: DirectionalTables::new("handshake"),
            connected: DirectionalTables::new("connected"),
            application: DirectionalTables::new("application"),
        }
    }

    /// Tables with the relay's standard handlers registered
    pub fn standard() -> Result<Self> {
        let tables = Self::empty();
        tables.register_handshake()?;
        tables.register_connected()?;
        tables.register_application()?;
        Ok(tables)
    }

    fn register_handshake(&self) -> Result<()> {
        let address = system_address()?;
        let c2s = &self.handshake.client_to_server;
        let s2c = &self.handshake.server_to_client;

        c2s.register(
            raknet::UNCONNECTED_PING,
            Schema::list([long(), magic(), long()]),
            observe("UnconnectedPing"),
        )?;
        c2s.register(
            raknet::UNCONNECTED_PING_OPEN_CONNECTIONS,
            Schema::empty(),
            observe("UnconnectedPingOpenConnections"),
        )?;
        c2s.register(
            raknet::OPEN_CONNECTION_REQUEST_1,
            Schema::list([magic(), Scalar::U8.into(), Scalar::Remaining.into()]),
            |value, _, ctx| {
                let protocol = value.at(1)?.as_int()?;
                let padding = value.at(2)?.as_bytes()?.len();
                debug!(peer = %ctx.peer, protocol = %protocol, mtu = padding + 18, "Open connection request 1");
                Ok(())
            },
        )?;
        c2s.register(
            raknet::OPEN_CONNECTION_REQUEST_2,
            Schema::list([magic(), address.clone(), Scalar::U16Be.into(), long()]),
            |value, _, ctx| {
                let server = to_socket_addr(value.at(1)?)?;
                let mtu = value.at(2)?.as_int()?;
                debug!(peer = %ctx.peer, %server, mtu = %mtu, "Open connection request 2");
                Ok(())
            },
        )?;

        s2c.register(
            raknet::UNCONNECTED_PONG,
            Schema::list([long(), long(), magic(), Scalar::ShortString.into()]),
            |value, _, ctx| {
                trace!(peer = %ctx.peer, motd = value.at(3)?.as_str()?, "Unconnected pong");
                Ok(())
            },
        )?;
        s2c.register(
            raknet::OPEN_CONNECTION_REPLY_1,
            Schema::list([magic(), long(), Scalar::Bool.into(), Scalar::U16Be.into()]),
            observe("OpenConnectionReply1"),
        )?;
        s2c.register(
            raknet::OPEN_CONNECTION_REPLY_2,
            Schema::list([
                magic(),
                long(),
                address,
                Scalar::U16Be.into(),
                Scalar::Bool.into(),
            ]),
            |value, _, ctx| {
                let mtu = value.at(3)?.as_int()?;
                ctx.state.set(ClientState::Connected);
                debug!(peer = %ctx.peer, mtu = %mtu, "Session connected");
                Ok(())
            },
        )?;
        Ok(())
    }

    fn register_connected(&self) -> Result<()> {
        let address = system_address()?;
        let both = &self.connected;

        both.register_both(
            raknet::CONNECTED_PING,
            Schema::list([long()]),
            observe("ConnectedPing"),
        )?;
        both.register_both(
            raknet::CONNECTED_PONG,
            Schema::list([long(), long()]),
            observe("ConnectedPong"),
        )?;
        both.register_both(
            raknet::DISCONNECTION_NOTIFICATION,
            Schema::empty(),
            |_, _, ctx| {
                ctx.state.set(ClientState::Disconnected);
                debug!(peer = %ctx.peer, direction = %ctx.direction, "Disconnection notification");
                Ok(())
            },
        )?;

        both.client_to_server.register(
            raknet::CONNECTION_REQUEST,
            Schema::list([long(), long(), Scalar::Bool.into()]),
            observe("ConnectionRequest"),
        )?;
        both.client_to_server.register(
            raknet::NEW_INCOMING_CONNECTION,
            Schema::list([address.clone()]),
            |value, _, ctx| {
                let server = to_socket_addr(value.at(0)?)?;
                debug!(peer = %ctx.peer, %server, "New incoming connection");
                Ok(())
            },
        )?;
        both.server_to_client.register(
            raknet::CONNECTION_REQUEST_ACCEPTED,
            Schema::list([address, Scalar::U16Be.into()]),
            |value, _, ctx| {
                let client = to_socket_addr(value.at(0)?)?;
                debug!(peer = %ctx.peer, %client, "Connection request accepted");
                Ok(())
            },
        )?;
        Ok(())
    }

    fn register_application(&self) -> Result<()> {
        let app = &self.application;

        app.client_to_server.register(
            game::LOGIN,
            Schema::list([Scalar::I32Be.into(), Scalar::VarBytes.into()]),
            handle_login,
        )?;
        app.server_to_client.register(
            game::SERVER_TO_CLIENT_HANDSHAKE,
            Schema::list([Scalar::VarString.into()]),
            handle_server_handshake,
        )?;
        // Server batches are forwarded without being walked
        app.client_to_server
            .register(game::BATCH, Schema::empty(), handle_batch)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::protocol::dispatcher::Direction;

    #[test]
    fn test_standard_registrations() {
        let tables = ProtocolTables::standard().unwrap();
        let hs = &tables.handshake;
        assert!(hs.get(Direction::ClientToServer).contains(raknet::OPEN_CONNECTION_REQUEST_1));
        assert!(!hs.get(Direction::ClientToServer).contains(raknet::OPEN_CONNECTION_REPLY_2));
        assert!(hs.get(Direction::ServerToClient).contains(raknet::OPEN_CONNECTION_REPLY_2));

        for direction in [Direction::ClientToServer, Direction::ServerToClient] {
            assert!(tables.connected.get(direction).contains(raknet::DISCONNECTION_NOTIFICATION));
        }
        assert!(tables.application.client_to_server.contains(game::BATCH));
        assert!(!tables.application.server_to_client.contains(game::BATCH));
        assert!(tables.application.client_to_server.contains(game::LOGIN));
        assert!(!tables.application.server_to_client.contains(game::LOGIN));
    }
}
