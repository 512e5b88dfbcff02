//! Packet identifiers
//!
//! Connection-layer ids are RakNet's own message ids; application-layer ids
//! live above [`USER_PACKET_ENUM`] inside reliable frames, or inside a batch.

/// Outer datagram flag: a connected-mode datagram
pub const FLAG_VALID: u8 = 0x80;
/// Outer datagram flag: acknowledgement batch
pub const FLAG_ACK: u8 = 0x40;
/// Outer datagram flag: negative acknowledgement batch
pub const FLAG_NAK: u8 = 0x20;
/// Encapsulated frame flag: payload is one piece of a split compound
pub const FLAG_SPLIT: u8 = 0x10;

/// Connection-layer ids below this go to the connection table
pub const USER_PACKET_ENUM: u8 = 0x86;

/// RakNet connection-layer message ids
pub mod raknet {
    pub const CONNECTED_PING: u8 = 0x00;
    pub const UNCONNECTED_PING: u8 = 0x01;
    pub const UNCONNECTED_PING_OPEN_CONNECTIONS: u8 = 0x02;
    pub const CONNECTED_PONG: u8 = 0x03;
    pub const OPEN_CONNECTION_REQUEST_1: u8 = 0x05;
    pub const OPEN_CONNECTION_REPLY_1: u8 = 0x06;
    pub const OPEN_CONNECTION_REQUEST_2: u8 = 0x07;
    pub const OPEN_CONNECTION_REPLY_2: u8 = 0x08;
    pub const CONNECTION_REQUEST: u8 = 0x09;
    pub const CONNECTION_REQUEST_ACCEPTED: u8 = 0x10;
    pub const NEW_INCOMING_CONNECTION: u8 = 0x13;
    pub const DISCONNECTION_NOTIFICATION: u8 = 0x15;
    pub const UNCONNECTED_PONG: u8 = 0x1c;

    /// Human readable name for logging
    pub fn name(id: u8) -> &'static str {
        match id {
            CONNECTED_PING => "ConnectedPing",
            UNCONNECTED_PING => "UnconnectedPing",
            UNCONNECTED_PING_OPEN_CONNECTIONS => "UnconnectedPingOpenConnections",
            CONNECTED_PONG => "ConnectedPong",
            OPEN_CONNECTION_REQUEST_1 => "OpenConnectionRequest1",
            OPEN_CONNECTION_REPLY_1 => "OpenConnectionReply1",
            OPEN_CONNECTION_REQUEST_2 => "OpenConnectionRequest2",
            OPEN_CONNECTION_REPLY_2 => "OpenConnectionReply2",
            CONNECTION_REQUEST => "ConnectionRequest",
            CONNECTION_REQUEST_ACCEPTED => "ConnectionRequestAccepted",
            NEW_INCOMING_CONNECTION => "NewIncomingConnection",
            DISCONNECTION_NOTIFICATION => "DisconnectionNotification",
            UNCONNECTED_PONG => "UnconnectedPong",
            _ => "Unknown",
        }
    }
}

/// Application-layer (game) packet ids
pub mod game {
    pub const LOGIN: u8 = 0x01;
    pub const SERVER_TO_CLIENT_HANDSHAKE: u8 = 0x03;
    pub const BATCH: u8 = 0xfe;
}
