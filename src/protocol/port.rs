//! # Relay Port
//!
//! One direction of one connection. A port inspects each datagram before
//! the caller forwards it: it walks the envelope, reassembles split frames
//! and dispatches inner packets through the protocol tables.
//!
//! Inspection is observational. [`RelayPort::inspect`] never fails; any
//! decode error is counted and reported through [`RelayEvents::on_error`],
//! and the caller forwards the original bytes regardless.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::core::cursor::Cursor;
use crate::error::Result;
use crate::protocol::dispatcher::Direction;
use crate::protocol::envelope::{is_padding, read_ack_records, DatagramKind, Frame};
use crate::protocol::fragment::{FragmentBuffer, FragmentLimits};
use crate::protocol::handlers::ProtocolTables;
use crate::protocol::ids::USER_PACKET_ENUM;
use crate::service::events::{RelayEvents, TracingEvents};
use crate::utils::compression::MAX_DECOMPRESSION_SIZE;
use crate::utils::metrics::global_metrics;

/// Connection lifecycle as observed from the relayed traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientState {
    Connecting = 0,
    Connected = 1,
    Disconnecting = 2,
    Disconnected = 3,
    /// Decoding disabled; datagrams are only forwarded
    Direct = 4,
    /// Terminal
    Closed = 5,
}

impl ClientState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ClientState::Connecting,
            1 => ClientState::Connected,
            2 => ClientState::Disconnecting,
            3 => ClientState::Disconnected,
            4 => ClientState::Direct,
            _ => ClientState::Closed,
        }
    }

    /// Whether datagrams in this state are inspected at all
    pub fn is_decoding(self) -> bool {
        !matches!(self, ClientState::Direct | ClientState::Closed)
    }
}

/// State shared by both ports of a connection. Demoting one direction to
/// `Direct` stops decoding in the other as well.
#[derive(Debug, Clone)]
pub struct SharedState(Arc<AtomicU8>);

impl SharedState {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(ClientState::Connecting as u8)))
    }

    pub fn get(&self) -> ClientState {
        ClientState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `state` unless already closed. Returns the previous state.
    pub fn set(&self, state: ClientState) -> ClientState {
        let previous = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != ClientState::Closed as u8).then_some(state as u8)
            })
            .unwrap_or_else(|closed| closed);
        ClientState::from_u8(previous)
    }

    /// Mark closed. True only for the call that performed the transition.
    pub fn close(&self) -> bool {
        self.0.swap(ClientState::Closed as u8, Ordering::AcqRel) != ClientState::Closed as u8
    }

    pub fn is_decoding(&self) -> bool {
        self.get().is_decoding()
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a packet handler may observe or change
pub struct PortContext {
    pub direction: Direction,
    /// Client endpoint of the connection, whichever direction this is
    pub peer: SocketAddr,
    pub state: SharedState,
    pub events: Arc<dyn RelayEvents>,
    pub tables: Arc<ProtocolTables>,
    /// Ceiling for one inflated application batch
    pub max_batch_size: usize,
}

impl PortContext {
    pub fn new(
        direction: Direction,
        peer: SocketAddr,
        state: SharedState,
        events: Arc<dyn RelayEvents>,
        tables: Arc<ProtocolTables>,
    ) -> Self {
        Self {
            direction,
            peer,
            state,
            events,
            tables,
            max_batch_size: MAX_DECOMPRESSION_SIZE,
        }
    }

    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    /// Context with no connection behind it and empty tables
    pub fn detached(direction: Direction) -> Self {
        Self::new(
            direction,
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            SharedState::new(),
            Arc::new(TracingEvents),
            Arc::new(ProtocolTables::empty()),
        )
    }

    /// Stop decoding this connection for good
    pub fn demote(&self, reason: &str) {
        let previous = self.state.set(ClientState::Direct);
        if previous.is_decoding() {
            global_metrics().passthrough_demotion();
            debug!(peer = %self.peer, direction = %self.direction, reason, "Connection demoted to passthrough");
        }
    }

    /// Report a recoverable decode failure
    pub fn report(&self, packet_id: u8, message: &str) {
        global_metrics().decode_error();
        self.events
            .on_error(self.peer, self.direction, packet_id, message);
    }

    /// Dispatch an encapsulated payload by its leading id. Ids below
    /// [`USER_PACKET_ENUM`] belong to the connection layer.
    pub fn dispatch_encapsulated(&mut self, payload: &[u8]) -> Result<bool> {
        let mut c = Cursor::new(payload);
        let id = c.read_u8()?;
        let tables = Arc::clone(&self.tables);
        let table = if id < USER_PACKET_ENUM {
            tables.connected.get(self.direction)
        } else {
            tables.application.get(self.direction)
        };
        let handled = table.try_dispatch(id, &mut c, self)?;
        if !handled {
            trace!(id, layer = table.name(), "Unhandled encapsulated packet");
        }
        Ok(handled)
    }
}

/// Inspector for one direction of one connection
pub struct RelayPort {
    ctx: PortContext,
    fragments: FragmentBuffer,
}

impl RelayPort {
    pub fn new(ctx: PortContext, limits: FragmentLimits) -> Self {
        Self {
            ctx,
            fragments: FragmentBuffer::with_limits(limits),
        }
    }

    pub fn context(&self) -> &PortContext {
        &self.ctx
    }

    pub fn state(&self) -> ClientState {
        self.ctx.state.get()
    }

    /// Incomplete split payloads held by this port
    pub fn pending_compounds(&self) -> usize {
        self.fragments.pending()
    }

    /// Observe one datagram. Errors are reported, never returned.
    pub fn inspect(&mut self, datagram: &Bytes) {
        let state = self.ctx.state.get();
        if !state.is_decoding() {
            return;
        }
        let Some(&id) = datagram.first() else {
            return;
        };
        if let Err(err) = self.decode(datagram, state) {
            self.ctx.report(id, &err.to_string());
        }
    }

    fn decode(&mut self, datagram: &Bytes, state: ClientState) -> Result<()> {
        let mut c = Cursor::new(datagram);
        let id = c.read_u8()?;

        if state != ClientState::Connected {
            let tables = Arc::clone(&self.ctx.tables);
            tables
                .handshake
                .get(self.ctx.direction)
                .try_dispatch(id, &mut c, &mut self.ctx)?;
            return Ok(());
        }

        match DatagramKind::classify(id) {
            DatagramKind::Offline => {
                debug!(peer = %self.ctx.peer, id, "Offline message on a connected session");
            }
            DatagramKind::Ack => {
                let ids = read_ack_records(&mut c)?;
                global_metrics().ack_batch();
                trace!(count = ids.len(), "ACK");
            }
            DatagramKind::Nak => {
                let ids = read_ack_records(&mut c)?;
                global_metrics().nak_batch();
                trace!(count = ids.len(), "NAK");
            }
            DatagramKind::FrameSet => {
                let sequence = c.read_u24_le()?;
                trace!(sequence, size = datagram.len(), "Frame set");
                while !c.is_eof() {
                    if is_padding(c.peek_bytes(c.remaining())?) {
                        trace!(padding = c.remaining(), "Trailing padding after frames");
                        break;
                    }
                    let frame = Frame::read(&mut c)?;
                    global_metrics().frame_decoded();

                    let payload = match frame.header.split {
                        Some(split) => match self.fragments.put(
                            split.compound_size,
                            split.compound_id,
                            split.fragment_index,
                            datagram.slice_ref(frame.payload),
                        )? {
                            Some(joined) => joined,
                            None => continue,
                        },
                        None => datagram.slice_ref(frame.payload),
                    };
                    if payload.is_empty() {
                        continue;
                    }

                    self.ctx.dispatch_encapsulated(&payload)?;
                    if !self.ctx.state.is_decoding() {
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_is_terminal() {
        let state = SharedState::new();
        assert_eq!(state.get(), ClientState::Connecting);
        assert_eq!(state.set(ClientState::Connected), ClientState::Connecting);
        assert!(state.close());
        assert!(!state.close());
        assert_eq!(state.set(ClientState::Direct), ClientState::Closed);
        assert_eq!(state.get(), ClientState::Closed);
    }

    #[test]
    fn test_state_is_shared_between_clones() {
        let a = SharedState::new();
        let b = a.clone();
        b.set(ClientState::Direct);
        assert!(!a.is_decoding());
    }

    #[test]
    fn test_detached_port_ignores_garbage() {
        let mut port = RelayPort::new(
            PortContext::detached(Direction::ClientToServer),
            FragmentLimits::default(),
        );
        port.inspect(&Bytes::new());
        port.inspect(&Bytes::from_static(&[0xff, 0x00]));
        assert_eq!(port.state(), ClientState::Connecting);
    }
}
