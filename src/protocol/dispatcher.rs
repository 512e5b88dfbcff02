use crate::core::cursor::Cursor;
use crate::core::schema::{Schema, Value};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::port::PortContext;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

type HandlerFn = dyn Fn(&Value, &mut Cursor<'_>, &mut PortContext) -> Result<()> + Send + Sync;

/// Which way a datagram is travelling through the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client to server (received on the listening socket)
    ClientToServer,
    /// Server to client (received on the connection's upstream socket)
    ServerToClient,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::ClientToServer => "RECV",
            Direction::ServerToClient => "SEND",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Entry {
    schema: Schema,
    handler: Box<HandlerFn>,
}

/// Packet id → (schema, handler) for one protocol layer and direction.
///
/// Lookups clone the entry out of the lock before running the handler, so a
/// handler may dispatch into the same table (batch sub-packets do).
pub struct PacketTable {
    name: &'static str,
    entries: RwLock<HashMap<u8, Arc<Entry>>>,
}

impl PacketTable {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Register a handler, replacing any previous entry for `id`
    pub fn register<F>(&self, id: u8, schema: Schema, handler: F) -> Result<()>
    where
        F: Fn(&Value, &mut Cursor<'_>, &mut PortContext) -> Result<()> + Send + Sync + 'static,
    {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_TABLE_WRITE_LOCK.to_string()))?;

        entries.insert(
            id,
            Arc::new(Entry {
                schema,
                handler: Box::new(handler),
            }),
        );
        Ok(())
    }

    pub fn contains(&self, id: u8) -> bool {
        self.entries
            .read()
            .map(|entries| entries.contains_key(&id))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decode the body for `id` and run its handler.
    ///
    /// Returns `Ok(false)` when nothing is registered for `id`. Decode and
    /// handler errors are returned to the caller untouched.
    pub fn try_dispatch(&self, id: u8, c: &mut Cursor<'_>, ctx: &mut PortContext) -> Result<bool> {
        let entry = {
            let entries = self
                .entries
                .read()
                .map_err(|_| ProtocolError::Custom(constants::ERR_TABLE_READ_LOCK.to_string()))?;
            match entries.get(&id) {
                Some(entry) => Arc::clone(entry),
                None => return Ok(false),
            }
        };

        let value = entry.schema.decode(c)?;
        (entry.handler)(&value, c, ctx)?;
        Ok(true)
    }
}

impl fmt::Debug for PacketTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketTable")
            .field("name", &self.name)
            .field("entries", &self.len())
            .finish()
    }
}

/// One table per direction for a single protocol layer
#[derive(Debug)]
pub struct DirectionalTables {
    pub client_to_server: PacketTable,
    pub server_to_client: PacketTable,
}

impl DirectionalTables {
    pub fn new(layer: &'static str) -> Self {
        Self {
            client_to_server: PacketTable::new(layer),
            server_to_client: PacketTable::new(layer),
        }
    }

    pub fn get(&self, direction: Direction) -> &PacketTable {
        match direction {
            Direction::ClientToServer => &self.client_to_server,
            Direction::ServerToClient => &self.server_to_client,
        }
    }

    /// Register the same handler for both directions
    pub fn register_both<F>(&self, id: u8, schema: Schema, handler: F) -> Result<()>
    where
        F: Fn(&Value, &mut Cursor<'_>, &mut PortContext) -> Result<()>
            + Clone
            + Send
            + Sync
            + 'static,
    {
        self.client_to_server
            .register(id, schema.clone(), handler.clone())?;
        self.server_to_client.register(id, schema, handler)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::schema::Scalar;
    use crate::protocol::port::{ClientState, PortContext};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_unknown_id_is_not_handled() {
        let table = PacketTable::new("test");
        let mut ctx = PortContext::detached(Direction::ClientToServer);
        let mut c = Cursor::new(&[1, 2, 3]);
        assert!(!table.try_dispatch(7, &mut c, &mut ctx).unwrap());
        assert_eq!(c.position(), 0);
    }

    #[test]
    fn test_handler_sees_trailing_bytes() {
        let table = PacketTable::new("test");
        table
            .register(1, Scalar::U16Be.into(), |value, c, ctx| {
                assert_eq!(value.as_int()?, 0x0102);
                assert_eq!(c.read_remaining(), &[9, 9]);
                ctx.state.set(ClientState::Connected);
                Ok(())
            })
            .unwrap();

        let mut ctx = PortContext::detached(Direction::ClientToServer);
        let mut c = Cursor::new(&[1, 2, 9, 9]);
        assert!(table.try_dispatch(1, &mut c, &mut ctx).unwrap());
        assert_eq!(ctx.state.get(), ClientState::Connected);
    }

    #[test]
    fn test_truncated_body_is_underrun() {
        let table = PacketTable::new("test");
        table
            .register(1, Scalar::I64Be.into(), |_, _, _| Ok(()))
            .unwrap();
        let mut ctx = PortContext::detached(Direction::ServerToClient);
        let err = table
            .try_dispatch(1, &mut Cursor::new(&[0, 0, 0]), &mut ctx)
            .unwrap_err();
        assert!(err.is_underrun());
    }

    #[test]
    fn test_register_replaces_entry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let table = PacketTable::new("test");
        table
            .register(5, Schema::empty(), |_, _, _| {
                Err(ProtocolError::Custom("old handler".into()))
            })
            .unwrap();
        let counter = Arc::clone(&calls);
        table
            .register(5, Schema::empty(), move |_, _, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        let mut ctx = PortContext::detached(Direction::ClientToServer);
        assert!(table
            .try_dispatch(5, &mut Cursor::new(&[]), &mut ctx)
            .unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(table.len(), 1);
    }
}
