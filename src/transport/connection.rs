//! # Connections
//!
//! One connection per client endpoint (`ip:port`). Each connection is a
//! task that owns a private upstream socket, one [`RelayPort`] per
//! direction and an idle timer. The binder hands it client datagrams over
//! an unbounded channel; replies from the server arrive on the private
//! socket and go back out through the listening socket.
//!
//! Datagrams of one connection are inspected strictly in arrival order,
//! batch inflation included, and nothing is inspected after close. Client
//! datagrams still queued when a connection closes are routed again, so
//! they reach the upstream through a fresh connection.
//!
//! The [`ConnectionRegistry`] maps keys to dense slot ids. Freed ids are
//! reused last-in first-out, and each id carries a generation so a stale
//! close cannot evict a newer connection in the same slot.

use std::collections::HashMap;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::{Bytes, BytesMut};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, trace, Instrument};

use crate::error::{constants, ProtocolError, Result};
use crate::protocol::dispatcher::Direction;
use crate::protocol::port::{ClientState, PortContext, RelayPort, SharedState};
use crate::transport::binder::{route, RelayShared};
use crate::utils::metrics::global_metrics;

/// Registry slot index plus the generation it was issued under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    pub index: usize,
    pub generation: u64,
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.index)
    }
}

/// Binder-side view of a live connection
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    peer: SocketAddr,
    inbound: mpsc::UnboundedSender<Bytes>,
    cancel: CancellationToken,
    state: SharedState,
}

impl ConnectionHandle {
    pub fn new(
        id: ConnectionId,
        peer: SocketAddr,
        inbound: mpsc::UnboundedSender<Bytes>,
        cancel: CancellationToken,
        state: SharedState,
    ) -> Self {
        Self {
            id,
            peer,
            inbound,
            cancel,
            state,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Queue a client datagram. False when the connection task has exited.
    pub fn send(&self, datagram: Bytes) -> bool {
        self.send_or_return(datagram).is_ok()
    }

    /// Queue a client datagram, handing it back when the task has stopped
    /// taking them
    pub fn send_or_return(&self, datagram: Bytes) -> std::result::Result<(), Bytes> {
        self.inbound.send(datagram).map_err(|e| e.0)
    }

    /// Ask the connection to close. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// True once close was requested or the task stopped taking datagrams
    pub fn is_closing(&self) -> bool {
        self.cancel.is_cancelled()
            || self.inbound.is_closed()
            || self.state.get() == ClientState::Closed
    }
}

/// Registry key for a client endpoint
pub fn connection_key(peer: SocketAddr) -> String {
    format!("{}:{}", peer.ip(), peer.port())
}

struct Slot {
    generation: u64,
    key: String,
    handle: Arc<ConnectionHandle>,
}

#[derive(Default)]
struct RegistryInner {
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    by_key: HashMap<String, usize>,
    next_generation: u64,
}

/// Live connections by key and by dense id
pub struct ConnectionRegistry {
    inner: Mutex<RegistryInner>,
    max_connections: usize,
}

impl ConnectionRegistry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            max_connections,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, RegistryInner>> {
        self.inner
            .lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_REGISTRY_LOCK.to_string()))
    }

    pub fn get(&self, key: &str) -> Option<Arc<ConnectionHandle>> {
        let inner = self.lock().ok()?;
        let index = *inner.by_key.get(key)?;
        inner.slots.get(index)?.as_ref().map(|slot| Arc::clone(&slot.handle))
    }

    /// Look up `key`, creating the connection with `factory` when absent.
    /// The flag is true when this call created it.
    pub fn get_or_create<F>(&self, key: &str, factory: F) -> Result<(Arc<ConnectionHandle>, bool)>
    where
        F: FnOnce(ConnectionId) -> Result<ConnectionHandle>,
    {
        let mut inner = self.lock()?;
        if let Some(&index) = inner.by_key.get(key) {
            if let Some(Some(slot)) = inner.slots.get(index) {
                return Ok((Arc::clone(&slot.handle), false));
            }
        }
        if inner.by_key.len() >= self.max_connections {
            return Err(ProtocolError::Custom(constants::ERR_REGISTRY_FULL.to_string()));
        }

        let index = inner.free.pop().unwrap_or(inner.slots.len());
        inner.next_generation += 1;
        let id = ConnectionId {
            index,
            generation: inner.next_generation,
        };

        let handle = match factory(id) {
            Ok(handle) => Arc::new(handle),
            Err(err) => {
                if index < inner.slots.len() {
                    inner.free.push(index);
                }
                return Err(err);
            }
        };

        let slot = Slot {
            generation: id.generation,
            key: key.to_string(),
            handle: Arc::clone(&handle),
        };
        if index == inner.slots.len() {
            inner.slots.push(Some(slot));
        } else {
            inner.slots[index] = Some(slot);
        }
        inner.by_key.insert(key.to_string(), index);
        Ok((handle, true))
    }

    /// Remove the connection issued as `id`. A stale id (slot reused since)
    /// removes nothing.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        let mut inner = self.lock().ok()?;
        let current = inner.slots.get(id.index)?.as_ref()?.generation;
        if current != id.generation {
            return None;
        }
        let slot = inner.slots.get_mut(id.index)?.take()?;
        inner.by_key.remove(&slot.key);
        inner.free.push(id.index);
        Some(slot.handle)
    }

    pub fn handles(&self) -> Vec<Arc<ConnectionHandle>> {
        self.lock()
            .map(|inner| {
                inner
                    .slots
                    .iter()
                    .flatten()
                    .map(|slot| Arc::clone(&slot.handle))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|inner| inner.by_key.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.len())
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// Open the private upstream socket, build both ports and start the
/// connection task. Must run inside a Tokio runtime.
pub(crate) fn spawn_connection(
    shared: &Arc<RelayShared>,
    id: ConnectionId,
    peer: SocketAddr,
) -> Result<ConnectionHandle> {
    let local: SocketAddr = match shared.upstream {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let std_socket = std::net::UdpSocket::bind(local)?;
    std_socket.connect(shared.upstream)?;
    std_socket.set_nonblocking(true)?;
    let upstream = UdpSocket::from_std(std_socket)?;

    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = shared.cancel.child_token();
    let state = SharedState::new();

    let port = |direction| {
        let ctx = PortContext::new(
            direction,
            peer,
            state.clone(),
            Arc::clone(&shared.events),
            Arc::clone(&shared.tables),
        )
        .with_max_batch_size(shared.config.protocol.max_decompressed_size);
        RelayPort::new(ctx, shared.config.protocol.fragment_limits())
    };

    let actor = ConnectionActor {
        id,
        peer,
        upstream,
        inbound: rx,
        cancel: cancel.clone(),
        state: state.clone(),
        to_server: port(Direction::ClientToServer),
        to_client: port(Direction::ServerToClient),
        shared: Arc::clone(shared),
    };
    let span = info_span!("connection", id = %id, peer = %peer);
    shared.tracker.spawn(actor.run().instrument(span));

    global_metrics().connection_opened();
    Ok(ConnectionHandle::new(id, peer, tx, cancel, state))
}

struct ConnectionActor {
    id: ConnectionId,
    peer: SocketAddr,
    upstream: UdpSocket,
    inbound: mpsc::UnboundedReceiver<Bytes>,
    cancel: CancellationToken,
    state: SharedState,
    to_server: RelayPort,
    to_client: RelayPort,
    shared: Arc<RelayShared>,
}

impl ConnectionActor {
    async fn run(mut self) {
        let idle_timeout = self.shared.config.server.idle_timeout;
        let max_datagram = self.shared.config.server.max_datagram_size;
        let mut buf = BytesMut::with_capacity(max_datagram);
        let idle = tokio::time::sleep(idle_timeout);
        tokio::pin!(idle);

        loop {
            buf.reserve(max_datagram);
            tokio::select! {

                _ = self.cancel.cancelled() => {
                    debug!("Connection closed");
                    break;
                }
                _ = &mut idle => {
                    debug!(timeout_ms = idle_timeout.as_millis() as u64, "Connection idle");
                    break;
                }
                datagram = self.inbound.recv() => {
                    let Some(datagram) = datagram else { break };
                    self.to_server.inspect(&datagram);
                    if let Err(e) = self.upstream.send(&datagram).await {
                        global_metrics().forward_error();
                        debug!(error = %e, "Failed to forward datagram upstream");
                    }
                    idle.as_mut().reset(Instant::now() + idle_timeout);
                }
                received = self.upstream.recv_buf(&mut buf) => {
                    match received {
                        Ok(n) => {
                            let datagram = buf.split().freeze();
                            global_metrics().server_datagram(n as u64);
                            self.to_client.inspect(&datagram);
                            if let Err(e) = self.shared.listener.send_to(&datagram, self.peer).await {
                                global_metrics().forward_error();
                                debug!(error = %e, "Failed to forward datagram to client");
                            }
                            idle.as_mut().reset(Instant::now() + idle_timeout);
                        }
                        // ICMP errors from the upstream surface here; the socket stays usable
                        Err(e) => trace!(error = %e, "Upstream receive failed"),
                    }
                }
            }
        }

        self.finish();
    }

    fn finish(mut self) {
        if !self.state.close() {
            return;
        }
        self.cancel.cancel();
        self.shared.registry.remove(self.id);

        // Anything queued before the channel closed is handed back to the
        // binder; later sends fail and the binder opens a fresh connection
        self.inbound.close();
        let mut leftover = Vec::new();
        while let Ok(datagram) = self.inbound.try_recv() {
            leftover.push(datagram);
        }

        global_metrics().connection_closed();
        self.shared.events.on_disconnected(self.id.index, self.peer);
        self.shared.traffic.release(self.peer.ip());

        if leftover.is_empty() {
            return;
        }
        if self.shared.cancel.is_cancelled() || self.shared.bans.is_banned(self.peer.ip()) {
            debug!(dropped = leftover.len(), "Queued datagrams dropped on shutdown");
            return;
        }
        debug!(count = leftover.len(), "Routing queued datagrams to a new connection");
        for datagram in leftover {
            route(&self.shared, self.peer, datagram);
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    fn handle(id: ConnectionId, port: u16) -> Result<ConnectionHandle> {
        let (tx, _rx) = mpsc::unbounded_channel();
        Ok(ConnectionHandle::new(
            id,
            SocketAddr::from(([127, 0, 0, 1], port)),
            tx,
            CancellationToken::new(),
            SharedState::new(),
        ))
    }

    #[test]
    fn test_stopped_task_hands_datagram_back() {
        let id = ConnectionId {
            index: 0,
            generation: 1,
        };
        let handle = handle(id, 4000).unwrap();
        assert!(handle.is_closing());
        let datagram = Bytes::from_static(&[0x01, 0x02]);
        assert_eq!(handle.send_or_return(datagram.clone()), Err(datagram));

        let (tx, _rx) = mpsc::unbounded_channel();
        let live = ConnectionHandle::new(
            id,
            SocketAddr::from(([127, 0, 0, 1], 4001)),
            tx,
            CancellationToken::new(),
            SharedState::new(),
        );
        assert!(!live.is_closing());
        assert!(live.send(Bytes::from_static(&[0x03])));
        live.close();
        assert!(live.is_closing());
    }

    #[test]
    fn test_key_lookup_returns_existing() {
        let registry = ConnectionRegistry::new(8);
        let (a, created) = registry.get_or_create("a", |id| handle(id, 1)).unwrap();
        assert!(created);
        let (b, created) = registry
            .get_or_create("a", |_| panic!("factory must not run"))
            .unwrap();
        assert!(!created);
        assert_eq!(a.id(), b.id());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_ids_reused_lifo() {
        let registry = ConnectionRegistry::new(8);
        let ids: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|key| registry.get_or_create(key, |id| handle(id, 1)).unwrap().0.id())
            .collect();
        assert_eq!(ids.iter().map(|id| id.index).collect::<Vec<_>>(), vec![0, 1, 2]);

        registry.remove(ids[0]).unwrap();
        registry.remove(ids[1]).unwrap();
        let (d, _) = registry.get_or_create("d", |id| handle(id, 1)).unwrap();
        let (e, _) = registry.get_or_create("e", |id| handle(id, 1)).unwrap();
        let (f, _) = registry.get_or_create("f", |id| handle(id, 1)).unwrap();
        assert_eq!(d.id().index, 1);
        assert_eq!(e.id().index, 0);
        assert_eq!(f.id().index, 3);
    }

    #[test]
    fn test_stale_id_does_not_remove() {
        let registry = ConnectionRegistry::new(8);
        let (old, _) = registry.get_or_create("a", |id| handle(id, 1)).unwrap();
        registry.remove(old.id()).unwrap();
        let (new, _) = registry.get_or_create("b", |id| handle(id, 2)).unwrap();
        assert_eq!(new.id().index, old.id().index);
        assert!(registry.remove(old.id()).is_none());
        assert!(registry.get("b").is_some());
        assert!(registry.get("a").is_none());
    }

    #[test]
    fn test_capacity_and_factory_failure() {
        let registry = ConnectionRegistry::new(1);
        registry.get_or_create("a", |id| handle(id, 1)).unwrap();
        assert!(registry.get_or_create("b", |id| handle(id, 2)).is_err());

        let registry = ConnectionRegistry::new(4);
        let failed = registry.get_or_create("x", |_| Err(ProtocolError::ConnectionClosed));
        assert!(failed.is_err());
        let (ok, _) = registry.get_or_create("y", |id| handle(id, 3)).unwrap();
        assert_eq!(ok.id().index, 0);
    }

    #[test]
    fn test_key_format() {
        assert_eq!(
            connection_key("192.168.0.7:50000".parse().unwrap()),
            "192.168.0.7:50000"
        );
    }
}
