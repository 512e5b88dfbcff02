//! # Relay Binder
//!
//! Owns the client-facing UDP socket. Each received datagram is counted
//! against its source address, dropped when the address is banned, and
//! otherwise queued to the connection for its `ip:port`, creating the
//! connection on first contact.
//!
//! ```ignore
//! let binder = RelayBinder::new(config, Arc::new(TracingEvents), bans, traffic)?;
//! let local = binder.bind()?;
//! tokio::signal::ctrl_c().await?;
//! binder.unbind().await;
//! ```

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use tokio::net::UdpSocket;
use tokio::runtime::Handle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::RelayConfig;
use crate::error::{ProtocolError, Result};
use crate::protocol::handlers::ProtocolTables;
use crate::service::events::RelayEvents;
use crate::service::guard::{BanList, TrafficStore};
use crate::transport::connection::{
    connection_key, spawn_connection, ConnectionHandle, ConnectionRegistry,
};
use crate::utils::metrics::global_metrics;

/// State shared by the binder loop and every connection task
pub(crate) struct RelayShared {
    pub(crate) config: RelayConfig,
    pub(crate) upstream: SocketAddr,
    pub(crate) listener: Arc<UdpSocket>,
    pub(crate) tables: Arc<ProtocolTables>,
    pub(crate) events: Arc<dyn RelayEvents>,
    pub(crate) bans: Arc<dyn BanList>,
    pub(crate) traffic: Arc<dyn TrafficStore>,
    pub(crate) registry: Arc<ConnectionRegistry>,
    pub(crate) cancel: CancellationToken,
    pub(crate) tracker: TaskTracker,
}

struct Bound {
    shared: Arc<RelayShared>,
    local_addr: SocketAddr,
}

/// Intercepting relay between game clients and one upstream server
pub struct RelayBinder {
    config: RelayConfig,
    upstream: SocketAddr,
    tables: Arc<ProtocolTables>,
    events: Arc<dyn RelayEvents>,
    bans: Arc<dyn BanList>,
    traffic: Arc<dyn TrafficStore>,
    registry: Arc<ConnectionRegistry>,
    bound: Mutex<Option<Bound>>,
}

impl RelayBinder {
    /// Build a relay with the standard packet tables. Nothing is bound yet.
    pub fn new(
        config: RelayConfig,
        events: Arc<dyn RelayEvents>,
        bans: Arc<dyn BanList>,
        traffic: Arc<dyn TrafficStore>,
    ) -> Result<Self> {
        let tables = ProtocolTables::standard()?;
        Self::with_tables(config, tables, events, bans, traffic)
    }

    /// Build a relay around caller-supplied packet tables
    pub fn with_tables(
        config: RelayConfig,
        tables: ProtocolTables,
        events: Arc<dyn RelayEvents>,
        bans: Arc<dyn BanList>,
        traffic: Arc<dyn TrafficStore>,
    ) -> Result<Self> {
        let upstream = config.server.upstream_addr()?;
        let registry = Arc::new(ConnectionRegistry::new(config.server.max_connections));
        Ok(Self {
            config,
            upstream,
            tables: Arc::new(tables),
            events,
            bans,
            traffic,
            registry,
            bound: Mutex::new(None),
        })
    }

    fn bound(&self) -> Result<std::sync::MutexGuard<'_, Option<Bound>>> {
        self.bound
            .lock()
            .map_err(|_| ProtocolError::Custom("binder state lock poisoned".to_string()))
    }

    /// Open the listening socket and start the receive and window-roll
    /// tasks. Calling it again while bound returns the existing address.
    pub fn bind(&self) -> Result<SocketAddr> {
        let mut bound = self.bound()?;
        if let Some(existing) = bound.as_ref() {
            return Ok(existing.local_addr);
        }

        Handle::try_current()
            .map_err(|e| ProtocolError::Custom(format!("bind requires a Tokio runtime: {e}")))?;

        let listen = self.config.server.listen_addr()?;
        let std_socket = std::net::UdpSocket::bind(listen)?;
        std_socket.set_nonblocking(true)?;
        let listener = Arc::new(UdpSocket::from_std(std_socket)?);
        let local_addr = listener.local_addr()?;

        let shared = Arc::new(RelayShared {
            config: self.config.clone(),
            upstream: self.upstream,
            listener,
            tables: Arc::clone(&self.tables),
            events: Arc::clone(&self.events),
            bans: Arc::clone(&self.bans),
            traffic: Arc::clone(&self.traffic),
            registry: Arc::clone(&self.registry),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        });

        shared.tracker.spawn(listen_loop(Arc::clone(&shared)));
        shared.tracker.spawn(roll_loop(Arc::clone(&shared)));

        info!(%local_addr, upstream = %self.upstream, "Relay bound");
        *bound = Some(Bound { shared, local_addr });
        Ok(local_addr)
    }

    /// Stop listening, close every connection and wait for their tasks
    pub async fn unbind(&self) {
        let Some(bound) = self.bound().ok().and_then(|mut b| b.take()) else {
            return;
        };
        bound.shared.cancel.cancel();
        bound.shared.tracker.close();
        bound.shared.tracker.wait().await;
        info!(local_addr = %bound.local_addr, "Relay unbound");
        global_metrics().log_metrics();
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.bound().ok()?.as_ref().map(|b| b.local_addr)
    }

    pub fn is_bound(&self) -> bool {
        self.local_addr().is_some()
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    pub fn connection(&self, peer: SocketAddr) -> Option<Arc<ConnectionHandle>> {
        self.registry.get(&connection_key(peer))
    }

    /// Close the connection for `peer`. False when there was none.
    ///
    /// The key is released before this returns, so the next datagram from
    /// `peer` opens a new connection.
    pub fn close_connection(&self, peer: SocketAddr) -> bool {
        match self.connection(peer) {
            Some(handle) => {
                close(&self.registry, &handle);
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for RelayBinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayBinder")
            .field("upstream", &self.upstream)
            .field("local_addr", &self.local_addr())
            .field("registry", &self.registry)
            .finish()
    }
}

/// Release the registry slot, then stop the connection task
fn close(registry: &ConnectionRegistry, handle: &ConnectionHandle) {
    registry.remove(handle.id());
    handle.close();
}

#[instrument(name = "listener", skip_all)]
async fn listen_loop(shared: Arc<RelayShared>) {
    let max_datagram = shared.config.server.max_datagram_size;
    let mut buf = BytesMut::with_capacity(max_datagram);
    loop {
        buf.reserve(max_datagram);
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            received = shared.listener.recv_buf_from(&mut buf) => match received {
                Ok((_, peer)) => admit(&shared, peer, buf.split().freeze()),
                Err(e) => {
                    buf.clear();
                    warn!(error = %e, "Receive on listening socket failed");
                }
            }
        }
    }
    debug!("Listener stopped");
}

fn admit(shared: &Arc<RelayShared>, peer: SocketAddr, datagram: Bytes) {
    let ip = peer.ip();
    shared.traffic.record(ip);
    if shared.bans.is_banned(ip) {
        global_metrics().banned_drop();
        return;
    }
    global_metrics().client_datagram(datagram.len() as u64);
    route(shared, peer, datagram);
}

/// Queue a client datagram on the connection for `peer`, opening one when
/// there is none. A connection found closing is released and replaced so
/// the datagram still reaches the upstream.
pub(crate) fn route(shared: &Arc<RelayShared>, peer: SocketAddr, mut datagram: Bytes) {
    if shared.cancel.is_cancelled() {
        return;
    }
    let key = connection_key(peer);
    for _ in 0..2 {
        let (handle, created) = match shared
            .registry
            .get_or_create(&key, |id| spawn_connection(shared, id, peer))
        {
            Ok(entry) => entry,
            Err(e) => {
                warn!(%peer, error = %e, "Dropping datagram, connection unavailable");
                return;
            }
        };
        if created {
            shared.events.on_connected(handle.id().index, peer);
        }
        if !handle.is_closing() {
            match handle.send_or_return(datagram) {
                Ok(()) => return,
                Err(returned) => datagram = returned,
            }
        }
        trace!(%peer, id = %handle.id(), "Connection closing, opening a new one");
        shared.registry.remove(handle.id());
    }
    debug!(%peer, "Connection churned while routing, datagram dropped");
}

#[instrument(name = "traffic_roll", skip_all)]
async fn roll_loop(shared: Arc<RelayShared>) {
    let window = shared.config.guard.rate_window;
    let mut ticker = interval_at(Instant::now() + window, window);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = ticker.tick() => {
                for ip in shared.traffic.roll(shared.bans.as_ref()) {
                    let doomed: Vec<_> = shared
                        .registry
                        .handles()
                        .into_iter()
                        .filter(|h| h.peer().ip() == ip)
                        .collect();
                    debug!(%ip, connections = doomed.len(), "Closing connections of banned address");
                    for handle in doomed {
                        close(&shared.registry, &handle);
                    }
                }
            }
        }
    }
}
