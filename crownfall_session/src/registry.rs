// Process-wide table of live connections.
//
// The registry owns each connection's reader and sender threads: it spawns
// them on creation and joins them only after the connection has signaled
// that its outbound queue fully flushed (`ConnEvent::Drained`). Joining any
// earlier could discard a final queued notification, so the event loop is
// expected to call `reap` in response to the Drained event, not to Lost.
//
// Creation has two faces, matching the two roles a connection can play:
// `dial` for an outbound connect (with the 5-second timeout) and `adopt`
// for a socket the listener accepted.

use std::collections::HashMap;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::thread::JoinHandle;
use std::time::Duration;

use log::debug;

use crate::connection::{ConnEvent, Connection, ConnectionId};
use crate::error::NetError;

/// How long an outbound dial may take before it is cancelled and reported
/// as a connect failure.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

struct Managed {
    conn: Arc<Connection>,
    reader: JoinHandle<()>,
    sender: JoinHandle<()>,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    next_id: u64,
    entries: HashMap<ConnectionId, Managed>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        ConnectionRegistry::default()
    }

    /// Dial a remote host. Applies `CONNECT_TIMEOUT`; a timeout or refusal
    /// surfaces as `NetError::ConnectFailed` (the connection never existed,
    /// so no Lost event will ever fire for it).
    pub fn dial<E>(
        &mut self,
        addr: impl ToSocketAddrs,
        events: Sender<E>,
    ) -> Result<Arc<Connection>, NetError>
    where
        E: From<ConnEvent> + Send + 'static,
    {
        let sockaddr = addr
            .to_socket_addrs()
            .map_err(NetError::ConnectFailed)?
            .next()
            .ok_or(NetError::AddrResolve)?;
        let stream =
            TcpStream::connect_timeout(&sockaddr, CONNECT_TIMEOUT).map_err(NetError::ConnectFailed)?;
        self.adopt(stream, events)
    }

    /// Take ownership of an accepted socket: allocate an id, spawn the I/O
    /// threads, record the bookkeeping entry.
    pub fn adopt<E>(
        &mut self,
        stream: TcpStream,
        events: Sender<E>,
    ) -> Result<Arc<Connection>, NetError>
    where
        E: From<ConnEvent> + Send + 'static,
    {
        self.next_id += 1;
        let id = ConnectionId(self.next_id);
        let (conn, reader, sender) = Connection::spawn(id, stream, events)?;
        debug!("{id}: managed ({:?})", conn.peer_addr());
        self.entries.insert(
            id,
            Managed {
                conn: conn.clone(),
                reader,
                sender,
            },
        );
        Ok(conn)
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.entries.get(&id).map(|managed| managed.conn.clone())
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.entries.keys().copied().collect()
    }

    /// Begin teardown on one connection. The entry stays until `reap`.
    pub fn tear_down(&self, id: ConnectionId) {
        if let Some(managed) = self.entries.get(&id) {
            managed.conn.tear_down();
        }
    }

    /// Join a connection's threads and drop its entry. Call only after the
    /// connection reported `Drained`; the sender thread has exited by then
    /// and the reader is unblocked by the read-half shutdown.
    pub fn reap(&mut self, id: ConnectionId) {
        if let Some(managed) = self.entries.remove(&id) {
            let _ = managed.sender.join();
            let _ = managed.reader.join();
            debug!("{id}: reaped");
        }
    }

    /// Tear down and reap everything (process or session shutdown).
    pub fn shutdown_all(&mut self) {
        for managed in self.entries.values() {
            managed.conn.tear_down();
        }
        for id in self.ids() {
            self.reap(id);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
