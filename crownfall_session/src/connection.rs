// One TCP connection: inbound state machine plus outbound queue.
//
// Each `Connection` owns two dedicated threads:
//
// - **Reader thread**: runs the inbound state machine (header, then payload,
//   then dispatch, then header again) using blocking reads. Map payloads are
//   streamed into a temp file instead of memory. Completed frames and
//   transport failures are funneled over a single `mpsc` sender into the
//   owning session's event loop; the loop thread is the only place session
//   state is touched.
// - **Sender thread**: the only place blocking socket writes happen. It
//   drains a bounded queue (capacity 256), writing one message at a time.
//   Producers block on a condvar while the queue is full and abandon the
//   enqueue once teardown has begun.
//
// Teardown is two-phase. `tear_down` sets the stop flag, wakes every blocked
// producer and the sender, and shuts down the read half so the reader
// unblocks. The sender keeps draining whatever was already queued, then
// emits `ConnEvent::Drained`; only after that event may the registry join
// the threads. This asymmetry is what keeps a final queued notification
// (e.g. a server-disconnect) from being silently dropped.
//
// `ConnEvent::Lost` fires exactly once per connection, and never for a
// locally initiated teardown.

use std::collections::VecDeque;
use std::io::{BufReader, BufWriter, Read};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use log::{debug, warn};
use tempfile::NamedTempFile;

use crownfall_protocol::framing::{self, PROTOCOL_VERSION};
use crownfall_protocol::message::MessageType;

/// Outbound queue capacity per connection. A full queue applies
/// backpressure to producers rather than erroring.
pub const QUEUE_CAPACITY: usize = 256;

/// Registry-scoped connection identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// What a connection's I/O threads report to the owning event loop.
#[derive(Debug)]
pub enum ConnEventKind {
    /// One complete inbound frame, payload held in memory.
    Frame { msg_type: u8, payload: Vec<u8> },
    /// A map payload, streamed to a temp file. The receiver keeps the
    /// handle alive for as long as the file is needed.
    MapFile { file: NamedTempFile },
    /// The transport failed or the peer hung up.
    Lost,
    /// The outbound queue has fully flushed after teardown; the registry
    /// may now join this connection's threads.
    Drained,
}

#[derive(Debug)]
pub struct ConnEvent {
    pub conn: ConnectionId,
    pub kind: ConnEventKind,
}

/// One queued outbound message.
enum Outbound {
    Bytes { msg_type: MessageType, payload: Vec<u8> },
    File { msg_type: MessageType, path: PathBuf },
}

/// Bounded FIFO with blocking push and drain-after-stop pop semantics.
pub(crate) struct BoundedQueue<T> {
    state: Mutex<QueueState<T>>,
    /// Signaled when an item arrives or stop begins; the consumer waits here.
    ready: Condvar,
    /// Signaled when an item leaves or stop begins; full producers wait here.
    space: Condvar,
    capacity: usize,
}

struct QueueState<T> {
    items: VecDeque<T>,
    stopped: bool,
}

impl<T> BoundedQueue<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        BoundedQueue {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                stopped: false,
            }),
            ready: Condvar::new(),
            space: Condvar::new(),
            capacity,
        }
    }

    /// Enqueue, blocking while the queue is full. Returns false (and drops
    /// the item) if teardown began before space opened up.
    pub(crate) fn push(&self, item: T) -> bool {
        let mut state = self.state.lock().unwrap();
        while state.items.len() >= self.capacity && !state.stopped {
            state = self.space.wait(state).unwrap();
        }
        if state.stopped {
            return false;
        }
        state.items.push_back(item);
        self.ready.notify_one();
        true
    }

    /// Dequeue, blocking while empty. Returns `None` only once the queue is
    /// stopped AND empty, so queued items are always drained first.
    pub(crate) fn pop(&self) -> Option<T> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(item) = state.items.pop_front() {
                self.space.notify_one();
                return Some(item);
            }
            if state.stopped {
                return None;
            }
            state = self.ready.wait(state).unwrap();
        }
    }

    /// Begin teardown: reject future pushes, wake all blocked threads.
    pub(crate) fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        state.stopped = true;
        self.ready.notify_all();
        self.space.notify_all();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }
}

struct Shared {
    queue: BoundedQueue<Outbound>,
    stream: TcpStream,
    /// Set once a Lost event has been reported (or suppressed by a local
    /// teardown). Guarantees at-most-once loss notification.
    lost: AtomicBool,
}

impl Shared {
    /// Stop the queue and unblock the reader. The write half stays open so
    /// the sender can drain.
    fn begin_teardown(&self) {
        self.queue.stop();
        let _ = self.stream.shutdown(Shutdown::Read);
    }
}

pub struct Connection {
    id: ConnectionId,
    shared: Arc<Shared>,
    peer: Option<SocketAddr>,
}

impl Connection {
    /// Wrap an established stream, spawning the reader and sender threads.
    /// Inbound events flow into `events`; the registry keeps the returned
    /// join handles for the two-phase shutdown.
    pub(crate) fn spawn<E>(
        id: ConnectionId,
        stream: TcpStream,
        events: Sender<E>,
    ) -> std::io::Result<(Arc<Connection>, JoinHandle<()>, JoinHandle<()>)>
    where
        E: From<ConnEvent> + Send + 'static,
    {
        let peer = stream.peer_addr().ok();
        let reader_stream = stream.try_clone()?;
        let writer_stream = stream.try_clone()?;
        let shared = Arc::new(Shared {
            queue: BoundedQueue::new(QUEUE_CAPACITY),
            stream,
            lost: AtomicBool::new(false),
        });

        let reader_shared = shared.clone();
        let reader_events = events.clone();
        let reader = std::thread::spawn(move || {
            reader_loop(reader_shared, BufReader::new(reader_stream), id, &reader_events);
        });

        let sender_shared = shared.clone();
        let sender = std::thread::spawn(move || {
            sender_loop(sender_shared, BufWriter::new(writer_stream), id, &events);
        });

        Ok((Arc::new(Connection { id, shared, peer }), reader, sender))
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Enqueue a message for the sender loop. Blocks while the queue is
    /// full; returns false if teardown began and the message was abandoned.
    pub fn send(&self, msg_type: MessageType, payload: Vec<u8>) -> bool {
        self.shared.queue.push(Outbound::Bytes { msg_type, payload })
    }

    /// Enqueue a disk-streamed payload (the map transfer). The file is read
    /// by the sender loop at write time, never buffered whole.
    pub fn send_file(&self, msg_type: MessageType, path: impl Into<PathBuf>) -> bool {
        self.shared.queue.push(Outbound::File {
            msg_type,
            path: path.into(),
        })
    }

    /// Begin a local, deliberate teardown. Suppresses the Lost event (the
    /// caller initiated this); already-queued messages still drain.
    pub fn tear_down(&self) {
        self.shared.lost.store(true, Ordering::SeqCst);
        self.shared.begin_teardown();
    }
}

/// Report loss at most once, then begin teardown.
fn report_lost<E>(shared: &Shared, id: ConnectionId, events: &Sender<E>)
where
    E: From<ConnEvent>,
{
    if !shared.lost.swap(true, Ordering::SeqCst) {
        let _ = events.send(
            ConnEvent {
                conn: id,
                kind: ConnEventKind::Lost,
            }
            .into(),
        );
    }
    shared.begin_teardown();
}

/// Inbound state machine: header, payload, dispatch, repeat.
fn reader_loop<E>(
    shared: Arc<Shared>,
    mut reader: BufReader<TcpStream>,
    id: ConnectionId,
    events: &Sender<E>,
) where
    E: From<ConnEvent>,
{
    loop {
        let header = match framing::read_header(&mut reader) {
            Ok(header) => header,
            Err(err) => {
                debug!("{id}: read ended: {err}");
                report_lost(&shared, id, events);
                return;
            }
        };

        if header.version != PROTOCOL_VERSION {
            // Not a transport failure: skip the frame, keep the peer.
            warn!(
                "{id}: dropping frame with protocol version {} (expected {PROTOCOL_VERSION})",
                header.version
            );
            if let Err(err) =
                framing::read_payload_to_file(&mut reader, header.payload_len, &mut std::io::sink())
            {
                debug!("{id}: read ended while skipping frame: {err}");
                report_lost(&shared, id, events);
                return;
            }
            continue;
        }

        let kind = if header.msg_type == MessageType::SendingMap.as_wire() {
            match receive_map(&mut reader, header.payload_len) {
                Ok(file) => ConnEventKind::MapFile { file },
                Err(err) => {
                    debug!("{id}: map transfer failed: {err}");
                    report_lost(&shared, id, events);
                    return;
                }
            }
        } else {
            let mut payload = vec![0u8; header.payload_len as usize];
            if let Err(err) = reader.read_exact(&mut payload) {
                debug!("{id}: read ended mid-payload: {err}");
                report_lost(&shared, id, events);
                return;
            }
            ConnEventKind::Frame {
                msg_type: header.msg_type,
                payload,
            }
        };

        if events.send(ConnEvent { conn: id, kind }.into()).is_err() {
            // Event loop is gone; nothing left to deliver to.
            shared.begin_teardown();
            return;
        }
    }
}

/// Stream a map payload into a fresh temp file.
fn receive_map(reader: &mut BufReader<TcpStream>, len: u32) -> std::io::Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    framing::read_payload_to_file(reader, len, file.as_file_mut())?;
    Ok(file)
}

/// Outbound drain loop: the single consumer of the bounded queue and the
/// only place this connection's socket is written.
fn sender_loop<E>(
    shared: Arc<Shared>,
    mut writer: BufWriter<TcpStream>,
    id: ConnectionId,
    events: &Sender<E>,
) where
    E: From<ConnEvent>,
{
    while let Some(msg) = shared.queue.pop() {
        let result = match msg {
            Outbound::Bytes { msg_type, payload } => {
                framing::write_frame(&mut writer, msg_type.as_wire(), &payload)
            }
            Outbound::File { msg_type, path } => {
                framing::write_frame_from_file(&mut writer, msg_type.as_wire(), &path)
            }
        };
        if let Err(err) = result {
            debug!("{id}: write failed: {err}");
            report_lost(&shared, id, events);
            break;
        }
    }
    // Queue fully drained (or the socket died). Close our half and let the
    // registry know it is safe to join.
    let _ = shared.stream.shutdown(Shutdown::Both);
    let _ = events.send(
        ConnEvent {
            conn: id,
            kind: ConnEventKind::Drained,
        }
        .into(),
    );
}
