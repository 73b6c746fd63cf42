// crownfall_session — networked session layer for Crownfall.
//
// This crate implements the synchronization layer between one authoritative
// game server and its remote clients: connection machinery, the shared
// decode-and-replay path, and the two session state machines. The game
// rules engine, the save format, and the UI are collaborators behind the
// observer seams; this layer only moves opaque actions, histories, and the
// map between peers and keeps every roster in agreement about seats and
// turns.
//
// Module overview:
// - `connection.rs`: One socket, two dedicated threads: the inbound
//                    header/payload state machine and the bounded-queue
//                    sender loop. Two-phase teardown.
// - `registry.rs`:   Table of live connections; spawns and, after the
//                    drain signal, joins their threads.
// - `roster.rs`:     The `PlayerId -> PlayerHandle` table, turn order, and
//                    seat-transfer-as-install primitive.
// - `decoder.rs`:    Shared decode-and-replay for action/history batches,
//                    embedded by composition in both roles.
// - `observer.rs`:   Typed per-event callbacks replacing signal/slot
//                    fan-out; all delivery is single-threaded.
// - `chat.rs`:       Chat formatting and bounded scrollback.
// - `server.rs`:     The authoritative session: joins, seats, fan-out,
//                    turn advancement, disconnect cleanup.
// - `client.rs`:     The reactive peer: handshake, dispatch, pending
//                    action/history batches.
// - `error.rs`:      Transport error taxonomy (`NetError`).
//
// The server can run standalone (`main.rs`, the `host` binary) or embedded
// in a game process via `start_server`.

pub mod chat;
pub mod client;
pub mod connection;
pub mod decoder;
pub mod error;
pub mod observer;
pub mod registry;
pub mod roster;
pub mod server;

pub use chat::ChatLog;
pub use client::GameClient;
pub use connection::{ConnEvent, ConnEventKind, Connection, ConnectionId, QUEUE_CAPACITY};
pub use decoder::SessionDecoder;
pub use error::NetError;
pub use observer::{ClientObserver, NullObserver, ServerObserver, SessionObserver};
pub use registry::{CONNECT_TIMEOUT, ConnectionRegistry};
pub use roster::{PlayerHandle, Roster, standard_roster};
pub use server::{ServerConfig, ServerHandle, start_server};
