// crownfall_protocol — wire protocol for Crownfall multiplayer sessions.
//
// This crate defines the frame codec, the message-type catalog, and the
// payload encodings shared by the authoritative server and its clients
// (see `crownfall_session`). It has no dependency on the game rules, the
// save format, or any UI: actions, histories, and map contents are opaque
// here.
//
// Module overview:
// - `types.rs`:   Core ids and seat types: `PlayerId`, `ProfileId`,
//                 `PlayerType`, `LobbyAction`.
// - `framing.rs`: Length-delimited framing over any `Read`/`Write` stream:
//                 4-byte big-endian length, version byte, type byte, payload.
//                 Includes disk-streamed variants for map transfer.
// - `message.rs`: The `MessageType` catalog plus codecs for id-list, lobby
//                 activity, and JSON handshake/roster payloads.
// - `unit.rs`:    Owned `NetworkAction`/`NetworkHistory` units, JSON batch
//                 encoding, and the `SessionLog` turn record.
//
// Design decisions:
// - **Type byte in the frame header.** The payload encoding varies by type
//   (ASCII id lists, JSON structs, opaque blobs), so the envelope carries
//   the discriminant instead of a self-describing serialized enum.
// - **JSON for structured payloads.** Matches the serde_json stack used
//   throughout the workspace; the space-separated ASCII forms are kept for
//   the payloads whose format the protocol fixes.
// - **No async runtime.** Framing works over plain `std::io` streams, which
//   is what the session crate's per-connection threads use.

pub mod framing;
pub mod message;
pub mod types;
pub mod unit;

pub use framing::{FrameHeader, MAX_FRAME_SIZE, PROTOCOL_VERSION, read_frame, write_frame};
pub use message::{JoinRequest, LobbyUpdate, MessageType, RosterEntry};
pub use types::{LobbyAction, PlayerId, PlayerType, ProfileId};
pub use unit::{ActionTag, HistoryTag, NetworkAction, NetworkHistory, SessionLog, TurnBatch};
