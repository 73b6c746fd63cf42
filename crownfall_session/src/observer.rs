// Typed event surfaces for the two session roles.
//
// One method per event kind, with empty default bodies so implementors
// subscribe only to what they need. Every method is invoked from the
// session's single event-loop thread, in the order the triggering frames
// arrived on the wire; implementations must not assume any other thread
// ever calls them.

use std::path::Path;

use crownfall_protocol::message::LobbyUpdate;
use crownfall_protocol::types::PlayerId;
use crownfall_protocol::unit::{NetworkAction, NetworkHistory};

/// Events common to both roles, raised by the session decoder.
pub trait SessionObserver: Send {
    /// A replayed action, after it was applied to the local roster. The
    /// rule engine applies it to real game state from here.
    fn on_action(&mut self, _unit: &NetworkAction) {}
    /// A replayed history record, after it was appended to the owner's log.
    fn on_history(&mut self, _unit: &NetworkHistory) {}
    fn on_turn_started(&mut self, _player: PlayerId) {}
    fn on_turn_ended(&mut self, _player: PlayerId) {}
    fn on_player_renamed(&mut self, _player: PlayerId, _name: &str) {}
    /// Raised only for globally significant history (a player eliminated).
    fn on_player_eliminated(&mut self, _player: PlayerId) {}
    /// A formatted chat line ("nick: text" or a system notice).
    fn on_chat(&mut self, _line: &str) {}
}

/// Client-side events, one per server-driven message kind.
pub trait ClientObserver: SessionObserver {
    /// The ping/pong handshake completed; identity has been announced.
    fn on_connected(&mut self) {}
    fn on_connection_lost(&mut self) {}
    /// The map arrived and lives at this path until the client is dropped.
    fn on_map_received(&mut self, _path: &Path) {}
    fn on_turn_order(&mut self, _order: &[PlayerId]) {}
    /// The server asks a player this client controls to take its turn.
    fn on_next_player(&mut self, _player: PlayerId) {}
    fn on_round_start(&mut self) {}
    fn on_round_over(&mut self) {}
    fn on_lobby_update(&mut self, _update: &LobbyUpdate) {}
    /// The server corrected our nickname after a collision.
    fn on_nickname_changed(&mut self, _nickname: &str) {}
    fn on_player_killed(&mut self, _player: PlayerId) {}
    fn on_player_off(&mut self, _player: PlayerId) {}
    fn on_game_may_begin(&mut self) {}
    fn on_participant_connected(&mut self, _nickname: &str) {}
    fn on_participant_disconnected(&mut self, _nickname: &str) {}
}

/// Server-side events beyond the shared set.
pub trait ServerObserver: SessionObserver {
    fn on_participant_joined(&mut self, _nickname: &str) {}
    fn on_participant_departed(&mut self, _nickname: &str) {}
    fn on_lobby_update(&mut self, _update: &LobbyUpdate) {}
    fn on_round_over(&mut self) {}
    fn on_game_may_begin(&mut self) {}
}

/// Observer that ignores everything. Useful for headless hosts and tests
/// that only assert on wire traffic.
pub struct NullObserver;

impl SessionObserver for NullObserver {}
impl ClientObserver for NullObserver {}
impl ServerObserver for NullObserver {}
