// Shared helpers for the end-to-end session tests.
//
// `Recorder` implements both observer roles by appending every callback to
// a shared event log; tests assert on the log with the polling `wait_*`
// helpers instead of sleeping fixed amounts. The only test-specific code
// is this recording shim: everything else in the tests is the same
// GameClient/start_server surface the live game uses.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crownfall_protocol::message::LobbyUpdate;
use crownfall_protocol::types::PlayerId;
use crownfall_protocol::unit::{NetworkAction, NetworkHistory};
use crownfall_session::observer::{ClientObserver, ServerObserver, SessionObserver};

/// Everything a recorded observer can witness, in callback order.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Connected,
    ConnectionLost,
    /// The received map's contents, read back at callback time.
    Map(Vec<u8>),
    Action(NetworkAction),
    History(NetworkHistory),
    TurnStarted(PlayerId),
    TurnEnded(PlayerId),
    Renamed(PlayerId, String),
    Eliminated(PlayerId),
    Chat(String),
    TurnOrder(Vec<PlayerId>),
    NextPlayer(PlayerId),
    RoundStart,
    RoundOver,
    Lobby(LobbyUpdate),
    NicknameChanged(String),
    Killed(PlayerId),
    Off(PlayerId),
    GameMayBegin,
    ParticipantConnected(String),
    ParticipantDisconnected(String),
}

pub type EventLog = Arc<Mutex<Vec<Event>>>;

pub struct Recorder {
    events: EventLog,
}

/// A recording observer plus the log it appends to.
pub fn recorder() -> (Box<Recorder>, EventLog) {
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));
    (
        Box::new(Recorder {
            events: events.clone(),
        }),
        events,
    )
}

impl Recorder {
    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl SessionObserver for Recorder {
    fn on_action(&mut self, unit: &NetworkAction) {
        self.push(Event::Action(unit.clone()));
    }
    fn on_history(&mut self, unit: &NetworkHistory) {
        self.push(Event::History(unit.clone()));
    }
    fn on_turn_started(&mut self, player: PlayerId) {
        self.push(Event::TurnStarted(player));
    }
    fn on_turn_ended(&mut self, player: PlayerId) {
        self.push(Event::TurnEnded(player));
    }
    fn on_player_renamed(&mut self, player: PlayerId, name: &str) {
        self.push(Event::Renamed(player, name.to_string()));
    }
    fn on_player_eliminated(&mut self, player: PlayerId) {
        self.push(Event::Eliminated(player));
    }
    fn on_chat(&mut self, line: &str) {
        self.push(Event::Chat(line.to_string()));
    }
}

impl ClientObserver for Recorder {
    fn on_connected(&mut self) {
        self.push(Event::Connected);
    }
    fn on_connection_lost(&mut self) {
        self.push(Event::ConnectionLost);
    }
    fn on_map_received(&mut self, path: &Path) {
        self.push(Event::Map(std::fs::read(path).unwrap_or_default()));
    }
    fn on_turn_order(&mut self, order: &[PlayerId]) {
        self.push(Event::TurnOrder(order.to_vec()));
    }
    fn on_next_player(&mut self, player: PlayerId) {
        self.push(Event::NextPlayer(player));
    }
    fn on_round_start(&mut self) {
        self.push(Event::RoundStart);
    }
    fn on_round_over(&mut self) {
        self.push(Event::RoundOver);
    }
    fn on_lobby_update(&mut self, update: &LobbyUpdate) {
        self.push(Event::Lobby(update.clone()));
    }
    fn on_nickname_changed(&mut self, nickname: &str) {
        self.push(Event::NicknameChanged(nickname.to_string()));
    }
    fn on_player_killed(&mut self, player: PlayerId) {
        self.push(Event::Killed(player));
    }
    fn on_player_off(&mut self, player: PlayerId) {
        self.push(Event::Off(player));
    }
    fn on_game_may_begin(&mut self) {
        self.push(Event::GameMayBegin);
    }
    fn on_participant_connected(&mut self, nickname: &str) {
        self.push(Event::ParticipantConnected(nickname.to_string()));
    }
    fn on_participant_disconnected(&mut self, nickname: &str) {
        self.push(Event::ParticipantDisconnected(nickname.to_string()));
    }
}

impl ServerObserver for Recorder {
    fn on_participant_joined(&mut self, nickname: &str) {
        self.push(Event::ParticipantConnected(nickname.to_string()));
    }
    fn on_participant_departed(&mut self, nickname: &str) {
        self.push(Event::ParticipantDisconnected(nickname.to_string()));
    }
    fn on_lobby_update(&mut self, update: &LobbyUpdate) {
        self.push(Event::Lobby(update.clone()));
    }
    fn on_round_over(&mut self) {
        self.push(Event::RoundOver);
    }
    fn on_game_may_begin(&mut self) {
        self.push(Event::GameMayBegin);
    }
}

/// Poll the log until the predicate holds over the whole event list.
/// Gives up after five seconds.
pub fn wait_until(events: &EventLog, pred: impl Fn(&[Event]) -> bool) -> bool {
    for _ in 0..200 {
        if pred(&events.lock().unwrap()) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
    false
}

/// Poll until any single recorded event matches.
pub fn wait_for_event(events: &EventLog, pred: impl Fn(&Event) -> bool) -> bool {
    wait_until(events, |all| all.iter().any(&pred))
}

/// Count matching events right now.
pub fn count_events(events: &EventLog, pred: impl Fn(&Event) -> bool) -> usize {
    events.lock().unwrap().iter().filter(|event| pred(event)).count()
}
