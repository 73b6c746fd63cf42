// Authoritative game server: listener, event loop, and session state.
//
// Architecture: thread-per-connection I/O with a central `mpsc` channel.
//
// - **Listener thread** (`TcpListener::accept()` loop): accepts sockets and
//   sends `ServerEvent::Accepted` to the event loop.
// - **Connection threads** (spawned by the registry, two per peer): funnel
//   complete frames, losses, and drain notices into the same channel as
//   `ServerEvent::Conn`.
// - **Handle commands**: everything the embedding game calls on
//   `ServerHandle` (chat, local seating, turn advancement, the rule-engine
//   callbacks) arrives as `ServerEvent::Command` on the same channel.
// - **Event loop** (one thread): owns every piece of session state. It is
//   the only thread that touches the participant table, the roster, or the
//   turn state, so none of that needs locking beyond the `Arc<Mutex<_>>`
//   that shares read access with the handle.
//
// "One session per process" is a constructor precondition: build one
// `ServerConfig` + roster, call `start_server` once, pass the handle down.
//
// Turn advancement walks the roster's turn order. A networked player's turn
// is dispatched as a `NextPlayer` frame and the walk parks until that
// participant's end-turn action arrives; local humans hand control to the
// rule engine via the observer; AI turns run synchronously inside the walk.
// The round ends when the walk falls off the end of the order (the neutral
// player, last by convention, has ended its turn).

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};

use crownfall_protocol::message::{
    self, JoinRequest, LobbyUpdate, MessageType, RosterEntry,
};
use crownfall_protocol::types::{LobbyAction, PlayerId, PlayerType, ProfileId};
use crownfall_protocol::unit::{self, ActionTag, NetworkAction, NetworkHistory, SessionLog};

use crate::chat::ChatLog;
use crate::connection::{ConnEvent, ConnEventKind, ConnectionId};
use crate::decoder::SessionDecoder;
use crate::error::NetError;
use crate::observer::ServerObserver;
use crate::registry::ConnectionRegistry;
use crate::roster::Roster;

/// Configuration for hosting a session.
pub struct ServerConfig {
    pub port: u16,
    /// Save file pushed whole to every joining participant. An empty path
    /// skips the push (useful for fresh lobbies and tests).
    pub map_path: std::path::PathBuf,
    /// The hosting player's own nickname, included in collision searches.
    pub nickname: String,
    pub profile_id: ProfileId,
    /// Start the first round automatically once every seat is claimed.
    /// Used by the dedicated host binary; embedded servers start turns
    /// explicitly via `ServerHandle::next_turn`.
    pub autostart: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: 7878,
            map_path: std::path::PathBuf::new(),
            nickname: "host".into(),
            profile_id: ProfileId(0),
            autostart: false,
        }
    }
}

/// Commands the embedding game issues through `ServerHandle`.
pub enum ServerCommand {
    Chat(String),
    SitLocal(PlayerId),
    StandLocal(PlayerId),
    /// Server-side forced eviction of whoever controls the player.
    Evict(PlayerId),
    KillPlayer(PlayerId),
    OffPlayer(PlayerId),
    NextTurn,
    SendTurnOrder,
    ActionDone(NetworkAction),
    HistoryDone(NetworkHistory),
    Stop,
}

/// Everything the event loop reacts to, funneled into one channel.
enum ServerEvent {
    Accepted(TcpStream),
    Conn(ConnEvent),
    Command(ServerCommand),
}

impl From<ConnEvent> for ServerEvent {
    fn from(event: ConnEvent) -> Self {
        ServerEvent::Conn(event)
    }
}

/// One network peer. Created on its first `ParticipantConnect`; removed
/// only when the transport reports loss. A logical depart just flags
/// intent so peers can grey the entry out.
struct Participant {
    conn: ConnectionId,
    nickname: String,
    profile: ProfileId,
    seats: Vec<PlayerId>,
    departed: bool,
}

impl Participant {
    fn roster_entry(&self) -> RosterEntry {
        RosterEntry {
            nickname: self.nickname.clone(),
            profile_id: self.profile,
            seats: self.seats.clone(),
            departed: self.departed,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RoundState {
    NotStarted,
    InProgress,
    Over,
}

/// Handle returned by `start_server` to control the running session.
pub struct ServerHandle {
    events: Sender<ServerEvent>,
    thread: Option<JoinHandle<()>>,
    keep_running: Arc<AtomicBool>,
    roster: Arc<Mutex<Roster>>,
    log: Arc<Mutex<SessionLog>>,
}

impl ServerHandle {
    /// Signal the server to stop and wait for it to shut down. Connected
    /// peers receive `ServerDisconnect` before their queues drain.
    pub fn stop(mut self) {
        self.keep_running.store(false, Ordering::SeqCst);
        let _ = self.events.send(ServerEvent::Command(ServerCommand::Stop));
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    fn command(&self, command: ServerCommand) {
        let _ = self.events.send(ServerEvent::Command(command));
    }

    pub fn chat(&self, text: impl Into<String>) {
        self.command(ServerCommand::Chat(text.into()));
    }

    /// Seat a locally controlled human on a player slot.
    pub fn sit_down(&self, player: PlayerId) {
        self.command(ServerCommand::SitLocal(player));
    }

    pub fn stand_up(&self, player: PlayerId) {
        self.command(ServerCommand::StandLocal(player));
    }

    /// Revoke the seat of whoever controls `player`.
    pub fn evict(&self, player: PlayerId) {
        self.command(ServerCommand::Evict(player));
    }

    pub fn kill_player(&self, player: PlayerId) {
        self.command(ServerCommand::KillPlayer(player));
    }

    pub fn off_player(&self, player: PlayerId) {
        self.command(ServerCommand::OffPlayer(player));
    }

    /// Drive the turn walk. The first call also starts the first round.
    pub fn next_turn(&self) {
        self.command(ServerCommand::NextTurn);
    }

    pub fn send_turn_order(&self) {
        self.command(ServerCommand::SendTurnOrder);
    }

    /// Rule-engine callback: a local (authoritative-side) player produced
    /// an action. Fans out to every participant.
    pub fn on_action_done(&self, unit: NetworkAction) {
        self.command(ServerCommand::ActionDone(unit));
    }

    /// Rule-engine callback for a locally produced history record.
    pub fn on_history_done(&self, unit: NetworkHistory) {
        self.command(ServerCommand::HistoryDone(unit));
    }

    /// Shared view of the player table. The event loop is the only writer.
    pub fn roster(&self) -> Arc<Mutex<Roster>> {
        self.roster.clone()
    }

    /// The per-game record of every turn batch, for persistence and replay.
    pub fn session_log(&self) -> Arc<Mutex<SessionLog>> {
        self.log.clone()
    }
}

/// Start the server on a background thread. Returns a handle for stopping
/// and driving it, and the actual bound address (useful when port 0 lets
/// the OS pick).
pub fn start_server(
    config: ServerConfig,
    roster: Roster,
    observer: Box<dyn ServerObserver>,
) -> Result<(ServerHandle, SocketAddr), NetError> {
    let listener = TcpListener::bind(format!("127.0.0.1:{}", config.port)).map_err(NetError::Io)?;
    let addr = listener.local_addr().map_err(NetError::Io)?;
    let keep_running = Arc::new(AtomicBool::new(true));

    let (tx, rx): (Sender<ServerEvent>, Receiver<ServerEvent>) = mpsc::channel();

    // Non-blocking accepts so the listener thread can notice shutdown.
    listener.set_nonblocking(true).ok();
    let keep_running_listener = keep_running.clone();
    let tx_listener = tx.clone();
    thread::spawn(move || {
        while keep_running_listener.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, _addr)) => {
                    stream.set_nonblocking(false).ok();
                    if tx_listener.send(ServerEvent::Accepted(stream)).is_err() {
                        break;
                    }
                }
                Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(50));
                }
                Err(_) => break,
            }
        }
    });

    let roster = Arc::new(Mutex::new(roster));
    let log = Arc::new(Mutex::new(SessionLog::new()));
    let server = GameServer {
        config,
        roster: roster.clone(),
        observer,
        decoder: SessionDecoder::new(),
        chat: ChatLog::new(),
        registry: ConnectionRegistry::new(),
        participants: Vec::new(),
        local_seats: Vec::new(),
        round: RoundState::NotStarted,
        current: None,
        log: log.clone(),
        events: tx.clone(),
        game_may_begin_sent: false,
    };
    let thread = thread::spawn(move || server.run(rx));

    Ok((
        ServerHandle {
            events: tx,
            thread: Some(thread),
            keep_running,
            roster,
            log,
        },
        addr,
    ))
}

struct GameServer {
    config: ServerConfig,
    roster: Arc<Mutex<Roster>>,
    observer: Box<dyn ServerObserver>,
    decoder: SessionDecoder,
    chat: ChatLog,
    registry: ConnectionRegistry,
    participants: Vec<Participant>,
    /// Players seated by the hosting process itself.
    local_seats: Vec<PlayerId>,
    round: RoundState,
    /// The player whose turn the walk last dispatched; `None` between
    /// rounds.
    current: Option<PlayerId>,
    log: Arc<Mutex<SessionLog>>,
    events: Sender<ServerEvent>,
    game_may_begin_sent: bool,
}

impl GameServer {
    fn run(mut self, rx: Receiver<ServerEvent>) {
        info!("session open as {}", self.config.nickname);
        while let Ok(event) = rx.recv() {
            if matches!(event, ServerEvent::Command(ServerCommand::Stop)) {
                break;
            }
            self.handle_event(event);
        }
        self.shutdown();
    }

    fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Accepted(stream) => {
                match self.registry.adopt(stream, self.events.clone()) {
                    Ok(conn) => debug!("{}: accepted", conn.id()),
                    Err(err) => warn!("failed to adopt incoming socket: {err}"),
                }
            }
            ServerEvent::Conn(ConnEvent { conn, kind }) => match kind {
                ConnEventKind::Frame { msg_type, payload } => {
                    self.handle_frame(conn, msg_type, payload);
                }
                ConnEventKind::MapFile { .. } => {
                    warn!("{conn}: unexpected map payload for server role; dropping");
                }
                ConnEventKind::Lost => self.handle_lost(conn),
                ConnEventKind::Drained => self.registry.reap(conn),
            },
            ServerEvent::Command(command) => self.handle_command(command),
        }
    }

    fn handle_command(&mut self, command: ServerCommand) {
        match command {
            ServerCommand::Chat(text) => {
                let line = ChatLog::format_line(&self.config.nickname, &text);
                self.share_chat_line(line);
            }
            ServerCommand::SitLocal(player) => self.handle_sit_local(player),
            ServerCommand::StandLocal(player) => self.handle_stand_local(player),
            ServerCommand::Evict(player) => self.handle_evict(player),
            ServerCommand::KillPlayer(player) => self.handle_kill(player),
            ServerCommand::OffPlayer(player) => self.handle_off(player),
            ServerCommand::NextTurn => self.handle_next_turn(),
            ServerCommand::SendTurnOrder => self.broadcast_turn_order(),
            ServerCommand::ActionDone(unit) => self.handle_action_done(unit),
            ServerCommand::HistoryDone(unit) => self.handle_history_done(unit),
            ServerCommand::Stop => {}
        }
    }

    // ------------------------------------------------------------------
    // Inbound frames
    // ------------------------------------------------------------------

    fn handle_frame(&mut self, conn: ConnectionId, msg_type: u8, payload: Vec<u8>) {
        let Some(msg_type) = MessageType::from_wire(msg_type) else {
            warn!("{conn}: unknown message type {msg_type}; dropping frame");
            return;
        };
        match msg_type {
            MessageType::Ping => {
                self.send_to(conn, MessageType::Pong, Vec::new());
            }
            MessageType::ParticipantConnect => self.handle_join(conn, &payload),
            MessageType::ParticipantDisconnect => self.handle_depart(conn),
            MessageType::Chat => self.handle_chat(conn, payload),
            MessageType::RequestSeatManifest => self.send_seat_manifest(conn),
            MessageType::LobbyActivity => self.handle_lobby_request(conn, &payload),
            MessageType::SendingActions => self.handle_actions(conn, payload),
            MessageType::SendingHistory => self.handle_histories(conn, payload),
            other => {
                warn!("{conn}: unexpected {other:?} for server role; dropping frame");
            }
        }
    }

    fn handle_join(&mut self, conn: ConnectionId, payload: &[u8]) {
        let request = match JoinRequest::from_payload(payload) {
            Ok(request) => request,
            Err(err) => {
                warn!("{conn}: malformed join request: {err}");
                return;
            }
        };

        // Push the whole current save before anything else, so the joiner
        // can load the game state every later message refers to.
        if !self.config.map_path.as_os_str().is_empty() {
            if let Some(connection) = self.registry.get(conn) {
                connection.send_file(MessageType::SendingMap, self.config.map_path.clone());
            }
        }

        let nickname = self.resolve_nickname(&request.nickname, conn);
        if nickname != request.nickname {
            info!(
                "{conn}: nickname {:?} taken, corrected to {nickname:?}",
                request.nickname
            );
            self.send_to(conn, MessageType::ChangeNickname, nickname.clone().into_bytes());
        }

        match self.participants.iter_mut().find(|p| p.conn == conn) {
            Some(participant) => {
                participant.nickname = nickname.clone();
                participant.profile = request.profile_id;
                participant.departed = false;
            }
            None => self.participants.push(Participant {
                conn,
                nickname: nickname.clone(),
                profile: request.profile_id,
                seats: Vec::new(),
                departed: false,
            }),
        }

        info!("{nickname} joined from {conn}");
        self.observer.on_participant_joined(&nickname);
        self.share_chat_line(format!("{nickname} has joined the game"));

        let entry = self
            .participants
            .iter()
            .find(|p| p.conn == conn)
            .map(Participant::roster_entry);
        if let Some(entry) = entry {
            if let Ok(bytes) = entry.to_payload() {
                self.broadcast(MessageType::ParticipantConnected, bytes);
            }
        }
    }

    fn handle_depart(&mut self, conn: ConnectionId) {
        let entry = match self.participants.iter_mut().find(|p| p.conn == conn) {
            Some(participant) => {
                participant.departed = true;
                Some((participant.nickname.clone(), participant.roster_entry()))
            }
            None => None,
        };
        let Some((nickname, entry)) = entry else {
            warn!("{conn}: depart from a connection that never joined");
            return;
        };
        // Depart only flags intent; the participant and its seats survive
        // until the transport actually drops.
        info!("{nickname} announced departure");
        self.observer.on_participant_departed(&nickname);
        if let Ok(bytes) = entry.to_payload() {
            self.broadcast(MessageType::ParticipantDisconnected, bytes);
        }
        self.share_chat_line(format!("{nickname} is leaving the game"));
    }

    fn handle_chat(&mut self, conn: ConnectionId, payload: Vec<u8>) {
        let text = String::from_utf8_lossy(&payload).into_owned();
        let nickname = self
            .participants
            .iter()
            .find(|p| p.conn == conn)
            .map(|p| p.nickname.clone())
            .unwrap_or_else(|| conn.to_string());
        let line = ChatLog::format_line(&nickname, &text);
        self.share_chat_line(line);
    }

    fn handle_lobby_request(&mut self, conn: ConnectionId, payload: &[u8]) {
        let Some(update) = LobbyUpdate::parse(payload) else {
            warn!("{conn}: malformed lobby activity; dropping");
            return;
        };
        if update.reported {
            // Clients request; only the server reports.
            warn!("{conn}: client sent a reported lobby line; dropping");
            return;
        }
        match update.action {
            LobbyAction::Sit => self.handle_sit(conn, update.player),
            LobbyAction::Stand => self.handle_stand(conn, update.player),
            LobbyAction::ChangeName => {
                self.handle_change_name(conn, update.player, &update.remainder);
            }
            LobbyAction::ChangeType => self.handle_change_type(conn, &update),
        }
    }

    fn handle_sit(&mut self, conn: ConnectionId, player: PlayerId) {
        if !self.seat_is_free(player) {
            debug!("{conn}: sit on player {player} refused");
            self.refuse_seat(conn, player);
            return;
        }
        let Some(participant) = self.participants.iter_mut().find(|p| p.conn == conn) else {
            warn!("{conn}: sit before joining; dropping");
            return;
        };
        participant.seats.push(player);
        let nickname = participant.nickname.clone();
        // The slot stays networked on the authoritative side; its turns are
        // dispatched over the wire. Only the controlling client installs a
        // human at this handle.
        self.roster.lock().unwrap().install(player, PlayerType::Networked, true);
        self.report_seat_change(player, LobbyAction::Sit, nickname);
        self.check_game_may_begin();
    }

    fn handle_sit_local(&mut self, player: PlayerId) {
        if !self.seat_is_free(player) {
            debug!("local sit on player {player} refused");
            return;
        }
        self.local_seats.push(player);
        self.roster.lock().unwrap().install(player, PlayerType::Human, true);
        let nickname = self.config.nickname.clone();
        self.report_seat_change(player, LobbyAction::Sit, nickname);
        self.check_game_may_begin();
    }

    fn handle_stand(&mut self, conn: ConnectionId, player: PlayerId) {
        let held = self
            .participants
            .iter()
            .any(|p| p.conn == conn && p.seats.contains(&player));
        if !held {
            debug!("{conn}: stand for a seat it does not hold; dropping");
            return;
        }
        self.release_seat(player);
    }

    fn handle_stand_local(&mut self, player: PlayerId) {
        if !self.local_seats.contains(&player) {
            debug!("local stand for an unheld seat {player}; dropping");
            return;
        }
        self.release_seat(player);
    }

    /// Forced eviction: the server revokes the seat no matter who holds it.
    fn handle_evict(&mut self, player: PlayerId) {
        if self.is_controlled(player) {
            info!("evicting the controller of player {player}");
            self.release_seat(player);
        }
    }

    fn handle_change_name(&mut self, conn: ConnectionId, player: PlayerId, name: &str) {
        let held = self
            .participants
            .iter()
            .any(|p| p.conn == conn && p.seats.contains(&player));
        if !held {
            debug!("{conn}: rename of an uncontrolled player {player}; dropping");
            return;
        }
        self.roster.lock().unwrap().rename(player, name);
        self.observer.on_player_renamed(player, name);
        let update = LobbyUpdate::report(player, LobbyAction::ChangeName, name);
        self.broadcast(MessageType::LobbyActivity, update.encode());
        self.observer.on_lobby_update(&update);
    }

    fn handle_change_type(&mut self, conn: ConnectionId, update: &LobbyUpdate) {
        let Some(ptype) = update.requested_type() else {
            warn!("{conn}: type change with a bad type field; dropping");
            return;
        };
        if self.is_controlled(update.player) {
            debug!("{conn}: type change on a controlled player; dropping");
            return;
        }
        self.roster.lock().unwrap().install(update.player, ptype, false);
        let report = LobbyUpdate::report(
            update.player,
            LobbyAction::ChangeType,
            ptype.as_wire().to_string(),
        );
        self.broadcast(MessageType::LobbyActivity, report.encode());
        self.observer.on_lobby_update(&report);
    }

    fn handle_actions(&mut self, conn: ConnectionId, payload: Vec<u8>) {
        let units = {
            let mut roster = self.roster.lock().unwrap();
            self.decoder
                .replay_actions(&mut roster, self.observer.as_mut(), &payload)
        };
        let Some(units) = units else { return };
        self.log.lock().unwrap().record_actions(&units);

        // Relay to every participant except the originator: no echo.
        self.relay_except(conn, MessageType::SendingActions, payload);

        let ended_current = units
            .iter()
            .any(|unit| unit.tag == ActionTag::EndTurn && Some(unit.owner) == self.current);
        if ended_current {
            self.advance_turns();
        }
    }

    fn handle_histories(&mut self, conn: ConnectionId, payload: Vec<u8>) {
        let units = {
            let mut roster = self.roster.lock().unwrap();
            self.decoder
                .replay_histories(&mut roster, self.observer.as_mut(), &payload)
        };
        let Some(units) = units else { return };
        self.log.lock().unwrap().record_histories(&units);
        self.relay_except(conn, MessageType::SendingHistory, payload);
    }

    // ------------------------------------------------------------------
    // Rule-engine callbacks (authoritative-side units)
    // ------------------------------------------------------------------

    fn handle_action_done(&mut self, unit: NetworkAction) {
        self.log.lock().unwrap().record_actions(std::slice::from_ref(&unit));
        match unit::encode_actions(std::slice::from_ref(&unit)) {
            Ok(bytes) => self.broadcast(MessageType::SendingActions, bytes),
            Err(err) => warn!("failed to encode local action: {err}"),
        }
        if unit.tag == ActionTag::EndTurn && Some(unit.owner) == self.current {
            self.advance_turns();
        }
    }

    fn handle_history_done(&mut self, unit: NetworkHistory) {
        self.log.lock().unwrap().record_histories(std::slice::from_ref(&unit));
        match unit::encode_histories(std::slice::from_ref(&unit)) {
            Ok(bytes) => self.broadcast(MessageType::SendingHistory, bytes),
            Err(err) => warn!("failed to encode local history: {err}"),
        }
    }

    // ------------------------------------------------------------------
    // Turn advancement
    // ------------------------------------------------------------------

    fn handle_next_turn(&mut self) {
        if self.round == RoundState::NotStarted {
            self.send_round_start();
        }
        self.advance_turns();
    }

    /// Walk the turn order until a player needs outside input. Networked
    /// turns park the walk on a `NextPlayer` dispatch; local human turns
    /// park it on the rule engine; AI turns run through synchronously.
    fn advance_turns(&mut self) {
        loop {
            let next = { self.roster.lock().unwrap().next_after(self.current) };
            let Some(player) = next else {
                // The neutral player (last in the order) has ended its
                // turn: the round is complete.
                self.finish_round();
                let waitable = { self.roster.lock().unwrap().any_waitable() };
                if !waitable {
                    // Nothing in the order would ever park the walk; leave
                    // the fresh round for the next explicit next_turn.
                    return;
                }
                continue;
            };
            self.current = Some(player);
            let ptype = { self.roster.lock().unwrap().player_type(player) };
            match ptype {
                Some(PlayerType::Networked) => {
                    if let Some(conn) = self.controller_conn(player) {
                        debug!("dispatching turn of player {player} to {conn}");
                        self.send_to(conn, MessageType::NextPlayer, message::encode_id(player));
                        return;
                    }
                    debug!("player {player} has no controller; skipping its turn");
                }
                Some(PlayerType::Human) => {
                    self.observer.on_turn_started(player);
                    return;
                }
                Some(PlayerType::Ai) => {
                    self.observer.on_turn_started(player);
                }
                Some(PlayerType::Off) | None => {}
            }
        }
    }

    fn finish_round(&mut self) {
        self.round = RoundState::Over;
        self.current = None;
        info!("round over");
        self.broadcast(MessageType::RoundOver, Vec::new());
        self.observer.on_round_over();
        self.send_round_start();
    }

    /// Rebroadcast the turn order and open a fresh round.
    fn send_round_start(&mut self) {
        self.broadcast_turn_order();
        self.broadcast(MessageType::RoundStart, Vec::new());
        self.round = RoundState::InProgress;
        self.current = None;
        info!("round started");
    }

    fn broadcast_turn_order(&mut self) {
        let order = { self.roster.lock().unwrap().turn_order().to_vec() };
        self.broadcast(MessageType::TurnOrder, message::encode_id_list(&order));
    }

    // ------------------------------------------------------------------
    // Kill / off
    // ------------------------------------------------------------------

    fn handle_kill(&mut self, player: PlayerId) {
        info!("killing player {player}");
        self.drop_seat_records(player);
        self.roster.lock().unwrap().install(player, PlayerType::Off, false);
        self.broadcast(MessageType::KillPlayer, message::encode_id(player));
    }

    fn handle_off(&mut self, player: PlayerId) {
        if self.is_controlled(player) {
            debug!("off refused for controlled player {player}");
            return;
        }
        self.roster.lock().unwrap().install(player, PlayerType::Off, false);
        self.broadcast(MessageType::OffPlayer, message::encode_id(player));
    }

    // ------------------------------------------------------------------
    // Seats
    // ------------------------------------------------------------------

    fn seat_is_free(&self, player: PlayerId) -> bool {
        let networked = {
            self.roster.lock().unwrap().player_type(player) == Some(PlayerType::Networked)
        };
        networked && !self.is_controlled(player)
    }

    fn is_controlled(&self, player: PlayerId) -> bool {
        self.local_seats.contains(&player)
            || self
                .participants
                .iter()
                .any(|p| p.seats.contains(&player))
    }

    fn controller_conn(&self, player: PlayerId) -> Option<ConnectionId> {
        self.participants
            .iter()
            .find(|p| p.seats.contains(&player))
            .map(|p| p.conn)
    }

    fn controller_nickname(&self, player: PlayerId) -> Option<String> {
        if self.local_seats.contains(&player) {
            return Some(self.config.nickname.clone());
        }
        self.participants
            .iter()
            .find(|p| p.seats.contains(&player))
            .map(|p| p.nickname.clone())
    }

    /// Typed negative response to a refused sit, sent only to the
    /// requester: a report of the authoritative seat state, so the
    /// requester's roster stays truthful.
    fn refuse_seat(&mut self, conn: ConnectionId, player: PlayerId) {
        let report = if let Some(nickname) = self.controller_nickname(player) {
            LobbyUpdate::report(player, LobbyAction::Sit, nickname)
        } else {
            let ptype = self.roster.lock().unwrap().player_type(player);
            match ptype {
                Some(ptype) if ptype != PlayerType::Networked => LobbyUpdate::report(
                    player,
                    LobbyAction::ChangeType,
                    ptype.as_wire().to_string(),
                ),
                _ => LobbyUpdate::report(player, LobbyAction::Stand, ""),
            }
        };
        self.send_to(conn, MessageType::LobbyActivity, report.encode());
    }

    /// Unseat `player` from wherever it is held and report the stand.
    fn release_seat(&mut self, player: PlayerId) {
        let mut nickname = None;
        if let Some(index) = self.local_seats.iter().position(|pid| *pid == player) {
            self.local_seats.remove(index);
            nickname = Some(self.config.nickname.clone());
        }
        for participant in &mut self.participants {
            if let Some(index) = participant.seats.iter().position(|pid| *pid == player) {
                participant.seats.remove(index);
                nickname = Some(participant.nickname.clone());
            }
        }
        let Some(nickname) = nickname else { return };
        self.roster.lock().unwrap().install(player, PlayerType::Networked, false);
        self.report_seat_change(player, LobbyAction::Stand, nickname);
    }

    /// Fan out a granted sit or stand: lobby line to everyone, chat notice,
    /// observer event.
    fn report_seat_change(&mut self, player: PlayerId, action: LobbyAction, nickname: String) {
        let update = LobbyUpdate::report(player, action, nickname.clone());
        self.broadcast(MessageType::LobbyActivity, update.encode());
        let player_name = {
            self.roster
                .lock()
                .unwrap()
                .name_of(player)
                .unwrap_or("?")
                .to_string()
        };
        let line = match action {
            LobbyAction::Sit => format!("{nickname} takes control of {player_name}"),
            LobbyAction::Stand => format!("{nickname} gives up control of {player_name}"),
            _ => return,
        };
        self.share_chat_line(line);
        self.observer.on_lobby_update(&update);
    }

    /// Drop any seat records for a player leaving play entirely, without
    /// the stand report (the kill broadcast supersedes it).
    fn drop_seat_records(&mut self, player: PlayerId) {
        self.local_seats.retain(|pid| *pid != player);
        for participant in &mut self.participants {
            participant.seats.retain(|pid| *pid != player);
        }
    }

    fn check_game_may_begin(&mut self) {
        if self.game_may_begin_sent {
            return;
        }
        let all_controlled = {
            let roster = self.roster.lock().unwrap();
            roster.ids().all(|pid| match roster.player_type(pid) {
                Some(PlayerType::Off) | Some(PlayerType::Ai) => true,
                Some(PlayerType::Human) | Some(PlayerType::Networked) => roster.is_connected(pid),
                None => true,
            })
        };
        if !all_controlled {
            return;
        }
        self.game_may_begin_sent = true;
        info!("all seats claimed; the game may begin");
        self.broadcast(MessageType::GameMayBegin, Vec::new());
        self.observer.on_game_may_begin();
        if self.config.autostart {
            self.handle_next_turn();
        }
    }

    // ------------------------------------------------------------------
    // Disconnects and shutdown
    // ------------------------------------------------------------------

    fn handle_lost(&mut self, conn: ConnectionId) {
        if let Some(index) = self.participants.iter().position(|p| p.conn == conn) {
            let participant = self.participants.remove(index);
            info!("{} lost its connection", participant.nickname);

            // Every seat the participant held reverts to an unclaimed
            // networked slot, with a stand report per seat.
            for player in &participant.seats {
                self.roster
                    .lock()
                    .unwrap()
                    .install(*player, PlayerType::Networked, false);
                let update =
                    LobbyUpdate::report(*player, LobbyAction::Stand, participant.nickname.clone());
                self.broadcast(MessageType::LobbyActivity, update.encode());
                self.observer.on_lobby_update(&update);
            }
            if let Some(current) = self.current {
                if participant.seats.contains(&current) {
                    warn!(
                        "player {current} lost its controller mid-turn; waiting for a new seat"
                    );
                }
            }

            self.observer.on_participant_departed(&participant.nickname);
            let mut entry = participant.roster_entry();
            entry.departed = true;
            entry.seats.clear();
            if let Ok(bytes) = entry.to_payload() {
                self.broadcast(MessageType::ParticipantDisconnected, bytes);
            }
            self.share_chat_line(format!("{} disconnected", participant.nickname));
        }
        self.registry.tear_down(conn);
    }

    fn shutdown(&mut self) {
        info!("shutting down");
        self.broadcast(MessageType::ServerDisconnect, Vec::new());
        // Queued frames (including the ServerDisconnect just broadcast)
        // drain before the registry joins the sender threads.
        self.registry.shutdown_all();
    }

    // ------------------------------------------------------------------
    // Plumbing
    // ------------------------------------------------------------------

    fn resolve_nickname(&self, requested: &str, conn: ConnectionId) -> String {
        let taken = |candidate: &str| {
            candidate == self.config.nickname
                || self
                    .participants
                    .iter()
                    .any(|p| p.conn != conn && p.nickname == candidate)
        };
        dedup_nickname(requested, taken)
    }

    fn send_seat_manifest(&mut self, conn: ConnectionId) {
        let mut lines = Vec::new();
        for participant in &self.participants {
            for player in &participant.seats {
                lines.push(
                    LobbyUpdate::report(*player, LobbyAction::Sit, participant.nickname.clone())
                        .encode(),
                );
            }
        }
        for player in &self.local_seats {
            lines.push(
                LobbyUpdate::report(*player, LobbyAction::Sit, self.config.nickname.clone())
                    .encode(),
            );
        }
        for line in lines {
            self.send_to(conn, MessageType::LobbyActivity, line);
        }
        if self.game_may_begin_sent {
            self.send_to(conn, MessageType::GameMayBegin, Vec::new());
        }
    }

    fn share_chat_line(&mut self, line: String) {
        self.chat.record(line.clone());
        self.observer.on_chat(&line);
        self.broadcast(MessageType::Chatted, line.into_bytes());
    }

    fn send_to(&self, conn: ConnectionId, msg_type: MessageType, payload: Vec<u8>) {
        if let Some(connection) = self.registry.get(conn) {
            connection.send(msg_type, payload);
        }
    }

    fn broadcast(&self, msg_type: MessageType, payload: Vec<u8>) {
        for participant in &self.participants {
            self.send_to(participant.conn, msg_type, payload.clone());
        }
    }

    fn relay_except(&self, origin: ConnectionId, msg_type: MessageType, payload: Vec<u8>) {
        for participant in &self.participants {
            if participant.conn != origin {
                self.send_to(participant.conn, msg_type, payload.clone());
            }
        }
    }
}

/// Append `-2`, `-3`, ... until the candidate collides with nothing.
fn dedup_nickname(requested: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(requested) {
        return requested.to_string();
    }
    let mut suffix = 2u32;
    loop {
        let candidate = format!("{requested}-{suffix}");
        if !taken(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_appends_increasing_suffixes() {
        let existing = ["alice", "alice-2", "host"];
        let taken = |candidate: &str| existing.contains(&candidate);
        assert_eq!(dedup_nickname("bob", taken), "bob");
        assert_eq!(dedup_nickname("alice", taken), "alice-3");
        assert_eq!(dedup_nickname("host", taken), "host-2");
    }
}
