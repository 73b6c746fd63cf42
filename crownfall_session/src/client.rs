// Client session: connect, handshake, then react.
//
// `GameClient::connect` dials the host (5-second timeout), sends `Ping`,
// and spawns a dispatch thread. The thread reacts to `Pong` by announcing
// identity with `ParticipantConnect`; from then on it is purely reactive,
// mapping every inbound message type to a handler that mutates the shared
// roster and raises the matching observer event.
//
// Locally produced actions and histories (the rule engine's
// `on_action_done`/`on_history_done` callbacks) accumulate in pending
// queues on the caller's side and go out as one batch per kind when
// `flush_pending` is called, fire-and-forget: the protocol requires no
// acknowledgement. All sends ride the connection's bounded outbound queue,
// never the caller's thread.

use std::net::ToSocketAddrs;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use log::{debug, info, warn};
use tempfile::NamedTempFile;

use crownfall_protocol::message::{
    self, JoinRequest, LobbyUpdate, MessageType, RosterEntry,
};
use crownfall_protocol::types::{LobbyAction, PlayerId, PlayerType, ProfileId};
use crownfall_protocol::unit::{self, NetworkAction, NetworkHistory};

use crate::chat::ChatLog;
use crate::connection::{ConnEvent, ConnEventKind, Connection};
use crate::decoder::SessionDecoder;
use crate::error::NetError;
use crate::observer::ClientObserver;
use crate::registry::ConnectionRegistry;
use crate::roster::Roster;

/// Identity shared between the caller-facing handle and the dispatch
/// thread. The nickname can change underneath us when the server corrects
/// a collision.
struct Identity {
    nickname: Mutex<String>,
    profile: ProfileId,
}

pub struct GameClient {
    conn: Arc<Connection>,
    registry: ConnectionRegistry,
    thread: Option<JoinHandle<()>>,
    roster: Arc<Mutex<Roster>>,
    identity: Arc<Identity>,
    pending_actions: Vec<NetworkAction>,
    pending_histories: Vec<NetworkHistory>,
}

impl GameClient {
    /// Dial a host and start the session. The roster is this client's view
    /// of the player table, kept in sync by the dispatch thread; the rule
    /// engine reinstalls it after the received map is loaded.
    pub fn connect(
        addr: impl ToSocketAddrs,
        nickname: impl Into<String>,
        profile_id: ProfileId,
        roster: Roster,
        observer: Box<dyn ClientObserver>,
    ) -> Result<GameClient, NetError> {
        let (tx, rx) = mpsc::channel::<ConnEvent>();
        let mut registry = ConnectionRegistry::new();
        let conn = registry.dial(addr, tx)?;

        let roster = Arc::new(Mutex::new(roster));
        let identity = Arc::new(Identity {
            nickname: Mutex::new(nickname.into()),
            profile: profile_id,
        });

        let state = ClientState {
            conn: conn.clone(),
            roster: roster.clone(),
            identity: identity.clone(),
            observer,
            decoder: SessionDecoder::new(),
            chat: ChatLog::new(),
            participants: Vec::new(),
            map: None,
        };
        let thread = thread::spawn(move || state.run(rx));

        // Open the handshake; the dispatch thread takes it from Pong.
        conn.send(MessageType::Ping, Vec::new());

        Ok(GameClient {
            conn,
            registry,
            thread: Some(thread),
            roster,
            identity,
            pending_actions: Vec::new(),
            pending_histories: Vec::new(),
        })
    }

    /// The nickname as the server last confirmed or corrected it.
    pub fn nickname(&self) -> String {
        self.identity.nickname.lock().unwrap().clone()
    }

    pub fn roster(&self) -> Arc<Mutex<Roster>> {
        self.roster.clone()
    }

    /// Ask the server for the current seat list.
    pub fn request_seat_manifest(&self) {
        self.conn.send(MessageType::RequestSeatManifest, Vec::new());
    }

    /// Request to take control of a player slot.
    pub fn sit_down(&self, player: PlayerId) {
        let update = LobbyUpdate::request(player, LobbyAction::Sit, self.nickname());
        self.conn.send(MessageType::LobbyActivity, update.encode());
    }

    /// Request to give up a held seat.
    pub fn stand_up(&self, player: PlayerId) {
        let update = LobbyUpdate::request(player, LobbyAction::Stand, self.nickname());
        self.conn.send(MessageType::LobbyActivity, update.encode());
    }

    /// Request a rename of a player this client controls.
    pub fn change_name(&self, player: PlayerId, name: &str) {
        let update = LobbyUpdate::request(player, LobbyAction::ChangeName, name);
        self.conn.send(MessageType::LobbyActivity, update.encode());
    }

    /// Request a type change for an uncontrolled slot (e.g. hand it to AI).
    pub fn change_type(&self, player: PlayerId, ptype: PlayerType) {
        let update = LobbyUpdate::request(
            player,
            LobbyAction::ChangeType,
            ptype.as_wire().to_string(),
        );
        self.conn.send(MessageType::LobbyActivity, update.encode());
    }

    pub fn chat(&self, text: &str) {
        self.conn.send(MessageType::Chat, text.as_bytes().to_vec());
    }

    /// Announce departure without dropping the transport. The server flags
    /// the participant and tells the others; seats stay until the
    /// connection actually closes.
    pub fn depart(&self) {
        self.conn.send(MessageType::ParticipantDisconnect, Vec::new());
    }

    /// Rule-engine callback: queue a locally produced action.
    pub fn on_action_done(&mut self, unit: NetworkAction) {
        self.pending_actions.push(unit);
    }

    /// Rule-engine callback: queue a locally produced history record.
    pub fn on_history_done(&mut self, unit: NetworkHistory) {
        self.pending_histories.push(unit);
    }

    /// Serialize and send the pending queues as one batch per kind, then
    /// clear them. No acknowledgement is expected.
    pub fn flush_pending(&mut self) {
        if !self.pending_actions.is_empty() {
            match unit::encode_actions(&self.pending_actions) {
                Ok(bytes) => {
                    self.conn.send(MessageType::SendingActions, bytes);
                }
                Err(err) => warn!("failed to encode pending actions: {err}"),
            }
            self.pending_actions.clear();
        }
        if !self.pending_histories.is_empty() {
            match unit::encode_histories(&self.pending_histories) {
                Ok(bytes) => {
                    self.conn.send(MessageType::SendingHistory, bytes);
                }
                Err(err) => warn!("failed to encode pending histories: {err}"),
            }
            self.pending_histories.clear();
        }
    }

    /// End one of this client's turns: queue the end-turn action and flush
    /// everything produced during the turn.
    pub fn end_turn(&mut self, player: PlayerId) {
        self.on_action_done(NetworkAction::end_turn(player));
        self.flush_pending();
    }

    /// Close the session: announce departure, drain the outbound queue,
    /// join the dispatch thread.
    pub fn disconnect(mut self) {
        self.depart();
        self.conn.tear_down();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        self.registry.reap(self.conn.id());
    }
}

/// State owned by the dispatch thread.
struct ClientState {
    conn: Arc<Connection>,
    roster: Arc<Mutex<Roster>>,
    identity: Arc<Identity>,
    observer: Box<dyn ClientObserver>,
    decoder: SessionDecoder,
    chat: ChatLog,
    /// The server's roster broadcasts, most recent entry per nickname.
    participants: Vec<RosterEntry>,
    /// Keeps the received map alive for the life of the session.
    map: Option<NamedTempFile>,
}

impl ClientState {
    fn run(mut self, rx: Receiver<ConnEvent>) {
        while let Ok(event) = rx.recv() {
            match event.kind {
                ConnEventKind::Frame { msg_type, payload } => {
                    self.handle_frame(msg_type, payload);
                }
                ConnEventKind::MapFile { file } => {
                    info!("received map ({} bytes)", file_len(&file));
                    self.observer.on_map_received(file.path());
                    // Held for the life of the session; a rejoin push
                    // replaces the previous temp file.
                    if self.map.replace(file).is_some() {
                        debug!("replaced a previously received map");
                    }
                }
                ConnEventKind::Lost => {
                    info!("connection to the server lost");
                    self.observer.on_connection_lost();
                }
                ConnEventKind::Drained => break,
            }
        }
    }

    fn handle_frame(&mut self, msg_type: u8, payload: Vec<u8>) {
        let Some(msg_type) = MessageType::from_wire(msg_type) else {
            warn!("unknown message type {msg_type}; dropping frame");
            return;
        };
        match msg_type {
            MessageType::Ping => {
                self.conn.send(MessageType::Pong, Vec::new());
            }
            MessageType::Pong => self.announce_identity(),
            MessageType::SendingActions => {
                let mut roster = self.roster.lock().unwrap();
                self.decoder
                    .replay_actions(&mut roster, self.observer.as_mut(), &payload);
            }
            MessageType::SendingHistory => {
                let mut roster = self.roster.lock().unwrap();
                self.decoder
                    .replay_histories(&mut roster, self.observer.as_mut(), &payload);
            }
            MessageType::ParticipantConnected => {
                match RosterEntry::from_payload(&payload) {
                    Ok(entry) => {
                        self.observer.on_participant_connected(&entry.nickname);
                        self.upsert_participant(entry);
                    }
                    Err(err) => warn!("malformed roster entry: {err}"),
                }
            }
            MessageType::ParticipantDisconnected => {
                match RosterEntry::from_payload(&payload) {
                    Ok(entry) => {
                        self.observer.on_participant_disconnected(&entry.nickname);
                        self.upsert_participant(entry);
                    }
                    Err(err) => warn!("malformed roster entry: {err}"),
                }
            }
            MessageType::ServerDisconnect => {
                info!("server is shutting down");
                self.conn.tear_down();
                self.observer.on_connection_lost();
            }
            MessageType::Chatted => {
                let line = String::from_utf8_lossy(&payload).into_owned();
                self.chat.record(line.clone());
                self.observer.on_chat(&line);
            }
            MessageType::TurnOrder => match message::parse_id_list(&payload) {
                Some(order) => {
                    self.roster.lock().unwrap().set_turn_order(order.clone());
                    self.observer.on_turn_order(&order);
                }
                None => warn!("malformed turn order; dropping"),
            },
            MessageType::NextPlayer => match message::parse_id(&payload) {
                Some(player) => {
                    debug!("server dispatched the turn of player {player}");
                    self.observer.on_next_player(player);
                }
                None => warn!("malformed next-player id; dropping"),
            },
            MessageType::RoundStart => self.observer.on_round_start(),
            MessageType::RoundOver => self.observer.on_round_over(),
            MessageType::KillPlayer => match message::parse_id(&payload) {
                Some(player) => {
                    self.roster.lock().unwrap().install(player, PlayerType::Off, false);
                    self.observer.on_player_killed(player);
                }
                None => warn!("malformed kill-player id; dropping"),
            },
            MessageType::OffPlayer => match message::parse_id(&payload) {
                Some(player) => {
                    self.roster.lock().unwrap().install(player, PlayerType::Off, false);
                    self.observer.on_player_off(player);
                }
                None => warn!("malformed off-player id; dropping"),
            },
            MessageType::LobbyActivity => match LobbyUpdate::parse(&payload) {
                Some(update) if update.reported => self.apply_lobby_update(update),
                Some(_) => warn!("server sent a lobby request; dropping"),
                None => warn!("malformed lobby activity; dropping"),
            },
            MessageType::ChangeNickname => {
                let corrected = String::from_utf8_lossy(&payload).into_owned();
                info!("server corrected our nickname to {corrected:?}");
                *self.identity.nickname.lock().unwrap() = corrected.clone();
                self.observer.on_nickname_changed(&corrected);
            }
            MessageType::GameMayBegin => self.observer.on_game_may_begin(),
            other => {
                warn!("unexpected {other:?} for client role; dropping frame");
            }
        }
    }

    /// The Pong half of the handshake: announce who we are.
    fn announce_identity(&mut self) {
        self.observer.on_connected();
        let request = JoinRequest {
            nickname: self.identity.nickname.lock().unwrap().clone(),
            profile_id: self.identity.profile,
        };
        match request.to_payload() {
            Ok(bytes) => {
                self.conn.send(MessageType::ParticipantConnect, bytes);
            }
            Err(err) => warn!("failed to encode join request: {err}"),
        }
    }

    /// Mirror a seat fact reported by the server. A sit or stand that names
    /// our own nickname transfers ownership of the local handle: human on
    /// sit, back to networked on stand.
    fn apply_lobby_update(&mut self, update: LobbyUpdate) {
        let ours = update.remainder == *self.identity.nickname.lock().unwrap();
        match update.action {
            LobbyAction::Sit => {
                let ptype = if ours {
                    PlayerType::Human
                } else {
                    PlayerType::Networked
                };
                self.roster.lock().unwrap().install(update.player, ptype, true);
            }
            LobbyAction::Stand => {
                self.roster
                    .lock()
                    .unwrap()
                    .install(update.player, PlayerType::Networked, false);
            }
            LobbyAction::ChangeName => {
                self.roster.lock().unwrap().rename(update.player, &update.remainder);
                self.observer.on_player_renamed(update.player, &update.remainder);
            }
            LobbyAction::ChangeType => match update.requested_type() {
                Some(ptype) => {
                    self.roster.lock().unwrap().install(update.player, ptype, false);
                }
                None => {
                    warn!("type change with a bad type field; dropping");
                    return;
                }
            },
        }
        self.observer.on_lobby_update(&update);
    }

    fn upsert_participant(&mut self, entry: RosterEntry) {
        match self
            .participants
            .iter_mut()
            .find(|existing| existing.nickname == entry.nickname)
        {
            Some(existing) => *existing = entry,
            None => self.participants.push(entry),
        }
        debug!("{} participants known", self.participants.len());
    }
}

fn file_len(file: &NamedTempFile) -> u64 {
    file.as_file().metadata().map(|meta| meta.len()).unwrap_or(0)
}
