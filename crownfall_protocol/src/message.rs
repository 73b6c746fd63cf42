// Message catalog and payload encodings for the Crownfall wire protocol.
//
// Unlike a self-describing serialized enum, the message type travels in the
// frame header (see `framing.rs`), so this module defines:
// - `MessageType`: the fixed catalog of type bytes both roles share.
// - Payload codecs for the non-opaque payloads: space-separated ASCII id
//   lists (turn order, next/kill/off player), the lobby-activity line
//   format, and the JSON handshake/roster structs.
//
// Action, history, and map payloads are opaque at this level: actions and
// histories are batch-encoded in `unit.rs`, and the map rides as raw bytes
// streamed from disk.
//
// The lobby-activity line is parsed identically by client and server; the
// asymmetry is only in who may send `reported = 0` (a request) and who may
// send `reported = 1` (a fact to mirror).

use serde::{Deserialize, Serialize};

use crate::types::{LobbyAction, PlayerId, PlayerType, ProfileId};

/// Every frame type a Crownfall session can carry. The discriminant is the
/// wire byte. Unknown bytes are a protocol violation handled by the session
/// layer (log and drop the frame, keep the connection).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Ping = 1,
    Pong = 2,
    SendingMap = 3,
    SendingActions = 4,
    SendingHistory = 5,
    ParticipantConnect = 6,
    ParticipantConnected = 7,
    ParticipantDisconnect = 8,
    ParticipantDisconnected = 9,
    ServerDisconnect = 10,
    Chat = 11,
    Chatted = 12,
    RequestSeatManifest = 13,
    TurnOrder = 14,
    KillPlayer = 15,
    RoundOver = 16,
    RoundStart = 17,
    LobbyActivity = 18,
    ChangeNickname = 19,
    GameMayBegin = 20,
    OffPlayer = 21,
    NextPlayer = 22,
}

impl MessageType {
    pub fn as_wire(self) -> u8 {
        self as u8
    }

    pub fn from_wire(byte: u8) -> Option<MessageType> {
        match byte {
            1 => Some(MessageType::Ping),
            2 => Some(MessageType::Pong),
            3 => Some(MessageType::SendingMap),
            4 => Some(MessageType::SendingActions),
            5 => Some(MessageType::SendingHistory),
            6 => Some(MessageType::ParticipantConnect),
            7 => Some(MessageType::ParticipantConnected),
            8 => Some(MessageType::ParticipantDisconnect),
            9 => Some(MessageType::ParticipantDisconnected),
            10 => Some(MessageType::ServerDisconnect),
            11 => Some(MessageType::Chat),
            12 => Some(MessageType::Chatted),
            13 => Some(MessageType::RequestSeatManifest),
            14 => Some(MessageType::TurnOrder),
            15 => Some(MessageType::KillPlayer),
            16 => Some(MessageType::RoundOver),
            17 => Some(MessageType::RoundStart),
            18 => Some(MessageType::LobbyActivity),
            19 => Some(MessageType::ChangeNickname),
            20 => Some(MessageType::GameMayBegin),
            21 => Some(MessageType::OffPlayer),
            22 => Some(MessageType::NextPlayer),
            _ => None,
        }
    }
}

/// First message a peer sends after the ping/pong handshake.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub nickname: String,
    pub profile_id: ProfileId,
}

impl JoinRequest {
    pub fn to_payload(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_payload(payload: &[u8]) -> serde_json::Result<JoinRequest> {
        serde_json::from_slice(payload)
    }
}

/// One participant as broadcast in roster updates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub nickname: String,
    pub profile_id: ProfileId,
    pub seats: Vec<PlayerId>,
    pub departed: bool,
}

impl RosterEntry {
    pub fn to_payload(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_payload(payload: &[u8]) -> serde_json::Result<RosterEntry> {
        serde_json::from_slice(payload)
    }
}

/// One lobby-activity line: `"{player_id} {action} {reported:0|1} {remainder}"`.
///
/// `reported = false` means "I am requesting this"; `reported = true` means
/// "this already happened, mirror it". The remainder is the nickname for
/// sit/stand, the new name for a rename, and the numeric `PlayerType` for a
/// type change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LobbyUpdate {
    pub player: PlayerId,
    pub action: LobbyAction,
    pub reported: bool,
    pub remainder: String,
}

impl LobbyUpdate {
    pub fn request(player: PlayerId, action: LobbyAction, remainder: impl Into<String>) -> Self {
        LobbyUpdate {
            player,
            action,
            reported: false,
            remainder: remainder.into(),
        }
    }

    pub fn report(player: PlayerId, action: LobbyAction, remainder: impl Into<String>) -> Self {
        LobbyUpdate {
            player,
            action,
            reported: true,
            remainder: remainder.into(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        format!(
            "{} {} {} {}",
            self.player,
            self.action.keyword(),
            u8::from(self.reported),
            self.remainder
        )
        .into_bytes()
    }

    /// Parse a lobby-activity payload. Returns `None` for anything that does
    /// not match the four-field line format.
    pub fn parse(payload: &[u8]) -> Option<LobbyUpdate> {
        let text = std::str::from_utf8(payload).ok()?;
        let mut fields = text.splitn(4, ' ');
        let player = PlayerId(fields.next()?.parse().ok()?);
        let action = LobbyAction::from_keyword(fields.next()?)?;
        let reported = match fields.next()? {
            "0" => false,
            "1" => true,
            _ => return None,
        };
        let remainder = fields.next().unwrap_or("").to_string();
        Some(LobbyUpdate {
            player,
            action,
            reported,
            remainder,
        })
    }

    /// For a type-change line, the requested player type from the remainder.
    pub fn requested_type(&self) -> Option<PlayerType> {
        self.remainder
            .parse::<u8>()
            .ok()
            .and_then(PlayerType::from_wire)
    }
}

/// Encode a player-id list as space-separated ASCII (turn order payloads).
pub fn encode_id_list(ids: &[PlayerId]) -> Vec<u8> {
    let mut out = String::new();
    for (i, id) in ids.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&id.to_string());
    }
    out.into_bytes()
}

/// Parse a space-separated player-id list. An empty payload is an empty
/// list; any non-numeric field fails the whole payload.
pub fn parse_id_list(payload: &[u8]) -> Option<Vec<PlayerId>> {
    let text = std::str::from_utf8(payload).ok()?;
    text.split_ascii_whitespace()
        .map(|field| field.parse().ok().map(PlayerId))
        .collect()
}

/// Encode a single player id (next-player, kill-player, off-player payloads).
pub fn encode_id(id: PlayerId) -> Vec<u8> {
    id.to_string().into_bytes()
}

pub fn parse_id(payload: &[u8]) -> Option<PlayerId> {
    let text = std::str::from_utf8(payload).ok()?;
    text.trim().parse().ok().map(PlayerId)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_wire_roundtrip() {
        for byte in 1..=22u8 {
            let msg_type = MessageType::from_wire(byte).unwrap();
            assert_eq!(msg_type.as_wire(), byte);
        }
        assert_eq!(MessageType::from_wire(0), None);
        assert_eq!(MessageType::from_wire(23), None);
    }

    #[test]
    fn lobby_update_roundtrip() {
        let update = LobbyUpdate::report(PlayerId(2), LobbyAction::Sit, "bob");
        let parsed = LobbyUpdate::parse(&update.encode()).unwrap();
        assert_eq!(parsed, update);
        assert_eq!(parsed.remainder, "bob");
    }

    #[test]
    fn lobby_update_request_flag() {
        let update = LobbyUpdate::request(PlayerId(5), LobbyAction::Stand, "alice");
        let wire = update.encode();
        assert_eq!(wire, b"5 stand 0 alice");
        assert!(!LobbyUpdate::parse(&wire).unwrap().reported);
    }

    #[test]
    fn lobby_update_remainder_may_contain_spaces() {
        let update = LobbyUpdate::report(PlayerId(1), LobbyAction::ChangeName, "Queen of Hills");
        let parsed = LobbyUpdate::parse(&update.encode()).unwrap();
        assert_eq!(parsed.remainder, "Queen of Hills");
    }

    #[test]
    fn lobby_update_type_change() {
        let update = LobbyUpdate::request(
            PlayerId(3),
            LobbyAction::ChangeType,
            PlayerType::Ai.as_wire().to_string(),
        );
        let parsed = LobbyUpdate::parse(&update.encode()).unwrap();
        assert_eq!(parsed.requested_type(), Some(PlayerType::Ai));
    }

    #[test]
    fn lobby_update_rejects_garbage() {
        assert_eq!(LobbyUpdate::parse(b"not a lobby line"), None);
        assert_eq!(LobbyUpdate::parse(b"3 sit 7 bob"), None);
        assert_eq!(LobbyUpdate::parse(b"x sit 0 bob"), None);
        assert_eq!(LobbyUpdate::parse(&[0xFF, 0xFE]), None);
    }

    #[test]
    fn id_list_roundtrip() {
        let order = vec![PlayerId(0), PlayerId(2), PlayerId(1), PlayerId(3)];
        let wire = encode_id_list(&order);
        assert_eq!(wire, b"0 2 1 3");
        assert_eq!(parse_id_list(&wire).unwrap(), order);
    }

    #[test]
    fn id_list_empty_and_garbage() {
        assert_eq!(parse_id_list(b"").unwrap(), Vec::new());
        assert_eq!(parse_id_list(b"1 two 3"), None);
    }

    #[test]
    fn single_id_roundtrip() {
        assert_eq!(parse_id(&encode_id(PlayerId(17))), Some(PlayerId(17)));
        assert_eq!(parse_id(b"  4 "), Some(PlayerId(4)));
        assert_eq!(parse_id(b"none"), None);
    }

    #[test]
    fn join_request_json_roundtrip() {
        let req = JoinRequest {
            nickname: "alice".into(),
            profile_id: ProfileId(77),
        };
        let wire = req.to_payload().unwrap();
        assert_eq!(JoinRequest::from_payload(&wire).unwrap(), req);
    }

    #[test]
    fn roster_entry_json_roundtrip() {
        let entry = RosterEntry {
            nickname: "bob".into(),
            profile_id: ProfileId(3),
            seats: vec![PlayerId(2), PlayerId(5)],
            departed: false,
        };
        let wire = entry.to_payload().unwrap();
        assert_eq!(RosterEntry::from_payload(&wire).unwrap(), entry);
    }
}
