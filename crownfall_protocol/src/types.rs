// Core ID and seat types for the Crownfall wire protocol.
//
// Lightweight newtypes shared by `message.rs` and the session crate. These
// are protocol-scoped identifiers: `PlayerId` names an in-game seat slot and
// `ProfileId` names the human identity behind a network peer. Both are
// compact integers for cheap wire representation (several payloads encode
// player ids as space-separated ASCII).

use std::fmt;

use serde::{Deserialize, Serialize};

/// In-game player slot id. Stable across the whole session; seat changes
/// rebind who controls the slot, never the id itself.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub u32);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a human participant, as reported in the join handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProfileId(pub u32);

/// Who drives a player slot right now.
///
/// `Networked` is the vacant-seat state: the slot belongs to a remote peer
/// that has not sat down (or has stood up). Sitting installs `Human` on the
/// controlling side; `Off` removes the slot from play entirely.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerType {
    Human,
    Networked,
    Ai,
    Off,
}

impl PlayerType {
    /// Stable numeric encoding used by the lobby-activity wire form.
    pub fn as_wire(self) -> u8 {
        match self {
            PlayerType::Human => 0,
            PlayerType::Networked => 1,
            PlayerType::Ai => 2,
            PlayerType::Off => 3,
        }
    }

    pub fn from_wire(byte: u8) -> Option<PlayerType> {
        match byte {
            0 => Some(PlayerType::Human),
            1 => Some(PlayerType::Networked),
            2 => Some(PlayerType::Ai),
            3 => Some(PlayerType::Off),
            _ => None,
        }
    }
}

/// The four lobby sub-actions multiplexed over one message type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LobbyAction {
    Sit,
    Stand,
    ChangeName,
    ChangeType,
}

impl LobbyAction {
    /// Wire keyword for the space-separated lobby-activity encoding.
    pub fn keyword(self) -> &'static str {
        match self {
            LobbyAction::Sit => "sit",
            LobbyAction::Stand => "stand",
            LobbyAction::ChangeName => "name",
            LobbyAction::ChangeType => "type",
        }
    }

    pub fn from_keyword(word: &str) -> Option<LobbyAction> {
        match word {
            "sit" => Some(LobbyAction::Sit),
            "stand" => Some(LobbyAction::Stand),
            "name" => Some(LobbyAction::ChangeName),
            "type" => Some(LobbyAction::ChangeType),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_type_wire_roundtrip() {
        for ptype in [
            PlayerType::Human,
            PlayerType::Networked,
            PlayerType::Ai,
            PlayerType::Off,
        ] {
            assert_eq!(PlayerType::from_wire(ptype.as_wire()), Some(ptype));
        }
        assert_eq!(PlayerType::from_wire(9), None);
    }

    #[test]
    fn lobby_action_keywords() {
        for action in [
            LobbyAction::Sit,
            LobbyAction::Stand,
            LobbyAction::ChangeName,
            LobbyAction::ChangeType,
        ] {
            assert_eq!(LobbyAction::from_keyword(action.keyword()), Some(action));
        }
        assert_eq!(LobbyAction::from_keyword("dance"), None);
    }
}
