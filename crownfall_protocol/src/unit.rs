// Owned action/history units and their batch encoding.
//
// An action is a command one player issued; a history record is a fact that
// occurred. Both are owned by exactly one player and travel in batches (one
// `SendingActions` / `SendingHistory` frame per batch). The synchronization
// layer never interprets the `data` field: it is whatever text the game's
// save-format serializer produced. The only structure this layer needs is
// the tag, a minimal discriminant for the handful of units the session state
// machine itself reacts to (turn gating, renames, eliminations).
//
// Batches are JSON arrays. Owner ids are not validated on decode; binding a
// unit to a live player is the rule engine's job.

use serde::{Deserialize, Serialize};

use crate::types::PlayerId;

/// Discriminant the session layer inspects on an action. Everything the
/// rule engine cares about beyond these rides opaquely in `data`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionTag {
    EndTurn,
    InitTurn,
    Rename,
    Other,
}

/// Discriminant the session layer inspects on a history record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryTag {
    PlayerVanquished,
    Other,
}

/// A serializable player command, replayed on every peer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NetworkAction {
    pub owner: PlayerId,
    pub tag: ActionTag,
    pub data: String,
}

impl NetworkAction {
    pub fn end_turn(owner: PlayerId) -> Self {
        NetworkAction {
            owner,
            tag: ActionTag::EndTurn,
            data: String::new(),
        }
    }

    pub fn init_turn(owner: PlayerId) -> Self {
        NetworkAction {
            owner,
            tag: ActionTag::InitTurn,
            data: String::new(),
        }
    }

    /// A rename carries the new name as its data.
    pub fn rename(owner: PlayerId, name: impl Into<String>) -> Self {
        NetworkAction {
            owner,
            tag: ActionTag::Rename,
            data: name.into(),
        }
    }

    pub fn other(owner: PlayerId, data: impl Into<String>) -> Self {
        NetworkAction {
            owner,
            tag: ActionTag::Other,
            data: data.into(),
        }
    }
}

/// A serializable fact record, advisory rather than imperative.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NetworkHistory {
    pub owner: PlayerId,
    pub tag: HistoryTag,
    pub data: String,
}

impl NetworkHistory {
    pub fn vanquished(owner: PlayerId) -> Self {
        NetworkHistory {
            owner,
            tag: HistoryTag::PlayerVanquished,
            data: String::new(),
        }
    }

    pub fn other(owner: PlayerId, data: impl Into<String>) -> Self {
        NetworkHistory {
            owner,
            tag: HistoryTag::Other,
            data: data.into(),
        }
    }
}

pub fn encode_actions(units: &[NetworkAction]) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(units)
}

pub fn decode_actions(payload: &[u8]) -> serde_json::Result<Vec<NetworkAction>> {
    serde_json::from_slice(payload)
}

pub fn encode_histories(units: &[NetworkHistory]) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(units)
}

pub fn decode_histories(payload: &[u8]) -> serde_json::Result<Vec<NetworkHistory>> {
    serde_json::from_slice(payload)
}

/// Everything one player produced during one turn.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnBatch {
    pub owner: PlayerId,
    pub actions: Vec<NetworkAction>,
    pub histories: Vec<NetworkHistory>,
}

/// Ordered record of every turn batch in a game, for persistence and
/// replay. Play-by-mail reuses this as its interchange format.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionLog {
    turns: Vec<TurnBatch>,
}

impl SessionLog {
    pub fn new() -> Self {
        SessionLog::default()
    }

    /// Append an action batch. Consecutive batches from the same owner fold
    /// into one turn record.
    pub fn record_actions(&mut self, units: &[NetworkAction]) {
        for unit in units {
            self.turn_for(unit.owner).actions.push(unit.clone());
        }
    }

    /// Append a history batch, folding by owner like `record_actions`.
    pub fn record_histories(&mut self, units: &[NetworkHistory]) {
        for unit in units {
            self.turn_for(unit.owner).histories.push(unit.clone());
        }
    }

    fn turn_for(&mut self, owner: PlayerId) -> &mut TurnBatch {
        let fresh = match self.turns.last() {
            Some(last) => last.owner != owner,
            None => true,
        };
        if fresh {
            self.turns.push(TurnBatch {
                owner,
                actions: Vec::new(),
                histories: Vec::new(),
            });
        }
        self.turns.last_mut().expect("just pushed")
    }

    pub fn turns(&self) -> &[TurnBatch] {
        &self.turns
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> serde_json::Result<SessionLog> {
        serde_json::from_slice(bytes)
    }
}
