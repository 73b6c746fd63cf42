// Shared decode-and-replay logic for action and history payloads.
//
// Both roles embed a `SessionDecoder` value; the old deep inheritance chain
// is flattened into this one composed piece. Given a payload tagged
// sending-actions or sending-history, it parses the batch, applies each
// unit to the matching local player handle, and raises the corresponding
// observer events. Applying the unit to real game state is the rule
// engine's job, done from `on_action`/`on_history`.
//
// A malformed payload aborts the decode of that payload only; the caller
// keeps the connection. A faulty peer must not be able to take the whole
// session down with one bad batch.

use log::warn;

use crownfall_protocol::unit::{
    self, ActionTag, HistoryTag, NetworkAction, NetworkHistory,
};

use crate::observer::SessionObserver;
use crate::roster::Roster;

#[derive(Default)]
pub struct SessionDecoder;

impl SessionDecoder {
    pub fn new() -> Self {
        SessionDecoder
    }

    /// Decode an action batch and replay it against the roster. Returns the
    /// decoded units for the caller's own bookkeeping (turn gating, relay,
    /// session log), or `None` if the payload was malformed.
    pub fn replay_actions<O: SessionObserver + ?Sized>(
        &self,
        roster: &mut Roster,
        observer: &mut O,
        payload: &[u8],
    ) -> Option<Vec<NetworkAction>> {
        let units = match unit::decode_actions(payload) {
            Ok(units) => units,
            Err(err) => {
                warn!("dropping malformed action batch: {err}");
                return None;
            }
        };
        for unit in &units {
            match unit.tag {
                ActionTag::Rename => {
                    roster.rename(unit.owner, &unit.data);
                    observer.on_player_renamed(unit.owner, &unit.data);
                }
                ActionTag::EndTurn => observer.on_turn_ended(unit.owner),
                ActionTag::InitTurn => observer.on_turn_started(unit.owner),
                ActionTag::Other => {}
            }
            observer.on_action(unit);
        }
        Some(units)
    }

    /// Decode a history batch: append each record to the owning player's
    /// log and notify only for globally significant facts.
    pub fn replay_histories<O: SessionObserver + ?Sized>(
        &self,
        roster: &mut Roster,
        observer: &mut O,
        payload: &[u8],
    ) -> Option<Vec<NetworkHistory>> {
        let units = match unit::decode_histories(payload) {
            Ok(units) => units,
            Err(err) => {
                warn!("dropping malformed history batch: {err}");
                return None;
            }
        };
        for unit in &units {
            roster.append_history(unit.clone());
            if unit.tag == HistoryTag::PlayerVanquished {
                observer.on_player_eliminated(unit.owner);
            }
            observer.on_history(unit);
        }
        Some(units)
    }
}
