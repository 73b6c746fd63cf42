// Player handle table: who exists, who controls what, whose turn is next.
//
// Seat transfer is modeled as installing a new value at a stable handle
// rather than swapping player objects: `PlayerId` never changes, only the
// `ptype`/`connected` fields of its handle. In-flight callbacks that hold a
// `PlayerId` therefore never dangle.
//
// The roster also owns the turn order. The neutral player sits last in the
// order by convention; once the walk runs past it the round is over.

use std::collections::BTreeMap;

use crownfall_protocol::types::{PlayerId, PlayerType};
use crownfall_protocol::unit::NetworkHistory;

/// One in-game player slot.
#[derive(Clone, Debug, PartialEq)]
pub struct PlayerHandle {
    pub id: PlayerId,
    pub name: String,
    pub ptype: PlayerType,
    /// Whether some participant (or the local identity) currently drives
    /// this slot.
    pub connected: bool,
    /// Per-player history log, appended by the session decoder.
    pub history: Vec<NetworkHistory>,
}

#[derive(Default)]
pub struct Roster {
    players: BTreeMap<PlayerId, PlayerHandle>,
    turn_order: Vec<PlayerId>,
    neutral: Option<PlayerId>,
}

impl Roster {
    pub fn new() -> Self {
        Roster::default()
    }

    /// Add a player slot. Appends to the turn order in call order.
    pub fn add_player(&mut self, id: PlayerId, name: impl Into<String>, ptype: PlayerType) {
        self.players.insert(
            id,
            PlayerHandle {
                id,
                name: name.into(),
                ptype,
                connected: false,
                history: Vec::new(),
            },
        );
        self.turn_order.push(id);
    }

    /// Mark the neutral player. By convention it is moved to the end of the
    /// turn order, so finishing it ends the round.
    pub fn set_neutral(&mut self, id: PlayerId) {
        self.neutral = Some(id);
        self.turn_order.retain(|pid| *pid != id);
        self.turn_order.push(id);
    }

    pub fn neutral(&self) -> Option<PlayerId> {
        self.neutral
    }

    pub fn get(&self, id: PlayerId) -> Option<&PlayerHandle> {
        self.players.get(&id)
    }

    pub fn player_type(&self, id: PlayerId) -> Option<PlayerType> {
        self.players.get(&id).map(|handle| handle.ptype)
    }

    pub fn is_connected(&self, id: PlayerId) -> bool {
        self.players.get(&id).is_some_and(|handle| handle.connected)
    }

    pub fn name_of(&self, id: PlayerId) -> Option<&str> {
        self.players.get(&id).map(|handle| handle.name.as_str())
    }

    /// Install a new control state at a handle: the seat-transfer primitive.
    /// Name and history survive the transfer.
    pub fn install(&mut self, id: PlayerId, ptype: PlayerType, connected: bool) {
        if let Some(handle) = self.players.get_mut(&id) {
            handle.ptype = ptype;
            handle.connected = connected;
        }
    }

    pub fn rename(&mut self, id: PlayerId, name: &str) {
        if let Some(handle) = self.players.get_mut(&id) {
            handle.name = name.to_string();
        }
    }

    pub fn append_history(&mut self, unit: NetworkHistory) {
        if let Some(handle) = self.players.get_mut(&unit.owner) {
            handle.history.push(unit);
        }
    }

    pub fn turn_order(&self) -> &[PlayerId] {
        &self.turn_order
    }

    pub fn set_turn_order(&mut self, order: Vec<PlayerId>) {
        self.turn_order = order;
    }

    /// The next player to act after `current`, skipping `Off` slots.
    /// `None` when the walk runs off the end of the order (round over) or
    /// when `current` is no longer in the order.
    pub fn next_after(&self, current: Option<PlayerId>) -> Option<PlayerId> {
        let start = match current {
            None => 0,
            Some(current) => self
                .turn_order
                .iter()
                .position(|pid| *pid == current)
                .map(|index| index + 1)?,
        };
        self.turn_order[start..]
            .iter()
            .copied()
            .find(|pid| self.player_type(*pid).is_some_and(|ptype| ptype != PlayerType::Off))
    }

    /// Whether any player in the order would make the turn walk yield
    /// control (a human, or a networked slot with a live controller).
    /// Without one, restarting rounds forever would just spin.
    pub fn any_waitable(&self) -> bool {
        self.turn_order.iter().any(|pid| {
            self.players.get(pid).is_some_and(|handle| match handle.ptype {
                PlayerType::Human => true,
                PlayerType::Networked => handle.connected,
                PlayerType::Ai | PlayerType::Off => false,
            })
        })
    }

    pub fn ids(&self) -> impl Iterator<Item = PlayerId> + '_ {
        self.players.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

/// A conventional small roster: `players` networked slots and a trailing
/// neutral AI. Used by the host binary and tests.
pub fn standard_roster(players: u32) -> Roster {
    let mut roster = Roster::new();
    for i in 0..players {
        roster.add_player(PlayerId(i), format!("Player {}", i + 1), PlayerType::Networked);
    }
    let neutral = PlayerId(players);
    roster.add_player(neutral, "Neutral", PlayerType::Ai);
    roster.set_neutral(neutral);
    roster
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_after_walks_order_and_skips_off() {
        let mut roster = standard_roster(3);
        roster.install(PlayerId(1), PlayerType::Off, false);

        assert_eq!(roster.next_after(None), Some(PlayerId(0)));
        assert_eq!(roster.next_after(Some(PlayerId(0))), Some(PlayerId(2)));
        // After player 2 comes the neutral, then the round ends.
        assert_eq!(roster.next_after(Some(PlayerId(2))), Some(PlayerId(3)));
        assert_eq!(roster.next_after(Some(PlayerId(3))), None);
    }

    #[test]
    fn neutral_moves_to_end_of_order() {
        let mut roster = Roster::new();
        roster.add_player(PlayerId(0), "Neutral", PlayerType::Ai);
        roster.add_player(PlayerId(1), "Player 1", PlayerType::Networked);
        roster.set_neutral(PlayerId(0));
        assert_eq!(roster.turn_order(), &[PlayerId(1), PlayerId(0)]);
    }

    #[test]
    fn install_preserves_name_and_history() {
        let mut roster = standard_roster(2);
        roster.rename(PlayerId(0), "alice");
        roster.append_history(NetworkHistory::other(PlayerId(0), "founded a city"));

        roster.install(PlayerId(0), PlayerType::Human, true);
        let handle = roster.get(PlayerId(0)).unwrap();
        assert_eq!(handle.name, "alice");
        assert_eq!(handle.history.len(), 1);
        assert_eq!(handle.ptype, PlayerType::Human);
        assert!(handle.connected);

        roster.install(PlayerId(0), PlayerType::Networked, false);
        let handle = roster.get(PlayerId(0)).unwrap();
        assert_eq!(handle.name, "alice");
        assert_eq!(handle.history.len(), 1);
        assert!(!handle.connected);
    }

    #[test]
    fn waitable_requires_a_controller() {
        let mut roster = standard_roster(2);
        assert!(!roster.any_waitable());
        roster.install(PlayerId(0), PlayerType::Networked, true);
        assert!(roster.any_waitable());
        roster.install(PlayerId(0), PlayerType::Networked, false);
        roster.install(PlayerId(1), PlayerType::Human, true);
        assert!(roster.any_waitable());
    }
}
