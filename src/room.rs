//! The room aggregate: seated players, game state, and the filtered read
//! projection handed to transports.
//!
//! Rooms are allocated and destroyed by the hosting layer; the engine only
//! ever mutates one through its guarded entry points. The single deliberate
//! exception is [`Room::set_connected`], the intake for the transport's
//! connectivity signal.

use std::collections::HashSet;
use std::fmt::{Debug, Formatter};

use serde::{Serialize, Serializer};

use crate::action::{ActionKind, ActionRecord};
use crate::guard::{ArmedTimer, ExecutionGuard};
use crate::Role;

/// Opaque player identity, assigned by the room-lifecycle collaborator.
pub type PlayerId = u64;

#[derive(Clone, Debug)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub coins: u32,
    /// Hidden influence cards. Normally at most 2; transiently up to 4 in
    /// the middle of an exchange.
    pub hand: Vec<Role>,
    pub is_alive: bool,
    pub connected: bool,
    /// When the player dropped, by the host's clock. Cleared on reconnect.
    pub disconnect_time: Option<u64>,
}

impl Player {
    pub fn new(id: PlayerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            coins: 0,
            hand: Vec::new(),
            is_alive: false,
            connected: true,
            disconnect_time: None,
        }
    }
}

/// Where the room stands in the turn protocol.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Phase {
    /// Waiting for the current player to declare an action.
    TurnStart,
    /// An action is on the table; it resolves or opens a window.
    ActionDeclared,
    /// Any live opponent may dispute the declared claim.
    ChallengeWindow,
    /// An eligible blocker may nullify the declared action.
    CounterWindow,
    /// A player owes the pile a card of their choosing.
    Discard,
    /// An accepted outcome is being applied.
    Resolve,
    /// Terminal. No further transitions are accepted.
    GameOver { winner: Option<PlayerId> },
}

/// An open dispute over a declared claim. Resolution is first-responder-wins:
/// the window closes on the first accepted challenge, so `challengers` never
/// accumulates more than the one entry that mattered.
#[derive(Clone, Debug)]
pub struct PendingChallenge {
    pub action: ActionRecord,
    pub challengers: HashSet<PlayerId>,
}

/// An open chance to block a declared action.
#[derive(Clone, Debug)]
pub struct PendingCounter {
    pub action: ActionRecord,
    pub blocker_role: Role,
    pub eligible_blockers: Vec<PlayerId>,
}

#[derive(Clone, Debug)]
pub struct GameState {
    pub phase: Phase,
    pub deck: Vec<Role>,
    pub discard_pile: Vec<Role>,
    /// Seat index of the current player.
    pub turn_index: usize,
    pub current_player: Option<PlayerId>,
    pub last_action: Option<ActionRecord>,
    pub pending_challenge: Option<PendingChallenge>,
    pub pending_counter: Option<PendingCounter>,
    /// Player-facing narrative, in order.
    pub log: Vec<String>,
}

impl Default for GameState {
    fn default() -> Self {
        Self {
            phase: Phase::TurnStart,
            deck: Vec::new(),
            discard_pile: Vec::new(),
            turn_index: 0,
            current_player: None,
            last_action: None,
            pending_challenge: None,
            pending_counter: None,
            log: Vec::new(),
        }
    }
}

/// One table of players and its game, with the execution guard that
/// serializes every mutation.
pub struct Room {
    /// Seating order is fixed at creation and never reordered.
    pub players: Vec<Player>,
    pub game: GameState,
    pub(crate) guard: ExecutionGuard,
}

impl Room {
    /// Seat `players` in the given fixed order. The roster itself (joins,
    /// leaves, identity) is the host's business.
    pub fn new(players: Vec<Player>) -> Self {
        Self {
            players,
            game: GameState::default(),
            guard: ExecutionGuard::default(),
        }
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub(crate) fn player_mut(&mut self, id: PlayerId) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.id == id)
    }

    pub(crate) fn seat_of(&self, id: PlayerId) -> Option<usize> {
        self.players.iter().position(|p| p.id == id)
    }

    pub fn alive_count(&self) -> usize {
        self.players.iter().filter(|p| p.is_alive).count()
    }

    pub(crate) fn alive_players(&self) -> impl Iterator<Item = &Player> {
        self.players.iter().filter(|p| p.is_alive)
    }

    pub fn winner(&self) -> Option<PlayerId> {
        match self.game.phase {
            Phase::GameOver { winner } => winner,
            _ => None,
        }
    }

    /// The currently armed timer, if any. Hosts schedule their wake-up from
    /// this and quote its generation back when firing.
    pub fn timer(&self) -> Option<ArmedTimer> {
        self.guard.timer()
    }

    pub fn guard(&self) -> &ExecutionGuard {
        &self.guard
    }

    /// Connectivity signal from the transport. A fresh disconnect stamps
    /// `disconnect_time` with the host-supplied clock reading; reconnecting
    /// clears it.
    pub fn set_connected(&mut self, id: PlayerId, connected: bool, now_ms: u64) {
        if let Some(player) = self.player_mut(id) {
            if connected {
                player.connected = true;
                player.disconnect_time = None;
            } else {
                if player.disconnect_time.is_none() {
                    player.disconnect_time = Some(now_ms);
                }
                player.connected = false;
            }
        }
    }

    /// The room as `viewer` is allowed to see it: everyone else's hand is
    /// replaced by placeholders (counts preserved) and the deck shows only
    /// its size.
    pub fn filtered_state(&self, viewer: Option<PlayerId>) -> FilteredState {
        let open_window = match (&self.game.pending_challenge, &self.game.pending_counter) {
            (Some(challenge), _) => Some(WindowView {
                kind: challenge.action.kind,
                actor: challenge.action.actor,
                blocker_role: None,
                eligible_blockers: Vec::new(),
            }),
            (None, Some(counter)) => Some(WindowView {
                kind: counter.action.kind,
                actor: counter.action.actor,
                blocker_role: Some(counter.blocker_role),
                eligible_blockers: counter.eligible_blockers.clone(),
            }),
            (None, None) => None,
        };

        FilteredState {
            phase: self.game.phase.clone(),
            deck_count: self.game.deck.len(),
            discard_pile: self.game.discard_pile.clone(),
            turn_index: self.game.turn_index,
            current_player: self.game.current_player,
            last_action: self.game.last_action.clone(),
            open_window,
            log: self.game.log.clone(),
            players: self
                .players
                .iter()
                .map(|p| PlayerView {
                    id: p.id,
                    name: p.name.clone(),
                    coins: p.coins,
                    cards: p
                        .hand
                        .iter()
                        .map(|&card| {
                            if viewer == Some(p.id) {
                                CardView::Shown(card)
                            } else {
                                CardView::Hidden
                            }
                        })
                        .collect(),
                    cards_count: p.hand.len(),
                    is_alive: p.is_alive,
                    connected: p.connected,
                })
                .collect(),
        }
    }
}

impl Debug for Room {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "phase {:?} | seat {} | current {:?}",
            self.game.phase, self.game.turn_index, self.game.current_player
        )?;
        for player in &self.players {
            writeln!(
                f,
                "\t{}: ${} | {:?} | alive={} connected={}",
                player.name, player.coins, player.hand, player.is_alive, player.connected
            )?;
        }
        Ok(())
    }
}

/// One card slot as seen from outside a hand.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CardView {
    Hidden,
    Shown(Role),
}

impl Serialize for CardView {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CardView::Hidden => serializer.serialize_str("hidden"),
            CardView::Shown(role) => role.serialize(serializer),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct PlayerView {
    pub id: PlayerId,
    pub name: String,
    pub coins: u32,
    pub cards: Vec<CardView>,
    pub cards_count: usize,
    pub is_alive: bool,
    pub connected: bool,
}

/// Summary of an open challenge/counter window. Eligibility is public
/// knowledge at the table, so nothing here leaks a hidden hand.
#[derive(Clone, Debug, Serialize)]
pub struct WindowView {
    pub kind: ActionKind,
    pub actor: PlayerId,
    pub blocker_role: Option<Role>,
    pub eligible_blockers: Vec<PlayerId>,
}

/// Everything a client may be shown about a room.
#[derive(Clone, Debug, Serialize)]
pub struct FilteredState {
    pub phase: Phase,
    pub deck_count: usize,
    pub discard_pile: Vec<Role>,
    pub turn_index: usize,
    pub current_player: Option<PlayerId>,
    pub last_action: Option<ActionRecord>,
    pub open_window: Option<WindowView>,
    pub log: Vec<String>,
    pub players: Vec<PlayerView>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_player_room() -> Room {
        let mut room = Room::new(vec![Player::new(1, "ava"), Player::new(2, "bo")]);
        for player in &mut room.players {
            player.is_alive = true;
        }
        room.players[0].hand = vec![Role::Duke, Role::Contessa];
        room.players[1].hand = vec![Role::Captain, Role::Assassin];
        room.game.deck = vec![Role::Ambassador; 11];
        room.game.current_player = Some(1);
        room
    }

    #[test]
    fn filtered_state_hides_other_hands() {
        let room = two_player_room();
        let view = room.filtered_state(Some(1));

        assert_eq!(
            view.players[0].cards,
            vec![CardView::Shown(Role::Duke), CardView::Shown(Role::Contessa)]
        );
        assert_eq!(
            view.players[1].cards,
            vec![CardView::Hidden, CardView::Hidden]
        );
        assert_eq!(view.players[1].cards_count, 2);
        assert_eq!(view.deck_count, 11);
    }

    #[test]
    fn spectator_sees_no_hand_at_all() {
        let room = two_player_room();
        let view = room.filtered_state(None);
        assert!(view
            .players
            .iter()
            .all(|p| p.cards.iter().all(|c| *c == CardView::Hidden)));
    }

    #[test]
    fn hidden_cards_encode_as_placeholders() {
        let room = two_player_room();
        let encoded = serde_json::to_string(&room.filtered_state(Some(2))).unwrap();
        assert!(encoded.contains("\"hidden\""));
        assert!(encoded.contains("\"captain\""));
        // the other hand's roles must not appear anywhere
        assert!(!encoded.contains("\"duke\""));
        assert!(!encoded.contains("\"contessa\""));
    }

    #[test]
    fn reconnect_clears_the_disconnect_stamp() {
        let mut room = two_player_room();
        room.set_connected(2, false, 5_000);
        assert_eq!(room.player(2).unwrap().disconnect_time, Some(5_000));
        // a repeated disconnect signal keeps the original stamp
        room.set_connected(2, false, 9_000);
        assert_eq!(room.player(2).unwrap().disconnect_time, Some(5_000));
        room.set_connected(2, true, 12_000);
        assert!(room.player(2).unwrap().connected);
        assert_eq!(room.player(2).unwrap().disconnect_time, None);
    }
}
