//! Room-core for a bluffing card game of influence.
//!
//! This crate adjudicates the game for 2 to 6 seated players: the current
//! player declares one of seven actions, opponents may dispute the role claim
//! behind it (a challenge) or nullify its effect (a counter/block), and the
//! outcome lands deterministically. The crate owns the rule state machine,
//! the first-responder-wins resolution protocol, turn scheduling with
//! disconnect handling, and the per-room execution guard and timer
//! discipline that keep all of it consistent when player messages race the
//! window timers.
//!
//! It deliberately owns nothing else: transports, room registries,
//! persistence, and matchmaking live in the hosting layer, which hands the
//! engine a [`Room`], connectivity signals, a clock, and a randomness source.

pub mod action;
pub mod engine;
pub mod error;
pub mod guard;
pub mod room;

pub use action::{ActionKind, ActionRecord};
pub use engine::{CardSelector, ChallengeOutcome, CounterOutcome, GameEngine, KeepFirst};
pub use error::{EngineError, Reject};
pub use guard::{
    with_exclusive_access, ArmedTimer, Clock, ExecutionGuard, GuardSection, ManualClock,
    SystemClock, TimerTask,
};
pub use room::{
    CardView, FilteredState, GameState, Phase, PendingChallenge, PendingCounter, Player,
    PlayerId, PlayerView, Room, WindowView,
};

use serde::{Deserialize, Serialize};

/// The five court roles. Three copies of each exist, 15 cards total, split
/// across the deck, the discard pile, and every hand.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Duke,
    Assassin,
    Captain,
    Ambassador,
    Contessa,
}

pub static ROLES: [Role; 5] = [
    Role::Duke,
    Role::Assassin,
    Role::Captain,
    Role::Ambassador,
    Role::Contessa,
];

/// Copies of each role in the deck.
pub const COPIES_PER_ROLE: usize = 3;

/// Normal hand size; exchanges go above it only transiently.
pub const HAND_SIZE: usize = 2;

/// Coins dealt to every player at the start.
pub const STARTING_COINS: u32 = 2;

/// How long a challenge window stays open.
pub const CHALLENGE_WINDOW_SECS: u64 = 20;

/// How long a counter window stays open.
pub const COUNTER_WINDOW_SECS: u64 = 15;

/// How long a player may stay disconnected before the sweep eliminates them.
pub const DISCONNECT_TIMEOUT_SECS: u64 = 60;
