//! The rule engine: action declaration, challenge/counter resolution, turn
//! scheduling, and the phase machine that ties them together.
//!
//! Every public entry point takes the room's guard, mutates, releases, and
//! then drains any deferred scheduling ticks. The engine never sleeps and
//! never performs I/O; timers are armed on the room and fired back by the
//! host through [`GameEngine::handle_timeout`].

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, error, warn};

use crate::action::{ActionKind, ActionRecord};
use crate::error::{EngineError, Reject};
use crate::guard::{ArmedTimer, Clock, SystemClock, TimerTask};
use crate::room::{
    FilteredState, GameState, PendingChallenge, PendingCounter, Phase, PlayerId, Room,
};
use crate::{
    Role, CHALLENGE_WINDOW_SECS, COPIES_PER_ROLE, COUNTER_WINDOW_SECS, DISCONNECT_TIMEOUT_SECS,
    HAND_SIZE, ROLES, STARTING_COINS,
};

/// Chooses which cards survive an exchange: `pool` is the player's hand
/// followed by the drawn cards, and exactly `keep` indices must come back.
/// Hosts plug in a client-driven implementation; the default keeps the first
/// `keep` cards.
pub trait CardSelector {
    fn select(&self, pool: &[Role], keep: usize) -> Vec<usize>;
}

/// Default keep rule: the player's own cards, in place.
#[derive(Copy, Clone, Debug, Default)]
pub struct KeepFirst;

impl CardSelector for KeepFirst {
    fn select(&self, _pool: &[Role], keep: usize) -> Vec<usize> {
        (0..keep).collect()
    }
}

/// How a challenge came out.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ChallengeOutcome {
    pub challenger: PlayerId,
    /// True when the actor really held the claimed role.
    pub vindicated: bool,
}

/// How a counter window came out.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CounterOutcome {
    pub blocker: PlayerId,
    pub blocked: bool,
}

pub struct GameEngine<C: Clock = SystemClock> {
    clock: C,
    selector: Box<dyn CardSelector>,
}

impl GameEngine<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for GameEngine<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> GameEngine<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            selector: Box::new(KeepFirst),
        }
    }

    pub fn with_selector(mut self, selector: Box<dyn CardSelector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    // ------------------------------------------------------------------
    // entry points
    // ------------------------------------------------------------------

    /// Deal a fresh game into `room`: a shuffled 15-card deck, 2 cards and 2
    /// coins per player, first seat to act.
    pub fn initialize_game<R: Rng>(&self, room: &mut Room, rng: &mut R) -> Result<(), EngineError> {
        let section = room.guard.try_enter()?;
        let result = self.initialize_locked(room, rng);
        drop(section);
        if result.is_ok() {
            self.pump(room);
        }
        result
    }

    /// The current player's turn action.
    pub fn declare_action<R: Rng>(
        &self,
        room: &mut Room,
        actor: PlayerId,
        kind: ActionKind,
        target: Option<PlayerId>,
        rng: &mut R,
    ) -> Result<ActionRecord, EngineError> {
        let section = room.guard.try_enter()?;
        let result = self.declare_locked(room, actor, kind, target, rng);
        drop(section);
        self.pump(room);
        result
    }

    /// Dispute the claim behind the pending action. First accepted call wins;
    /// the window is gone before anyone else can be processed.
    pub fn submit_challenge<R: Rng>(
        &self,
        room: &mut Room,
        challenger: PlayerId,
        rng: &mut R,
    ) -> Result<ChallengeOutcome, EngineError> {
        let section = room.guard.try_enter()?;
        let result = self.challenge_locked(room, challenger, rng);
        drop(section);
        self.pump(room);
        result
    }

    /// Answer an open counter window. `block = false` waves the action
    /// through; `block = true` is taken at face value, since eligibility was
    /// computed from real hands when the window opened.
    pub fn submit_counter<R: Rng>(
        &self,
        room: &mut Room,
        blocker: PlayerId,
        block: bool,
        rng: &mut R,
    ) -> Result<CounterOutcome, EngineError> {
        let section = room.guard.try_enter()?;
        let result = self.counter_locked(room, blocker, block, rng);
        drop(section);
        self.pump(room);
        result
    }

    /// Put the card at `card_index` of `player`'s hand on the discard pile.
    /// A hand left empty eliminates the player; a hand left short of 2 draws
    /// a replacement.
    pub fn discard<R: Rng>(
        &self,
        room: &mut Room,
        player: PlayerId,
        card_index: usize,
        rng: &mut R,
    ) -> Result<(), EngineError> {
        let section = room.guard.try_enter()?;
        let result = self.discard_locked(room, player, card_index, rng);
        drop(section);
        self.pump(room);
        result
    }

    /// The room as `viewer` may see it. Reads are not guarded; the cooperative
    /// scheduler never interleaves them with a mutation.
    pub fn read_filtered_state(&self, room: &Room, viewer: Option<PlayerId>) -> FilteredState {
        room.filtered_state(viewer)
    }

    /// Arm the room's single timer, replacing whatever was armed before. The
    /// returned handle tells the host when to call [`Self::handle_timeout`]
    /// and with which generation.
    pub fn arm(&self, room: &mut Room, delay_secs: u64, task: TimerTask) -> ArmedTimer {
        room.guard.arm(self.now(), delay_secs, task)
    }

    /// Cancel the room's timer. No-op if nothing is armed.
    pub fn disarm(&self, room: &mut Room) {
        room.guard.disarm();
    }

    /// Host callback once an armed timer's deadline has passed. Re-acquires
    /// the guard exactly like an external caller; a stale generation (the
    /// window was answered, or a newer timer replaced this one) is dropped
    /// quietly.
    pub fn handle_timeout<R: Rng>(
        &self,
        room: &mut Room,
        generation: u64,
        rng: &mut R,
    ) -> Result<(), EngineError> {
        let section = room.guard.try_enter()?;
        let result = self.timeout_locked(room, generation, rng);
        drop(section);
        self.pump(room);
        result
    }

    /// Drain deferred scheduling ticks. Each tick re-acquires the guard like
    /// an external caller; the loop is bounded so a confused room cannot spin.
    /// Hosts may call this after a connectivity change.
    pub fn pump(&self, room: &mut Room) {
        room.guard.request_tick();
        let mut budget = room.players.len() + 2;
        while budget > 0 && room.guard.take_tick() {
            budget -= 1;
            let Ok(section) = room.guard.try_enter() else {
                debug!("tick deferred; the room is busy");
                return;
            };
            self.advance_tick(room);
            drop(section);
        }
    }

    // ------------------------------------------------------------------
    // locked bodies
    // ------------------------------------------------------------------

    fn initialize_locked<R: Rng>(&self, room: &mut Room, rng: &mut R) -> Result<(), EngineError> {
        let seats = room.players.len();
        if !(2..=6).contains(&seats) {
            return Err(Reject::InvalidRoster.into());
        }
        for i in 0..seats {
            for j in i + 1..seats {
                if room.players[i].id == room.players[j].id {
                    return Err(Reject::InvalidRoster.into());
                }
            }
        }
        let dealt = !room.game.deck.is_empty()
            || !room.game.discard_pile.is_empty()
            || room.players.iter().any(|p| !p.hand.is_empty());
        if dealt {
            return Err(Reject::AlreadyStarted.into());
        }

        let mut deck: Vec<Role> = ROLES
            .iter()
            .flat_map(|&role| std::iter::repeat(role).take(COPIES_PER_ROLE))
            .collect();
        deck.shuffle(rng);
        room.game.deck = deck;
        room.game.turn_index = 0;
        room.game.last_action = None;

        for player in &mut room.players {
            player.coins = STARTING_COINS;
            player.is_alive = true;
        }
        for seat in 0..seats {
            for _ in 0..HAND_SIZE {
                let card = draw_card(&mut room.game, rng);
                room.players[seat].hand.push(card);
            }
        }
        room.game.current_player = Some(room.players[0].id);
        room.game.log.push("the deal is out; play begins".to_string());
        self.transition(room, Phase::TurnStart);
        Ok(())
    }

    fn declare_locked<R: Rng>(
        &self,
        room: &mut Room,
        actor: PlayerId,
        kind: ActionKind,
        target: Option<PlayerId>,
        rng: &mut R,
    ) -> Result<ActionRecord, EngineError> {
        if room.game.phase != Phase::TurnStart {
            return Err(Reject::WrongPhase.into());
        }
        if room.game.current_player != Some(actor) {
            return Err(Reject::NotYourTurn.into());
        }
        let (actor_name, actor_coins, actor_alive) = match room.player(actor) {
            Some(p) => (p.name.clone(), p.coins, p.is_alive),
            None => return Err(Reject::NotAlive.into()),
        };
        if !actor_alive {
            return Err(Reject::NotAlive.into());
        }

        let target = if kind.needs_target() {
            let Some(target_id) = target else {
                return Err(Reject::InvalidTarget.into());
            };
            if target_id == actor {
                return Err(Reject::InvalidTarget.into());
            }
            match room.player(target_id) {
                Some(t) if t.is_alive => Some(target_id),
                _ => return Err(Reject::InvalidTarget.into()),
            }
        } else {
            None
        };
        if actor_coins < kind.cost() {
            return Err(Reject::InsufficientCoins.into());
        }

        let target_name = target
            .and_then(|id| room.player(id))
            .map(|p| p.name.clone())
            .unwrap_or_default();
        let mut action = ActionRecord::new(actor, actor_name.clone(), kind, target);

        // the cost is paid up front; a landed challenge or block refunds it
        if kind.cost() > 0 {
            if let Some(p) = room.player_mut(actor) {
                p.coins -= kind.cost();
            }
        }

        // the declaration is on the table; it resolves inside this call or
        // through a window
        room.game.phase = Phase::ActionDeclared;

        match kind {
            ActionKind::Income => {
                self.apply_action_effect(room, &mut action, rng);
                self.finish_action(room, action)
            }
            ActionKind::Coup => {
                note(room, &mut action, format!("{actor_name} pays 7 coins to launch a coup against {target_name}"));
                self.apply_action_effect(room, &mut action, rng);
                self.finish_action(room, action)
            }
            ActionKind::ForeignAid => {
                note(room, &mut action, format!("{actor_name} requests foreign aid"));
                let blockers: Vec<PlayerId> = room
                    .players
                    .iter()
                    .filter(|p| p.is_alive && p.id != actor && p.hand.contains(&Role::Duke))
                    .map(|p| p.id)
                    .collect();
                if blockers.is_empty() {
                    self.apply_action_effect(room, &mut action, rng);
                    self.finish_action(room, action)
                } else {
                    self.open_counter_window(room, action, Role::Duke, blockers)
                }
            }
            ActionKind::Tax | ActionKind::Assassinate | ActionKind::Steal | ActionKind::Exchange => {
                let claim = kind
                    .claimed_role()
                    .expect("every claim-backed kind names a role");
                let claim_line = match kind {
                    ActionKind::Tax => format!("{actor_name} claims the Duke and levies tax"),
                    ActionKind::Assassinate => {
                        format!("{actor_name} claims the Assassin and pays 3 coins to mark {target_name}")
                    }
                    ActionKind::Steal => {
                        format!("{actor_name} claims the Captain and reaches for {target_name}'s coins")
                    }
                    ActionKind::Exchange => {
                        format!("{actor_name} claims the Ambassador and calls for an exchange")
                    }
                    _ => unreachable!(),
                };
                note(room, &mut action, claim_line);

                // stealing from an empty purse resolves on the spot; there is
                // nothing to contest
                if kind == ActionKind::Steal {
                    let target_coins = target
                        .and_then(|id| room.player(id))
                        .map(|p| p.coins)
                        .unwrap_or(0);
                    if target_coins == 0 {
                        note(room, &mut action, format!("{target_name} has no coins to steal"));
                        action.success = true;
                        return self.finish_action(room, action);
                    }
                }

                let truthful = room
                    .player(actor)
                    .map(|p| p.hand.contains(&claim))
                    .unwrap_or(false);
                if !truthful {
                    // the claim is not verifiably true, so it is open to
                    // dispute
                    return self.open_challenge_window(room, action);
                }

                match kind.counter_role() {
                    Some(role)
                        if target
                            .and_then(|id| room.player(id))
                            .map(|t| t.hand.contains(&role))
                            .unwrap_or(false) =>
                    {
                        let eligible = vec![target.expect("counterable kinds here are targeted")];
                        self.open_counter_window(room, action, role, eligible)
                    }
                    _ => {
                        self.apply_action_effect(room, &mut action, rng);
                        self.finish_action(room, action)
                    }
                }
            }
        }
    }

    fn challenge_locked<R: Rng>(
        &self,
        room: &mut Room,
        challenger: PlayerId,
        rng: &mut R,
    ) -> Result<ChallengeOutcome, EngineError> {
        if room.game.phase != Phase::ChallengeWindow {
            return Err(Reject::WindowClosed.into());
        }
        let actor_id = match room.game.pending_challenge.as_ref() {
            Some(pending) => pending.action.actor,
            None => {
                error!("challenge window open with no pending challenge");
                return Err(EngineError::Inconsistent(
                    "challenge window open with no pending challenge",
                ));
            }
        };
        if challenger == actor_id {
            return Err(Reject::NotEligible.into());
        }
        if !room.player(challenger).map_or(false, |p| p.is_alive) {
            return Err(Reject::NotAlive.into());
        }

        // first responder wins: the window closes here, before any later
        // caller can be processed
        let mut pending = room
            .game
            .pending_challenge
            .take()
            .expect("checked just above");
        pending.challengers.insert(challenger);
        let mut action = pending.action;

        let claim = match action.kind.claimed_role() {
            Some(role) => role,
            None => {
                error!("challenged action carries no claim");
                return Err(EngineError::Inconsistent("challenged action carries no claim"));
            }
        };
        let actor_name = action.actor_name.clone();
        let challenger_name = room
            .player(challenger)
            .map(|p| p.name.clone())
            .unwrap_or_default();
        let vindicated = room
            .player(actor_id)
            .map_or(false, |p| p.hand.contains(&claim));

        if vindicated {
            room.game.log.push(format!(
                "{challenger_name} challenges {actor_name}, but the {claim:?} is real"
            ));
            self.replace_revealed_card(room, actor_id, claim, rng);
            self.lose_random_card(room, challenger, rng);
            self.apply_action_effect(room, &mut action, rng);
        } else {
            room.game.log.push(format!(
                "{challenger_name} challenges {actor_name}, and the {claim:?} was a bluff"
            ));
            self.lose_random_card(room, actor_id, rng);
            let refund = action.kind.cost();
            if refund > 0 {
                if let Some(p) = room.player_mut(actor_id) {
                    p.coins += refund;
                }
                room.game
                    .log
                    .push(format!("{actor_name} is refunded {refund} coins"));
            }
            action.success = false;
        }

        room.game.last_action = Some(action);
        self.advance_turn(room);
        Ok(ChallengeOutcome {
            challenger,
            vindicated,
        })
    }

    fn counter_locked<R: Rng>(
        &self,
        room: &mut Room,
        blocker: PlayerId,
        block: bool,
        rng: &mut R,
    ) -> Result<CounterOutcome, EngineError> {
        if room.game.phase != Phase::CounterWindow {
            return Err(Reject::WindowClosed.into());
        }
        let eligible = match room.game.pending_counter.as_ref() {
            Some(pending) => pending.eligible_blockers.contains(&blocker),
            None => {
                error!("counter window open with no pending counter");
                return Err(EngineError::Inconsistent(
                    "counter window open with no pending counter",
                ));
            }
        };
        if !eligible {
            return Err(Reject::NotEligible.into());
        }
        if !room.player(blocker).map_or(false, |p| p.is_alive) {
            return Err(Reject::NotAlive.into());
        }

        // first responder wins here too, even when declining to block
        let pending = room
            .game
            .pending_counter
            .take()
            .expect("checked just above");
        let mut action = pending.action;
        let actor_name = action.actor_name.clone();
        let blocker_name = room
            .player(blocker)
            .map(|p| p.name.clone())
            .unwrap_or_default();

        if block {
            room.game.log.push(format!(
                "{blocker_name} blocks {actor_name} with the {:?}",
                pending.blocker_role
            ));
            let refund = action.kind.cost();
            if refund > 0 {
                if let Some(p) = room.player_mut(action.actor) {
                    p.coins += refund;
                }
                room.game
                    .log
                    .push(format!("{actor_name} is refunded {refund} coins"));
            }
            action.success = false;
        } else {
            room.game
                .log
                .push(format!("{blocker_name} lets the action pass"));
            self.apply_action_effect(room, &mut action, rng);
        }

        room.game.last_action = Some(action);
        self.advance_turn(room);
        Ok(CounterOutcome { blocker, blocked: block })
    }

    fn discard_locked<R: Rng>(
        &self,
        room: &mut Room,
        player: PlayerId,
        card_index: usize,
        rng: &mut R,
    ) -> Result<(), EngineError> {
        if matches!(room.game.phase, Phase::GameOver { .. }) {
            return Err(Reject::GameOver.into());
        }
        // hands under contest stay put until the window settles
        if matches!(
            room.game.phase,
            Phase::ChallengeWindow | Phase::CounterWindow
        ) {
            return Err(Reject::WrongPhase.into());
        }
        let Some(seat) = room.seat_of(player) else {
            return Err(Reject::NotAlive.into());
        };
        if !room.players[seat].is_alive {
            return Err(Reject::NotAlive.into());
        }
        if card_index >= room.players[seat].hand.len() {
            return Err(Reject::OutOfRange.into());
        }

        let card = room.players[seat].hand.remove(card_index);
        room.game.discard_pile.push(card);
        let name = room.players[seat].name.clone();
        room.game.log.push(format!("{name} discards a card"));

        if room.players[seat].hand.is_empty() {
            room.players[seat].is_alive = false;
            room.game
                .log
                .push(format!("{name} has no influence left and is eliminated"));
            // the scheduler settles the seat on the next tick
            room.guard.request_tick();
        } else if room.players[seat].hand.len() < HAND_SIZE {
            let fresh = draw_card(&mut room.game, rng);
            room.players[seat].hand.push(fresh);
        }

        if room.game.phase == Phase::Discard {
            self.advance_turn(room);
        }
        Ok(())
    }

    fn timeout_locked<R: Rng>(
        &self,
        room: &mut Room,
        generation: u64,
        rng: &mut R,
    ) -> Result<(), EngineError> {
        let Some(armed) = room.guard.timer() else {
            debug!(generation, "timeout fired with no armed timer; dropped");
            return Ok(());
        };
        if armed.generation != generation {
            debug!(
                generation,
                armed = armed.generation,
                "stale timeout dropped"
            );
            return Ok(());
        }
        if self.now() < armed.deadline_ms {
            debug!(generation, "timeout fired before its deadline; dropped");
            return Ok(());
        }
        room.guard.disarm();

        match armed.task {
            TimerTask::ChallengeTimeout => {
                if room.game.phase != Phase::ChallengeWindow {
                    error!("challenge timeout outside its window");
                    return Err(EngineError::Inconsistent("challenge timeout outside its window"));
                }
                let Some(pending) = room.game.pending_challenge.take() else {
                    error!("challenge timeout with nothing pending");
                    return Err(EngineError::Inconsistent("challenge timeout with nothing pending"));
                };
                let mut action = pending.action;
                room.game
                    .log
                    .push(format!("nobody challenged {}", action.actor_name));
                self.apply_action_effect(room, &mut action, rng);
                room.game.last_action = Some(action);
                self.advance_turn(room);
            }
            TimerTask::CounterTimeout => {
                if room.game.phase != Phase::CounterWindow {
                    error!("counter timeout outside its window");
                    return Err(EngineError::Inconsistent("counter timeout outside its window"));
                }
                let Some(pending) = room.game.pending_counter.take() else {
                    error!("counter timeout with nothing pending");
                    return Err(EngineError::Inconsistent("counter timeout with nothing pending"));
                };
                let mut action = pending.action;
                room.game
                    .log
                    .push(format!("nobody blocked {}", action.actor_name));
                self.apply_action_effect(room, &mut action, rng);
                room.game.last_action = Some(action);
                self.advance_turn(room);
            }
            TimerTask::StallCheck => self.stall_check(room),
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // phase machine and scheduler
    // ------------------------------------------------------------------

    /// Move `room` to `phase`: disarm the timer, assign, sweep overdue
    /// disconnected players, and queue a follow-up tick. Runs inside an
    /// already-held guard section.
    fn transition(&self, room: &mut Room, phase: Phase) {
        room.guard.disarm();
        debug!(?phase, "phase transition");
        if let Phase::GameOver { .. } = phase {
            // terminal; leftover windows die with the game
            room.game.pending_challenge = None;
            room.game.pending_counter = None;
            room.game.phase = phase;
            return;
        }
        if phase == Phase::TurnStart
            && (room.game.pending_challenge.is_some() || room.game.pending_counter.is_some())
        {
            error!("pending window left behind at turn start; clearing");
            room.game.pending_challenge = None;
            room.game.pending_counter = None;
        }
        room.game.phase = phase;
        self.sweep_disconnected(room);
        room.guard.request_tick();
    }

    /// One deferred advancement step: close a finished game, and at the top
    /// of a turn move past a dead or disconnected current player. Also the
    /// spot where an all-disconnected room arms its stall check.
    fn advance_tick(&self, room: &mut Room) {
        if matches!(room.game.phase, Phase::GameOver { .. }) {
            return;
        }
        // nothing has been dealt yet
        let Some(current) = room.game.current_player else {
            return;
        };
        if room.alive_count() <= 1 {
            self.advance_turn(room);
            return;
        }
        let (is_alive, is_connected, name) = match room.player(current) {
            Some(p) => (p.is_alive, p.connected, p.name.clone()),
            None => {
                error!(player = current, "current player is not seated");
                return;
            }
        };
        if !is_alive {
            // a window opened by a player the sweep then removed dies with
            // them
            let voided = room.game.pending_challenge.take().is_some()
                || room.game.pending_counter.take().is_some();
            if voided {
                room.game
                    .log
                    .push(format!("{name}'s declared action is void"));
            }
            self.advance_turn(room);
            return;
        }
        if room.game.phase != Phase::TurnStart {
            return;
        }
        if !is_connected {
            if room.alive_players().any(|p| p.connected) {
                room.game
                    .log
                    .push(format!("{name} is disconnected; their turn is skipped"));
                self.advance_turn(room);
            } else if room.guard.timer().is_none() {
                room.game
                    .log
                    .push("every remaining player is disconnected; the game is stalled".to_string());
                room.guard
                    .arm(self.now(), DISCONNECT_TIMEOUT_SECS, TimerTask::StallCheck);
            }
        }
    }

    /// Turn hand-off: sweep first (it can change who is alive), check for a
    /// winner, then seat the next alive player strictly after the current
    /// seat, skipping disconnected ones. Bounded by one lap of the table.
    fn advance_turn(&self, room: &mut Room) {
        self.sweep_disconnected(room);

        if room.alive_count() <= 1 {
            let winner = room.players.iter().find(|p| p.is_alive).map(|p| p.id);
            match winner.and_then(|id| room.player(id)).map(|p| p.name.clone()) {
                Some(name) => room.game.log.push(format!("{name} wins the game")),
                None => room.game.log.push("nobody is left standing".to_string()),
            }
            self.transition(room, Phase::GameOver { winner });
            return;
        }

        let seats = room.players.len();
        let any_connected = room.alive_players().any(|p| p.connected);
        let mut chosen: Option<usize> = None;
        let mut fallback: Option<usize> = None;
        for step in 1..=seats {
            let seat = (room.game.turn_index + step) % seats;
            if !room.players[seat].is_alive {
                continue;
            }
            if fallback.is_none() {
                fallback = Some(seat);
            }
            if room.players[seat].connected {
                chosen = Some(seat);
                break;
            }
            if any_connected {
                let name = room.players[seat].name.clone();
                room.game
                    .log
                    .push(format!("{name} is disconnected; their turn is skipped"));
            }
        }

        // with nobody connected, seat the next alive player anyway so the
        // room always has a live current player; the stall check armed on
        // the follow-up tick keeps the game moving toward an end
        let seat = chosen
            .or(fallback)
            .expect("two or more alive players were counted above");
        room.game.turn_index = seat;
        room.game.current_player = Some(room.players[seat].id);
        self.transition(room, Phase::TurnStart);
    }

    /// Forcibly eliminate players whose disconnect outlived the allowance.
    fn sweep_disconnected(&self, room: &mut Room) {
        let now = self.now();
        let overdue: Vec<PlayerId> = room
            .players
            .iter()
            .filter(|p| p.is_alive && !p.connected)
            .filter(|p| {
                p.disconnect_time
                    .map(|since| now.saturating_sub(since) > DISCONNECT_TIMEOUT_SECS * 1000)
                    .unwrap_or(false)
            })
            .map(|p| p.id)
            .collect();
        for id in overdue {
            self.force_eliminate(room, id);
        }
    }

    /// Timer-driven recheck of a stalled room: sweep, then move the turn if
    /// the seat is still dark. Re-stalling re-arms via the follow-up tick.
    fn stall_check(&self, room: &mut Room) {
        self.sweep_disconnected(room);
        if matches!(room.game.phase, Phase::GameOver { .. }) {
            return;
        }
        if room.alive_count() <= 1 {
            self.advance_turn(room);
            return;
        }
        let seat_is_dark = room
            .game
            .current_player
            .and_then(|id| room.player(id))
            .map_or(true, |p| !p.is_alive || !p.connected);
        if seat_is_dark {
            self.advance_turn(room);
        }
    }

    fn force_eliminate(&self, room: &mut Room, id: PlayerId) {
        let Some(seat) = room.seat_of(id) else { return };
        let name = room.players[seat].name.clone();
        let mut hand = std::mem::take(&mut room.players[seat].hand);
        room.game.discard_pile.append(&mut hand);
        room.players[seat].is_alive = false;
        room.game
            .log
            .push(format!("{name} was eliminated after staying disconnected too long"));
        warn!(player = id, "force-eliminated after disconnect timeout");
    }

    // ------------------------------------------------------------------
    // action effects
    // ------------------------------------------------------------------

    /// The uncontested outcome of an action. Shared by the immediate path,
    /// both resolvers, and both timeout fallbacks, so every "action
    /// proceeds" edge behaves identically.
    fn apply_action_effect<R: Rng>(&self, room: &mut Room, action: &mut ActionRecord, rng: &mut R) {
        let actor = action.actor;
        let actor_name = action.actor_name.clone();
        match action.kind {
            ActionKind::Income => {
                if let Some(p) = room.player_mut(actor) {
                    p.coins += 1;
                }
                note(room, action, format!("{actor_name} takes income (+1 coin)"));
            }
            ActionKind::ForeignAid => {
                if let Some(p) = room.player_mut(actor) {
                    p.coins += 2;
                }
                note(room, action, format!("{actor_name} collects 2 coins of foreign aid"));
            }
            ActionKind::Tax => {
                if let Some(p) = room.player_mut(actor) {
                    p.coins += 3;
                }
                note(room, action, format!("{actor_name} levies 3 coins of tax"));
            }
            ActionKind::Coup | ActionKind::Assassinate => {
                let Some(target) = action.target else {
                    error!("targeted action applied without a target");
                    return;
                };
                self.lose_random_card(room, target, rng);
            }
            ActionKind::Steal => {
                let Some(target) = action.target else {
                    error!("steal applied without a target");
                    return;
                };
                let target_name = room
                    .player(target)
                    .map(|p| p.name.clone())
                    .unwrap_or_default();
                let amount = room.player(target).map(|p| p.coins.min(2)).unwrap_or(0);
                if amount == 0 {
                    note(room, action, format!("{target_name} has no coins to steal"));
                } else {
                    if let Some(t) = room.player_mut(target) {
                        t.coins -= amount;
                    }
                    if let Some(p) = room.player_mut(actor) {
                        p.coins += amount;
                    }
                    note(
                        room,
                        action,
                        format!("{actor_name} steals {amount} coins from {target_name}"),
                    );
                }
            }
            ActionKind::Exchange => self.perform_exchange(room, action, rng),
        }
        action.success = true;
    }

    /// Draw 2, pool them with the hand, keep as many as the hand held before,
    /// and return the rest to the discard pile. Which cards stay is the
    /// selector's call.
    fn perform_exchange<R: Rng>(&self, room: &mut Room, action: &mut ActionRecord, rng: &mut R) {
        let Some(seat) = room.seat_of(action.actor) else {
            error!("exchange by an unseated player");
            return;
        };
        let keep = room.players[seat].hand.len();
        for _ in 0..HAND_SIZE {
            let card = draw_card(&mut room.game, rng);
            room.players[seat].hand.push(card);
        }
        let pool = room.players[seat].hand.clone();
        let picks = sanitize_selection(self.selector.select(&pool, keep), pool.len(), keep);
        let mut kept = Vec::with_capacity(keep);
        for (idx, &card) in pool.iter().enumerate() {
            if picks.contains(&idx) {
                kept.push(card);
            } else {
                room.game.discard_pile.push(card);
            }
        }
        room.players[seat].hand = kept;
        let actor_name = action.actor_name.clone();
        note(room, action, format!("{actor_name} exchanges cards with the court deck"));
    }

    /// Forced influence loss: one random card to the discard pile. A hand
    /// that is (or ends up) empty eliminates the player.
    fn lose_random_card<R: Rng>(&self, room: &mut Room, id: PlayerId, rng: &mut R) -> Option<Role> {
        let Some(seat) = room.seat_of(id) else { return None };
        let name = room.players[seat].name.clone();
        if room.players[seat].hand.is_empty() {
            if room.players[seat].is_alive {
                room.players[seat].is_alive = false;
                room.game
                    .log
                    .push(format!("{name} has no influence left and is eliminated"));
            }
            return None;
        }
        let idx = rng.gen_range(0..room.players[seat].hand.len());
        let card = room.players[seat].hand.remove(idx);
        room.game.discard_pile.push(card);
        room.game.log.push(format!("{name} loses an influence"));
        if room.players[seat].hand.is_empty() {
            room.players[seat].is_alive = false;
            room.game
                .log
                .push(format!("{name} has no influence left and is eliminated"));
        }
        Some(card)
    }

    /// A vindicated claim shows the card, shuffles it back into the deck, and
    /// draws a replacement, so the table learns nothing durable about the
    /// hand. Not the same thing as a discard.
    fn replace_revealed_card<R: Rng>(&self, room: &mut Room, id: PlayerId, role: Role, rng: &mut R) {
        let Some(seat) = room.seat_of(id) else { return };
        let Some(idx) = room.players[seat].hand.iter().position(|&c| c == role) else {
            error!("vindicated player does not hold the revealed role");
            return;
        };
        let card = room.players[seat].hand.remove(idx);
        room.game.deck.push(card);
        room.game.deck.shuffle(rng);
        let fresh = draw_card(&mut room.game, rng);
        room.players[seat].hand.push(fresh);
    }

    // ------------------------------------------------------------------
    // window plumbing
    // ------------------------------------------------------------------

    fn open_challenge_window(
        &self,
        room: &mut Room,
        action: ActionRecord,
    ) -> Result<ActionRecord, EngineError> {
        room.game.pending_challenge = Some(PendingChallenge {
            action: action.clone(),
            challengers: std::collections::HashSet::new(),
        });
        self.transition(room, Phase::ChallengeWindow);
        self.arm(room, CHALLENGE_WINDOW_SECS, TimerTask::ChallengeTimeout);
        room.game.last_action = Some(action.clone());
        Ok(action)
    }

    fn open_counter_window(
        &self,
        room: &mut Room,
        action: ActionRecord,
        blocker_role: Role,
        eligible_blockers: Vec<PlayerId>,
    ) -> Result<ActionRecord, EngineError> {
        room.game.pending_counter = Some(PendingCounter {
            action: action.clone(),
            blocker_role,
            eligible_blockers,
        });
        self.transition(room, Phase::CounterWindow);
        self.arm(room, COUNTER_WINDOW_SECS, TimerTask::CounterTimeout);
        room.game.last_action = Some(action.clone());
        Ok(action)
    }

    fn finish_action(
        &self,
        room: &mut Room,
        action: ActionRecord,
    ) -> Result<ActionRecord, EngineError> {
        room.game.last_action = Some(action.clone());
        self.advance_turn(room);
        Ok(action)
    }
}

/// Append one narrative line to both the room log and the action's record.
fn note(room: &mut Room, action: &mut ActionRecord, line: String) {
    room.game.log.push(line.clone());
    action.log.push(line);
}

/// Draw from the deck, folding the discard pile back in (shuffled) if the
/// deck ran dry.
fn draw_card<R: Rng>(game: &mut GameState, rng: &mut R) -> Role {
    if game.deck.is_empty() {
        game.deck.append(&mut game.discard_pile);
        game.deck.shuffle(rng);
    }
    game.deck
        .pop()
        .expect("a 15-card role set cannot leave both piles empty")
}

/// Keep selector output honest: indices in range, no duplicates, exactly
/// `keep` of them. Anything else falls back to the first cards.
fn sanitize_selection(mut picks: Vec<usize>, pool_len: usize, keep: usize) -> Vec<usize> {
    picks.sort_unstable();
    picks.dedup();
    picks.retain(|&idx| idx < pool_len);
    if picks.len() != keep {
        warn!("card selector returned an invalid pick; keeping the first cards instead");
        picks = (0..keep).collect();
    }
    picks
}
