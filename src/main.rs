//! Random self-play driver: four seats, one engine, one room, played to the
//! end through the public API. Useful for eyeballing the narrative log and
//! the phase machine; the transport and room registry live elsewhere.

use coup_engine::{
    ActionKind, GameEngine, ManualClock, Phase, Player, PlayerId, Room,
};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let engine = GameEngine::with_clock(ManualClock::default());
    let mut rng = Pcg64::seed_from_u64(0xC0FFEE);
    let mut room = Room::new(
        (1..=4u64)
            .map(|i| Player::new(i, format!("player-{i}")))
            .collect(),
    );
    engine
        .initialize_game(&mut room, &mut rng)
        .expect("a fresh four-seat room deals");

    for _ in 0..500 {
        if matches!(room.game.phase, Phase::GameOver { .. }) {
            break;
        }
        step(&engine, &mut room, &mut rng);
    }

    for line in &room.game.log {
        println!("{line}");
    }
    match room.winner() {
        Some(id) => println!("winner: player {id}"),
        None => println!("no winner"),
    }
}

/// Play one event into the room: an action, a window response, or a timeout.
fn step(engine: &GameEngine<ManualClock>, room: &mut Room, rng: &mut Pcg64) {
    match room.game.phase {
        Phase::TurnStart => {
            let Some(actor) = room.game.current_player else {
                return;
            };
            let coins = room.player(actor).map(|p| p.coins).unwrap_or(0);
            let target = random_opponent(room, actor, rng);

            let (kind, target) = if coins >= 7 {
                (ActionKind::Coup, target)
            } else {
                match rng.gen_range(0..6) {
                    0 => (ActionKind::Income, None),
                    1 => (ActionKind::ForeignAid, None),
                    2 => (ActionKind::Tax, None),
                    3 => (ActionKind::Steal, target),
                    4 if coins >= 3 => (ActionKind::Assassinate, target),
                    _ => (ActionKind::Exchange, None),
                }
            };
            if engine
                .declare_action(room, actor, kind, target, rng)
                .is_err()
            {
                // fall back to the one action that is always legal
                let _ = engine.declare_action(room, actor, ActionKind::Income, None, rng);
            }
        }
        Phase::ChallengeWindow => {
            let actor = room
                .game
                .pending_challenge
                .as_ref()
                .map(|p| p.action.actor);
            let challenger = actor.and_then(|a| random_opponent(room, a, rng));
            match challenger {
                Some(challenger) if rng.gen_bool(0.5) => {
                    let _ = engine.submit_challenge(room, challenger, rng);
                }
                _ => fire_timer(engine, room, rng),
            }
        }
        Phase::CounterWindow => {
            let blocker = room
                .game
                .pending_counter
                .as_ref()
                .and_then(|p| p.eligible_blockers.first().copied());
            match blocker {
                Some(blocker) if rng.gen_bool(0.5) => {
                    let _ = engine.submit_counter(room, blocker, rng.gen_bool(0.5), rng);
                }
                _ => fire_timer(engine, room, rng),
            }
        }
        _ => fire_timer(engine, room, rng),
    }
}

fn random_opponent(room: &Room, actor: PlayerId, rng: &mut Pcg64) -> Option<PlayerId> {
    let others: Vec<PlayerId> = room
        .players
        .iter()
        .filter(|p| p.is_alive && p.id != actor)
        .map(|p| p.id)
        .collect();
    if others.is_empty() {
        None
    } else {
        Some(others[rng.gen_range(0..others.len())])
    }
}

fn fire_timer(engine: &GameEngine<ManualClock>, room: &mut Room, rng: &mut Pcg64) {
    if let Some(timer) = room.timer() {
        engine.clock().set(timer.deadline_ms);
        let _ = engine.handle_timeout(room, timer.generation, rng);
    } else {
        engine.pump(room);
    }
}
