//! Per-room mutual exclusion and timer ownership.
//!
//! Every state-mutating entry point runs inside a guard section. A room whose
//! guard is held rejects further calls outright; rejected calls are dropped,
//! never queued, so operations on one room are totally ordered by who
//! acquired the guard first. The guard also owns the room's single timer
//! slot: arming replaces whatever was armed before, and a generation counter
//! lets the engine drop wake-ups that outlived the window they were armed
//! for.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, error};

use crate::error::EngineError;
use crate::room::Room;

/// Wall-clock source, supplied by the hosting layer. Milliseconds from an
/// arbitrary but fixed origin; the engine only compares and subtracts.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

#[derive(Copy, Clone, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Hand-driven clock for tests, benches, and the demo binary.
#[derive(Debug, Default)]
pub struct ManualClock(Cell<u64>);

impl ManualClock {
    pub fn set(&self, ms: u64) {
        self.0.set(ms);
    }

    pub fn advance(&self, ms: u64) {
        self.0.set(self.0.get() + ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.get()
    }
}

/// What an armed timer does once its deadline passes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TimerTask {
    /// Close an unanswered challenge window: the action proceeds
    /// unchallenged.
    ChallengeTimeout,
    /// Close an unanswered counter window: the action proceeds unblocked.
    CounterTimeout,
    /// Re-check a room whose alive players are all disconnected.
    StallCheck,
}

/// A scheduled wake-up for one room. The hosting layer sleeps until
/// `deadline_ms` and calls back quoting `generation`; a fire whose generation
/// no longer matches the armed timer is stale and gets dropped.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ArmedTimer {
    pub deadline_ms: u64,
    pub generation: u64,
    pub task: TimerTask,
}

/// The exclusive-access flag and timer slot carried by every [`Room`].
///
/// The flag is a real atomic even though rooms are driven by a single
/// cooperative scheduler, so the same discipline keeps working if rooms ever
/// move onto an actor or thread runtime.
#[derive(Debug, Default)]
pub struct ExecutionGuard {
    held: Arc<AtomicBool>,
    timer: Option<ArmedTimer>,
    generation: u64,
    tick_requested: bool,
}

impl ExecutionGuard {
    /// Take exclusive access, or reject if another operation holds it.
    /// Re-entrant attempts from inside a held section are rejected the same
    /// way; this is pure mutual exclusion, not reentrancy.
    pub fn try_enter(&self) -> Result<GuardSection, EngineError> {
        if self
            .held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Ok(GuardSection {
                held: Arc::clone(&self.held),
            })
        } else {
            debug!("room guard is held; dropping the call");
            Err(EngineError::Busy)
        }
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    /// Arm the room's single timer, replacing whatever was armed before.
    pub(crate) fn arm(&mut self, now_ms: u64, delay_secs: u64, task: TimerTask) -> ArmedTimer {
        self.timer = None;
        self.generation += 1;
        let armed = ArmedTimer {
            deadline_ms: now_ms + delay_secs * 1000,
            generation: self.generation,
            task,
        };
        self.timer = Some(armed);
        armed
    }

    /// Cancel the armed timer. No-op if nothing is armed.
    pub(crate) fn disarm(&mut self) {
        self.timer = None;
    }

    pub fn timer(&self) -> Option<ArmedTimer> {
        self.timer
    }

    pub(crate) fn request_tick(&mut self) {
        self.tick_requested = true;
    }

    pub(crate) fn take_tick(&mut self) -> bool {
        std::mem::take(&mut self.tick_requested)
    }
}

/// Scoped access token. Dropping it releases the room on every exit path,
/// including unwinding out of a fault, so a failed operation can never leave
/// a room permanently locked.
#[derive(Debug)]
pub struct GuardSection {
    held: Arc<AtomicBool>,
}

impl Drop for GuardSection {
    fn drop(&mut self) {
        if std::thread::panicking() {
            error!("releasing room guard while unwinding from a fault inside a guarded section");
        }
        self.held.store(false, Ordering::Release);
    }
}

/// Run `op` with exclusive access to `room`. Rejected with
/// [`EngineError::Busy`] if the guard is already held; the caller should
/// treat that as "no-op, try again later".
pub fn with_exclusive_access<T>(
    room: &mut Room,
    op: impl FnOnce(&mut Room) -> T,
) -> Result<T, EngineError> {
    let section = room.guard.try_enter()?;
    let out = op(room);
    drop(section);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::panic::{catch_unwind, AssertUnwindSafe};

    use super::*;
    use crate::room::{Player, Room};

    fn empty_room() -> Room {
        Room::new(vec![Player::new(1, "a"), Player::new(2, "b")])
    }

    #[test]
    fn second_enter_is_rejected() {
        let room = empty_room();
        let section = room.guard().try_enter().unwrap();
        assert_eq!(room.guard().try_enter().unwrap_err(), EngineError::Busy);
        drop(section);
        assert!(room.guard().try_enter().is_ok());
    }

    #[test]
    fn with_exclusive_access_releases() {
        let mut room = empty_room();
        let out = with_exclusive_access(&mut room, |_| 7).unwrap();
        assert_eq!(out, 7);
        assert!(!room.guard().is_held());
    }

    #[test]
    fn guard_releases_after_panic() {
        let mut room = empty_room();
        let result = catch_unwind(AssertUnwindSafe(|| {
            let _ = with_exclusive_access(&mut room, |_| panic!("fault inside the section"));
        }));
        assert!(result.is_err());
        assert!(!room.guard().is_held());
    }

    #[test]
    fn arming_replaces_and_bumps_generation() {
        let mut guard = ExecutionGuard::default();
        let first = guard.arm(1_000, 20, TimerTask::ChallengeTimeout);
        let second = guard.arm(2_000, 15, TimerTask::CounterTimeout);
        assert_ne!(first.generation, second.generation);
        assert_eq!(guard.timer(), Some(second));
        assert_eq!(second.deadline_ms, 17_000);
    }

    #[test]
    fn disarm_clears_the_slot() {
        let mut guard = ExecutionGuard::default();
        guard.arm(0, 60, TimerTask::StallCheck);
        guard.disarm();
        assert_eq!(guard.timer(), None);
        // disarming an empty slot stays a no-op
        guard.disarm();
        assert_eq!(guard.timer(), None);
    }
}
