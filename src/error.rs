use thiserror::Error;

/// A request that was legal to make but illegal to apply. Nothing in the room
/// changes when one of these comes back; the message is safe to show to the
/// player verbatim.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum Reject {
    #[error("this phase does not accept that request")]
    WrongPhase,
    #[error("it is not this player's turn")]
    NotYourTurn,
    #[error("player is unknown or already eliminated")]
    NotAlive,
    #[error("target is missing or already eliminated")]
    InvalidTarget,
    #[error("not enough coins")]
    InsufficientCoins,
    #[error("card index is out of range")]
    OutOfRange,
    #[error("player may not respond to this window")]
    NotEligible,
    #[error("the response window has already closed")]
    WindowClosed,
    #[error("the game has already been dealt")]
    AlreadyStarted,
    #[error("a game seats 2 to 6 players with distinct ids")]
    InvalidRoster,
    #[error("the game is over")]
    GameOver,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The room's execution guard is held by another operation. The call was
    /// dropped, not queued; the caller decides whether to try again later.
    #[error("room is busy; the call was dropped")]
    Busy,
    #[error(transparent)]
    Rejected(#[from] Reject),
    /// A state the protocol should make unreachable. Logged at the call site
    /// and aborted; nothing further is mutated.
    #[error("protocol invariant violated: {0}")]
    Inconsistent(&'static str),
}
