use thiserror::Error;

/// A cancelable blocking wait observed its token's cancellation.
///
/// Timeouts are not errors for acquire-style waits: timed variants report
/// "nothing available" through their return value and leave the primitive
/// fully usable.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AcquireError {
    #[error("wait cancelled")]
    Cancelled,
}

/// Failure of a barrier round.
///
/// `TimedOut` and `Cancelled` are returned to the caller whose wait ended the
/// round; every other waiter of that generation gets `Broken`. Broken is
/// sticky for the generation: new arrivals keep failing until `reset`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BarrierError {
    #[error("barrier is broken")]
    Broken,
    #[error("barrier wait timed out")]
    TimedOut,
    #[error("barrier wait cancelled")]
    Cancelled,
}
