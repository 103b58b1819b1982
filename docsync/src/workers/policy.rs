use crate::error::{ErrorKind, SyncError};
use crate::store::document::HISTORY_LOST_SIGNATURE;

/// How a supervisor recovers from a failed phase attempt.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SyncOutcome {
    /// Retry the current phase after the configured delay.
    Transient,
    /// Restart streaming immediately without the stored resume position.
    ResumePositionInvalidated,
    /// Stop the supervisor for good.
    ///
    /// Reserved for a future terminal state, no error maps to it and supervisors never stop on
    /// their own.
    Fatal,
}

/// Policy describing how a [`SyncError`] is handled by collection supervisors.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ErrorHandlingPolicy {
    outcome: SyncOutcome,
    solution: Option<&'static str>,
}

impl ErrorHandlingPolicy {
    const fn new(outcome: SyncOutcome, solution: Option<&'static str>) -> Self {
        Self { outcome, solution }
    }

    pub fn outcome(&self) -> SyncOutcome {
        self.outcome
    }

    /// Returns an optional operator-facing solution message.
    pub fn solution(&self) -> Option<&'static str> {
        self.solution
    }
}

/// Builds an [`ErrorHandlingPolicy`] from a [`SyncError`].
///
/// Errors are recognized as a lost resume position either by kind or by the message the
/// server attaches to them, since drivers do not always classify them. Every other error is
/// retried after the delay, supervisors have no terminal state.
pub fn build_error_handling_policy(error: &SyncError) -> ErrorHandlingPolicy {
    if error.kinds().contains(&ErrorKind::ChangeFeedHistoryLost)
        || error.mentions(HISTORY_LOST_SIGNATURE)
    {
        return ErrorHandlingPolicy::new(SyncOutcome::ResumePositionInvalidated, None);
    }

    match error.kind() {
        ErrorKind::StoreConnectionFailed => ErrorHandlingPolicy::new(
            SyncOutcome::Transient,
            Some("Verify the store is reachable and the connection URI is correct."),
        ),
        ErrorKind::WriteNotApplied => ErrorHandlingPolicy::new(
            SyncOutcome::Transient,
            Some("The destination diverged from the source, verify nothing else writes to it."),
        ),
        ErrorKind::CollectionWorkerPanic => ErrorHandlingPolicy::new(
            SyncOutcome::Transient,
            Some("A phase attempt panicked, check the logs for the panic message."),
        ),
        _ => ErrorHandlingPolicy::new(SyncOutcome::Transient, None),
    }
}
