//! Errors of the blocking observation calls

use std::time::Duration;
use thiserror::Error;

/// Why waiting for a deferred value did not yield an outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WaitError {
    /// The deferred value was not settled within the given duration
    #[error("deferred value was not settled within {0:?}")]
    Timeout(Duration),
    /// Every settlement capability was dropped while the deferred value was still pending
    #[error("deferred value was abandoned by its producers before being settled")]
    Abandoned,
}
