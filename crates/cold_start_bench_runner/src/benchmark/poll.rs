//! Bounded poll-until-condition loop shared by every wait in a run.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Result of one check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready(T),
    /// Not there yet; the reason is kept for the timeout message.
    Pending(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    #[error("timed out after {waited:?} (last state: {last})")]
    TimedOut { waited: Duration, last: String },
    #[error("cancelled")]
    Cancelled,
    #[error("{0}")]
    Failed(String),
}

/// Runs `check` immediately, then every `interval`, until it reports ready or
/// failed, `timeout` elapses, or `cancel` fires.
///
/// A check that starts before the deadline may finish after it; its result
/// still counts.
pub async fn poll_until<T, F, Fut>(
    cancel: &CancellationToken,
    timeout: Duration,
    interval: Duration,
    mut check: F,
) -> Result<T, PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PollOutcome<T>>,
{
    let started = Instant::now();
    let deadline = started + timeout;
    let mut last = String::from("not checked");

    loop {
        if cancel.is_cancelled() {
            return Err(PollError::Cancelled);
        }

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(PollError::Cancelled),
            outcome = check() => outcome,
        };
        match outcome {
            PollOutcome::Ready(value) => return Ok(value),
            PollOutcome::Failed(message) => return Err(PollError::Failed(message)),
            PollOutcome::Pending(reason) => last = reason,
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(PollError::TimedOut {
                waited: now - started,
                last,
            });
        }
        let wake = (now + interval).min(deadline);
        tokio::select! {
            _ = cancel.cancelled() => return Err(PollError::Cancelled),
            _ = tokio::time::sleep_until(wake) => {}
        }
        if wake == deadline {
            // One final check at the deadline before giving up.
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(PollError::Cancelled),
                outcome = check() => outcome,
            };
            return match outcome {
                PollOutcome::Ready(value) => Ok(value),
                PollOutcome::Failed(message) => Err(PollError::Failed(message)),
                PollOutcome::Pending(reason) => Err(PollError::TimedOut {
                    waited: Instant::now() - started,
                    last: reason,
                }),
            };
        }
    }
}
