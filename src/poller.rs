//! Condition polling.
//!
//! Re-evaluates a condition at a fixed interval until it holds or a deadline
//! passes. Evaluation errors count as "not yet" and are retried; they are
//! never propagated. The loop runs inline in the caller's task, so nothing
//! keeps polling after [`poll_until`] returns.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::browser::BrowserSession;
use crate::scenario::Predicate;

/// Lower bound on the poll interval
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Polling parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
}

impl PollSettings {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(MIN_POLL_INTERVAL),
        }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::new(Duration::from_millis(crate::config::DEFAULT_POLL_INTERVAL_MS))
    }
}

/// Result of a polling loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollOutcome {
    pub satisfied: bool,
    pub elapsed_ms: u64,
    /// Number of evaluations performed
    pub attempts: u32,
    /// Evaluations that failed rather than returning false
    pub errors: u32,
    pub last_error: Option<String>,
}

/// Something that can be checked repeatedly
#[async_trait]
pub trait Condition: Send {
    async fn check(&mut self) -> Result<bool, String>;
}

/// Poll `condition` every `settings.interval` until it returns true or `timeout` elapses.
///
/// Returns within one interval of the condition becoming true. A final check
/// is made at the deadline; a check still running at the deadline is
/// abandoned and counted as unsatisfied.
pub async fn poll_until(
    condition: &mut dyn Condition,
    timeout: Duration,
    settings: PollSettings,
) -> PollOutcome {
    let start = Instant::now();
    let deadline = start + timeout;
    let mut outcome = PollOutcome {
        satisfied: false,
        elapsed_ms: 0,
        attempts: 0,
        errors: 0,
        last_error: None,
    };

    loop {
        outcome.attempts += 1;
        let remaining = deadline.saturating_duration_since(Instant::now());

        match tokio::time::timeout(remaining, condition.check()).await {
            Ok(Ok(true)) => {
                outcome.satisfied = true;
                break;
            }
            Ok(Ok(false)) => trace!(attempt = outcome.attempts, "condition not yet satisfied"),
            Ok(Err(err)) => {
                debug!(attempt = outcome.attempts, error = %err, "condition check failed, retrying");
                outcome.errors += 1;
                outcome.last_error = Some(err);
            }
            Err(_) => {
                outcome.errors += 1;
                outcome.last_error = Some("check still running at deadline".to_string());
            }
        }

        let now = Instant::now();
        if now >= deadline {
            break;
        }
        tokio::time::sleep(settings.interval.min(deadline - now)).await;
    }

    outcome.elapsed_ms = start.elapsed().as_millis() as u64;
    outcome
}

/// Condition evaluating a [`Predicate`] against a live session
pub struct PredicateCondition<'a> {
    session: &'a mut dyn BrowserSession,
    predicate: &'a Predicate,
}

impl<'a> PredicateCondition<'a> {
    pub fn new(session: &'a mut dyn BrowserSession, predicate: &'a Predicate) -> Self {
        Self { session, predicate }
    }
}

#[async_trait]
impl Condition for PredicateCondition<'_> {
    async fn check(&mut self) -> Result<bool, String> {
        self.predicate
            .evaluate(&mut *self.session)
            .await
            .map_err(|e| e.to_string())
    }
}

/// Wait until `predicate` holds on the session page
pub async fn wait_for(
    session: &mut dyn BrowserSession,
    predicate: &Predicate,
    timeout: Duration,
    settings: PollSettings,
) -> PollOutcome {
    let mut condition = PredicateCondition::new(session, predicate);
    poll_until(&mut condition, timeout, settings).await
}
