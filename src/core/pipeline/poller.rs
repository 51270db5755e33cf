//! Drives one execution to a terminal state.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::PipelineError;
use super::types::QueryExecution;
use crate::core::query::{ExecutionState, QueryEngine};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    /// First poll delay; doubles each tick.
    pub base: Duration,
    /// No single delay exceeds this, jitter included.
    pub max_interval: Duration,
    /// Overall budget, measured from submission.
    pub max_wait: Duration,
    /// Consecutive transient status failures tolerated before giving up.
    pub max_transient_retries: u32,
    pub call_timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max_interval: Duration::from_secs(5),
            max_wait: Duration::from_secs(60),
            max_transient_retries: 3,
            call_timeout: Duration::from_secs(10),
        }
    }
}

/// Capped exponential backoff with equal jitter: half the nominal delay is fixed and the
/// other half random, so a delay is never below `nominal / 2` nor above the cap.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            attempt: 0,
        }
    }

    pub fn nominal(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.base.saturating_mul(factor).min(self.cap)
    }

    pub fn next_delay(&mut self) -> Duration {
        let nominal = self.nominal(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        let half = nominal / 2;
        let spread = (nominal - half).as_millis() as u64;
        let jitter = if spread == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=spread)
        };
        (half + Duration::from_millis(jitter)).min(self.cap)
    }
}

/// Polls until SUCCEEDED (returned) or any other end: FAILED/CANCELLED, budget exhausted,
/// transient failures exhausted, or `cancel` fired. Never polls again once terminal.
pub async fn poll_until_terminal(
    engine: &dyn QueryEngine,
    mut execution: QueryExecution,
    policy: &PollPolicy,
    cancel: &CancellationToken,
) -> Result<QueryExecution, PipelineError> {
    let deadline = Instant::now() + policy.max_wait;
    let mut backoff = Backoff::new(policy.base, policy.max_interval);
    let mut consecutive_failures = 0u32;
    let id = execution.execution_id.clone();

    loop {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(execution_id = %id, "Cancellation requested while polling");
                return Err(abandon(engine, &id, policy, PipelineError::Cancelled).await);
            }
            res = tokio::time::timeout(policy.call_timeout, engine.status(&id)) => res,
        };

        let failure = match outcome {
            Ok(Ok(report)) => {
                consecutive_failures = 0;
                debug!(execution_id = %id, state = %report.state, "Status tick");
                if execution.observe(report.state, report.message, report.completed_at) {
                    match execution.state {
                        ExecutionState::Succeeded => return Ok(execution),
                        ExecutionState::Failed | ExecutionState::Cancelled => {
                            let message = execution
                                .error_message
                                .clone()
                                .unwrap_or_else(|| "no diagnostic was reported".to_string());
                            warn!(execution_id = %id, state = %execution.state, "Query ended: {}", message);
                            return Err(PipelineError::QueryExecution {
                                state: execution.state,
                                message,
                            });
                        }
                        ExecutionState::Queued | ExecutionState::Running => {}
                    }
                }
                None
            }
            Ok(Err(e)) if e.is_transient() => Some(e.to_string()),
            Ok(Err(e)) => {
                warn!(execution_id = %id, "Status call rejected: {}", e);
                return Err(PipelineError::QueryExecution {
                    state: execution.state,
                    message: e.to_string(),
                });
            }
            Err(_) => Some(format!(
                "status call timed out after {}s",
                policy.call_timeout.as_secs_f64()
            )),
        };

        if let Some(message) = failure {
            consecutive_failures += 1;
            warn!(
                execution_id = %id,
                attempt = consecutive_failures,
                "Transient status failure: {}",
                message
            );
            if consecutive_failures > policy.max_transient_retries {
                let error = PipelineError::TransientPoll {
                    attempts: consecutive_failures,
                    message,
                };
                return Err(abandon(engine, &id, policy, error).await);
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(timed_out(engine, &id, policy).await);
        }
        let delay = backoff.next_delay().min(deadline - now);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(execution_id = %id, "Cancellation requested while polling");
                return Err(abandon(engine, &id, policy, PipelineError::Cancelled).await);
            }
            _ = tokio::time::sleep(delay) => {}
        }
        if Instant::now() >= deadline {
            return Err(timed_out(engine, &id, policy).await);
        }
    }
}

async fn timed_out(engine: &dyn QueryEngine, id: &str, policy: &PollPolicy) -> PipelineError {
    warn!(
        execution_id = %id,
        "Query exceeded the {}s budget",
        policy.max_wait.as_secs()
    );
    abandon(engine, id, policy, PipelineError::QueryTimeout(policy.max_wait)).await
}

/// Best-effort cancel; its outcome never changes the error returned.
pub(crate) async fn abandon(
    engine: &dyn QueryEngine,
    id: &str,
    policy: &PollPolicy,
    error: PipelineError,
) -> PipelineError {
    match tokio::time::timeout(policy.call_timeout, engine.cancel(id)).await {
        Ok(Ok(())) => info!(execution_id = %id, "Cancel requested"),
        Ok(Err(e)) => warn!(execution_id = %id, "Cancel failed: {}", e),
        Err(_) => warn!(execution_id = %id, "Cancel call timed out"),
    }
    error
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nominal_delay_doubles_up_to_the_cap() {
        let b = Backoff::new(Duration::from_secs(1), Duration::from_secs(5));
        assert_eq!(b.nominal(0), Duration::from_secs(1));
        assert_eq!(b.nominal(1), Duration::from_secs(2));
        assert_eq!(b.nominal(2), Duration::from_secs(4));
        assert_eq!(b.nominal(3), Duration::from_secs(5));
        assert_eq!(b.nominal(40), Duration::from_secs(5));
    }

    #[test]
    fn jittered_delay_stays_within_half_nominal_and_cap() {
        let mut b = Backoff::new(Duration::from_secs(1), Duration::from_secs(5));
        for attempt in 0..20 {
            let nominal = b.nominal(attempt);
            let d = b.next_delay();
            assert!(d >= nominal / 2, "attempt {attempt}: {d:?} < {nominal:?}/2");
            assert!(d <= nominal, "attempt {attempt}: {d:?} > {nominal:?}");
            assert!(d <= Duration::from_secs(5));
        }
    }
}
