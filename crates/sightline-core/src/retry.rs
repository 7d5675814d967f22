//! Polling a template until it shows up or the policy runs out.
//!
//! Every iteration takes a fresh capture, so UI that renders late is picked
//! up on the next attempt. A miss is not an error here; the controller hands
//! back the last failing [`MatchResult`] and lets the caller decide.

use std::time::Duration;

use crate::capture::CaptureSource;
use crate::clock::{AbortSignal, Clock};
use crate::error::{Error, Result};
use crate::matcher::{self, MatchResult};
use crate::scale::{ScaleFactor, ScaleResolver};
use crate::template::Template;

/// How long to keep looking, and how often.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    timeout: Duration,
    interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid retry policy: {0}")]
pub struct InvalidPolicy(String);

impl RetryPolicy {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

    /// Both durations must be positive and `interval < timeout`.
    pub fn new(timeout: Duration, interval: Duration) -> std::result::Result<Self, InvalidPolicy> {
        if timeout.is_zero() || interval.is_zero() {
            return Err(InvalidPolicy("timeout and interval must be positive".into()));
        }
        if interval >= timeout {
            return Err(InvalidPolicy(format!(
                "interval ({}ms) must be shorter than timeout ({}ms)",
                interval.as_millis(),
                timeout.as_millis()
            )));
        }
        Ok(Self { timeout, interval })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Self::DEFAULT_TIMEOUT,
            interval: Self::DEFAULT_INTERVAL,
        }
    }
}

/// Result of a retried search.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome {
    /// The successful result, or the last failing one.
    pub result: MatchResult,
    /// Display scale in effect for `result`.
    pub scale: ScaleFactor,
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Borrowed view of the collaborators one search needs.
pub struct RetryController<'a> {
    pub source: &'a mut dyn CaptureSource,
    pub scale: &'a mut ScaleResolver,
    pub clock: &'a dyn Clock,
    pub abort: &'a AbortSignal,
}

impl RetryController<'_> {
    /// Search for `template` until found or `policy.timeout` has elapsed.
    ///
    /// Total latency is bounded by timeout + interval + one matching call.
    pub fn find_with_retry(
        &mut self,
        template: &Template,
        policy: RetryPolicy,
    ) -> Result<RetryOutcome> {
        let started = self.clock.now();
        let mut attempts = 0u32;

        loop {
            if self.abort.is_triggered() {
                return Err(Error::Aborted);
            }

            let capture = self.source.capture()?;
            let logical = self.source.logical_size()?;
            let scale = self.scale.observe(&capture, logical)?;
            let result = matcher::find(template, &capture, scale);
            drop(capture);
            attempts += 1;

            tracing::debug!(
                template = template.id(),
                attempt = attempts,
                score = result.score,
                found = result.found,
                "retry attempt"
            );

            if result.found {
                return Ok(RetryOutcome {
                    result,
                    scale,
                    attempts,
                    elapsed: self.clock.now().saturating_sub(started),
                });
            }

            if !self.clock.sleep(policy.interval, self.abort) {
                return Err(Error::Aborted);
            }

            let elapsed = self.clock.now().saturating_sub(started);
            if elapsed >= policy.timeout {
                return Ok(RetryOutcome {
                    result,
                    scale,
                    attempts,
                    elapsed,
                });
            }
        }
    }
}
