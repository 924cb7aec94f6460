// Copyright 2026 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::Error;
use gax::backoff_policy::BackoffPolicy;
use gax::error::rpc::Code;
use gax::exponential_backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use gax::retry_policy::{AlwaysRetry, RetryPolicy, RetryPolicyExt};
use gax::retry_result::RetryResult;
use gax::retry_state::RetryState;
use std::sync::Arc;
use tokio::time::{Duration, Instant};

/// How long acks and modacks are retried without exactly-once delivery.
pub(super) const TRANSIENT_TIME_LIMIT: Duration = Duration::from_secs(60);
pub(super) const TRANSIENT_MAX_DELAY: Duration = Duration::from_secs(10);

/// How long acks and modacks are retried with exactly-once delivery.
pub(super) const EXACTLY_ONCE_TIME_LIMIT: Duration = Duration::from_secs(600);
pub(super) const EXACTLY_ONCE_MAX_DELAY: Duration = Duration::from_secs(64);

/// The subscriber's retry policy, specifically for StreamingPull RPCs.
///
/// This same policy applies to both starting and resuming a stream.
#[derive(Debug)]
pub(super) struct StreamRetryPolicy;

impl StreamRetryPolicy {
    /// Whether a stream error is transient (retry-able).
    pub(super) fn is_transient(error: Error) -> RetryResult {
        if error.is_io() {
            return RetryResult::Continue(error);
        }
        if let Some(status) = error.status() {
            return match status.code {
                Code::DeadlineExceeded
                | Code::ResourceExhausted
                | Code::Aborted
                | Code::Internal
                | Code::Unavailable => RetryResult::Continue(error),
                _ => RetryResult::Permanent(error),
            };
        }
        RetryResult::Permanent(error)
    }

    /// The backoff between attempts to reopen a stream.
    pub(super) fn backoff() -> ExponentialBackoff {
        exponential(Duration::from_millis(100), Duration::from_secs(60))
    }
}

impl RetryPolicy for StreamRetryPolicy {
    fn on_error(&self, _state: &RetryState, error: Error) -> RetryResult {
        Self::is_transient(error)
    }
}

/// Whether an Acknowledge RPC failed by running out of time.
pub(super) fn is_ack_timeout(error: &Error) -> bool {
    error.is_timeout() || error.status().is_some_and(|s| s.code == Code::DeadlineExceeded)
}

/// Whether a ModifyAckDeadline RPC failed in a way that is safe to retry
/// briefly, and then ignore.
pub(super) fn is_modack_timeout(error: &Error) -> bool {
    is_ack_timeout(error) || error.status().is_some_and(|s| s.code == Code::Unavailable)
}

/// Continues on [is_ack_timeout] errors, all other errors are permanent.
#[derive(Clone, Debug)]
pub(super) struct AckTimeouts;

impl RetryPolicy for AckTimeouts {
    fn on_error(&self, _state: &RetryState, error: Error) -> RetryResult {
        if is_ack_timeout(&error) {
            RetryResult::Continue(error)
        } else {
            RetryResult::Permanent(error)
        }
    }
}

/// Continues on [is_modack_timeout] errors, all other errors are permanent.
#[derive(Clone, Debug)]
pub(super) struct ModackTimeouts;

impl RetryPolicy for ModackTimeouts {
    fn on_error(&self, _state: &RetryState, error: Error) -> RetryResult {
        if is_modack_timeout(&error) {
            RetryResult::Continue(error)
        } else {
            RetryResult::Permanent(error)
        }
    }
}

/// Decides if, and when, a failed ack, nack or modack is resent.
#[derive(Clone, Debug)]
pub(super) struct LeaseRetryPolicy {
    retry: Arc<dyn RetryPolicy>,
    backoff: Arc<ExponentialBackoff>,
}

impl LeaseRetryPolicy {
    /// Used for acks on subscriptions without exactly-once delivery. These
    /// retries are brief, a lost ack results in a redelivery.
    pub(super) fn acks() -> Self {
        Self::transient(AckTimeouts)
    }

    /// Used for nacks and modacks on subscriptions without exactly-once
    /// delivery.
    pub(super) fn modacks() -> Self {
        Self::transient(ModackTimeouts)
    }

    /// Used to resend acks, nacks and modacks with exactly-once delivery.
    ///
    /// The failures are classified by the caller, this policy only limits the
    /// time spent retrying.
    pub(super) fn exactly_once() -> Self {
        Self {
            retry: Arc::new(AlwaysRetry.with_time_limit(EXACTLY_ONCE_TIME_LIMIT)),
            backoff: Arc::new(exponential(
                Duration::from_secs(1),
                EXACTLY_ONCE_MAX_DELAY,
            )),
        }
    }

    fn transient<P>(policy: P) -> Self
    where
        P: RetryPolicy + 'static,
    {
        Self {
            retry: Arc::new(policy.with_time_limit(TRANSIENT_TIME_LIMIT)),
            backoff: Arc::new(exponential(
                Duration::from_millis(100),
                TRANSIENT_MAX_DELAY,
            )),
        }
    }

    /// Returns the delay before the next attempt, or the result that ends the
    /// retry loop.
    ///
    /// `start` is when the first attempt started, `attempts` how many attempts
    /// were made so far.
    pub(super) fn on_error(
        &self,
        start: Instant,
        attempts: u32,
        error: Error,
    ) -> std::result::Result<Duration, RetryResult> {
        let state = RetryState::new(true)
            .set_start(start.into_std())
            .set_attempt_count(attempts);
        match self.retry.on_error(&state, error) {
            RetryResult::Continue(_) => Ok(self.backoff.on_failure(&state)),
            stop => Err(stop),
        }
    }
}

fn exponential(initial_delay: Duration, maximum_delay: Duration) -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_delay(initial_delay)
        .with_maximum_delay(maximum_delay)
        .with_scaling(2.0)
        .clamp()
}
