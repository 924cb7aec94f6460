// Copyright 2025 Google LLC
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

use super::ack_result::{AckResultSender, AckResults};
use super::distribution::Distribution;
use std::collections::HashMap;
use tokio::time::{Duration, Instant};

/// The shortest lease extension the subscriber requests.
pub(super) const MIN_DURATION_PER_LEASE_EXTENSION: Duration = Duration::from_secs(10);
/// The shortest lease extension with exactly-once delivery.
pub(super) const MIN_DURATION_PER_LEASE_EXTENSION_EXACTLY_ONCE: Duration =
    Duration::from_secs(60);
/// The longest lease extension the service accepts.
pub(super) const MAX_DURATION_PER_LEASE_EXTENSION: Duration = Duration::from_secs(600);

/// The lease bookkeeping for messages delivered to the application.
///
/// The message iterator holds this behind a single lock. Application
/// threads settle messages while the lease loop drains the pending sets.
#[derive(Debug)]
pub(super) struct LeaseState {
    /// When we stop extending the lease of each message.
    keep_alive: HashMap<String, Instant>,
    to_ack: AckResults,
    to_nack: AckResults,
    to_modack: AckResults,
    /// How long the application takes to process messages.
    distribution: Distribution,
}

impl LeaseState {
    pub(super) fn new() -> Self {
        Self {
            keep_alive: HashMap::new(),
            to_ack: HashMap::new(),
            to_nack: HashMap::new(),
            to_modack: HashMap::new(),
            distribution: Distribution::new(MAX_DURATION_PER_LEASE_EXTENSION.as_secs() as usize),
        }
    }

    /// Accept a new ack ID under lease management, until `expiry`.
    pub(super) fn add(&mut self, ack_id: String, expiry: Instant) {
        self.keep_alive.insert(ack_id, expiry);
    }

    /// Stop managing the lease of a message we will not deliver.
    pub(super) fn remove(&mut self, ack_id: &str) {
        self.keep_alive.remove(ack_id);
    }

    pub(super) fn is_nack_pending(&self, ack_id: &str) -> bool {
        self.to_nack.contains_key(ack_id)
    }

    /// Process an ack or nack from the application.
    ///
    /// `elapsed` is the time the application spent on the message.
    pub(super) fn done(
        &mut self,
        ack_id: String,
        ack: bool,
        result: Option<AckResultSender>,
        elapsed: Duration,
    ) {
        let elapsed = elapsed.clamp(
            MIN_DURATION_PER_LEASE_EXTENSION,
            MAX_DURATION_PER_LEASE_EXTENSION,
        );
        self.distribution.record(elapsed.as_secs());
        self.keep_alive.remove(&ack_id);
        self.to_modack.remove(&ack_id);
        if ack {
            self.to_nack.remove(&ack_id);
            self.to_ack.insert(ack_id, result);
        } else {
            self.to_ack.remove(&ack_id);
            self.to_nack.insert(ack_id, result);
        }
    }

    /// Drops expired leases, and schedules extensions for the others.
    pub(super) fn handle_keep_alives(&mut self, now: Instant) {
        self.keep_alive.retain(|_, expiry| *expiry >= now);
        for ack_id in self.keep_alive.keys() {
            if self.to_nack.contains_key(ack_id) {
                continue;
            }
            // Nobody waits on the outcome of lease extensions.
            self.to_modack.entry(ack_id.clone()).or_insert(None);
        }
    }

    pub(super) fn take_acks(&mut self) -> AckResults {
        std::mem::take(&mut self.to_ack)
    }

    pub(super) fn take_nacks(&mut self) -> AckResults {
        std::mem::take(&mut self.to_nack)
    }

    pub(super) fn take_modacks(&mut self) -> AckResults {
        std::mem::take(&mut self.to_modack)
    }

    /// True if no messages are under lease management.
    pub(super) fn is_idle(&self) -> bool {
        self.keep_alive.is_empty()
    }

    /// The 99th percentile of the processing time, in seconds.
    pub(super) fn p99(&self) -> Duration {
        Duration::from_secs(self.distribution.percentile(0.99))
    }

    #[cfg(test)]
    pub(super) fn record(&mut self, seconds: u64) {
        self.distribution.record(seconds);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_id(v: i32) -> String {
        format!("{v:03}")
    }

    pub(crate) fn test_ids(range: std::ops::Range<i32>) -> Vec<String> {
        range.map(test_id).collect()
    }

    pub(crate) fn sorted(v: &[String]) -> Vec<String> {
        let mut s = v.to_owned();
        s.sort();
        s
    }

    pub(crate) fn keys(results: &AckResults) -> Vec<String> {
        let mut k: Vec<String> = results.keys().cloned().collect();
        k.sort();
        k
    }

    fn under_lease(state: &LeaseState) -> Vec<String> {
        let mut k: Vec<String> = state.keep_alive.keys().cloned().collect();
        k.sort();
        k
    }

    const PROCESSING: Duration = Duration::from_secs(1);

    #[tokio::test(start_paused = true)]
    async fn basic_add_ack_nack() {
        let expiry = Instant::now() + Duration::from_secs(3600);
        let mut state = LeaseState::new();
        assert!(state.is_idle());

        for i in 0..3 {
            state.add(test_id(i), expiry);
        }
        assert_eq!(under_lease(&state), test_ids(0..3));
        assert!(!state.is_idle());

        state.done(test_id(0), true, None, PROCESSING);
        assert_eq!(under_lease(&state), test_ids(1..3));
        assert_eq!(keys(&state.to_ack), test_ids(0..1));

        state.done(test_id(1), false, None, PROCESSING);
        assert_eq!(under_lease(&state), test_ids(2..3));
        assert_eq!(keys(&state.to_nack), test_ids(1..2));
        assert!(state.is_nack_pending(&test_id(1)));
        assert!(!state.is_nack_pending(&test_id(2)));

        state.done(test_id(2), true, None, PROCESSING);
        assert!(state.is_idle());
        assert_eq!(keys(&state.take_acks()), vec![test_id(0), test_id(2)]);
        assert_eq!(keys(&state.take_nacks()), test_ids(1..2));
        assert!(state.take_acks().is_empty());
        assert!(state.take_nacks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alives() {
        let now = Instant::now();
        let mut state = LeaseState::new();
        for i in 0..10 {
            state.add(test_id(i), now + Duration::from_secs(60));
        }
        for i in 10..20 {
            state.add(test_id(i), now + Duration::from_secs(120));
        }

        state.handle_keep_alives(now + Duration::from_secs(30));
        assert_eq!(keys(&state.take_modacks()), test_ids(0..20));

        // The first 10 leases expire.
        state.handle_keep_alives(now + Duration::from_secs(90));
        assert_eq!(keys(&state.take_modacks()), test_ids(10..20));
        assert_eq!(under_lease(&state), test_ids(10..20));

        state.handle_keep_alives(now + Duration::from_secs(150));
        assert!(state.take_modacks().is_empty());
        assert!(state.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn nack_cancels_modack() {
        let now = Instant::now();
        let mut state = LeaseState::new();
        state.add(test_id(1), now + Duration::from_secs(60));
        state.add(test_id(2), now + Duration::from_secs(60));

        // A modack is scheduled, and then the message is nacked.
        state.handle_keep_alives(now);
        state.done(test_id(1), false, None, PROCESSING);
        assert_eq!(keys(&state.to_modack), test_ids(2..3));

        // Later keep alive rounds do not schedule it again.
        state.handle_keep_alives(now + Duration::from_secs(1));
        assert_eq!(keys(&state.take_modacks()), test_ids(2..3));
        assert_eq!(keys(&state.take_nacks()), test_ids(1..2));
    }

    #[tokio::test(start_paused = true)]
    async fn nack_pending_is_not_extended() {
        let now = Instant::now();
        let mut state = LeaseState::new();
        state.done(test_id(1), false, None, PROCESSING);
        // A redelivery of the same ack ID while the nack is pending.
        state.add(test_id(1), now + Duration::from_secs(60));
        state.handle_keep_alives(now);
        assert!(state.take_modacks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn remove() {
        let now = Instant::now();
        let mut state = LeaseState::new();
        state.add(test_id(1), now + Duration::from_secs(60));
        state.remove(&test_id(1));
        assert!(state.is_idle());
        state.handle_keep_alives(now);
        assert!(state.take_modacks().is_empty());
    }

    #[test]
    fn distribution_is_clamped() {
        let mut state = LeaseState::new();
        assert_eq!(state.p99(), Duration::ZERO);

        state.done(test_id(1), true, None, Duration::from_secs(1));
        assert_eq!(state.p99(), MIN_DURATION_PER_LEASE_EXTENSION);

        let mut state = LeaseState::new();
        state.done(test_id(1), true, None, Duration::from_secs(3600));
        assert_eq!(state.p99(), MAX_DURATION_PER_LEASE_EXTENSION);

        let mut state = LeaseState::new();
        state.done(test_id(1), true, None, Duration::from_secs(42));
        assert_eq!(state.p99(), Duration::from_secs(42));
    }
}
