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

use super::ack_result::{AckResults, errors_by_ack_id, process_results, resolve};
use super::retry_policy::LeaseRetryPolicy;
use super::stream::PullStream;
use super::stub::Subscriber;
use crate::error::AckError;
use crate::model::{AcknowledgeRequest, ModifyAckDeadlineRequest, StreamingPullRequest};
use crate::{Error, Result};
use gax::retry_result::RetryResult;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::{Duration, Instant};

/// The largest request the service accepts.
pub(super) const MAX_PAYLOAD: usize = 512 * 1024;

/// The timeout for each ack or modack RPC.
const RPC_TIMEOUT: Duration = Duration::from_secs(60);

/// A trait representing leaser actions
///
/// We stub out the interface, in order to test the lease management. An error
/// is fatal for the message iterator. Retries happen inside the leaser.
#[async_trait::async_trait]
pub(super) trait Leaser {
    /// Acknowledge a batch of messages.
    async fn ack(&self, acks: AckResults, exactly_once: bool) -> Result<()>;
    /// Negatively acknowledge a batch of messages.
    async fn nack(&self, nacks: AckResults, exactly_once: bool) -> Result<()>;
    /// Extend lease deadlines for a batch of messages.
    async fn extend(&self, modacks: AckResults, deadline: Duration, exactly_once: bool)
    -> Result<()>;
    /// Write a keepalive on the stream, optionally updating the stream's ack
    /// deadline.
    ///
    /// Returns `false` if the write was dropped.
    async fn ping(&self, stream_ack_deadline: Option<Duration>) -> Result<bool>;
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Operation {
    Ack,
    Modack,
}

/// Sends acks and lease extensions with unary RPCs.
#[derive(Debug)]
pub(super) struct DefaultLeaser<S>
where
    S: Subscriber,
{
    inner: Arc<S>,
    subscription: String,
    stream: Option<Arc<PullStream<S>>>,
    modack_timeouts: Arc<AtomicU64>,
}

impl<S> Clone for DefaultLeaser<S>
where
    S: Subscriber,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            subscription: self.subscription.clone(),
            stream: self.stream.clone(),
            modack_timeouts: self.modack_timeouts.clone(),
        }
    }
}

impl<S> DefaultLeaser<S>
where
    S: Subscriber,
{
    /// `stream` is `None` with synchronous pulls.
    pub(super) fn new(
        inner: Arc<S>,
        subscription: String,
        stream: Option<Arc<PullStream<S>>>,
    ) -> Self {
        Self {
            inner,
            subscription,
            stream,
            modack_timeouts: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The number of modack batches abandoned after timing out.
    pub(super) fn modack_timeouts(&self) -> u64 {
        self.modack_timeouts.load(Ordering::Relaxed)
    }

    async fn acknowledge(&self, acks: AckResults, exactly_once: bool) -> Result<()> {
        let max_size = MAX_PAYLOAD - calc_field_size_string(&self.subscription);
        let sends = batches(acks, max_size).into_iter().map(|batch| {
            self.send(Operation::Ack, batch, exactly_once, |ack_ids| {
                self.inner.acknowledge(AcknowledgeRequest {
                    subscription: self.subscription.clone(),
                    ack_ids,
                })
            })
        });
        first_error(futures::future::join_all(sends).await)
    }

    async fn modify_ack_deadline(
        &self,
        modacks: AckResults,
        deadline: Duration,
        exactly_once: bool,
    ) -> Result<()> {
        let ack_deadline_seconds = deadline.as_secs() as i32;
        let max_size = MAX_PAYLOAD
            - calc_field_size_string(&self.subscription)
            - calc_field_size_int(ack_deadline_seconds);
        let sends = batches(modacks, max_size).into_iter().map(|batch| {
            self.send(Operation::Modack, batch, exactly_once, |ack_ids| {
                self.inner.modify_ack_deadline(ModifyAckDeadlineRequest {
                    subscription: self.subscription.clone(),
                    ack_ids,
                    ack_deadline_seconds,
                })
            })
        });
        first_error(futures::future::join_all(sends).await)
    }

    /// Sends one batch, retrying as needed.
    async fn send<F, Fut>(
        &self,
        operation: Operation,
        mut pending: AckResults,
        exactly_once: bool,
        call: F,
    ) -> Result<()>
    where
        F: Fn(Vec<String>) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let policy = match (exactly_once, operation) {
            (true, _) => LeaseRetryPolicy::exactly_once(),
            (false, Operation::Ack) => LeaseRetryPolicy::acks(),
            (false, Operation::Modack) => LeaseRetryPolicy::modacks(),
        };
        let start = Instant::now();
        let mut attempts = 0_u32;
        loop {
            attempts += 1;
            let ack_ids = pending.keys().cloned().collect();
            let result = match tokio::time::timeout(RPC_TIMEOUT, call(ack_ids)).await {
                Ok(r) => r,
                Err(e) => Err(Error::timeout(e)),
            };
            if exactly_once {
                let error = result.err().map(Arc::new);
                let errors = error.as_deref().map(errors_by_ack_id).unwrap_or_default();
                let (_, retry) = process_results(error.clone(), pending, &errors);
                if retry.is_empty() {
                    return Ok(());
                }
                pending = retry;
                let error =
                    error.unwrap_or_else(|| Arc::new(Error::io("ack IDs pending a retry")));
                // The failures are already classified, the policy only
                // limits the time spent retrying.
                match policy.on_error(start, attempts, Error::io(error.clone())) {
                    Ok(delay) => tokio::time::sleep(delay).await,
                    Err(_) => {
                        self.give_up(operation, pending, error);
                        return Ok(());
                    }
                }
                continue;
            }
            let error = match result {
                Ok(()) => {
                    pending.into_values().for_each(|r| resolve(r, Ok(())));
                    return Ok(());
                }
                Err(e) => e,
            };
            match policy.on_error(start, attempts, error) {
                Ok(delay) => tokio::time::sleep(delay).await,
                Err(RetryResult::Permanent(e)) => return Err(e),
                Err(RetryResult::Exhausted(e)) | Err(RetryResult::Continue(e)) => {
                    self.give_up(operation, pending, Arc::new(e));
                    return Ok(());
                }
            }
        }
    }

    fn give_up(&self, operation: Operation, pending: AckResults, error: Arc<Error>) {
        let modack_timeouts = match operation {
            Operation::Modack => self.modack_timeouts.fetch_add(1, Ordering::Relaxed) + 1,
            Operation::Ack => self.modack_timeouts(),
        };
        tracing::warn!(
            subscription = %self.subscription,
            count = pending.len(),
            modack_timeouts,
            "giving up on {operation:?} after retries: {error}"
        );
        for result in pending.into_values() {
            resolve(result, Err(AckError::Other(error.clone())));
        }
    }
}

#[async_trait::async_trait]
impl<S> Leaser for DefaultLeaser<S>
where
    S: Subscriber,
{
    async fn ack(&self, acks: AckResults, exactly_once: bool) -> Result<()> {
        self.acknowledge(acks, exactly_once).await
    }

    async fn nack(&self, nacks: AckResults, exactly_once: bool) -> Result<()> {
        self.modify_ack_deadline(nacks, Duration::ZERO, exactly_once)
            .await
    }

    async fn extend(
        &self,
        modacks: AckResults,
        deadline: Duration,
        exactly_once: bool,
    ) -> Result<()> {
        self.modify_ack_deadline(modacks, deadline, exactly_once)
            .await
    }

    async fn ping(&self, stream_ack_deadline: Option<Duration>) -> Result<bool> {
        let Some(stream) = &self.stream else {
            return Ok(true);
        };
        let req = StreamingPullRequest {
            stream_ack_deadline_seconds: stream_ack_deadline
                .map(|d| d.as_secs() as i32)
                .unwrap_or_default(),
            ..Default::default()
        };
        stream.send(req)
    }
}

fn first_error(results: Vec<Result<()>>) -> Result<()> {
    results.into_iter().collect()
}

fn varint_size(v: u64) -> usize {
    let mut size = 1;
    let mut v = v >> 7;
    while v > 0 {
        size += 1;
        v >>= 7;
    }
    size
}

/// The size of a string field in the wire format, including the tag.
pub(super) fn calc_field_size_string(field: &str) -> usize {
    1 + varint_size(field.len() as u64) + field.len()
}

/// The size of an integer field in the wire format, including the tag.
pub(super) fn calc_field_size_int(field: i32) -> usize {
    // Negative values are sign extended to 64 bits.
    1 + varint_size(field as i64 as u64)
}

/// Splits `ack_ids` into a prefix that fits in `max_size` bytes, and the rest.
///
/// The prefix holds at least one ID, even if that ID alone is too large.
pub(super) fn split_request_ids(ack_ids: &[String], max_size: usize) -> (&[String], &[String]) {
    let mut size = 0;
    let mut count = 0;
    for id in ack_ids {
        size += calc_field_size_string(id);
        if size > max_size && count > 0 {
            break;
        }
        count += 1;
    }
    ack_ids.split_at(count)
}

fn batches(mut results: AckResults, max_size: usize) -> Vec<AckResults> {
    let ack_ids: Vec<String> = results.keys().cloned().collect();
    let mut batches = Vec::new();
    let mut rest = ack_ids.as_slice();
    while !rest.is_empty() {
        let (batch, tail) = split_request_ids(rest, max_size);
        batches.push(
            batch
                .iter()
                .filter_map(|id| results.remove_entry(id))
                .collect::<HashMap<_, _>>(),
        );
        rest = tail;
    }
    batches
}

#[cfg(test)]
pub(super) mod tests {
    use super::super::ack_result::AckResult;
    use super::super::ack_result::tests::{exactly_once_error, status_error};
    use super::super::lease_state::tests::{keys, sorted, test_id, test_ids};
    use super::super::stub::tests::MockSubscriber;
    use super::super::retry_policy::{
        EXACTLY_ONCE_MAX_DELAY, EXACTLY_ONCE_TIME_LIMIT, TRANSIENT_MAX_DELAY, TRANSIENT_TIME_LIMIT,
    };
    use super::*;
    use gax::error::rpc::Code;
    use tokio::sync::Mutex;

    mockall::mock! {
        #[derive(Debug)]
        pub(crate) Leaser {}
        #[async_trait::async_trait]
        impl Leaser for Leaser {
            async fn ack(&self, acks: AckResults, exactly_once: bool) -> Result<()>;
            async fn nack(&self, nacks: AckResults, exactly_once: bool) -> Result<()>;
            async fn extend(&self, modacks: AckResults, deadline: Duration, exactly_once: bool) -> Result<()>;
            async fn ping(&self, stream_ack_deadline: Option<Duration>) -> Result<bool>;
        }
    }

    // Lets tests set expectations while the lease loop holds the leaser.
    #[async_trait::async_trait]
    impl Leaser for Arc<Mutex<MockLeaser>> {
        async fn ack(&self, acks: AckResults, exactly_once: bool) -> Result<()> {
            self.lock().await.ack(acks, exactly_once).await
        }
        async fn nack(&self, nacks: AckResults, exactly_once: bool) -> Result<()> {
            self.lock().await.nack(nacks, exactly_once).await
        }
        async fn extend(
            &self,
            modacks: AckResults,
            deadline: Duration,
            exactly_once: bool,
        ) -> Result<()> {
            self.lock()
                .await
                .extend(modacks, deadline, exactly_once)
                .await
        }
        async fn ping(&self, stream_ack_deadline: Option<Duration>) -> Result<bool> {
            self.lock().await.ping(stream_ack_deadline).await
        }
    }

    const SUBSCRIPTION: &str = "projects/my-project/subscriptions/my-subscription";

    fn results(range: std::ops::Range<i32>) -> AckResults {
        test_ids(range).into_iter().map(|id| (id, None)).collect()
    }

    fn leaser(mock: MockSubscriber) -> DefaultLeaser<MockSubscriber> {
        DefaultLeaser::new(Arc::new(mock), SUBSCRIPTION.to_string(), None)
    }

    #[test]
    fn field_sizes() {
        assert_eq!(calc_field_size_string(""), 2);
        assert_eq!(calc_field_size_string("abc"), 5);
        assert_eq!(calc_field_size_string(&"a".repeat(127)), 129);
        assert_eq!(calc_field_size_string(&"a".repeat(128)), 131);
        assert_eq!(calc_field_size_int(0), 2);
        assert_eq!(calc_field_size_int(60), 2);
        assert_eq!(calc_field_size_int(600), 3);
        assert_eq!(calc_field_size_int(-1), 11);
    }

    #[test]
    fn split_ids() {
        let ids = test_ids(0..10);
        // Each ID takes 1 + 1 + 3 bytes.
        let (batch, rest) = split_request_ids(&ids, 25);
        assert_eq!(batch, &ids[..5]);
        assert_eq!(rest, &ids[5..]);

        let (batch, rest) = split_request_ids(&ids, 24);
        assert_eq!(batch, &ids[..4]);
        assert_eq!(rest, &ids[4..]);

        let (batch, rest) = split_request_ids(&ids, 1000);
        assert_eq!(batch, ids.as_slice());
        assert!(rest.is_empty());

        let empty: Vec<String> = Vec::new();
        let (batch, rest) = split_request_ids(&empty, 1000);
        assert!(batch.is_empty() && rest.is_empty());
    }

    #[test]
    fn split_oversized_id() {
        let ids = vec!["a".repeat(100), test_id(1)];
        let (batch, rest) = split_request_ids(&ids, 10);
        assert_eq!(batch, &ids[..1]);
        assert_eq!(rest, &ids[1..]);
    }

    #[test]
    fn batches_fit_payload() {
        let max_size = 5 * 7;
        let all = batches(results(0..20), max_size);
        assert_eq!(all.len(), 3);
        let mut ids = Vec::new();
        for b in &all {
            let size: usize = b.keys().map(|id| calc_field_size_string(id)).sum();
            assert!(size <= max_size, "{size}");
            ids.extend(b.keys().cloned());
        }
        assert_eq!(sorted(&ids), test_ids(0..20));
    }

    #[tokio::test]
    async fn ack_success() -> anyhow::Result<()> {
        let mut mock = MockSubscriber::new();
        mock.expect_acknowledge()
            .times(1)
            .withf(|r| r.subscription == SUBSCRIPTION && sorted(&r.ack_ids) == test_ids(0..10))
            .returning(|_| Ok(()));
        leaser(mock).ack(results(0..10), false).await?;
        Ok(())
    }

    #[tokio::test]
    async fn nack_and_extend() -> anyhow::Result<()> {
        let mut seq = mockall::Sequence::new();
        let mut mock = MockSubscriber::new();
        mock.expect_modify_ack_deadline()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|r| r.ack_deadline_seconds == 0 && sorted(&r.ack_ids) == test_ids(0..5))
            .returning(|_| Ok(()));
        mock.expect_modify_ack_deadline()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|r| r.ack_deadline_seconds == 42 && sorted(&r.ack_ids) == test_ids(5..10))
            .returning(|_| Ok(()));
        let leaser = leaser(mock);
        leaser.nack(results(0..5), false).await?;
        leaser
            .extend(results(5..10), Duration::from_secs(42), false)
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn large_requests_are_split() -> anyhow::Result<()> {
        // Large enough IDs that only a few fit in a request.
        let id = |i: i32| format!("{i:03}{}", "x".repeat(100_000));
        let acks: AckResults = (0..12).map(|i| (id(i), None)).collect();

        let mut mock = MockSubscriber::new();
        mock.expect_acknowledge()
            .times(3)
            .withf(|r| r.ack_ids.len() <= 5)
            .returning(|_| Ok(()));
        leaser(mock).ack(acks, false).await?;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn ack_retries_deadline() -> anyhow::Result<()> {
        let start = Instant::now();
        let mut seq = mockall::Sequence::new();
        let mut mock = MockSubscriber::new();
        mock.expect_acknowledge()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Err(status_error(Code::DeadlineExceeded)));
        mock.expect_acknowledge()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        leaser(mock).ack(results(0..10), false).await?;
        // The backoff is jittered, but capped by the first two delays.
        assert!(
            start.elapsed() <= Duration::from_millis(100 + 200),
            "{:?}",
            start.elapsed()
        );
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn ack_unavailable_is_fatal() {
        let mut mock = MockSubscriber::new();
        mock.expect_acknowledge()
            .times(1)
            .returning(|_| Err(status_error(Code::Unavailable)));
        let err = leaser(mock).ack(results(0..10), false).await.unwrap_err();
        assert_eq!(err.status().map(|s| s.code), Some(Code::Unavailable));
    }

    #[tokio::test(start_paused = true)]
    async fn modack_unavailable_retries() -> anyhow::Result<()> {
        let mut seq = mockall::Sequence::new();
        let mut mock = MockSubscriber::new();
        mock.expect_modify_ack_deadline()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(status_error(Code::Unavailable)));
        mock.expect_modify_ack_deadline()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        let leaser = leaser(mock);
        leaser
            .extend(results(0..10), Duration::from_secs(10), false)
            .await?;
        assert_eq!(leaser.modack_timeouts(), 0);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn modack_gives_up_silently() -> anyhow::Result<()> {
        let start = Instant::now();
        let mut mock = MockSubscriber::new();
        mock.expect_modify_ack_deadline()
            .returning(|_| Err(status_error(Code::DeadlineExceeded)));
        let leaser = leaser(mock);
        leaser
            .extend(results(0..10), Duration::from_secs(10), false)
            .await?;
        assert_eq!(leaser.modack_timeouts(), 1);
        let elapsed = start.elapsed();
        assert!(elapsed >= TRANSIENT_TIME_LIMIT, "{elapsed:?}");
        assert!(
            elapsed <= TRANSIENT_TIME_LIMIT + TRANSIENT_MAX_DELAY,
            "{elapsed:?}"
        );
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn modack_client_timeout() -> anyhow::Result<()> {
        use super::super::stub::tests::MockStream;
        use crate::model::{PullRequest, PullResponse};

        // The first modack never completes.
        #[derive(Debug, Default)]
        struct Hangs {
            calls: AtomicU64,
        }
        #[async_trait::async_trait]
        impl Subscriber for Hangs {
            type Stream = MockStream;
            async fn pull(&self, _req: PullRequest) -> Result<PullResponse> {
                unimplemented!("not used in this test")
            }
            async fn streaming_pull(
                &self,
                _request_rx: tokio::sync::mpsc::Receiver<StreamingPullRequest>,
            ) -> Result<MockStream> {
                unimplemented!("not used in this test")
            }
            async fn acknowledge(&self, _req: AcknowledgeRequest) -> Result<()> {
                unimplemented!("not used in this test")
            }
            async fn modify_ack_deadline(&self, _req: ModifyAckDeadlineRequest) -> Result<()> {
                if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    std::future::pending::<()>().await;
                }
                Ok(())
            }
        }

        let inner = Arc::new(Hangs::default());
        let leaser = DefaultLeaser::new(inner.clone(), SUBSCRIPTION.to_string(), None);
        let start = Instant::now();
        leaser
            .extend(results(0..10), Duration::from_secs(10), false)
            .await?;
        let elapsed = start.elapsed();
        assert!(elapsed >= RPC_TIMEOUT, "{elapsed:?}");
        assert!(
            elapsed <= RPC_TIMEOUT + Duration::from_millis(100),
            "{elapsed:?}"
        );
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn exactly_once_resends_transient_failures() -> anyhow::Result<()> {
        let (tx1, rx1) = AckResult::new();
        let (tx2, rx2) = AckResult::new();
        let (tx3, rx3) = AckResult::new();
        let acks = HashMap::from([
            (test_id(1), Some(tx1)),
            (test_id(2), Some(tx2)),
            (test_id(3), Some(tx3)),
        ]);

        let mut seq = mockall::Sequence::new();
        let mut mock = MockSubscriber::new();
        mock.expect_acknowledge()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|r| sorted(&r.ack_ids) == test_ids(1..4))
            .returning(|_| {
                Err(exactly_once_error(
                    Code::InvalidArgument,
                    [
                        ("001", "PERMANENT_FAILURE_INVALID_ACK_ID"),
                        ("002", "TRANSIENT_FAILURE_UNORDERED_ACK_ID"),
                    ],
                ))
            });
        mock.expect_acknowledge()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|r| r.ack_ids == vec![test_id(2)])
            .returning(|_| Ok(()));

        let start = Instant::now();
        leaser(mock).ack(acks, true).await?;
        assert!(
            start.elapsed() <= Duration::from_secs(1),
            "{:?}",
            start.elapsed()
        );

        assert!(matches!(rx1.await, Err(AckError::InvalidAckId(_))));
        rx2.await?;
        // Not listed in the failures, and the batch error is permanent.
        assert!(matches!(rx3.await, Err(AckError::Other(_))));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn exactly_once_gives_up() -> anyhow::Result<()> {
        let (tx, rx) = AckResult::new();
        let mut mock = MockSubscriber::new();
        mock.expect_modify_ack_deadline()
            .returning(|_| Err(status_error(Code::Unavailable)));
        let start = Instant::now();
        let leaser = leaser(mock);
        leaser
            .nack(HashMap::from([(test_id(1), Some(tx))]), true)
            .await?;
        let elapsed = start.elapsed();
        assert!(elapsed >= EXACTLY_ONCE_TIME_LIMIT, "{elapsed:?}");
        assert!(
            elapsed <= EXACTLY_ONCE_TIME_LIMIT + EXACTLY_ONCE_MAX_DELAY,
            "{elapsed:?}"
        );
        let err = rx.await.unwrap_err();
        let AckError::Other(source) = err else {
            panic!("expected AckError::Other, got {err:?}");
        };
        assert_eq!(source.status().map(|s| s.code), Some(Code::Unavailable));
        Ok(())
    }

    #[tokio::test]
    async fn exactly_once_permission_denied_is_not_fatal() -> anyhow::Result<()> {
        let (tx, rx) = AckResult::new();
        let mut mock = MockSubscriber::new();
        mock.expect_acknowledge()
            .times(1)
            .returning(|_| Err(status_error(Code::PermissionDenied)));
        leaser(mock)
            .ack(HashMap::from([(test_id(1), Some(tx))]), true)
            .await?;
        assert!(matches!(rx.await, Err(AckError::PermissionDenied(_))));
        Ok(())
    }

    #[tokio::test]
    async fn ping_without_stream() -> anyhow::Result<()> {
        let leaser = leaser(MockSubscriber::new());
        assert!(leaser.ping(Some(Duration::from_secs(60))).await?);
        Ok(())
    }

    #[tokio::test]
    async fn ping_writes_on_stream() -> anyhow::Result<()> {
        let (writes_tx, mut writes_rx) = tokio::sync::mpsc::channel(10);
        let (_response_tx, response_rx) = tokio::sync::mpsc::channel(10);
        let mut mock = MockSubscriber::new();
        mock.expect_streaming_pull()
            .times(1)
            .return_once(move |mut request_rx| {
                tokio::spawn(async move {
                    while let Some(r) = request_rx.recv().await {
                        let _ = writes_tx.send(r).await;
                    }
                });
                Ok(response_rx)
            });
        let inner = Arc::new(mock);
        let initial = StreamingPullRequest {
            subscription: SUBSCRIPTION.to_string(),
            ..Default::default()
        };
        let stream = Arc::new(PullStream::new(inner.clone(), initial.clone()));
        let leaser = DefaultLeaser::new(inner, SUBSCRIPTION.to_string(), Some(stream.clone()));

        // Queued until the stream opens.
        assert!(leaser.ping(None).await?);
        let recv = tokio::spawn(async move { stream.recv().await });

        assert_eq!(writes_rx.recv().await, Some(initial));
        assert_eq!(writes_rx.recv().await, Some(StreamingPullRequest::default()));
        assert!(leaser.ping(Some(Duration::from_secs(120))).await?);
        let update = writes_rx.recv().await.expect("stream is open");
        assert_eq!(update.stream_ack_deadline_seconds, 120);
        recv.abort();
        Ok(())
    }

    #[test]
    fn results_helper() {
        assert_eq!(keys(&results(0..3)), test_ids(0..3));
    }
}
