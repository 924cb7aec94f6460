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

use super::ack_result::{AckResult, AckResultSender, AckResults, resolve};
use super::handler::{AckHandler, AtLeastOnce, ExactlyOnce, Handler, Lease};
use super::lease_loop;
use super::lease_state::{
    LeaseState, MIN_DURATION_PER_LEASE_EXTENSION, MIN_DURATION_PER_LEASE_EXTENSION_EXACTLY_ONCE,
};
use super::leaser::{DefaultLeaser, Leaser as _};
use super::stream::PullStream;
use super::stub::Subscriber;
use crate::error::AckError;
use crate::model::{PubsubMessage, PullRequest, ReceivedMessage, StreamingPullRequest};
use crate::{Error, Result};
use gax::error::rpc::Code;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// The stream ack deadline when the application does not set a maximum
/// extension period.
const DEFAULT_STREAM_ACK_DEADLINE: Duration = Duration::from_secs(60);

/// The settings for a message iterator.
#[derive(Clone, Debug)]
pub(super) struct IteratorOptions {
    pub(super) subscription: String,
    pub(super) client_id: String,
    /// Use unary `Pull` RPCs instead of a stream.
    pub(super) synchronous: bool,
    /// How long the lease of a message is extended, in total. Zero disables
    /// extensions after the receipt.
    pub(super) max_extension: Duration,
    /// The upper bound of each lease extension, zero for no bound.
    pub(super) max_extension_period: Duration,
    /// The lower bound of each lease extension, zero for the default.
    pub(super) min_extension_period: Duration,
    pub(super) max_outstanding_messages: i64,
    pub(super) max_outstanding_bytes: i64,
    /// Only enforce flow control in the client, not in the service.
    pub(super) use_legacy_flow_control: bool,
}

/// The delivery settings reported by the service.
#[derive(Debug, Default)]
struct DeliveryFlags {
    exactly_once: bool,
    /// Set when the stream ack deadline must be updated on the next ping.
    send_new_ack_deadline: bool,
}

/// The state shared by the message iterator, the lease loop, and the
/// message handlers.
#[derive(Debug)]
pub(super) struct IteratorState {
    lease: Mutex<LeaseState>,
    // Lock order: `lease` before `flags`.
    flags: RwLock<DeliveryFlags>,
    min_extension_period: Duration,
    max_extension_period: Duration,

    /// Cancelled once the application stops receiving messages.
    pub(super) cancel: CancellationToken,
    /// Cancelled on the first fatal error.
    pub(super) failed: CancellationToken,
    /// Cancelled once stopped and no messages are outstanding.
    pub(super) drained: CancellationToken,

    error: OnceLock<Arc<Error>>,
    eof: AtomicBool,
}

impl IteratorState {
    pub(super) fn new(min_extension_period: Duration, max_extension_period: Duration) -> Self {
        Self {
            lease: Mutex::new(LeaseState::new()),
            flags: RwLock::new(DeliveryFlags::default()),
            min_extension_period,
            max_extension_period,
            cancel: CancellationToken::new(),
            failed: CancellationToken::new(),
            drained: CancellationToken::new(),
            error: OnceLock::new(),
            eof: AtomicBool::new(false),
        }
    }

    /// Records a fatal error. Only the first error is kept, and returned.
    pub(super) fn fail(&self, error: Error) -> Error {
        let stored = self.error.get_or_init(|| {
            tracing::error!("message iterator failed: {error}");
            Arc::new(error)
        });
        self.failed.cancel();
        replay(stored)
    }

    /// The fatal error, if any.
    pub(super) fn error(&self) -> Option<Error> {
        self.error.get().map(replay)
    }

    /// Stops receiving messages. The lease loop keeps running until all
    /// outstanding messages are acked or nacked.
    pub(super) fn shutdown(&self) {
        self.cancel.cancel();
        let lease = self.lease.lock().expect("never poisoned");
        self.check_drained(&lease);
    }

    pub(super) fn exactly_once(&self) -> bool {
        self.flags.read().expect("never poisoned").exactly_once
    }

    pub(super) fn set_exactly_once(&self, enabled: bool) {
        if self.exactly_once() == enabled {
            return;
        }
        let mut flags = self.flags.write().expect("never poisoned");
        if flags.exactly_once != enabled {
            tracing::info!(exactly_once = enabled, "subscription delivery changed");
            flags.exactly_once = enabled;
            flags.send_new_ack_deadline = true;
        }
    }

    /// Returns the new stream ack deadline, if it changed since the last call.
    pub(super) fn take_stream_deadline_update(&self) -> Option<Duration> {
        let update = std::mem::take(
            &mut self
                .flags
                .write()
                .expect("never poisoned")
                .send_new_ack_deadline,
        );
        update.then(|| self.ack_deadline())
    }

    /// Sends the stream ack deadline again on the next ping.
    pub(super) fn retry_stream_deadline_update(&self) {
        self.flags
            .write()
            .expect("never poisoned")
            .send_new_ack_deadline = true;
    }

    /// The deadline used in lease extensions.
    pub(super) fn ack_deadline(&self) -> Duration {
        let lease = self.lease.lock().expect("never poisoned");
        self.deadline_for(&lease)
    }

    fn deadline_for(&self, lease: &LeaseState) -> Duration {
        bounded_duration(
            lease.p99(),
            self.min_extension_period,
            self.max_extension_period,
            self.exactly_once(),
        )
    }

    /// Expires old leases, and returns the extensions due now with their
    /// deadline.
    pub(super) fn keep_alive(&self) -> (AckResults, Duration) {
        let mut lease = self.lease.lock().expect("never poisoned");
        lease.handle_keep_alives(Instant::now());
        self.check_drained(&lease);
        (lease.take_modacks(), self.deadline_for(&lease))
    }

    pub(super) fn take_acks(&self) -> AckResults {
        self.lease.lock().expect("never poisoned").take_acks()
    }

    pub(super) fn take_nacks(&self) -> AckResults {
        self.lease.lock().expect("never poisoned").take_nacks()
    }

    fn check_drained(&self, lease: &LeaseState) {
        if self.cancel.is_cancelled() && lease.is_idle() {
            self.drained.cancel();
        }
    }

    /// Places new messages under lease management.
    ///
    /// Returns the receipt modacks for the messages, skipping any message
    /// with a pending nack.
    fn accept(&self, ack_ids: &[String], expiry: Instant) -> Vec<String> {
        let mut lease = self.lease.lock().expect("never poisoned");
        ack_ids
            .iter()
            .filter_map(|id| {
                lease.add(id.clone(), expiry);
                (!lease.is_nack_pending(id)).then(|| id.clone())
            })
            .collect()
    }

    /// Removes messages that will not be delivered.
    fn forget<'a, I>(&self, ack_ids: I)
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut lease = self.lease.lock().expect("never poisoned");
        ack_ids.into_iter().for_each(|id| lease.remove(id));
        self.check_drained(&lease);
    }

    #[cfg(test)]
    pub(super) fn add(&self, ack_id: String, expiry: Instant) {
        self.lease
            .lock()
            .expect("never poisoned")
            .add(ack_id, expiry);
    }

    #[cfg(test)]
    pub(super) fn record(&self, seconds: u64) {
        self.lease.lock().expect("never poisoned").record(seconds);
    }
}

impl AckHandler for IteratorState {
    fn done(
        &self,
        ack_id: String,
        ack: bool,
        result: Option<AckResultSender>,
        receive_time: Instant,
    ) {
        if self.failed.is_cancelled() || self.drained.is_cancelled() {
            // Nothing sends the operation anymore.
            resolve(result, Err(AckError::Shutdown));
            return;
        }
        let mut lease = self.lease.lock().expect("never poisoned");
        lease.done(ack_id, ack, result, receive_time.elapsed());
        self.check_drained(&lease);
    }
}

/// The stored error is shared, the application gets an equivalent copy.
fn replay(error: &Arc<Error>) -> Error {
    if let Some(status) = error.status() {
        return Error::service(status.clone());
    }
    if error.is_timeout() {
        return Error::timeout(error.clone());
    }
    Error::io(error.clone())
}

/// Bounds a lease extension.
///
/// Zero means unset. A deadline above an explicit `max` is capped at `max`,
/// without applying any minimum. Otherwise an explicit `min` wins, and
/// without one the extension is at least 10 seconds, or 60 seconds with
/// exactly-once delivery.
pub(super) fn bounded_duration(
    deadline: Duration,
    min: Duration,
    max: Duration,
    exactly_once: bool,
) -> Duration {
    if !max.is_zero() && deadline > max {
        return max;
    }
    if !min.is_zero() {
        deadline.max(min)
    } else if exactly_once {
        deadline.max(MIN_DURATION_PER_LEASE_EXTENSION_EXACTLY_ONCE)
    } else {
        deadline.max(MIN_DURATION_PER_LEASE_EXTENSION)
    }
}

/// Receives messages, and manages their leases until the application acks or
/// nacks them.
#[derive(Debug)]
pub(super) struct MessageIterator<S>
where
    S: Subscriber,
{
    inner: Arc<S>,
    subscription: String,
    /// `None` with synchronous pulls.
    stream: Option<Arc<PullStream<S>>>,
    leaser: DefaultLeaser<S>,
    state: Arc<IteratorState>,
    max_extension: Duration,
    /// The lease loop.
    sender: Mutex<Option<JoinHandle<()>>>,
}

impl<S> MessageIterator<S>
where
    S: Subscriber,
{
    pub(super) fn new(inner: Arc<S>, options: IteratorOptions) -> Self {
        let stream = (!options.synchronous).then(|| {
            let stream_ack_deadline = if options.max_extension_period.is_zero() {
                DEFAULT_STREAM_ACK_DEADLINE
            } else {
                options.max_extension_period
            };
            let (max_outstanding_messages, max_outstanding_bytes) =
                if options.use_legacy_flow_control {
                    (0, 0)
                } else {
                    (
                        options.max_outstanding_messages,
                        options.max_outstanding_bytes,
                    )
                };
            let initial_req = StreamingPullRequest {
                subscription: options.subscription.clone(),
                stream_ack_deadline_seconds: stream_ack_deadline.as_secs() as i32,
                client_id: options.client_id.clone(),
                max_outstanding_messages,
                max_outstanding_bytes,
                // `protocol_version == 1` means we support receiving heartbeats
                // (empty `StreamingPullResponse`s) from the server.
                protocol_version: 1,
                ..Default::default()
            };
            Arc::new(PullStream::new(inner.clone(), initial_req))
        });
        let leaser = DefaultLeaser::new(
            inner.clone(),
            options.subscription.clone(),
            stream.clone(),
        );
        let state = Arc::new(IteratorState::new(
            options.min_extension_period,
            options.max_extension_period,
        ));
        let sender = lease_loop::spawn(leaser.clone(), state.clone(), !options.synchronous);
        Self {
            inner,
            subscription: options.subscription,
            stream,
            leaser,
            state,
            max_extension: options.max_extension,
            sender: Mutex::new(Some(sender)),
        }
    }

    /// Returns the next batch of messages.
    ///
    /// `max_to_pull` only applies to synchronous pulls. `None` means the
    /// iterator is stopped, or the service closed the stream.
    pub(super) async fn receive(
        &self,
        max_to_pull: i32,
    ) -> Option<Result<Vec<(PubsubMessage, Handler)>>> {
        if let Some(e) = self.state.error() {
            return Some(Err(e));
        }
        if self.state.cancel.is_cancelled() || self.state.eof.load(Ordering::SeqCst) {
            return None;
        }
        let received = tokio::select! {
            _ = self.state.failed.cancelled() => return self.state.error().map(Err),
            r = self.fetch(max_to_pull) => r,
        };
        let received = match received {
            Ok(Some(r)) => r,
            Ok(None) => return None,
            Err(e) => return Some(Err(self.state.fail(e))),
        };
        self.deliver(received).await
    }

    async fn fetch(&self, max_to_pull: i32) -> Result<Option<Vec<ReceivedMessage>>> {
        match &self.stream {
            Some(stream) => self.recv(stream).await,
            None => self.pull(max_to_pull).await,
        }
    }

    async fn recv(&self, stream: &PullStream<S>) -> Result<Option<Vec<ReceivedMessage>>> {
        let response = tokio::select! {
            _ = self.state.cancel.cancelled() => return Ok(None),
            r = stream.recv() => r?,
        };
        let Some(response) = response else {
            tracing::debug!(subscription = %self.subscription, "the service closed the stream");
            self.state.eof.store(true, Ordering::SeqCst);
            return Ok(None);
        };
        if let Some(p) = response.subscription_properties {
            self.state.set_exactly_once(p.exactly_once_delivery_enabled);
        }
        Ok(Some(response.received_messages))
    }

    async fn pull(&self, max_to_pull: i32) -> Result<Option<Vec<ReceivedMessage>>> {
        let req = PullRequest {
            subscription: self.subscription.clone(),
            max_messages: max_to_pull,
        };
        tokio::select! {
            // A cancelled pull is not an error, there are no messages.
            _ = self.state.cancel.cancelled() => Ok(Some(Vec::new())),
            r = self.inner.pull(req) => match r {
                Ok(response) => Ok(Some(response.received_messages)),
                Err(e) if e.status().is_some_and(|s| s.code == Code::Cancelled) => {
                    Ok(Some(Vec::new()))
                }
                Err(e) => Err(e),
            },
        }
    }

    async fn deliver(
        &self,
        received: Vec<ReceivedMessage>,
    ) -> Option<Result<Vec<(PubsubMessage, Handler)>>> {
        let now = Instant::now();
        let exactly_once = self.state.exactly_once();
        let ack_deadline = self.state.ack_deadline();

        let mut messages = Vec::new();
        for rm in received {
            let Some(message) = rm.message else {
                // The message field should always be present. If not, the proto
                // message was corrupted while in transit, or there is a bug in
                // the service. The lease simply expires.
                tracing::warn!(ack_id = %rm.ack_id, "received a message without data");
                continue;
            };
            messages.push((rm.ack_id, rm.delivery_attempt, message));
        }
        let ack_ids: Vec<String> = messages.iter().map(|(id, ..)| id.clone()).collect();
        let receipts = self.state.accept(&ack_ids, now + self.max_extension);

        if exactly_once {
            let failed = match self.confirm_receipts(receipts, ack_deadline).await {
                Ok(Some(failed)) => failed,
                Ok(None) => {
                    // Stopped while waiting.
                    self.state.forget(&ack_ids);
                    return None;
                }
                Err(e) => return Some(Err(self.state.fail(e))),
            };
            if !failed.is_empty() {
                self.state.forget(&failed);
                messages.retain(|(id, ..)| !failed.contains(id));
            }
        } else if !receipts.is_empty() {
            // Nobody waits on receipts without exactly-once delivery.
            let modacks: AckResults = receipts.into_iter().map(|id| (id, None)).collect();
            let leaser = self.leaser.clone();
            let state = self.state.clone();
            tokio::spawn(async move {
                if let Err(e) = leaser.extend(modacks, ack_deadline, false).await {
                    state.fail(e);
                }
            });
        }

        let handler: Arc<dyn AckHandler> = self.state.clone();
        let batch = messages
            .into_iter()
            .map(|(ack_id, delivery_attempt, message)| {
                let lease = Lease {
                    ack_id,
                    delivery_attempt: (delivery_attempt > 0).then_some(delivery_attempt),
                    receive_time: now,
                    handler: handler.clone(),
                    reservation: None,
                };
                let h = if exactly_once {
                    Handler::ExactlyOnce(ExactlyOnce::new(lease))
                } else {
                    Handler::AtLeastOnce(AtLeastOnce::new(lease))
                };
                (message, h)
            })
            .collect();
        Some(Ok(batch))
    }

    /// Sends the receipt modacks, and waits for the service to confirm them.
    ///
    /// Returns the ack IDs that failed, or `None` if stopped while waiting.
    async fn confirm_receipts(
        &self,
        receipts: Vec<String>,
        ack_deadline: Duration,
    ) -> Result<Option<HashSet<String>>> {
        if receipts.is_empty() {
            return Ok(Some(HashSet::new()));
        }
        let mut modacks = HashMap::new();
        let mut waiters = Vec::new();
        for ack_id in receipts {
            let (tx, rx) = AckResult::new();
            modacks.insert(ack_id.clone(), Some(tx));
            waiters.push(async move { (ack_id, rx.await) });
        }
        let confirm = async {
            self.leaser.extend(modacks, ack_deadline, true).await?;
            Ok::<_, Error>(futures::future::join_all(waiters).await)
        };
        let outcomes = tokio::select! {
            _ = self.state.cancel.cancelled() => return Ok(None),
            r = confirm => r?,
        };
        let failed = outcomes
            .into_iter()
            .filter_map(|(ack_id, outcome)| match outcome {
                Ok(()) => None,
                Err(e) => {
                    tracing::warn!(%ack_id, "dropping message, the receipt failed: {e}");
                    Some(ack_id)
                }
            })
            .collect();
        Ok(Some(failed))
    }

    /// Stops receiving messages, and waits until all outstanding messages are
    /// acked or nacked, and those operations are sent.
    pub(super) async fn stop(&self) {
        self.state.shutdown();
        let sender = self.sender.lock().expect("never poisoned").take();
        if let Some(handle) = sender {
            if let Err(e) = handle.await {
                tracing::warn!("error in the lease loop: {e}");
            }
        }
        if let Some(stream) = &self.stream {
            stream.close_send();
        }
    }

    pub(super) fn exactly_once_delivery_enabled(&self) -> bool {
        self.state.exactly_once()
    }

    #[cfg(test)]
    pub(super) fn state(&self) -> &Arc<IteratorState> {
        &self.state
    }
}

impl<S> Drop for MessageIterator<S>
where
    S: Subscriber,
{
    fn drop(&mut self) {
        // The lease loop runs until the outstanding messages are settled.
        self.state.shutdown();
    }
}
