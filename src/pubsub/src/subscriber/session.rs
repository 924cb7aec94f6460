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

use super::builder::StreamingPull;
use super::flow_controller::FlowController;
use super::handler::Handler;
use super::iterator::{IteratorOptions, MessageIterator};
use super::stub::Subscriber;
use crate::model::PubsubMessage;
use crate::{Error, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// How long synchronous sessions wait for capacity before pulling again.
const PULL_BACKOFF: Duration = Duration::from_millis(100);

/// The batch size for synchronous pulls without a message limit.
const DEFAULT_MAX_TO_PULL: i32 = 1000;

/// Represents an open subscribe session.
///
/// This is a stream-like struct for serving messages to an application.
///
/// # Example
/// ```
/// # use google_cloud_pubsub_subscriber::client::Subscriber;
/// # use google_cloud_pubsub_subscriber::stub;
/// # async fn sample<T: stub::Subscriber>(client: Subscriber<T>) -> anyhow::Result<()> {
/// let mut session = client
///     .streaming_pull("projects/my-project/subscriptions/my-subscription")
///     .start();
/// while let Some((m, h)) = session.next().await.transpose()? {
///     println!("Received message m={m:?}");
///     h.ack();
/// }
/// # Ok(()) }
/// ```
#[derive(Debug)]
pub struct Session<S>
where
    S: Subscriber,
{
    iterator: MessageIterator<S>,

    /// Client-side flow control. Each served message holds a reservation
    /// until it is acked or nacked.
    flow: Arc<FlowController>,

    /// Applications ask for messages one at a time. Individual responses can
    /// contain multiple messages. We use `pool` to hold the extra messages
    /// while we wait to serve them to applications.
    ///
    /// A FIFO queue is necessary to preserve ordering.
    pool: VecDeque<(PubsubMessage, Handler)>,

    synchronous: bool,
}

impl<S> Session<S>
where
    S: Subscriber,
{
    pub(super) fn new(builder: StreamingPull<S>) -> Self {
        let options = IteratorOptions {
            subscription: builder.subscription,
            client_id: builder.client_id,
            synchronous: builder.synchronous,
            max_extension: if builder.auto_extension {
                builder.max_extension
            } else {
                Duration::ZERO
            },
            max_extension_period: builder.max_extension_period,
            min_extension_period: builder.min_extension_period,
            max_outstanding_messages: builder.max_outstanding_messages,
            max_outstanding_bytes: builder.max_outstanding_bytes,
            use_legacy_flow_control: builder.use_legacy_flow_control,
        };
        let flow = FlowController::new(
            builder.max_outstanding_messages,
            builder.max_outstanding_bytes,
            builder.limit_exceeded_behavior,
        );
        Self {
            iterator: MessageIterator::new(builder.inner, options),
            flow: Arc::new(flow),
            pool: VecDeque::new(),
            synchronous: builder.synchronous,
        }
    }

    /// Returns the next message received on this subscription.
    ///
    /// The message data is returned along with a [Handler] for acknowledging
    /// (ack) or rejecting (nack) the message.
    ///
    /// If the session encounters a permanent error, an `Error` is returned
    /// instead. The same error is returned by all later calls.
    ///
    /// If the flow control limits are reached, this method waits until the
    /// application acks or nacks enough messages. With
    /// [LimitExceededBehavior::SignalError] it returns an error instead, and
    /// the message is nacked.
    ///
    /// `None` represents the end of the session, after [close][Session::close]
    /// or if the service closes the stream.
    ///
    /// [LimitExceededBehavior::SignalError]: crate::options::LimitExceededBehavior::SignalError
    pub async fn next(&mut self) -> Option<Result<(PubsubMessage, Handler)>> {
        loop {
            // Serve a message if we have one ready. The message stays in the
            // pool until it is reserved, callers may drop this future.
            if let Some(size) = self.pool.front().map(|(m, _)| m.data.len()) {
                let reserved = self.flow.reserve(size).await;
                if let Some((message, mut handler)) = self.pool.pop_front() {
                    return match reserved {
                        Ok(reservation) => {
                            handler.set_reservation(reservation);
                            Some(Ok((message, handler)))
                        }
                        // Dropping the handler nacks the message.
                        Err(e) => Some(Err(Error::io(e))),
                    };
                }
            }
            let max_to_pull = match self.max_to_pull() {
                Some(n) => n,
                None => {
                    tokio::time::sleep(PULL_BACKOFF).await;
                    continue;
                }
            };
            match self.iterator.receive(max_to_pull).await? {
                Ok(batch) => self.pool.extend(batch),
                Err(e) => return Some(Err(e)),
            }
        }
    }

    /// Returns `None` if there is no capacity for more messages.
    fn max_to_pull(&self) -> Option<i32> {
        if !self.synchronous {
            return Some(0);
        }
        let max_count = self.flow.max_count();
        if max_count <= 0 {
            return Some(DEFAULT_MAX_TO_PULL);
        }
        let available = max_count - self.flow.count();
        (available > 0).then(|| available.min(i32::MAX as i64) as i32)
    }

    /// Returns true if the subscription has exactly-once delivery enabled.
    ///
    /// The value is only known after the first messages are received.
    pub fn exactly_once_delivery_enabled(&self) -> bool {
        self.iterator.exactly_once_delivery_enabled()
    }

    /// Closes the session.
    ///
    /// Messages received but not yet served to the application are nacked.
    /// This method waits until the application acks or nacks all messages it
    /// holds, and until those acks and nacks are sent to the service.
    pub async fn close(mut self) {
        self.pool.clear();
        self.iterator.stop().await;
    }
}
