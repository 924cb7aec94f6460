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

use super::flow_controller::LimitExceededBehavior;
use super::session::Session;
use super::stub::Subscriber;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_MAX_EXTENSION: Duration = Duration::from_secs(60 * 60);
const DEFAULT_MAX_OUTSTANDING_MESSAGES: i64 = 1000;
const DEFAULT_MAX_OUTSTANDING_BYTES: i64 = 1_000_000_000;

/// Builder for the `client::Subscriber::streaming_pull` method.
#[derive(Debug)]
pub struct StreamingPull<S>
where
    S: Subscriber,
{
    pub(crate) inner: Arc<S>,
    pub(crate) subscription: String,
    pub(crate) client_id: String,
    pub(crate) max_extension: Duration,
    pub(crate) auto_extension: bool,
    pub(crate) max_extension_period: Duration,
    pub(crate) min_extension_period: Duration,
    pub(crate) max_outstanding_messages: i64,
    pub(crate) max_outstanding_bytes: i64,
    pub(crate) limit_exceeded_behavior: LimitExceededBehavior,
    pub(crate) synchronous: bool,
    pub(crate) use_legacy_flow_control: bool,
}

impl<S> StreamingPull<S>
where
    S: Subscriber,
{
    pub(crate) fn new(inner: Arc<S>, subscription: String, client_id: String) -> Self {
        Self {
            inner,
            subscription,
            client_id,
            max_extension: DEFAULT_MAX_EXTENSION,
            auto_extension: true,
            max_extension_period: Duration::ZERO,
            min_extension_period: Duration::ZERO,
            max_outstanding_messages: DEFAULT_MAX_OUTSTANDING_MESSAGES,
            max_outstanding_bytes: DEFAULT_MAX_OUTSTANDING_BYTES,
            limit_exceeded_behavior: LimitExceededBehavior::default(),
            synchronous: false,
            use_legacy_flow_control: false,
        }
    }

    /// Starts a session, receiving messages from the subscription.
    ///
    /// Background tasks are spawned on the current tokio runtime. Messages
    /// are only requested from the service once the application calls
    /// [Session::next].
    pub fn start(self) -> Session<S> {
        Session::new(self)
    }

    /// The maximum time a message's lease is extended.
    ///
    /// The subscriber keeps extending the lease of a message until the
    /// application acks or nacks it, or until this much time passed since the
    /// message was received. After that, the service may redeliver the
    /// message.
    ///
    /// A zero value selects the default of 60 minutes.
    ///
    /// # Example
    ///
    /// ```
    /// # use google_cloud_pubsub_subscriber::builder::StreamingPull;
    /// # use google_cloud_pubsub_subscriber::stub::Subscriber;
    /// # fn sample<S: Subscriber>(builder: StreamingPull<S>) {
    /// use std::time::Duration;
    /// let session = builder
    ///     .set_max_extension(Duration::from_secs(10 * 60))
    ///     .start();
    /// # }
    /// ```
    pub fn set_max_extension<T: Into<Duration>>(mut self, v: T) -> Self {
        let v = v.into();
        self.max_extension = if v.is_zero() {
            DEFAULT_MAX_EXTENSION
        } else {
            v
        };
        self
    }

    /// Whether the subscriber extends leases automatically.
    ///
    /// When disabled, the lease of each message is only set once, as the
    /// message is received. The service may redeliver messages the
    /// application holds for longer than the ack deadline.
    ///
    /// The default is enabled.
    ///
    /// # Example
    ///
    /// ```
    /// # use google_cloud_pubsub_subscriber::builder::StreamingPull;
    /// # use google_cloud_pubsub_subscriber::stub::Subscriber;
    /// # fn sample<S: Subscriber>(builder: StreamingPull<S>) {
    /// let session = builder.set_auto_extension(false).start();
    /// # }
    /// ```
    pub fn set_auto_extension(mut self, v: bool) -> Self {
        self.auto_extension = v;
        self
    }

    /// The maximum duration of each lease extension.
    ///
    /// Each extension is computed from the observed processing time. Use
    /// this setting to cap it, for example to have messages redelivered
    /// sooner after a crash. This is also the ack deadline of the stream.
    ///
    /// A zero value means no cap. The service caps all extensions at 600
    /// seconds.
    pub fn set_max_extension_period<T: Into<Duration>>(mut self, v: T) -> Self {
        self.max_extension_period = v.into();
        self
    }

    /// The minimum duration of each lease extension.
    ///
    /// A zero value selects the default, 10 seconds, or 60 seconds for
    /// subscriptions with exactly-once delivery.
    pub fn set_min_extension_period<T: Into<Duration>>(mut self, v: T) -> Self {
        self.min_extension_period = v.into();
        self
    }

    /// Flow control settings for the maximum number of outstanding messages.
    ///
    /// The service stops sending messages to the client when this many
    /// messages are outstanding (i.e. that have not been acked or nacked).
    /// The subscriber also applies the limit before serving messages to the
    /// application.
    ///
    /// Use a value <= 0 to set no limit on the number of outstanding messages.
    ///
    /// The default value is 1000 messages.
    ///
    /// # Example
    ///
    /// ```
    /// # use google_cloud_pubsub_subscriber::builder::StreamingPull;
    /// # use google_cloud_pubsub_subscriber::stub::Subscriber;
    /// # fn sample<S: Subscriber>(builder: StreamingPull<S>) {
    /// let session = builder.set_max_outstanding_messages(2000).start();
    /// # }
    /// ```
    pub fn set_max_outstanding_messages<T: Into<i64>>(mut self, v: T) -> Self {
        self.max_outstanding_messages = v.into();
        self
    }

    /// Flow control settings for the maximum number of outstanding bytes.
    ///
    /// The service stops sending messages to the client when this many bytes
    /// of messages are outstanding (i.e. that have not been acked or nacked).
    ///
    /// Use a value <= 0 to set no limit on the number of outstanding bytes.
    ///
    /// The default value is 1e9 bytes.
    pub fn set_max_outstanding_bytes<T: Into<i64>>(mut self, v: T) -> Self {
        self.max_outstanding_bytes = v.into();
        self
    }

    /// What to do when the flow control limits are reached.
    ///
    /// # Example
    ///
    /// ```
    /// # use google_cloud_pubsub_subscriber::builder::StreamingPull;
    /// # use google_cloud_pubsub_subscriber::stub::Subscriber;
    /// # fn sample<S: Subscriber>(builder: StreamingPull<S>) {
    /// use google_cloud_pubsub_subscriber::options::LimitExceededBehavior;
    /// let session = builder
    ///     .set_limit_exceeded_behavior(LimitExceededBehavior::SignalError)
    ///     .start();
    /// # }
    /// ```
    pub fn set_limit_exceeded_behavior(mut self, v: LimitExceededBehavior) -> Self {
        self.limit_exceeded_behavior = v;
        self
    }

    /// Only enforce the flow control limits in the client.
    ///
    /// By default the service also stops sending messages once the limits
    /// are reached. The client side enforcement is less accurate, the service
    /// may send more messages than the limits allow, which wait in the
    /// client until capacity is available.
    pub fn set_use_legacy_flow_control(mut self, v: bool) -> Self {
        self.use_legacy_flow_control = v;
        self
    }

    /// Receive messages with unary `Pull` RPCs instead of a stream.
    ///
    /// The subscriber never requests more messages than the flow control
    /// limits allow.
    pub fn set_synchronous(mut self, v: bool) -> Self {
        self.synchronous = v;
        self
    }
}
