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

//! The request and response messages exchanged with the Pub/Sub service.
//!
//! These types mirror the `google.pubsub.v1` messages used by the subscriber.
//! The subscriber never inspects their wire format, it only reads and writes
//! the fields below.

use std::collections::HashMap;
use std::time::SystemTime;

/// A message that is published by publishers and consumed by subscribers.
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct PubsubMessage {
    /// The message data field.
    pub data: bytes::Bytes,

    /// Attributes for this message.
    pub attributes: HashMap<String, String>,

    /// ID of this message, assigned by the server when the message is
    /// published.
    pub message_id: String,

    /// The time at which the message was published.
    pub publish_time: Option<SystemTime>,

    /// If non-empty, identifies related messages for which publish order
    /// should be respected.
    pub ordering_key: String,
}

impl PubsubMessage {
    /// Creates a new default instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the value of [data][PubsubMessage::data].
    pub fn set_data<T: Into<bytes::Bytes>>(mut self, v: T) -> Self {
        self.data = v.into();
        self
    }

    /// Sets the value of [attributes][PubsubMessage::attributes].
    pub fn set_attributes<T, K, V>(mut self, v: T) -> Self
    where
        T: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.attributes = v.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self
    }

    /// Sets the value of [message_id][PubsubMessage::message_id].
    pub fn set_message_id<T: Into<String>>(mut self, v: T) -> Self {
        self.message_id = v.into();
        self
    }

    /// Sets the value of [publish_time][PubsubMessage::publish_time].
    pub fn set_publish_time<T: Into<SystemTime>>(mut self, v: T) -> Self {
        self.publish_time = Some(v.into());
        self
    }

    /// Sets the value of [ordering_key][PubsubMessage::ordering_key].
    pub fn set_ordering_key<T: Into<String>>(mut self, v: T) -> Self {
        self.ordering_key = v.into();
        self
    }
}

/// A message and its corresponding acknowledgment ID.
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct ReceivedMessage {
    /// This ID can be used to acknowledge the received message.
    pub ack_id: String,

    /// The message.
    pub message: Option<PubsubMessage>,

    /// The approximate number of times that Pub/Sub has attempted to deliver
    /// the associated message. Zero when dead lettering is disabled.
    pub delivery_attempt: i32,
}

impl ReceivedMessage {
    /// Creates a new default instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the value of [ack_id][ReceivedMessage::ack_id].
    pub fn set_ack_id<T: Into<String>>(mut self, v: T) -> Self {
        self.ack_id = v.into();
        self
    }

    /// Sets the value of [message][ReceivedMessage::message].
    pub fn set_message<T: Into<PubsubMessage>>(mut self, v: T) -> Self {
        self.message = Some(v.into());
        self
    }

    /// Sets the value of [delivery_attempt][ReceivedMessage::delivery_attempt].
    pub fn set_delivery_attempt<T: Into<i32>>(mut self, v: T) -> Self {
        self.delivery_attempt = v.into();
        self
    }
}

/// Request for the `StreamingPull` streaming RPC method.
///
/// The first request on a stream establishes the subscription and the flow
/// control settings. Later requests carry acks, modacks, or are empty
/// keepalives.
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct StreamingPullRequest {
    /// The subscription for which to initialize the new stream. Only set in
    /// the first request.
    pub subscription: String,

    /// List of acknowledgement IDs for acknowledging previously received
    /// messages.
    pub ack_ids: Vec<String>,

    /// The list of new ack deadlines for the IDs listed in
    /// `modify_deadline_ack_ids`.
    pub modify_deadline_seconds: Vec<i32>,

    /// List of acknowledgement IDs whose deadline will be modified.
    pub modify_deadline_ack_ids: Vec<String>,

    /// The ack deadline to use for the stream. Required in the first request,
    /// and may be updated in later requests.
    pub stream_ack_deadline_seconds: i32,

    /// A unique identifier that is used to distinguish client instances.
    pub client_id: String,

    /// Flow control settings for the maximum number of outstanding messages.
    pub max_outstanding_messages: i64,

    /// Flow control settings for the maximum number of outstanding bytes.
    pub max_outstanding_bytes: i64,

    /// The protocol version used by the client. Values `>= 1` mean the client
    /// accepts heartbeats from the server.
    pub protocol_version: i64,
}

/// Subscription properties sent as part of a `StreamingPullResponse`.
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct SubscriptionProperties {
    /// True iff exactly once delivery is enabled for this subscription.
    pub exactly_once_delivery_enabled: bool,

    /// True iff message ordering is enabled for this subscription.
    pub message_ordering_enabled: bool,
}

impl SubscriptionProperties {
    /// Creates a new default instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the value of [exactly_once_delivery_enabled][SubscriptionProperties::exactly_once_delivery_enabled].
    pub fn set_exactly_once_delivery_enabled<T: Into<bool>>(mut self, v: T) -> Self {
        self.exactly_once_delivery_enabled = v.into();
        self
    }

    /// Sets the value of [message_ordering_enabled][SubscriptionProperties::message_ordering_enabled].
    pub fn set_message_ordering_enabled<T: Into<bool>>(mut self, v: T) -> Self {
        self.message_ordering_enabled = v.into();
        self
    }
}

/// Response for the `StreamingPull` method.
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct StreamingPullResponse {
    /// Received Pub/Sub messages.
    pub received_messages: Vec<ReceivedMessage>,

    /// Properties associated with this subscription.
    pub subscription_properties: Option<SubscriptionProperties>,
}

impl StreamingPullResponse {
    /// Creates a new default instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the value of [received_messages][StreamingPullResponse::received_messages].
    pub fn set_received_messages<T, V>(mut self, v: T) -> Self
    where
        T: IntoIterator<Item = V>,
        V: Into<ReceivedMessage>,
    {
        self.received_messages = v.into_iter().map(|m| m.into()).collect();
        self
    }

    /// Sets the value of [subscription_properties][StreamingPullResponse::subscription_properties].
    pub fn set_subscription_properties<T: Into<SubscriptionProperties>>(mut self, v: T) -> Self {
        self.subscription_properties = Some(v.into());
        self
    }
}

/// Request for the `Pull` method.
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct PullRequest {
    /// The subscription from which messages should be pulled.
    pub subscription: String,

    /// The maximum number of messages to return for this request.
    pub max_messages: i32,
}

/// Response for the `Pull` method.
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct PullResponse {
    /// Received Pub/Sub messages. May be empty.
    pub received_messages: Vec<ReceivedMessage>,
}

impl PullResponse {
    /// Creates a new default instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the value of [received_messages][PullResponse::received_messages].
    pub fn set_received_messages<T, V>(mut self, v: T) -> Self
    where
        T: IntoIterator<Item = V>,
        V: Into<ReceivedMessage>,
    {
        self.received_messages = v.into_iter().map(|m| m.into()).collect();
        self
    }
}

/// Request for the `Acknowledge` method.
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct AcknowledgeRequest {
    /// The subscription whose message is being acknowledged.
    pub subscription: String,

    /// The acknowledgment IDs for the messages being acknowledged.
    pub ack_ids: Vec<String>,
}

/// Request for the `ModifyAckDeadline` method.
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct ModifyAckDeadlineRequest {
    /// The name of the subscription.
    pub subscription: String,

    /// List of acknowledgment IDs.
    pub ack_ids: Vec<String>,

    /// The new ack deadline, in seconds. Zero makes the messages immediately
    /// available for redelivery.
    pub ack_deadline_seconds: i32,
}
