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

use super::ack_result::{AckResult, AckResultSender};
use super::flow_controller::Reservation;
use std::sync::Arc;
use tokio::time::Instant;

/// Receives the application's decision about a message.
///
/// Implemented by the message iterator.
pub(super) trait AckHandler: std::fmt::Debug + Send + Sync {
    /// Called exactly once per delivered message.
    fn done(
        &self,
        ack_id: String,
        ack: bool,
        result: Option<AckResultSender>,
        receive_time: Instant,
    );
}

/// A handler for acknowledging or rejecting messages.
///
/// Dropping a handler without calling `ack()` or `nack()` rejects the
/// message.
#[derive(Debug)]
#[non_exhaustive]
pub enum Handler {
    AtLeastOnce(AtLeastOnce),
    ExactlyOnce(ExactlyOnce),
}

impl Handler {
    /// Acknowledge the message associated with this handler.
    ///
    /// Note that the acknowledgement is best effort. The message may still be
    /// redelivered to this client, or another client.
    pub fn ack(self) {
        match self {
            Handler::AtLeastOnce(h) => h.ack(),
            Handler::ExactlyOnce(h) => h.ack(),
        }
    }

    /// Rejects the message associated with this handler.
    ///
    /// The message will be removed from this `Subscriber`'s lease management.
    /// The service will redeliver this message, possibly to another client.
    pub fn nack(self) {
        match self {
            Handler::AtLeastOnce(h) => h.nack(),
            Handler::ExactlyOnce(h) => h.nack(),
        }
    }

    /// The ack ID of the message associated with this handler.
    pub fn ack_id(&self) -> &str {
        self.lease().map(|l| l.ack_id.as_str()).unwrap_or_default()
    }

    /// The approximate number of times the service attempted to deliver the
    /// message.
    ///
    /// Only available for subscriptions with a dead letter policy.
    pub fn delivery_attempt(&self) -> Option<i32> {
        self.lease().and_then(|l| l.delivery_attempt)
    }

    pub(super) fn set_reservation(&mut self, reservation: Reservation) {
        let lease = match self {
            Handler::AtLeastOnce(h) => h.lease.as_mut(),
            Handler::ExactlyOnce(h) => h.lease.as_mut(),
        };
        if let Some(l) = lease {
            l.reservation = Some(reservation);
        }
    }

    fn lease(&self) -> Option<&Lease> {
        match self {
            Handler::AtLeastOnce(h) => h.lease.as_ref(),
            Handler::ExactlyOnce(h) => h.lease.as_ref(),
        }
    }
}

/// The state shared by all handler types.
#[derive(Debug)]
pub(super) struct Lease {
    pub(super) ack_id: String,
    pub(super) delivery_attempt: Option<i32>,
    pub(super) receive_time: Instant,
    pub(super) handler: Arc<dyn AckHandler>,
    pub(super) reservation: Option<Reservation>,
}

impl Lease {
    fn done(self, ack: bool, result: Option<AckResultSender>) {
        self.handler
            .done(self.ack_id, ack, result, self.receive_time);
        // Dropping the reservation returns the flow control capacity.
    }
}

/// A handler for at-least-once delivery.
#[derive(Debug)]
pub struct AtLeastOnce {
    // `None` once the message is settled.
    pub(super) lease: Option<Lease>,
}

impl AtLeastOnce {
    pub(super) fn new(lease: Lease) -> Self {
        Self { lease: Some(lease) }
    }

    /// Acknowledge the message associated with this handler.
    ///
    /// Note that the acknowledgement is best effort. The message may still be
    /// redelivered to this client, or another client.
    pub fn ack(mut self) {
        if let Some(l) = self.lease.take() {
            l.done(true, None);
        }
    }

    /// Rejects the message associated with this handler.
    ///
    /// The message will be removed from this `Subscriber`'s lease management.
    /// The service will redeliver this message, possibly to another client.
    pub fn nack(mut self) {
        if let Some(l) = self.lease.take() {
            l.done(false, None);
        }
    }
}

impl Drop for AtLeastOnce {
    fn drop(&mut self) {
        if let Some(l) = self.lease.take() {
            l.done(false, None);
        }
    }
}

/// A handler for subscriptions with exactly-once delivery.
///
/// The service reports whether each ack or nack succeeded. Use
/// [confirmed_ack][ExactlyOnce::confirmed_ack] to learn the outcome.
#[derive(Debug)]
pub struct ExactlyOnce {
    pub(super) lease: Option<Lease>,
}

impl ExactlyOnce {
    pub(super) fn new(lease: Lease) -> Self {
        Self { lease: Some(lease) }
    }

    /// Acknowledge the message, without waiting for the outcome.
    pub fn ack(self) {
        let _ = self.confirmed_ack();
    }

    /// Reject the message, without waiting for the outcome.
    pub fn nack(self) {
        let _ = self.confirmed_nack();
    }

    /// Acknowledge the message. The returned [AckResult] resolves once the
    /// service confirms, or rejects, the acknowledgement.
    pub fn confirmed_ack(mut self) -> AckResult {
        self.settle(true)
    }

    /// Reject the message. The returned [AckResult] resolves once the service
    /// confirms, or rejects, the operation.
    pub fn confirmed_nack(mut self) -> AckResult {
        self.settle(false)
    }

    fn settle(&mut self, ack: bool) -> AckResult {
        let (tx, rx) = AckResult::new();
        if let Some(l) = self.lease.take() {
            l.done(ack, Some(tx));
        }
        rx
    }
}

impl Drop for ExactlyOnce {
    fn drop(&mut self) {
        if let Some(l) = self.lease.take() {
            l.done(false, None);
        }
    }
}
