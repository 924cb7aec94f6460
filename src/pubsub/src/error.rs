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

//! Custom errors for the Cloud Pub/Sub subscriber.
//!
//! The subscriber defines additional error types. These are often returned
//! as the `source()` of an [Error][crate::Error].

use std::sync::Arc;

/// The outcome of an acknowledgement on a subscription with exactly-once
/// delivery enabled.
///
/// Returned by [AckResult::get][crate::subscriber::ack_result::AckResult::get]
/// when the service did not confirm the ack or nack.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum AckError {
    /// The subscriber lacks permission to acknowledge the message.
    #[error("permission denied acknowledging the message: {0}")]
    PermissionDenied(#[source] Arc<crate::Error>),

    /// The subscription is not in a state that accepts acknowledgements. For
    /// example, it was detached or deleted.
    #[error("failed precondition acknowledging the message: {0}")]
    FailedPrecondition(#[source] Arc<crate::Error>),

    /// The ack ID is not valid. Typically the lease on the message expired
    /// and the message was redelivered with a different ack ID.
    #[error("the ack ID is invalid: {0}")]
    InvalidAckId(String),

    /// Any other failure.
    #[error("the acknowledgement failed: {0}")]
    Other(#[source] Arc<crate::Error>),

    /// The subscriber shut down before the outcome was known.
    #[error("the subscriber shut down before the acknowledgement completed")]
    Shutdown,
}

/// Represents a client-side flow control limit being exceeded.
///
/// Only returned when the flow controller is configured with
/// [LimitExceededBehavior::SignalError][crate::options::LimitExceededBehavior::SignalError].
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum FlowControlError {
    /// Acquiring the message would exceed the maximum outstanding messages.
    #[error("flow control: exceeded max outstanding messages")]
    MaxOutstandingMessages,

    /// Acquiring the message would exceed the maximum outstanding bytes.
    #[error("flow control: exceeded max outstanding bytes")]
    MaxOutstandingBytes,
}

/// The stream ended or was closed while the subscriber still needed it.
#[derive(thiserror::Error, Debug)]
#[error("the streaming pull was closed")]
pub(crate) struct StreamClosed;
