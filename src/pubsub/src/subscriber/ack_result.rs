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

use crate::Error;
use crate::error::AckError;
use gax::error::rpc::{Code, Status, StatusDetails};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

const EXACTLY_ONCE_FAILURE_REASON: &str = "EXACTLY_ONCE_ACKID_FAILURE";
const TRANSIENT_FAILURE_PREFIX: &str = "TRANSIENT_";
const INVALID_ACK_ID: &str = "PERMANENT_FAILURE_INVALID_ACK_ID";

/// Resolves an [AckResult].
pub(super) type AckResultSender = oneshot::Sender<Result<(), AckError>>;

/// Pending operations, keyed by ack ID.
///
/// The value is `None` when nobody waits on the outcome.
pub(super) type AckResults = HashMap<String, Option<AckResultSender>>;

/// The eventual outcome of an ack or nack on a subscription with
/// exactly-once delivery enabled.
///
/// Await the result (or call [get][AckResult::get]) to learn whether the
/// service confirmed the operation.
///
/// # Example
/// ```
/// # use google_cloud_pubsub_subscriber::subscriber::handler::Handler;
/// # async fn sample(h: Handler) -> anyhow::Result<()> {
/// if let Handler::ExactlyOnce(h) = h {
///     h.confirmed_ack().await?;
/// }
/// # Ok(()) }
/// ```
#[derive(Debug)]
pub struct AckResult {
    rx: oneshot::Receiver<Result<(), AckError>>,
}

impl AckResult {
    pub(super) fn new() -> (AckResultSender, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// Waits for the outcome of the operation.
    pub async fn get(self) -> Result<(), AckError> {
        self.await
    }
}

impl Future for AckResult {
    type Output = Result<(), AckError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // A dropped sender means the subscriber went away without an answer.
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or(Err(AckError::Shutdown)))
    }
}

/// Writes an outcome, if anybody is waiting for it.
pub(super) fn resolve(result: Option<AckResultSender>, outcome: Result<(), AckError>) {
    if let Some(tx) = result {
        // The application may have dropped the `AckResult`.
        let _ = tx.send(outcome);
    }
}

/// Extracts the per ack ID failures from an exactly-once error response.
pub(super) fn errors_by_ack_id(error: &Error) -> HashMap<String, String> {
    error
        .status()
        .into_iter()
        .flat_map(|s| s.details.iter())
        .find_map(|d| match d {
            StatusDetails::ErrorInfo(info) if info.reason == EXACTLY_ONCE_FAILURE_REASON => {
                Some(info.metadata.clone())
            }
            _ => None,
        })
        .unwrap_or_default()
}

/// Resolves the outcomes of one exactly-once ack or modack RPC.
///
/// Returns the ack IDs that reached a final outcome, and the operations that
/// should be sent again.
pub(super) fn process_results(
    error: Option<Arc<Error>>,
    results: AckResults,
    errors_by_ack_id: &HashMap<String, String>,
) -> (Vec<String>, AckResults) {
    let mut completed = Vec::new();
    let mut retry = HashMap::new();
    for (ack_id, result) in results {
        if let Some(e) = errors_by_ack_id.get(&ack_id) {
            if e.starts_with(TRANSIENT_FAILURE_PREFIX) {
                retry.insert(ack_id, result);
                continue;
            }
            let outcome = if e == INVALID_ACK_ID {
                AckError::InvalidAckId(ack_id.clone())
            } else {
                AckError::Other(Arc::new(Error::service(
                    Status::default().set_code(Code::Unknown).set_message(e),
                )))
            };
            resolve(result, Err(outcome));
            completed.push(ack_id);
            continue;
        }
        let Some(error) = &error else {
            resolve(result, Ok(()));
            completed.push(ack_id);
            continue;
        };
        let code = error.status().map(|s| s.code);
        let outcome = match code {
            Some(c) if is_temporary(c) => {
                retry.insert(ack_id, result);
                continue;
            }
            Some(Code::PermissionDenied) => AckError::PermissionDenied(error.clone()),
            Some(Code::FailedPrecondition) => AckError::FailedPrecondition(error.clone()),
            // A client-side timeout is as temporary as a server-side one.
            None if error.is_timeout() => {
                retry.insert(ack_id, result);
                continue;
            }
            _ => AckError::Other(error.clone()),
        };
        resolve(result, Err(outcome));
        completed.push(ack_id);
    }
    (completed, retry)
}

fn is_temporary(code: Code) -> bool {
    matches!(
        code,
        Code::DeadlineExceeded
            | Code::ResourceExhausted
            | Code::Aborted
            | Code::Internal
            | Code::Unavailable
    )
}
