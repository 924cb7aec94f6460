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

use crate::Result;
use crate::model::{
    AcknowledgeRequest, ModifyAckDeadlineRequest, PullRequest, PullResponse,
    StreamingPullRequest, StreamingPullResponse,
};
use tokio::sync::mpsc::Receiver;

/// The response half of a `StreamingPull` bidirectional stream.
pub trait ResponseStream: std::fmt::Debug + Send + 'static {
    /// Returns the next response, `None` if the service closed the stream.
    fn next_message(
        &mut self,
    ) -> impl Future<Output = Result<Option<StreamingPullResponse>>> + Send;
}

/// The RPCs the subscriber issues against the Pub/Sub service.
///
/// Applications provide an implementation backed by their transport of
/// choice. The subscriber treats it as a black box: it never retries a
/// request inside a single call, and all requests are fully formed.
#[async_trait::async_trait]
pub trait Subscriber: std::fmt::Debug + Send + Sync + 'static {
    /// The type of the response stream returned by `streaming_pull`.
    type Stream: ResponseStream;

    /// Pulls messages from the server.
    async fn pull(&self, req: PullRequest) -> Result<PullResponse>;

    /// Opens a bidirectional stream.
    ///
    /// The requests written to `request_rx` are sent to the service, in
    /// order. The first request establishes the stream.
    async fn streaming_pull(
        &self,
        request_rx: Receiver<StreamingPullRequest>,
    ) -> Result<Self::Stream>;

    /// Acknowledges the messages associated with the ack IDs.
    async fn acknowledge(&self, req: AcknowledgeRequest) -> Result<()>;

    /// Modifies the ack deadline for a set of messages.
    async fn modify_ack_deadline(&self, req: ModifyAckDeadlineRequest) -> Result<()>;
}
