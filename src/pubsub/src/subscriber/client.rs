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
use super::stub;
use std::sync::Arc;

/// A Subscriber client for the [Cloud Pub/Sub] API.
///
/// Use this client to receive messages from a [pull subscription] on a topic.
///
/// # Example
/// ```
/// # use google_cloud_pubsub_subscriber::client::Subscriber;
/// # use google_cloud_pubsub_subscriber::stub;
/// # async fn sample<T: stub::Subscriber>(transport: T) -> anyhow::Result<()> {
/// let client = Subscriber::from_stub(transport);
/// let mut session = client
///     .streaming_pull("projects/my-project/subscriptions/my-subscription")
///     .start();
/// while let Some((m, h)) = session.next().await.transpose()? {
///     println!("Received message m={m:?}");
///     h.ack();
/// }
/// # Ok(()) }
/// ```
///
/// # Transport
///
/// The client issues its RPCs through an implementation of
/// [stub::Subscriber][crate::stub::Subscriber]. The subscriber never retries
/// inside a single call to the stub, retries and stream resumption happen in
/// this crate.
///
/// # Pooling and Cloning
///
/// `Subscriber` holds its stub in an [Arc]. You do not need to wrap
/// `Subscriber` in an [Rc](std::rc::Rc) or [Arc] to reuse it. All clones share
/// the same client ID.
///
/// [cloud pub/sub]: https://docs.cloud.google.com/pubsub/docs/overview
/// [pull subscription]: https://docs.cloud.google.com/pubsub/docs/pull
#[derive(Debug)]
pub struct Subscriber<S>
where
    S: stub::Subscriber,
{
    inner: Arc<S>,
    /// Identifies this client to the service, across stream reconnects.
    client_id: String,
}

impl<S> Clone for Subscriber<S>
where
    S: stub::Subscriber,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            client_id: self.client_id.clone(),
        }
    }
}

impl<S> Subscriber<S>
where
    S: stub::Subscriber,
{
    /// Creates a client from a stub.
    pub fn from_stub(stub: S) -> Self {
        Self {
            inner: Arc::new(stub),
            client_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Receives messages from a [subscription].
    ///
    /// The `subscription` is the full resource name, for example
    /// `projects/my-project/subscriptions/my-subscription`.
    ///
    /// [subscription]: https://docs.cloud.google.com/pubsub/docs/subscription-overview
    pub fn streaming_pull<T>(&self, subscription: T) -> StreamingPull<S>
    where
        T: Into<String>,
    {
        StreamingPull::new(
            self.inner.clone(),
            subscription.into(),
            self.client_id.clone(),
        )
    }
}
