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

use super::retry_policy::StreamRetryPolicy;
use super::stub::{ResponseStream as _, Subscriber};
use crate::error::StreamClosed;
use crate::model::{StreamingPullRequest, StreamingPullResponse};
use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use gax::backoff_policy::BackoffPolicy;
use gax::retry_policy::RetryPolicy;
use gax::retry_result::RetryResult;
use gax::retry_state::RetryState;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::time::Instant;

// The only writes on the stream are the initial request and keepalives, which
// are sent so infrequently that we don't fear any back pressure.
const REQUEST_BUFFER: usize = 2;

/// A `StreamingPull` stream that is reopened on transient failures.
///
/// The stream is opened lazily, by the first call to `recv()`. Writes go
/// through a channel, which serializes concurrent writers. Errors returned by
/// this type are permanent.
#[derive(Debug)]
pub(super) struct PullStream<S>
where
    S: Subscriber,
{
    inner: Arc<S>,
    subscription: String,

    /// The first request on each (re)opened stream.
    initial_req: StreamingPullRequest,

    /// Writes requests on the current stream, `None` once closed.
    request_tx: Mutex<Option<Sender<StreamingPullRequest>>>,

    /// The receiver for `request_tx` until the stream is opened.
    request_rx: Mutex<Option<Receiver<StreamingPullRequest>>>,

    stream: tokio::sync::Mutex<Option<S::Stream>>,
    closed: AtomicBool,
}

impl<S> PullStream<S>
where
    S: Subscriber,
{
    pub(super) fn new(inner: Arc<S>, initial_req: StreamingPullRequest) -> Self {
        let (request_tx, request_rx) = new_channel(&initial_req);
        Self {
            inner,
            subscription: initial_req.subscription.clone(),
            initial_req,
            request_tx: Mutex::new(Some(request_tx)),
            request_rx: Mutex::new(Some(request_rx)),
            stream: tokio::sync::Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns the next response on the stream.
    ///
    /// `None` means the service closed the stream.
    pub(super) async fn recv(&self) -> Result<Option<StreamingPullResponse>> {
        let mut stream = self.stream.lock().await;
        let backoff = StreamRetryPolicy::backoff();
        let start = Instant::now();
        let mut attempt = 0_u32;
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(Error::io(StreamClosed));
            }
            let result = match stream.as_mut() {
                Some(s) => s.next_message().await,
                None => match self.open().await {
                    Ok(s) => {
                        *stream = Some(s);
                        continue;
                    }
                    Err(e) => Err(e),
                },
            };
            let e = match result {
                Ok(r) => return Ok(r),
                Err(e) => e,
            };
            attempt += 1;
            let state = RetryState::new(true)
                .set_start(start.into_std())
                .set_attempt_count(attempt);
            match StreamRetryPolicy.on_error(&state, e) {
                RetryResult::Continue(e) => {
                    *stream = None;
                    let delay = backoff.on_failure(&state);
                    tracing::debug!(
                        subscription = %self.subscription,
                        attempt,
                        "reopening stream in {delay:?} after transient error: {e}"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryResult::Permanent(e) | RetryResult::Exhausted(e) => return Err(e),
            }
        }
    }

    /// Queues a request on the current stream.
    ///
    /// Requests written while the stream is being reopened are dropped, as
    /// are requests that find the buffer full. Returns `false` for dropped
    /// requests, the caller decides whether to repeat them.
    pub(super) fn send(&self, req: StreamingPullRequest) -> Result<bool> {
        let guard = self.request_tx.lock().expect("never poisoned");
        let Some(tx) = guard.as_ref() else {
            return Err(Error::io(StreamClosed));
        };
        match tx.try_send(req) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => {
                tracing::debug!(subscription = %self.subscription, "dropping write on a busy stream");
                Ok(false)
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(subscription = %self.subscription, "dropping write on a broken stream");
                Ok(false)
            }
        }
    }

    /// Half-closes the stream. Later reads and writes fail.
    pub(super) fn close_send(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.request_tx.lock().expect("never poisoned").take();
        self.request_rx.lock().expect("never poisoned").take();
    }

    async fn open(&self) -> Result<S::Stream> {
        let request_rx = self.request_rx.lock().expect("never poisoned").take();
        let request_rx = match request_rx {
            Some(rx) => rx,
            None => {
                let (tx, rx) = new_channel(&self.initial_req);
                let mut guard = self.request_tx.lock().expect("never poisoned");
                if self.closed.load(Ordering::SeqCst) {
                    return Err(Error::io(StreamClosed));
                }
                *guard = Some(tx);
                rx
            }
        };
        tracing::debug!(subscription = %self.subscription, "opening stream");
        self.inner.streaming_pull(request_rx).await
    }
}

fn new_channel(
    initial_req: &StreamingPullRequest,
) -> (Sender<StreamingPullRequest>, Receiver<StreamingPullRequest>) {
    let (tx, rx) = mpsc::channel(REQUEST_BUFFER);
    // The channel is empty, so this cannot fail.
    let _ = tx.try_send(initial_req.clone());
    (tx, rx)
}
