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

use super::iterator::IteratorState;
use super::leaser::Leaser;
use crate::Result;
use std::pin::Pin;
use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{Duration, Instant, Interval, MissedTickBehavior, Sleep, interval_at};

pub(super) const ACK_PERIOD: Duration = Duration::from_millis(100);
pub(super) const NACK_PERIOD: Duration = Duration::from_millis(100);
pub(super) const PING_PERIOD: Duration = Duration::from_secs(30);

/// Lease extensions are sent this long before the deadline.
pub(super) const GRACE_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug, PartialEq)]
enum Event {
    KeepAlive,
    Ack,
    Nack,
    Ping,
}

/// The named timers of the lease loop.
#[derive(Debug)]
struct Timers {
    /// Rescheduled after each tick, as the ack deadline changes.
    keep_alive: Pin<Box<Sleep>>,
    ack: Interval,
    nack: Interval,
    /// Only streams are pinged.
    ping: Option<Interval>,
}

impl Timers {
    fn new(first_keep_alive: Duration, streaming: bool) -> Self {
        let now = Instant::now();
        Self {
            keep_alive: Box::pin(tokio::time::sleep(first_keep_alive)),
            ack: interval(now, ACK_PERIOD),
            nack: interval(now, NACK_PERIOD),
            ping: streaming.then(|| interval(now, PING_PERIOD)),
        }
    }

    async fn next(&mut self) -> Event {
        tokio::select! {
            biased;
            _ = &mut self.keep_alive => Event::KeepAlive,
            _ = self.ack.tick() => Event::Ack,
            _ = self.nack.tick() => Event::Nack,
            _ = tick(&mut self.ping) => Event::Ping,
        }
    }

    fn reset_keep_alive(&mut self, period: Duration) {
        self.keep_alive.as_mut().reset(Instant::now() + period);
    }
}

fn interval(now: Instant, period: Duration) -> Interval {
    let mut i = interval_at(now + period, period);
    i.set_missed_tick_behavior(MissedTickBehavior::Delay);
    i
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(i) => {
            i.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// The time until the next lease extension, for leases extended by
/// `deadline`.
pub(super) fn keep_alive_period(deadline: Duration) -> Duration {
    match deadline.checked_sub(GRACE_PERIOD) {
        Some(d) if !d.is_zero() => d,
        _ => deadline / 2,
    }
}

/// The time until the first lease extension, halfway towards the initial
/// deadline.
pub(super) fn first_keep_alive(deadline: Duration) -> Duration {
    deadline / 2
}

/// Spawns the task that sends acks, nacks and lease extensions.
///
/// The task exits once the iterator fails, or once it is stopped and all
/// outstanding messages are settled. In the latter case, it sends any pending
/// acks and nacks, and waits for them to complete before exiting.
pub(super) fn spawn<L>(leaser: L, state: Arc<IteratorState>, streaming: bool) -> JoinHandle<()>
where
    L: Leaser + Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut timers = Timers::new(first_keep_alive(state.ack_deadline()), streaming);
        let mut pending = JoinSet::new();
        loop {
            tokio::select! {
                biased;
                _ = state.failed.cancelled() => {
                    pending.detach_all();
                    break;
                }
                _ = state.drained.cancelled() => {
                    break shutdown(&leaser, &state, pending).await;
                }
                Some(r) = pending.join_next(), if !pending.is_empty() => {
                    on_complete(&state, r);
                }
                event = timers.next() => match event {
                    Event::KeepAlive => {
                        let (modacks, deadline) = state.keep_alive();
                        timers.reset_keep_alive(keep_alive_period(deadline));
                        if !modacks.is_empty() {
                            let leaser = leaser.clone();
                            let exactly_once = state.exactly_once();
                            pending.spawn(async move {
                                leaser.extend(modacks, deadline, exactly_once).await
                            });
                        }
                    }
                    Event::Ack => {
                        let acks = state.take_acks();
                        if !acks.is_empty() {
                            let leaser = leaser.clone();
                            let exactly_once = state.exactly_once();
                            pending.spawn(async move { leaser.ack(acks, exactly_once).await });
                        }
                    }
                    Event::Nack => {
                        let nacks = state.take_nacks();
                        if !nacks.is_empty() {
                            let leaser = leaser.clone();
                            let exactly_once = state.exactly_once();
                            pending.spawn(async move { leaser.nack(nacks, exactly_once).await });
                        }
                    }
                    Event::Ping => {
                        let update = state.take_stream_deadline_update();
                        match leaser.ping(update).await {
                            Ok(true) => {}
                            Ok(false) if update.is_some() => {
                                state.retry_stream_deadline_update();
                            }
                            Ok(false) => {}
                            Err(e) => {
                                state.fail(e);
                            }
                        }
                    }
                }
            }
        }
    })
}

// Sends the acks and nacks we already know about, and waits for all pending
// operations.
async fn shutdown<L>(leaser: &L, state: &IteratorState, mut pending: JoinSet<Result<()>>)
where
    L: Leaser + Clone + Send + Sync + 'static,
{
    let exactly_once = state.exactly_once();
    let acks = state.take_acks();
    if !acks.is_empty() {
        let leaser = leaser.clone();
        pending.spawn(async move { leaser.ack(acks, exactly_once).await });
    }
    let nacks = state.take_nacks();
    if !nacks.is_empty() {
        let leaser = leaser.clone();
        pending.spawn(async move { leaser.nack(nacks, exactly_once).await });
    }
    while let Some(r) = pending.join_next().await {
        on_complete(state, r);
    }
}

fn on_complete(state: &IteratorState, result: std::result::Result<Result<()>, JoinError>) {
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            state.fail(e);
        }
        Err(e) => tracing::warn!("lease operation did not complete: {e}"),
    }
}
