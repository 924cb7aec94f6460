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

use crate::error::FlowControlError;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::{Semaphore, SemaphorePermit};

/// What the subscriber does when client-side flow control limits are reached.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum LimitExceededBehavior {
    /// Do not enforce the limits.
    Ignore,
    /// Wait until the outstanding messages and bytes fall below the limits.
    #[default]
    Block,
    /// Fail immediately with a [FlowControlError].
    SignalError,
}

/// Limits the number of messages and bytes outstanding in the application.
///
/// Each successful [acquire][FlowController::acquire] must be matched by
/// exactly one [release][FlowController::release].
#[derive(Debug)]
pub(crate) struct FlowController {
    behavior: LimitExceededBehavior,
    max_count: i64,
    max_bytes: i64,
    // `None` means the dimension is unlimited.
    count_sem: Option<Semaphore>,
    bytes_sem: Option<Semaphore>,
    // Net outstanding acquisitions.
    count: AtomicI64,
}

impl FlowController {
    pub(crate) fn new(max_count: i64, max_bytes: i64, behavior: LimitExceededBehavior) -> Self {
        let semaphore = |max: i64| {
            (max > 0).then(|| Semaphore::new((max as usize).min(Semaphore::MAX_PERMITS)))
        };
        Self {
            behavior,
            max_count,
            max_bytes,
            count_sem: semaphore(max_count),
            bytes_sem: semaphore(max_bytes),
            count: AtomicI64::new(0),
        }
    }

    /// Reserves capacity for one message of `size` bytes.
    ///
    /// With [LimitExceededBehavior::Block] this waits until capacity is
    /// available. Drop the future to abandon the wait, any partial
    /// reservation is returned.
    pub(crate) async fn acquire(&self, size: usize) -> Result<(), FlowControlError> {
        match self.behavior {
            LimitExceededBehavior::Ignore => return Ok(()),
            LimitExceededBehavior::Block => {
                // The semaphores are never closed.
                let count = match &self.count_sem {
                    None => None,
                    Some(s) => Some(
                        s.acquire()
                            .await
                            .map_err(|_| FlowControlError::MaxOutstandingMessages)?,
                    ),
                };
                let bytes = match &self.bytes_sem {
                    None => None,
                    Some(s) => Some(
                        s.acquire_many(self.bounded(size))
                            .await
                            .map_err(|_| FlowControlError::MaxOutstandingBytes)?,
                    ),
                };
                forget(count, bytes);
            }
            LimitExceededBehavior::SignalError => {
                let count = match &self.count_sem {
                    None => None,
                    Some(s) => Some(
                        s.try_acquire()
                            .map_err(|_| FlowControlError::MaxOutstandingMessages)?,
                    ),
                };
                let bytes = match &self.bytes_sem {
                    None => None,
                    Some(s) => {
                        // Oversized messages always fail in this mode.
                        let n = u32::try_from(size)
                            .map_err(|_| FlowControlError::MaxOutstandingBytes)?;
                        Some(
                            s.try_acquire_many(n)
                                .map_err(|_| FlowControlError::MaxOutstandingBytes)?,
                        )
                    }
                };
                forget(count, bytes);
            }
        }
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Like [acquire][FlowController::acquire], but the returned guard
    /// releases the capacity when dropped.
    pub(crate) async fn reserve(
        self: &Arc<Self>,
        size: usize,
    ) -> Result<Reservation, FlowControlError> {
        self.acquire(size).await?;
        Ok(Reservation {
            flow: self.clone(),
            size,
        })
    }

    /// Returns capacity for one message of `size` bytes.
    pub(crate) fn release(&self, size: usize) {
        if self.behavior == LimitExceededBehavior::Ignore {
            return;
        }
        let updated = self
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| {
                (c > 0).then_some(c - 1)
            });
        if updated.is_err() {
            // Nothing outstanding. Adding permits would raise the limits.
            return;
        }
        if let Some(s) = &self.count_sem {
            s.add_permits(1);
        }
        if let Some(s) = &self.bytes_sem {
            s.add_permits(self.bounded(size) as usize);
        }
    }

    /// The number of outstanding acquisitions.
    pub(crate) fn count(&self) -> i64 {
        self.count.load(Ordering::SeqCst)
    }

    pub(crate) fn max_count(&self) -> i64 {
        self.max_count
    }

    // Clamps a message size to the byte limit, so a single large message
    // cannot block forever.
    fn bounded(&self, size: usize) -> u32 {
        let max = if self.max_bytes > 0 {
            self.max_bytes as u64
        } else {
            u64::MAX
        };
        (size as u64).min(max).min(u32::MAX as u64) as u32
    }
}

fn forget(count: Option<SemaphorePermit<'_>>, bytes: Option<SemaphorePermit<'_>>) {
    // The permits are returned explicitly with `release()`.
    if let Some(p) = count {
        p.forget();
    }
    if let Some(p) = bytes {
        p.forget();
    }
}

/// Capacity reserved in a [FlowController], released on drop.
#[derive(Debug)]
pub(crate) struct Reservation {
    flow: Arc<FlowController>,
    size: usize,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.flow.release(self.size);
    }
}
