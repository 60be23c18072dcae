/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

use std::fmt;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use dashmap::DashMap;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::common::KernelError;

type Settle<T> = oneshot::Sender<Result<T, KernelError>>;

struct Entry<T> {
    generation: u64,
    settle: Settle<T>,
}

/// Pending correlation entries keyed by `K`, each settled exactly once.
///
/// An entry is removed by whichever of reply, deadline, cancellation or kernel
/// shutdown reaches it first; `DashMap::remove` decides the winner and every other
/// path finds nothing to settle. Deadlines and cancellation only ever remove the
/// registration that armed them, never a newer one under the same key.
pub(crate) struct CorrelationTable<K, T>
where
    K: Eq + Hash,
{
    entries: DashMap<K, Entry<T>>,
    next_generation: AtomicU64,
}

impl<K, T> CorrelationTable<K, T>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    T: Send + 'static,
{
    pub(crate) fn new() -> Self {
        Self {
            entries: DashMap::new(),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Inserts an entry for `key` and arms its deadline.
    ///
    /// An entry still pending under the same key is settled with
    /// [`KernelError::CorrelationSuperseded`]. The deadline task stops early when
    /// `token` is cancelled. Fails with [`KernelError::RuntimeUnavailable`] outside a
    /// Tokio runtime.
    pub(crate) fn register(
        self: &Arc<Self>,
        key: K,
        timeout: Duration,
        on_timeout: KernelError,
        token: &CancellationToken,
    ) -> Result<PendingReply<T>, KernelError> {
        let runtime = Handle::try_current().map_err(|e| KernelError::RuntimeUnavailable {
            reason: e.to_string(),
        })?;
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        let entry = Entry {
            generation,
            settle: sender,
        };
        if let Some(displaced) = self.entries.insert(key.clone(), entry) {
            debug!(?key, "superseded a pending correlation entry");
            let _ = displaced.settle.send(Err(KernelError::CorrelationSuperseded {
                key: format!("{:?}", key),
            }));
        }

        let table = Arc::downgrade(self);
        let deadline_key = key.clone();
        let token = token.clone();
        runtime.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    if let Some(table) = table.upgrade() {
                        if table.expire(&deadline_key, generation, on_timeout) {
                            trace!(key = ?deadline_key, ?timeout, "correlation deadline elapsed");
                        }
                    }
                }
                _ = token.cancelled() => {}
            }
        });

        let table = Arc::downgrade(self);
        Ok(PendingReply::new(
            receiver,
            Box::new(move || {
                if let Some(table) = Weak::upgrade(&table) {
                    table
                        .entries
                        .remove_if(&key, |_, entry| entry.generation == generation);
                }
            }),
        ))
    }

    fn expire(&self, key: &K, generation: u64, error: KernelError) -> bool {
        match self
            .entries
            .remove_if(key, |_, entry| entry.generation == generation)
        {
            Some((_, entry)) => {
                let _ = entry.settle.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Settles the entry for `key` with a value. Returns `false` if no entry was pending.
    pub(crate) fn resolve(&self, key: &K, value: T) -> bool {
        match self.entries.remove(key) {
            Some((_, entry)) => {
                // The awaiter may have been dropped; the entry is consumed either way.
                let _ = entry.settle.send(Ok(value));
                true
            }
            None => false,
        }
    }

    /// Settles the entry for `key` with an error. Returns `false` if no entry was pending.
    #[cfg(test)]
    pub(crate) fn reject(&self, key: &K, error: KernelError) -> bool {
        match self.entries.remove(key) {
            Some((_, entry)) => {
                let _ = entry.settle.send(Err(error));
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Drops every entry; their awaiters observe [`KernelError::KernelClosed`].
    pub(crate) fn clear(&self) {
        self.entries.clear();
    }
}

/// Future resolving to the reply of a correlated message.
///
/// Completes with the reply, with the deadline error of the correlation layer that
/// created it, or with [`KernelError::KernelClosed`] if the kernel shut down first.
/// Dropping it leaves the entry in place until its deadline; use
/// [`cancel`](Self::cancel) to withdraw it immediately.
pub struct PendingReply<T> {
    receiver: oneshot::Receiver<Result<T, KernelError>>,
    withdraw: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl<T> PendingReply<T> {
    fn new(
        receiver: oneshot::Receiver<Result<T, KernelError>>,
        withdraw: Box<dyn FnOnce() + Send + Sync>,
    ) -> Self {
        Self {
            receiver,
            withdraw: Some(withdraw),
        }
    }

    /// Withdraws the correlation entry. A reply arriving later is treated as stray.
    pub fn cancel(mut self) {
        if let Some(withdraw) = self.withdraw.take() {
            withdraw();
        }
    }
}

impl<T> Future for PendingReply<T> {
    type Output = Result<T, KernelError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(KernelError::KernelClosed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> fmt::Debug for PendingReply<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingReply").finish_non_exhaustive()
    }
}
