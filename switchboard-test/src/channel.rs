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
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use switchboard::prelude::*;
use tracing::trace;

#[derive(Debug, Default)]
enum Failure {
    #[default]
    Never,
    Times(usize),
    Always,
}

/// In-memory [`CommunicationChannel`] for tests.
///
/// Every accepted message is recorded. A channel linked to a peer with
/// [`TestChannel::link`] also delivers what it sends through the peer's inbound
/// handle, which routes it on the peer's kernel.
pub struct TestChannel {
    address: Address,
    direction: ChannelDirection,
    failure: Mutex<Failure>,
    reject_callbacks: bool,
    attempts: AtomicUsize,
    sent: Mutex<Vec<SerializedMessage>>,
    inbound: Mutex<Option<InboundHandle>>,
    remove: Mutex<Option<RemoveHandle>>,
    peer: Mutex<Option<Weak<TestChannel>>>,
}

impl TestChannel {
    /// A bidirectional channel that accepts everything.
    pub fn new(address: Address) -> Self {
        Self {
            address,
            direction: ChannelDirection::InOut,
            failure: Mutex::new(Failure::Never),
            reject_callbacks: false,
            attempts: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            inbound: Mutex::new(None),
            remove: Mutex::new(None),
            peer: Mutex::new(None),
        }
    }

    /// Sets the direction the channel registers with. Defaults to both ways.
    pub fn with_direction(mut self, direction: ChannelDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Fails every send.
    pub fn failing(self) -> Self {
        *self.failure.lock() = Failure::Always;
        self
    }

    /// Fails the next `times` sends, then accepts.
    pub fn failing_times(self, times: usize) -> Self {
        *self.failure.lock() = Failure::Times(times);
        self
    }

    /// Refuses the kernel's callbacks at registration.
    pub fn rejecting_callbacks(mut self) -> Self {
        self.reject_callbacks = true;
        self
    }

    /// Makes `a` deliver what it sends to `b`'s kernel, and `b` to `a`'s.
    pub fn link(a: &Arc<TestChannel>, b: &Arc<TestChannel>) {
        *a.peer.lock() = Some(Arc::downgrade(b));
        *b.peer.lock() = Some(Arc::downgrade(a));
    }

    /// Number of send attempts, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Messages this channel accepted, oldest first.
    pub fn sent(&self) -> Vec<SerializedMessage> {
        self.sent.lock().clone()
    }

    /// Delivers `message` to this channel's kernel as if it arrived from the transport.
    pub async fn inject(&self, message: SerializedMessage) -> Result<(), ChannelTransmissionError> {
        let handle = self.inbound.lock().clone();
        match handle {
            Some(handle) => handle.deliver(message).await,
            None => Err(ChannelTransmissionError::new("no receive callback registered")),
        }
    }

    /// Asks the kernel to drop this channel, as a closing transport would.
    pub fn close(&self) -> bool {
        let handle = self.remove.lock().clone();
        handle.map(|handle| handle.remove()).unwrap_or(false)
    }

    fn should_fail(&self) -> bool {
        let mut failure = self.failure.lock();
        match *failure {
            Failure::Never => false,
            Failure::Always => true,
            Failure::Times(0) => false,
            Failure::Times(remaining) => {
                *failure = Failure::Times(remaining - 1);
                true
            }
        }
    }
}

#[async_trait]
impl CommunicationChannel for TestChannel {
    fn address(&self) -> Address {
        self.address.clone()
    }

    fn direction(&self) -> ChannelDirection {
        self.direction
    }

    async fn send(&self, message: &SerializedMessage) -> Result<(), ChannelTransmissionError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.should_fail() {
            trace!(address = %self.address.to_compact(), attempt, "test channel failing send");
            return Err(ChannelTransmissionError::new(format!(
                "test channel {} failed attempt {attempt}",
                self.address.to_compact()
            )));
        }
        self.sent.lock().push(message.clone());

        let peer = self.peer.lock().as_ref().and_then(Weak::upgrade);
        if let Some(peer) = peer {
            peer.inject(message.clone()).await?;
        }
        Ok(())
    }

    fn register_receive_callback(
        &self,
        callback: InboundHandle,
    ) -> Result<(), ChannelTransmissionError> {
        if self.reject_callbacks {
            return Err(ChannelTransmissionError::new("receive callback rejected"));
        }
        *self.inbound.lock() = Some(callback);
        Ok(())
    }

    fn register_remove_callback(
        &self,
        callback: RemoveHandle,
    ) -> Result<(), ChannelTransmissionError> {
        if self.reject_callbacks {
            return Err(ChannelTransmissionError::new("remove callback rejected"));
        }
        *self.remove.lock() = Some(callback);
        Ok(())
    }
}

impl fmt::Debug for TestChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestChannel")
            .field("address", &self.address.to_compact())
            .field("direction", &self.direction)
            .field("attempts", &self.attempts())
            .finish()
    }
}
