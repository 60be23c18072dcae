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
use std::sync::Weak;

use tracing::{trace, warn};

use crate::common::kernel::KernelInner;
use crate::common::registry::RegisteredChannel;
use crate::common::{
    Address, ChannelId, ChannelTransmissionError, Kernel, KernelError, MessageProcessingError,
};
use crate::message::SerializedMessage;

/// Handle a channel uses to deliver inbound messages to its kernel.
///
/// Holds only a weak reference; once the kernel is dropped, deliveries fail.
#[derive(Clone)]
pub struct InboundHandle {
    kernel: Weak<KernelInner>,
    address: Address,
}

impl InboundHandle {
    pub(crate) fn new(kernel: Weak<KernelInner>, address: Address) -> Self {
        Self { kernel, address }
    }

    /// The address the owning channel serves; inbound messages are received there.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Hands an inbound message to the kernel's receive path.
    ///
    /// Routing failures are reported to the kernel's error listeners and returned
    /// to the channel as a transmission error.
    pub async fn deliver(&self, message: SerializedMessage) -> Result<(), ChannelTransmissionError> {
        let Some(inner) = self.kernel.upgrade() else {
            return Err(ChannelTransmissionError::new("kernel is gone"));
        };
        let kernel = Kernel(inner);
        match kernel.receive(message.clone(), &self.address).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let reason = e.to_string();
                kernel.report_processing_error(MessageProcessingError::new(
                    e.into(),
                    Some(message),
                    None,
                ));
                Err(ChannelTransmissionError::new(reason))
            }
        }
    }
}

impl fmt::Debug for InboundHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundHandle")
            .field("address", &self.address.to_compact())
            .finish()
    }
}

/// Handle a channel uses to deregister itself.
#[derive(Clone)]
pub struct RemoveHandle {
    kernel: Weak<KernelInner>,
    id: ChannelId,
}

impl RemoveHandle {
    pub(crate) fn new(kernel: Weak<KernelInner>, id: ChannelId) -> Self {
        Self { kernel, id }
    }

    /// The id of the channel this handle removes.
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Removes the channel. Returns `false` if it was already gone.
    pub fn remove(&self) -> bool {
        match self.kernel.upgrade() {
            Some(inner) => Kernel(inner).unregister_channel(self.id).is_ok(),
            None => false,
        }
    }
}

impl fmt::Debug for RemoveHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoveHandle").field("id", &self.id).finish()
    }
}

/// Ordered list of channels still eligible for one outbound message.
#[derive(Clone)]
pub struct ChannelCandidates {
    address: Address,
    channels: Vec<RegisteredChannel>,
}

impl ChannelCandidates {
    pub(crate) fn new(address: Address, channels: Vec<RegisteredChannel>) -> Self {
        Self { address, channels }
    }

    /// The address the message is routed to.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Ids of the remaining candidates, in attempt order.
    pub fn ids(&self) -> Vec<ChannelId> {
        self.channels.iter().map(|c| c.id).collect()
    }

    /// Number of remaining candidates.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Returns `true` when no candidate remains.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl fmt::Debug for ChannelCandidates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelCandidates")
            .field("address", &self.address.to_compact())
            .field("channels", &self.ids())
            .finish()
    }
}

/// A failed attempt on the first candidate, with the two ways to go on.
#[derive(Debug)]
pub struct ChannelFailure {
    /// The error the channel reported.
    pub error: ChannelTransmissionError,
    /// The channel that failed.
    pub channel: ChannelId,
    candidates: ChannelCandidates,
}

impl ChannelFailure {
    /// Candidates without the channel that just failed.
    pub fn try_next(&self) -> ChannelCandidates {
        ChannelCandidates::new(
            self.candidates.address.clone(),
            self.candidates.channels.iter().skip(1).cloned().collect(),
        )
    }

    /// The same candidates, starting again with the channel that just failed.
    pub fn try_again(&self) -> ChannelCandidates {
        self.candidates.clone()
    }

    /// The failure as a [`KernelError::ChannelTransmission`].
    pub fn into_error(self) -> KernelError {
        KernelError::ChannelTransmission {
            address: self.candidates.address,
            error: self.error,
        }
    }
}

/// Outcome of [`Kernel::try_channels`].
#[derive(Debug)]
pub enum ChannelAttempt {
    /// The first candidate accepted the message.
    Delivered(ChannelId),
    /// The first candidate failed.
    Failed(ChannelFailure),
    /// There was no candidate to try.
    Exhausted,
}

impl Kernel {
    /// Outbound candidates for `address`, exact-address channels first.
    pub fn out_channels(&self, address: &Address) -> ChannelCandidates {
        let channels = self.0.registry.lock().candidates(address);
        ChannelCandidates::new(address.clone(), channels)
    }

    /// Attempts delivery on the first candidate only.
    pub async fn try_channels(
        &self,
        message: &SerializedMessage,
        candidates: ChannelCandidates,
    ) -> ChannelAttempt {
        let Some(first) = candidates.channels.first().cloned() else {
            return ChannelAttempt::Exhausted;
        };
        match first.channel.send(message).await {
            Ok(()) => {
                trace!(address = %candidates.address.to_compact(), channel = %first.id, "channel accepted message");
                ChannelAttempt::Delivered(first.id)
            }
            Err(error) => {
                warn!(address = %candidates.address.to_compact(), channel = %first.id, "channel failed: {}", error);
                ChannelAttempt::Failed(ChannelFailure {
                    error,
                    channel: first.id,
                    candidates,
                })
            }
        }
    }

    /// Attempts candidates in order, moving to the next one after each failure.
    ///
    /// Fails with [`KernelError::NoValidCommunicationChannels`] once the list is
    /// exhausted or the configured attempt limit is reached; the last channel's
    /// failure is kept in `last_error`.
    pub async fn send_with_retry(
        &self,
        message: &SerializedMessage,
        candidates: ChannelCandidates,
    ) -> Result<ChannelId, KernelError> {
        let address = candidates.address.clone();
        let limit = self.config().limits.max_channel_attempts;
        let mut attempts = 0;
        let mut last_error = None;
        let mut candidates = candidates;
        while attempts < limit {
            match self.try_channels(message, candidates).await {
                ChannelAttempt::Delivered(id) => return Ok(id),
                ChannelAttempt::Failed(failure) => {
                    attempts += 1;
                    candidates = failure.try_next();
                    last_error = Some(Box::new(failure.into_error()));
                }
                ChannelAttempt::Exhausted => break,
            }
        }
        Err(KernelError::NoValidCommunicationChannels {
            address,
            attempts,
            last_error,
        })
    }
}
