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

use async_trait::async_trait;

use crate::common::{Address, ChannelTransmissionError, InboundHandle, RemoveHandle};
use crate::message::SerializedMessage;

/// Capabilities a channel declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelDirection {
    /// Only delivers inbound messages.
    In,
    /// Only accepts outbound messages.
    Out,
    /// Both.
    InOut,
}

impl ChannelDirection {
    /// Whether routing may hand outbound messages to the channel.
    pub fn can_send(self) -> bool {
        !matches!(self, ChannelDirection::In)
    }

    /// Whether the channel delivers inbound messages.
    pub fn can_receive(self) -> bool {
        !matches!(self, ChannelDirection::Out)
    }
}

/// Transport adapter serving one address.
///
/// The kernel hands outbound messages to [`send`](Self::send). At registration it
/// passes an [`InboundHandle`] the channel uses to deliver arriving messages, and a
/// [`RemoveHandle`] the channel calls when it wants itself deregistered.
#[async_trait]
pub trait CommunicationChannel: Send + Sync + 'static {
    /// The address this channel serves.
    fn address(&self) -> Address;

    /// Declared direction. Defaults to [`ChannelDirection::InOut`].
    fn direction(&self) -> ChannelDirection {
        ChannelDirection::InOut
    }

    /// Hands a serialized message to the transport.
    async fn send(&self, message: &SerializedMessage) -> Result<(), ChannelTransmissionError>;

    /// Stores the handle used to deliver inbound messages.
    fn register_receive_callback(
        &self,
        _callback: InboundHandle,
    ) -> Result<(), ChannelTransmissionError> {
        Ok(())
    }

    /// Stores the handle used to request removal.
    fn register_remove_callback(
        &self,
        _callback: RemoveHandle,
    ) -> Result<(), ChannelTransmissionError> {
        Ok(())
    }
}
