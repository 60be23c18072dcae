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

#![forbid(unsafe_code)]
//! Switchboard
//!
//! A message-routing kernel for address-addressable components. Messages travel
//! through per-address middleware pipelines, leave over pluggable communication
//! channels, and can be correlated with their replies through bidirectional
//! requests, multi-hop chains and named protocols.

/// Addresses, the kernel and its routing core.
pub(crate) mod common;

pub(crate) mod correlation;
pub(crate) mod message;
/// Composable middleware: groups, guards, partitions and closure adapters.
pub(crate) mod middleware;
pub(crate) mod protocols;
/// Middleware and communication channel contracts.
pub(crate) mod traits;

/// Prelude module for convenient imports.
///
/// Re-exports the public surface of the kernel, as well as the `async_trait` crate.
pub mod prelude {
    pub use async_trait;

    pub use crate::common::{
        Address, ChannelAttempt, ChannelCandidates, ChannelFailure, ChannelId,
        ChannelTransmissionError, Direction, EndpointInfo, Environment, ErrorListener,
        Extensions, InboundHandle, Kernel, KernelError, LimitsConfig, Listener, ListenerId,
        LocalComputedMessageData, MessageProcessingError, ProtocolError, RemoveHandle,
        SwitchboardConfig, TimeoutConfig, CONFIG,
    };
    pub use crate::correlation::{
        BidirectionalEnvelope, BidirectionalHandler, BidirectionalMiddleware,
        BidirectionalRequest, ChainEnvelope, ChainHandler, ChainMiddleware, ChainReply,
        ChainResponder, PendingReply, Responder, BIDIRECTIONAL_META_KEY, CHAIN_META_KEY,
    };
    pub use crate::message::{ContentMap, Message, MessageContent, MetaData, SerializedMessage};
    pub use crate::middleware::{
        guard, guard_at_source, guard_at_source_or_target, guard_at_target, guard_incoming,
        guard_outgoing, middleware_fn, Guarded, MiddlewareFn, MiddlewareGroup, NonInterrupting,
        Partition,
    };
    pub use crate::protocols::{
        send_first_message, PingProtocol, Protocol, ProtocolDescriptor, ProtocolEnvelope,
        ProtocolMessage, ProtocolMiddleware, ProtocolReply, PROTOCOL_META_KEY,
    };
    pub use crate::traits::{
        ChannelDirection, CommunicationChannel, Flow, Middleware, MiddlewareContext,
        MiddlewarePosition,
    };
}
