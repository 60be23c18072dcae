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
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use crate::common::{Address, Environment, KernelError, ProtocolError};
use crate::correlation::{
    ChainHandler, ChainMiddleware, ChainReply, ChainResponder, PendingReply, CHAIN_META_KEY,
};
use crate::message::{ContentMap, Message, MetaData};
use crate::traits::{Flow, Middleware, MiddlewareContext};

/// Metadata key holding a [`ProtocolEnvelope`].
pub const PROTOCOL_META_KEY: &str = "protocol";

/// Identity of a protocol: name, ident and version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolDescriptor {
    /// Human-readable protocol name, e.g. `ping`.
    pub protocol: String,
    /// Identifier of the protocol; any JSON value.
    pub protocol_ident: Value,
    /// Protocol version; the whole descriptor must match for a request to be answered.
    pub protocol_version: String,
}

impl ProtocolDescriptor {
    /// Builds a descriptor from its three parts.
    pub fn new(
        protocol: impl Into<String>,
        protocol_ident: impl Into<Value>,
        protocol_version: impl Into<String>,
    ) -> Self {
        Self {
            protocol: protocol.into(),
            protocol_ident: protocol_ident.into(),
            protocol_version: protocol_version.into(),
        }
    }

    fn envelope(&self, is_error: bool) -> ProtocolEnvelope {
        ProtocolEnvelope {
            descriptor: self.clone(),
            is_error,
        }
    }
}

/// The `meta_data.protocol` entry of a protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolEnvelope {
    #[serde(flatten)]
    pub descriptor: ProtocolDescriptor,
    /// Set on replies reporting a failure.
    #[serde(default)]
    pub is_error: bool,
}

impl ProtocolEnvelope {
    /// Reads the envelope from `message`; `None` when absent.
    pub fn from_message(message: &Message) -> Option<Result<Self, ProtocolError>> {
        message.meta_data().get(PROTOCOL_META_KEY).map(|raw| {
            serde_json::from_value(raw.clone()).map_err(|e| {
                ProtocolError::with_cause(
                    "Invalid protocol metadata",
                    KernelError::MessageDeserialization {
                        reason: e.to_string(),
                    },
                )
            })
        })
    }

    fn into_meta_data(self) -> Result<MetaData, ProtocolError> {
        let value = serde_json::to_value(self).map_err(|e| {
            ProtocolError::with_cause(
                "Invalid protocol metadata",
                KernelError::MessageSerialization {
                    reason: e.to_string(),
                },
            )
        })?;
        let mut meta_data = MetaData::new();
        meta_data.insert(PROTOCOL_META_KEY.to_string(), value);
        Ok(meta_data)
    }
}

fn data_content(data: Value) -> ContentMap {
    let mut content = ContentMap::new();
    content.insert("data".to_string(), data);
    content
}

/// A named, versioned request/response contract over message chains.
///
/// Both sides of an exchange register a [`ProtocolMiddleware`] for the protocol at
/// their own address: the responder to receive first requests, the requester to
/// receive the replies.
#[async_trait]
pub trait Protocol: Send + Sync + 'static {
    /// The identity messages of this protocol are stamped with.
    fn descriptor(&self) -> ProtocolDescriptor;

    /// Answers a first request. Fails with "Not implemented" unless overridden.
    async fn on_first_request(&self, _message: ProtocolMessage) -> Result<(), ProtocolError> {
        Err(ProtocolError::not_implemented())
    }
}

/// Sends `data` to `address` as the first message of a `protocol` exchange.
///
/// Resolves once the message has been sent; the returned [`ProtocolReply`] then
/// resolves with the other side's answer. A reply flagged `is_error` and a chain
/// timeout both surface as [`ProtocolError`].
#[instrument(skip_all, fields(protocol = %protocol.descriptor().protocol, target = %address.to_compact()))]
pub async fn send_first_message<P: Protocol + ?Sized>(
    protocol: &P,
    env: &Environment,
    address: Address,
    data: Value,
    timeout: Duration,
) -> Result<ProtocolReply, ProtocolError> {
    let mut message = Message::new(address, data_content(data));
    *message.meta_data_mut() = protocol.descriptor().envelope(false).into_meta_data()?;
    let pending = env.make_chain(&mut message, timeout)?;
    if let Err(e) = env.send(message).await {
        pending.cancel();
        return Err(e.into());
    }
    Ok(ProtocolReply::new(pending))
}

/// A received protocol message: the chain hop plus its decoded `data`.
#[derive(Debug, Clone)]
pub struct ProtocolMessage {
    /// The underlying message.
    pub message: Message,
    /// The `data` attribute of the content.
    pub data: Value,
    /// The protocol metadata it carried.
    pub envelope: ProtocolEnvelope,
    responder: ChainResponder,
}

impl ProtocolMessage {
    pub(crate) fn from_chain(reply: ChainReply) -> Result<Self, ProtocolError> {
        let ChainReply {
            message, responder, ..
        } = reply;
        let content = message
            .content()
            .to_map()
            .map_err(|e| ProtocolError::with_cause("Invalid message content", e))?;
        let data = content
            .get("data")
            .cloned()
            .ok_or_else(|| ProtocolError::new("Message content missing 'data' attribute"))?;
        let envelope = ProtocolEnvelope::from_message(&message)
            .unwrap_or_else(|| Err(ProtocolError::new("Invalid protocol metadata")))?;

        if envelope.is_error {
            let reason = data
                .get("message")
                .and_then(Value::as_str)
                .or_else(|| data.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| data.to_string());
            return Err(ProtocolError::new(reason));
        }

        Ok(Self {
            message,
            data,
            envelope,
            responder,
        })
    }

    /// Answers with `data`. The returned reply resolves with the next message of
    /// the exchange, if the other side sends one.
    pub async fn respond(&self, data: Value) -> Result<ProtocolReply, ProtocolError> {
        self.send(data, false).await
    }

    /// Answers with a failure; the other side's awaiter sees a [`ProtocolError`]
    /// carrying `message`.
    pub async fn respond_error(&self, message: impl Into<String>) -> Result<(), ProtocolError> {
        let data = json!({ "message": message.into(), "stack": Value::Null });
        self.send(data, true).await?.cancel();
        Ok(())
    }

    async fn send(&self, data: Value, is_error: bool) -> Result<ProtocolReply, ProtocolError> {
        let meta_data = self
            .envelope
            .descriptor
            .envelope(is_error)
            .into_meta_data()?;
        let pending = self
            .responder
            .respond(data_content(data), meta_data, None)
            .await?;
        Ok(ProtocolReply::new(pending))
    }
}

/// Future resolving with the next message of a protocol exchange.
pub struct ProtocolReply {
    pending: PendingReply<ChainReply>,
}

impl ProtocolReply {
    fn new(pending: PendingReply<ChainReply>) -> Self {
        Self { pending }
    }

    /// Stops waiting; a later answer is rejected as an unexpected hop.
    pub fn cancel(self) {
        self.pending.cancel();
    }
}

impl Future for ProtocolReply {
    type Output = Result<ProtocolMessage, ProtocolError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.pending.poll_unpin(cx).map(|settled| {
            settled
                .map_err(ProtocolError::from)
                .and_then(ProtocolMessage::from_chain)
        })
    }
}

impl fmt::Debug for ProtocolReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolReply").finish_non_exhaustive()
    }
}

struct FirstRequests<P: ?Sized>(Arc<P>);

#[async_trait]
impl<P: Protocol + ?Sized> ChainHandler for FirstRequests<P> {
    async fn on_first_request(&self, request: ChainReply) -> Result<(), KernelError> {
        let message = ProtocolMessage::from_chain(request)?;
        self.0.on_first_request(message).await?;
        Ok(())
    }
}

/// Claims the chain messages of one protocol at the endpoint it is registered on.
///
/// Chain messages of other protocols, or without protocol metadata, fall through.
pub struct ProtocolMiddleware {
    descriptor: ProtocolDescriptor,
    chain: ChainMiddleware,
}

impl ProtocolMiddleware {
    /// Answers first requests that carry `protocol`'s descriptor by calling
    /// [`Protocol::on_first_request`]. Other chains fall through untouched.
    pub fn new<P: Protocol + ?Sized>(protocol: Arc<P>) -> Self {
        let descriptor = protocol.descriptor();
        let claimed = descriptor.clone();
        let chain = ChainMiddleware::with_filter(
            move |_, message: &Message| match ProtocolEnvelope::from_message(message) {
                Some(Ok(envelope)) => envelope.descriptor == claimed,
                _ => false,
            },
            FirstRequests(protocol),
        );
        debug!(protocol = %descriptor.protocol, version = %descriptor.protocol_version, "protocol middleware created");
        Self { descriptor, chain }
    }

    /// The descriptor this middleware answers for.
    pub fn descriptor(&self) -> &ProtocolDescriptor {
        &self.descriptor
    }
}

#[async_trait]
impl Middleware for ProtocolMiddleware {
    async fn apply(
        &self,
        message: &mut Message,
        cx: &MiddlewareContext,
    ) -> Result<Flow, KernelError> {
        if message.is_at_target() && message.meta_data().contains_key(CHAIN_META_KEY) {
            if let Some(Err(e)) = ProtocolEnvelope::from_message(message) {
                warn!(protocol = %self.descriptor.protocol, "malformed protocol metadata: {}", e);
                return Err(KernelError::invalid_format(
                    "Protocol message meta data has wrong format.",
                    e,
                ));
            }
        }
        self.chain.apply(message, cx).await
    }
}

impl fmt::Debug for ProtocolMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolMiddleware")
            .field("descriptor", &self.descriptor)
            .finish()
    }
}
