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
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mti::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, trace};

use crate::common::{Address, Environment, Kernel, KernelError};
use crate::correlation::{as_millis, now_millis, stamp, PendingReply};
use crate::message::{ContentMap, Message, MetaData};
use crate::traits::{Flow, Middleware, MiddlewareContext};

/// Metadata key holding a [`BidirectionalEnvelope`].
pub const BIDIRECTIONAL_META_KEY: &str = "bidirectional_message";

/// Correlation metadata of a bidirectional request or reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidirectionalEnvelope {
    /// Sender of this message.
    pub source: Address,
    /// Receiver of this message.
    pub target: Address,
    /// Correlation id shared by a request and its replies.
    pub msg_uuid: String,
    /// Reply deadline in milliseconds.
    pub timeout: u64,
    /// Creation time of the original request, in milliseconds since the Unix epoch.
    pub created_at: u64,
    /// Scopes the message to middleware registered with the same id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub middleware_id: Option<String>,
    /// Set on replies; requests leave it out.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub reply: bool,
}

impl BidirectionalEnvelope {
    /// Reads the envelope from `message`.
    ///
    /// `None` when the message carries none; an error when it is malformed.
    pub fn from_message(message: &Message) -> Option<Result<Self, KernelError>> {
        message
            .meta_data()
            .get(BIDIRECTIONAL_META_KEY)
            .map(Self::decode)
    }

    fn decode(raw: &Value) -> Result<Self, KernelError> {
        serde_json::from_value(raw.clone()).map_err(|e| {
            KernelError::invalid_format("Bidirectional message meta data has wrong format.", e)
        })
    }

    /// The reply deadline.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }
}

impl Kernel {
    /// Marks `message` as a bidirectional request sent from `source`.
    ///
    /// Stamps `meta_data.bidirectional_message` and registers the pending reply
    /// before the message is sent, so replies produced while the request is still
    /// being routed are not missed. The returned future resolves with the first
    /// reply carrying the same id that reaches a [`BidirectionalMiddleware`] at
    /// `source`, or fails with [`KernelError::Timeout`] after `timeout`. Without a
    /// timeout the configured `timeouts.bidirectional_timeout_ms` applies.
    pub fn make_bidirectional(
        &self,
        message: &mut Message,
        source: &Address,
        timeout: impl Into<Option<Duration>>,
        middleware_id: Option<&str>,
    ) -> Result<PendingReply<Message>, KernelError> {
        self.ensure_open()?;
        let timeout = timeout
            .into()
            .unwrap_or_else(|| self.config().bidirectional_timeout());
        let msg_uuid = "msg".create_type_id::<V7>().to_string();
        let envelope = BidirectionalEnvelope {
            source: source.clone(),
            target: message.target().clone(),
            msg_uuid: msg_uuid.clone(),
            timeout: as_millis(timeout),
            created_at: now_millis(),
            middleware_id: middleware_id.map(str::to_string),
            reply: false,
        };
        stamp(message, BIDIRECTIONAL_META_KEY, &envelope)?;
        trace!(%msg_uuid, source = %source.to_compact(), "bidirectional request registered");
        self.0.bidirectional.register(
            (msg_uuid.clone(), source.clone()),
            timeout,
            KernelError::Timeout { timeout, msg_uuid },
            &self.0.cancellation_token,
        )
    }
}

/// Sends correlated replies to a bidirectional request.
#[derive(Clone)]
pub struct Responder {
    kernel: Kernel,
    envelope: BidirectionalEnvelope,
}

impl Responder {
    /// Builds a responder for a message carrying bidirectional metadata.
    ///
    /// Useful to answer a reply that was awaited through [`PendingReply`].
    pub fn from_message(kernel: &Kernel, message: &Message) -> Result<Self, KernelError> {
        let envelope = BidirectionalEnvelope::from_message(message).ok_or_else(|| {
            KernelError::invalid_format(
                "Bidirectional message meta data has wrong format.",
                "missing bidirectional_message",
            )
        })??;
        Ok(Self {
            kernel: kernel.clone(),
            envelope,
        })
    }

    /// The envelope of the message being answered.
    pub fn envelope(&self) -> &BidirectionalEnvelope {
        &self.envelope
    }

    /// Replies to the message's sender with the same correlation id.
    ///
    /// The reply itself is awaitable: the returned future resolves if the other side
    /// answers again. `timeout` defaults to the request's deadline.
    #[instrument(skip_all, fields(msg_uuid = %self.envelope.msg_uuid))]
    pub async fn respond(
        &self,
        content: ContentMap,
        meta_data: MetaData,
        timeout: Option<Duration>,
    ) -> Result<PendingReply<Message>, KernelError> {
        let timeout = timeout.unwrap_or_else(|| self.envelope.timeout());
        let request = &self.envelope;
        let envelope = BidirectionalEnvelope {
            source: request.target.clone(),
            target: request.source.clone(),
            msg_uuid: request.msg_uuid.clone(),
            timeout: as_millis(timeout),
            created_at: request.created_at,
            middleware_id: request.middleware_id.clone(),
            reply: true,
        };

        let mut reply = Message::new(request.source.clone(), content);
        *reply.meta_data_mut() = meta_data;
        stamp(&mut reply, BIDIRECTIONAL_META_KEY, &envelope)?;

        let pending = self.kernel.0.bidirectional.register(
            (request.msg_uuid.clone(), request.target.clone()),
            timeout,
            KernelError::Timeout {
                timeout,
                msg_uuid: request.msg_uuid.clone(),
            },
            &self.kernel.0.cancellation_token,
        )?;
        if let Err(e) = self.kernel.dispatch_from(reply, &request.target).await {
            pending.cancel();
            return Err(e);
        }
        Ok(pending)
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("envelope", &self.envelope)
            .finish()
    }
}

/// A bidirectional request handed to a [`BidirectionalHandler`].
#[derive(Debug, Clone)]
pub struct BidirectionalRequest {
    /// The request as it arrived.
    pub message: Message,
    /// Sends replies back to the requester.
    pub responder: Responder,
}

/// Handles bidirectional requests claimed by a [`BidirectionalMiddleware`].
///
/// Implemented for async closures taking a [`BidirectionalRequest`].
#[async_trait]
pub trait BidirectionalHandler: Send + Sync + 'static {
    /// Called once per request.
    async fn on_request(&self, request: BidirectionalRequest) -> Result<(), KernelError>;
}

#[async_trait]
impl<F, Fut> BidirectionalHandler for F
where
    F: Fn(BidirectionalRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), KernelError>> + Send + 'static,
{
    async fn on_request(&self, request: BidirectionalRequest) -> Result<(), KernelError> {
        (self)(request).await
    }
}

/// Claims bidirectional traffic arriving at its endpoint.
///
/// Runs only when the message is at its target. Requests go to the handler; replies
/// settle the pending entry of the address they arrived at, and replies nobody waits
/// for any more are dropped. Either way the pipeline is interrupted, so listeners
/// never see correlation traffic. Register one at every address that sends or answers
/// bidirectional requests.
pub struct BidirectionalMiddleware {
    handler: Arc<dyn BidirectionalHandler>,
    middleware_id: Option<String>,
}

impl BidirectionalMiddleware {
    /// Claims every bidirectional message.
    pub fn new<H: BidirectionalHandler>(handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
            middleware_id: None,
        }
    }

    /// Claims only messages stamped with `id`.
    pub fn with_id<H: BidirectionalHandler>(id: impl Into<String>, handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
            middleware_id: Some(id.into()),
        }
    }

    /// The id this middleware is scoped to, if any.
    pub fn middleware_id(&self) -> Option<&str> {
        self.middleware_id.as_deref()
    }

    /// Marks `message` as a request from `env`, stamped with this middleware's id.
    pub fn make_bidirectional(
        &self,
        env: &Environment,
        message: &mut Message,
        timeout: impl Into<Option<Duration>>,
    ) -> Result<PendingReply<Message>, KernelError> {
        env.ensure_active()?;
        env.kernel().make_bidirectional(
            message,
            &env.own_address(),
            timeout,
            self.middleware_id.as_deref(),
        )
    }

    fn claims(&self, raw: &Value) -> bool {
        match &self.middleware_id {
            Some(id) => raw.get("middleware_id").and_then(Value::as_str) == Some(id.as_str()),
            None => true,
        }
    }
}

#[async_trait]
impl Middleware for BidirectionalMiddleware {
    async fn apply(
        &self,
        message: &mut Message,
        cx: &MiddlewareContext,
    ) -> Result<Flow, KernelError> {
        if !message.is_at_target() {
            return Ok(Flow::Continue);
        }
        let envelope = match message.meta_data().get(BIDIRECTIONAL_META_KEY) {
            Some(raw) if self.claims(raw) => BidirectionalEnvelope::decode(raw)?,
            _ => return Ok(Flow::Continue),
        };

        if envelope.reply {
            let key = (envelope.msg_uuid.clone(), cx.address().clone());
            if cx.kernel().0.bidirectional.resolve(&key, message.clone()) {
                trace!(msg_uuid = %envelope.msg_uuid, "bidirectional reply resolved");
            } else {
                debug!(msg_uuid = %envelope.msg_uuid, "dropping reply nobody is waiting for");
            }
            return Ok(Flow::Interrupt);
        }

        let responder = Responder {
            kernel: cx.kernel().clone(),
            envelope,
        };
        if let Some(local) = message.local_mut() {
            local.extensions.insert(responder.clone());
        }
        self.handler
            .on_request(BidirectionalRequest {
                message: message.clone(),
                responder,
            })
            .await?;
        Ok(Flow::Interrupt)
    }
}

impl fmt::Debug for BidirectionalMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BidirectionalMiddleware")
            .field("middleware_id", &self.middleware_id)
            .finish()
    }
}
