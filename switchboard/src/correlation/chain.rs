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
use tracing::{instrument, trace, warn};

use crate::common::{Address, Environment, Kernel, KernelError};
use crate::correlation::{as_millis, now_millis, stamp, PendingReply};
use crate::message::{ContentMap, Message, MetaData};
use crate::traits::{Flow, Middleware, MiddlewareContext};

/// Metadata key holding a [`ChainEnvelope`].
pub const CHAIN_META_KEY: &str = "chain_message";

/// Correlation metadata of one hop in a message chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEnvelope {
    /// Sender of this hop.
    pub current_sender: Address,
    /// Receiver of this hop.
    #[serde(rename = "current_reciever")]
    pub current_receiver: Address,
    /// Id shared by every hop of the chain.
    pub msg_chain_uid: String,
    /// Hop index, starting at 1.
    pub current_msg_chain_length: u64,
    /// Deadline for the next hop in milliseconds.
    pub timeout: u64,
    /// Creation time of the first hop, in milliseconds since the Unix epoch.
    pub created_at: u64,
    /// Scopes the chain to middleware registered with the same id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_middleware_id: Option<String>,
}

impl ChainEnvelope {
    /// Reads the envelope from `message`.
    ///
    /// `None` when the message carries none; an error when it is malformed.
    pub fn from_message(message: &Message) -> Option<Result<Self, KernelError>> {
        message.meta_data().get(CHAIN_META_KEY).map(Self::decode)
    }

    fn decode(raw: &Value) -> Result<Self, KernelError> {
        serde_json::from_value(raw.clone())
            .map_err(|e| KernelError::invalid_format("Chain message meta data has wrong format.", e))
    }

    /// Deadline for the next hop.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    /// The hop index.
    pub fn hop(&self) -> u64 {
        self.current_msg_chain_length
    }
}

impl Kernel {
    /// Starts a chain with `message` as hop 1, sent from `source`.
    ///
    /// The returned future resolves with hop 2, or fails with
    /// [`KernelError::ChainTimeout`] after `timeout`, by default the configured
    /// `timeouts.chain_timeout_ms`. Answering hop 2 through its [`ChainResponder`]
    /// awaits hop 3, and so on.
    pub fn make_chain(
        &self,
        message: &mut Message,
        source: &Address,
        timeout: impl Into<Option<Duration>>,
        chain_middleware_id: Option<&str>,
    ) -> Result<PendingReply<ChainReply>, KernelError> {
        self.ensure_open()?;
        let timeout = timeout
            .into()
            .unwrap_or_else(|| self.config().chain_timeout());
        let msg_chain_uid = "chain".create_type_id::<V7>().to_string();
        let envelope = ChainEnvelope {
            current_sender: source.clone(),
            current_receiver: message.target().clone(),
            msg_chain_uid: msg_chain_uid.clone(),
            current_msg_chain_length: 1,
            timeout: as_millis(timeout),
            created_at: now_millis(),
            chain_middleware_id: chain_middleware_id.map(str::to_string),
        };
        stamp(message, CHAIN_META_KEY, &envelope)?;
        trace!(%msg_chain_uid, "chain started");
        self.0.chains.register(
            (msg_chain_uid.clone(), 1),
            timeout,
            KernelError::ChainTimeout {
                timeout,
                msg_chain_uid,
                hop: 1,
            },
            &self.0.cancellation_token,
        )
    }
}

/// Continues a chain from the hop it was built for.
#[derive(Clone)]
pub struct ChainResponder {
    kernel: Kernel,
    envelope: ChainEnvelope,
}

impl ChainResponder {
    pub(crate) fn new(kernel: Kernel, envelope: ChainEnvelope) -> Self {
        Self { kernel, envelope }
    }

    /// The envelope of the hop being answered.
    pub fn envelope(&self) -> &ChainEnvelope {
        &self.envelope
    }

    /// Sends the next hop back to this hop's sender.
    ///
    /// The pending entry for the hop after that is registered before sending.
    /// `timeout` defaults to the current hop's deadline.
    #[instrument(skip_all, fields(chain = %self.envelope.msg_chain_uid, hop = self.envelope.hop() + 1))]
    pub async fn respond(
        &self,
        content: ContentMap,
        meta_data: MetaData,
        timeout: Option<Duration>,
    ) -> Result<PendingReply<ChainReply>, KernelError> {
        let timeout = timeout.unwrap_or_else(|| self.envelope.timeout());
        let current = &self.envelope;
        let next_hop = current.hop() + 1;
        let envelope = ChainEnvelope {
            current_sender: current.current_receiver.clone(),
            current_receiver: current.current_sender.clone(),
            msg_chain_uid: current.msg_chain_uid.clone(),
            current_msg_chain_length: next_hop,
            timeout: as_millis(timeout),
            created_at: current.created_at,
            chain_middleware_id: current.chain_middleware_id.clone(),
        };

        let mut next = Message::new(current.current_sender.clone(), content);
        *next.meta_data_mut() = meta_data;
        stamp(&mut next, CHAIN_META_KEY, &envelope)?;

        let pending = self.kernel.0.chains.register(
            (current.msg_chain_uid.clone(), next_hop),
            timeout,
            KernelError::ChainTimeout {
                timeout,
                msg_chain_uid: current.msg_chain_uid.clone(),
                hop: next_hop,
            },
            &self.kernel.0.cancellation_token,
        )?;
        if let Err(e) = self
            .kernel
            .dispatch_from(next, &current.current_receiver)
            .await
        {
            pending.cancel();
            return Err(e);
        }
        Ok(pending)
    }
}

impl fmt::Debug for ChainResponder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainResponder")
            .field("envelope", &self.envelope)
            .finish()
    }
}

/// One received hop of a chain.
#[derive(Debug, Clone)]
pub struct ChainReply {
    /// The hop's message.
    pub message: Message,
    /// Its chain metadata.
    pub envelope: ChainEnvelope,
    /// Sends the following hop.
    pub responder: ChainResponder,
}

impl ChainReply {
    /// The hop index of this reply.
    pub fn hop(&self) -> u64 {
        self.envelope.hop()
    }

    /// Continues the chain; see [`ChainResponder::respond`].
    pub async fn respond(
        &self,
        content: ContentMap,
        meta_data: MetaData,
        timeout: Option<Duration>,
    ) -> Result<PendingReply<ChainReply>, KernelError> {
        self.responder.respond(content, meta_data, timeout).await
    }
}

/// Receives chain traffic claimed by a [`ChainMiddleware`].
#[async_trait]
pub trait ChainHandler: Send + Sync + 'static {
    /// Called for hop 1, the message that starts a chain.
    async fn on_first_request(&self, request: ChainReply) -> Result<(), KernelError>;

    /// Called for every hop before it is dispatched.
    async fn on_message(
        &self,
        _message: &Message,
        _envelope: &ChainEnvelope,
    ) -> Result<(), KernelError> {
        Ok(())
    }
}

struct FirstRequestFn<F>(F);

#[async_trait]
impl<F, Fut> ChainHandler for FirstRequestFn<F>
where
    F: Fn(ChainReply) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), KernelError>> + Send + 'static,
{
    async fn on_first_request(&self, request: ChainReply) -> Result<(), KernelError> {
        (self.0)(request).await
    }
}

type ChainPredicate = dyn Fn(&Value, &Message) -> bool + Send + Sync;

enum ChainFilter {
    All,
    Id(String),
    Predicate(Arc<ChainPredicate>),
}

impl ChainFilter {
    fn matches(&self, raw: &Value, message: &Message) -> bool {
        match self {
            ChainFilter::All => true,
            ChainFilter::Id(id) => {
                raw.get("chain_middleware_id").and_then(Value::as_str) == Some(id.as_str())
            }
            ChainFilter::Predicate(predicate) => predicate(raw, message),
        }
    }
}

/// Claims chain traffic arriving at its endpoint.
///
/// Runs only when the message is at its target. Hop 1 goes to
/// [`ChainHandler::on_first_request`]; a later hop settles the entry its previous
/// hop registered and fails with [`KernelError::UnexpectedChainHop`] when there is
/// none. The pipeline is interrupted for every claimed hop.
pub struct ChainMiddleware {
    handler: Arc<dyn ChainHandler>,
    filter: ChainFilter,
}

impl ChainMiddleware {
    /// Claims every chain message.
    pub fn new<H: ChainHandler>(handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
            filter: ChainFilter::All,
        }
    }

    /// Claims only chains stamped with `id`.
    pub fn with_id<H: ChainHandler>(id: impl Into<String>, handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
            filter: ChainFilter::Id(id.into()),
        }
    }

    /// Claims chains for which `predicate` holds.
    ///
    /// The predicate sees the raw `chain_message` metadata and the message itself.
    pub fn with_filter<H, P>(predicate: P, handler: H) -> Self
    where
        H: ChainHandler,
        P: Fn(&Value, &Message) -> bool + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            filter: ChainFilter::Predicate(Arc::new(predicate)),
        }
    }

    /// Claims every chain message, answering first requests with `on_first_request`.
    pub fn from_fn<F, Fut>(on_first_request: F) -> Self
    where
        F: Fn(ChainReply) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), KernelError>> + Send + 'static,
    {
        Self::new(FirstRequestFn(on_first_request))
    }

    /// Starts a chain from `env`, stamped with this middleware's id if it has one.
    pub fn make_chain(
        &self,
        env: &Environment,
        message: &mut Message,
        timeout: impl Into<Option<Duration>>,
    ) -> Result<PendingReply<ChainReply>, KernelError> {
        env.ensure_active()?;
        let id = match &self.filter {
            ChainFilter::Id(id) => Some(id.as_str()),
            _ => None,
        };
        env.kernel()
            .make_chain(message, &env.own_address(), timeout, id)
    }
}

#[async_trait]
impl Middleware for ChainMiddleware {
    async fn apply(
        &self,
        message: &mut Message,
        cx: &MiddlewareContext,
    ) -> Result<Flow, KernelError> {
        if !message.is_at_target() {
            return Ok(Flow::Continue);
        }
        let envelope = match message.meta_data().get(CHAIN_META_KEY) {
            Some(raw) if self.filter.matches(raw, message) => ChainEnvelope::decode(raw)?,
            _ => return Ok(Flow::Continue),
        };

        let responder = ChainResponder::new(cx.kernel().clone(), envelope.clone());
        if let Some(local) = message.local_mut() {
            local.extensions.insert(responder.clone());
        }
        self.handler.on_message(message, &envelope).await?;

        let hop = envelope.hop();
        let reply = ChainReply {
            message: message.clone(),
            envelope,
            responder,
        };
        if hop <= 1 {
            self.handler.on_first_request(reply).await?;
            return Ok(Flow::Interrupt);
        }

        let msg_chain_uid = reply.envelope.msg_chain_uid.clone();
        let key = (msg_chain_uid.clone(), hop - 1);
        if !cx.kernel().0.chains.resolve(&key, reply) {
            warn!(%msg_chain_uid, hop, "no pending entry for chain hop");
            return Err(KernelError::UnexpectedChainHop { msg_chain_uid, hop });
        }
        trace!(%msg_chain_uid, hop, "chain hop resolved");
        Ok(Flow::Interrupt)
    }
}

impl fmt::Debug for ChainMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let filter = match &self.filter {
            ChainFilter::All => "all".to_string(),
            ChainFilter::Id(id) => format!("id={id}"),
            ChainFilter::Predicate(_) => "predicate".to_string(),
        };
        f.debug_struct("ChainMiddleware")
            .field("filter", &filter)
            .finish()
    }
}
