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
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, trace};

use crate::common::registry::{RegisteredChannel, Registry};
use crate::common::{
    Address, ChannelId, EndpointInfo, InboundHandle, KernelError, MessageProcessingError,
    RemoveHandle, SwitchboardConfig, CONFIG,
};
use crate::correlation::{BidirectionalKey, ChainKey, ChainReply, CorrelationTable};
use crate::message::Message;
use crate::traits::{CommunicationChannel, Middleware, MiddlewarePosition, TargetMarker};

/// Callback receiving messages delivered to the local address.
pub type Listener = Arc<dyn Fn(&Message) -> anyhow::Result<()> + Send + Sync>;

/// Callback receiving failures raised outside of a caller's `send`.
pub type ErrorListener = Arc<dyn Fn(&MessageProcessingError) + Send + Sync>;

/// Identifier returned when registering a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub(crate) struct KernelInner {
    pub(crate) registry: Mutex<Registry>,
    pub(crate) listeners: RwLock<Vec<(ListenerId, Listener)>>,
    pub(crate) error_listeners: RwLock<Vec<(ListenerId, ErrorListener)>>,
    pub(crate) bidirectional: Arc<CorrelationTable<BidirectionalKey, Message>>,
    pub(crate) chains: Arc<CorrelationTable<ChainKey, ChainReply>>,
    pub(crate) cancellation_token: CancellationToken,
    pub(crate) config: SwitchboardConfig,
    next_id: AtomicU64,
}

/// The routing kernel: endpoint registry, listeners and correlation tables.
///
/// `Kernel` is a cheap handle; clones share the same state. Registry and table
/// mutations are short critical sections that are never held across an `.await`,
/// so independent traversals run their middleware concurrently.
///
/// A kernel registers a target-marking middleware at its local address so that
/// correlation middleware registered there see `at_target` for local traffic.
#[derive(Clone)]
pub struct Kernel(pub(crate) Arc<KernelInner>);

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel {
    /// Creates a kernel with a random local address and the global configuration.
    pub fn new() -> Self {
        Self::with_config(CONFIG.clone())
    }

    /// Creates a kernel with a random local address.
    pub fn with_config(config: SwitchboardConfig) -> Self {
        Self::with_local_address(Address::random(), config)
    }

    /// Creates a kernel whose local address is `local_address`.
    pub fn with_local_address(local_address: Address, config: SwitchboardConfig) -> Self {
        let mut registry = Registry::new(local_address.clone());
        registry.add_middleware(
            &local_address,
            MiddlewarePosition::All,
            Arc::new(TargetMarker),
        );
        trace!(local = %local_address.to_compact(), "kernel created");
        Kernel(Arc::new(KernelInner {
            registry: Mutex::new(registry),
            listeners: RwLock::new(Vec::new()),
            error_listeners: RwLock::new(Vec::new()),
            bidirectional: Arc::new(CorrelationTable::new()),
            chains: Arc::new(CorrelationTable::new()),
            cancellation_token: CancellationToken::new(),
            config,
            next_id: AtomicU64::new(1),
        }))
    }

    /// The configuration this kernel was built with.
    pub fn config(&self) -> &SwitchboardConfig {
        &self.0.config
    }

    /// The current local address.
    pub fn local_address(&self) -> Address {
        self.0.registry.lock().local_address().clone()
    }

    /// Moves the local endpoint to `new_address`.
    ///
    /// Fails with [`KernelError::AddressAlreadyInUse`] if another endpoint is
    /// registered there; otherwise the local endpoint's channels and middleware
    /// move with it atomically.
    #[instrument(skip_all, fields(new_address = %new_address.to_compact()))]
    pub fn set_local_address(&self, new_address: Address) -> Result<(), KernelError> {
        self.0.registry.lock().set_local_address(new_address)
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.0.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers a channel at the address it serves.
    ///
    /// The channel receives an [`InboundHandle`] (unless it is outbound-only) and a
    /// [`RemoveHandle`]. If it rejects either, it is removed again and the call fails
    /// with [`KernelError::CallbackRegistration`].
    pub fn register_channel(
        &self,
        channel: Arc<dyn CommunicationChannel>,
    ) -> Result<ChannelId, KernelError> {
        self.ensure_open()?;
        let id = ChannelId(self.next_id());
        let address = channel.address();
        {
            self.0.registry.lock().add_channel(
                &address,
                RegisteredChannel {
                    id,
                    channel: Arc::clone(&channel),
                },
            );
        }

        let inbound = if channel.direction().can_receive() {
            channel.register_receive_callback(InboundHandle::new(
                Arc::downgrade(&self.0),
                address.clone(),
            ))
        } else {
            Ok(())
        };
        let registered = inbound.and_then(|_| {
            channel.register_remove_callback(RemoveHandle::new(Arc::downgrade(&self.0), id))
        });

        if let Err(e) = registered {
            error!(address = %address.to_compact(), %id, "channel rejected callbacks: {}", e);
            self.0.registry.lock().remove_channel(id);
            return Err(KernelError::CallbackRegistration {
                address,
                reason: e.reason,
            });
        }

        debug!(address = %address.to_compact(), %id, "registered channel");
        Ok(id)
    }

    /// Removes a channel. Its endpoint goes away too unless middleware remain there.
    pub fn unregister_channel(&self, id: ChannelId) -> Result<(), KernelError> {
        let removed = self.0.registry.lock().remove_channel(id);
        match removed {
            Some(address) => {
                debug!(address = %address.to_compact(), %id, "unregistered channel");
                Ok(())
            }
            None => Err(KernelError::ChannelNotFound { id }),
        }
    }

    /// Appends `middleware` to the pipeline of `address`, creating the endpoint if needed.
    pub fn use_middleware<M: Middleware>(
        &self,
        address: &Address,
        position: MiddlewarePosition,
        middleware: M,
    ) {
        trace!(address = %address.to_compact(), ?position, "registering middleware");
        self.0
            .registry
            .lock()
            .add_middleware(address, position, Arc::new(middleware));
    }

    pub(crate) fn clear_middleware(&self, address: &Address) {
        self.0.registry.lock().clear_middleware(address);
    }

    /// Looks up the endpoint for `address`.
    pub fn find(&self, address: &Address) -> Result<EndpointInfo, KernelError> {
        self.endpoint(address)
            .ok_or_else(|| KernelError::AddressNotFound {
                address: address.clone(),
            })
    }

    /// Looks up the endpoint for `address`, if one is registered.
    pub fn endpoint(&self, address: &Address) -> Option<EndpointInfo> {
        self.0.registry.lock().find(address)
    }

    /// Registers a listener for messages delivered to the local address.
    ///
    /// Listeners run in registration order. A failing listener is reported to the
    /// error listeners and does not stop the others.
    pub fn listen<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Message) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id());
        self.0.listeners.write().push((id, Arc::new(listener)));
        id
    }

    /// Removes a listener. Returns `false` if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.0.listeners.write();
        let before = listeners.len();
        listeners.retain(|(registered, _)| *registered != id);
        listeners.len() != before
    }

    /// Registers a listener for processing failures.
    pub fn listen_processing_errors<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&MessageProcessingError) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id());
        self.0.error_listeners.write().push((id, Arc::new(listener)));
        id
    }

    /// Removes an error listener. Returns `false` if it was not registered.
    pub fn remove_error_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.0.error_listeners.write();
        let before = listeners.len();
        listeners.retain(|(registered, _)| *registered != id);
        listeners.len() != before
    }

    pub(crate) fn apply_listeners(&self, message: &Message) {
        let listeners: Vec<Listener> = self
            .0
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        trace!(count = listeners.len(), "delivering to local listeners");
        for listener in listeners {
            if let Err(e) = listener(message) {
                self.report_processing_error(MessageProcessingError::new(
                    e,
                    None,
                    Some(message.clone()),
                ));
            }
        }
    }

    pub(crate) fn report_processing_error(&self, failure: MessageProcessingError) {
        error!("{}", failure);
        let listeners: Vec<ErrorListener> = self
            .0
            .error_listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(&failure);
        }
    }

    /// Number of bidirectional requests awaiting a reply.
    pub fn pending_bidirectional(&self) -> usize {
        self.0.bidirectional.len()
    }

    /// Number of chain hops awaiting a continuation.
    pub fn pending_chains(&self) -> usize {
        self.0.chains.len()
    }

    /// A token cancelled when the kernel closes.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.0.cancellation_token.child_token()
    }

    /// Returns `true` once [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.0.cancellation_token.is_cancelled()
    }

    pub(crate) fn ensure_open(&self) -> Result<(), KernelError> {
        if self.is_closed() {
            Err(KernelError::KernelClosed)
        } else {
            Ok(())
        }
    }

    /// Shuts the kernel down.
    ///
    /// Pending correlations complete with [`KernelError::KernelClosed`], every
    /// channel is removed and environments become inactive. Later sends fail.
    pub fn close(&self) {
        if self.is_closed() {
            return;
        }
        self.0.cancellation_token.cancel();
        self.0.bidirectional.clear();
        self.0.chains.clear();
        let removed = self.0.registry.lock().clear_channels();
        debug!(channels = removed.len(), "kernel closed");
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("registry", &*self.0.registry.lock())
            .field("pending_bidirectional", &self.0.bidirectional.len())
            .field("pending_chains", &self.0.chains.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

static_assertions::assert_impl_all!(Kernel: Send, Sync, Clone);
