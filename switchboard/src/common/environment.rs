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
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::common::registry::RegisteredChannel;
use crate::common::{Address, ChannelId, ChannelTransmissionError, Kernel, KernelError};
use crate::correlation::{ChainReply, PendingReply};
use crate::message::{Message, SerializedMessage};
use crate::traits::{
    ChannelDirection, CommunicationChannel, Middleware, MiddlewarePosition, TargetMarker,
};

type ReceiveFn = dyn Fn(Message) -> anyhow::Result<()> + Send + Sync;

/// In-process channel handing messages for an environment's address to its callback.
struct LocalChannel {
    address: Address,
    on_receive: Arc<ReceiveFn>,
}

#[async_trait]
impl CommunicationChannel for LocalChannel {
    fn address(&self) -> Address {
        self.address.clone()
    }

    fn direction(&self) -> ChannelDirection {
        ChannelDirection::Out
    }

    async fn send(&self, message: &SerializedMessage) -> Result<(), ChannelTransmissionError> {
        let message = Message::deserialize(message)
            .map_err(|e| ChannelTransmissionError::new(e.to_string()))?;
        (self.on_receive)(message).map_err(|e| ChannelTransmissionError::new(e.to_string()))
    }
}

enum Scope {
    Kernel,
    Local { address: Address, channel: ChannelId },
}

struct EnvironmentInner {
    kernel: Kernel,
    scope: Scope,
    active: AtomicBool,
}

/// A component's view of the kernel: its own address plus send and middleware access.
///
/// Environments created with [`Kernel::create_environment`] own an in-process channel
/// at their address. The kernel environment ([`Kernel::kernel_environment`]) speaks for
/// the local address and sends through [`Kernel::send`] directly.
///
/// After [`remove`](Self::remove), or once the kernel closes, `send` and
/// `use_middleware` fail with [`KernelError::EnvironmentInactive`].
#[derive(Clone)]
pub struct Environment(Arc<EnvironmentInner>);

impl Environment {
    /// The address messages from this environment originate at.
    pub fn own_address(&self) -> Address {
        match &self.0.scope {
            Scope::Kernel => self.0.kernel.local_address(),
            Scope::Local { address, .. } => address.clone(),
        }
    }

    /// The kernel this environment belongs to.
    pub fn kernel(&self) -> &Kernel {
        &self.0.kernel
    }

    /// Returns `true` until the environment is removed or its kernel closes.
    pub fn is_active(&self) -> bool {
        self.0.active.load(Ordering::Acquire) && !self.0.kernel.is_closed()
    }

    pub(crate) fn ensure_active(&self) -> Result<(), KernelError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(KernelError::EnvironmentInactive {
                address: self.own_address(),
            })
        }
    }

    /// Sends a message originating at this environment's address.
    pub async fn send(&self, message: Message) -> Result<(), KernelError> {
        self.ensure_active()?;
        match &self.0.scope {
            Scope::Kernel => self.0.kernel.send(message).await,
            Scope::Local { address, .. } => self.0.kernel.dispatch_from(message, address).await,
        }
    }

    /// Appends middleware to this environment's own address.
    pub fn use_middleware<M: Middleware>(
        &self,
        position: MiddlewarePosition,
        middleware: M,
    ) -> Result<(), KernelError> {
        self.ensure_active()?;
        self.0
            .kernel
            .use_middleware(&self.own_address(), position, middleware);
        Ok(())
    }

    /// Marks `message` as a bidirectional request from this environment.
    ///
    /// Pass `None` for the kernel's configured timeout. See
    /// [`Kernel::make_bidirectional`].
    pub fn make_bidirectional(
        &self,
        message: &mut Message,
        timeout: impl Into<Option<Duration>>,
    ) -> Result<PendingReply<Message>, KernelError> {
        self.ensure_active()?;
        self.0
            .kernel
            .make_bidirectional(message, &self.own_address(), timeout, None)
    }

    /// Starts a message chain from this environment.
    ///
    /// Pass `None` for the kernel's configured timeout. See [`Kernel::make_chain`].
    pub fn make_chain(
        &self,
        message: &mut Message,
        timeout: impl Into<Option<Duration>>,
    ) -> Result<PendingReply<ChainReply>, KernelError> {
        self.ensure_active()?;
        self.0
            .kernel
            .make_chain(message, &self.own_address(), timeout, None)
    }

    /// Deactivates the environment.
    ///
    /// A local environment also drops its channel and the middleware registered at
    /// its address. Removing twice is a no-op.
    pub fn remove(&self) {
        if !self.0.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Scope::Local { address, channel } = &self.0.scope {
            // Already gone if the kernel closed or the channel removed itself.
            let _ = self.0.kernel.unregister_channel(*channel);
            self.0.kernel.clear_middleware(address);
            debug!(address = %address.to_compact(), "environment removed");
        }
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("own_address", &self.own_address().to_compact())
            .field("active", &self.is_active())
            .finish()
    }
}

impl Kernel {
    /// The environment of the local address; its `send` is [`Kernel::send`].
    pub fn kernel_environment(&self) -> Environment {
        Environment(Arc::new(EnvironmentInner {
            kernel: self.clone(),
            scope: Scope::Kernel,
            active: AtomicBool::new(true),
        }))
    }

    /// Creates an environment at `address`.
    ///
    /// Registers an in-process channel at `address` that hands every message routed
    /// there to `on_receive`, and a middleware marking `at_target` for messages
    /// addressed to it. Fails with [`KernelError::AddressAlreadyInUse`] if `address`
    /// is the local address or already owns a channel, such as another live
    /// environment.
    pub fn create_environment<F>(
        &self,
        address: Address,
        on_receive: F,
    ) -> Result<Environment, KernelError>
    where
        F: Fn(Message) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.ensure_open()?;
        let channel = ChannelId(self.next_id());
        let local = LocalChannel {
            address: address.clone(),
            on_receive: Arc::new(on_receive),
        };
        self.0.registry.lock().claim(
            &address,
            Arc::new(TargetMarker),
            RegisteredChannel {
                id: channel,
                channel: Arc::new(local),
            },
        )?;
        trace!(address = %address.to_compact(), "environment created");
        Ok(Environment(Arc::new(EnvironmentInner {
            kernel: self.clone(),
            scope: Scope::Local { address, channel },
            active: AtomicBool::new(true),
        })))
    }
}
