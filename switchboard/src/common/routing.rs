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

use std::sync::Arc;

use tracing::{instrument, trace};

use crate::common::{Address, Direction, Kernel, KernelError, LocalComputedMessageData};
use crate::message::{Message, SerializedMessage};
use crate::traits::{Flow, Middleware, MiddlewareContext, MiddlewarePosition};

impl Kernel {
    /// Routes a message toward its target.
    ///
    /// 1. Computes the routing flags. A message without flags is at its source; a
    ///    message that arrived through `receive` keeps its flags with `at_source`
    ///    cleared. The direction is recomputed either way.
    /// 2. Runs the local address's middleware for that direction.
    /// 3. Delivers to local listeners if the target is the local address.
    /// 4. Runs the target's middleware.
    /// 5. Serializes once and hands the message to the target's channels, moving to
    ///    the next candidate after each failure.
    ///
    /// An interrupting middleware ends routing successfully at steps 2 and 4.
    #[instrument(skip_all, fields(target = %message.target().to_compact()))]
    pub async fn send(&self, mut message: Message) -> Result<(), KernelError> {
        self.ensure_open()?;
        let local_address = self.local_address();
        let direction = if message.target() == &local_address {
            Direction::Incoming
        } else {
            Direction::Outgoing
        };
        match message.local_mut() {
            Some(local) => {
                local.direction = direction;
                local.at_source = false;
            }
            None => message.set_local(LocalComputedMessageData::originating(direction)),
        }
        let position = MiddlewarePosition::from(direction);

        if self
            .run_middleware(&local_address, position, &mut message)
            .await?
            == Flow::Interrupt
        {
            trace!("interrupted by local middleware");
            return Ok(());
        }

        if message.target() == &local_address {
            self.apply_listeners(&message);
            return Ok(());
        }

        let target = message.target().clone();
        if self.run_middleware(&target, position, &mut message).await? == Flow::Interrupt {
            trace!("interrupted by target middleware");
            return Ok(());
        }

        let candidates = self.out_channels(&target);
        if candidates.is_empty() {
            return Err(KernelError::AddressNotFound { address: target });
        }
        let serialized = message.serialize()?;
        self.send_with_retry(&serialized, candidates).await?;
        Ok(())
    }

    /// Entry point for messages arriving through a channel at `at`.
    ///
    /// Decodes the message, runs the `MsgIn` middleware of `at` and, unless one
    /// interrupts, continues routing with [`send`](Self::send). When `at` is not the
    /// message's target this forwards it onward.
    #[instrument(skip_all, fields(at = %at.to_compact()))]
    pub async fn receive(
        &self,
        serialized: SerializedMessage,
        at: &Address,
    ) -> Result<(), KernelError> {
        self.ensure_open()?;
        let mut message = Message::deserialize(&serialized)
            .map_err(|e| KernelError::invalid_format("Inbound message could not be decoded.", e))?;
        message.set_local(LocalComputedMessageData::received());
        self.enter_at(message, at).await
    }

    /// Sends a message constructed at `origin`, a non-local address owned by an
    /// environment. The `MsgIn` middleware of `origin` sees it with `at_source` set.
    pub(crate) async fn dispatch_from(
        &self,
        mut message: Message,
        origin: &Address,
    ) -> Result<(), KernelError> {
        self.ensure_open()?;
        if origin == &self.local_address() {
            return self.send(message).await;
        }
        message.set_local(LocalComputedMessageData::originating(Direction::Incoming));
        self.enter_at(message, origin).await
    }

    async fn enter_at(&self, mut message: Message, at: &Address) -> Result<(), KernelError> {
        if self
            .run_middleware(at, MiddlewarePosition::MsgIn, &mut message)
            .await?
            == Flow::Interrupt
        {
            trace!("interrupted on arrival");
            return Ok(());
        }
        self.send(message).await
    }

    /// Runs the middleware of `address` that apply to `position`, in registration order.
    ///
    /// Stops at the first [`Flow::Interrupt`] or error.
    pub async fn run_middleware(
        &self,
        address: &Address,
        position: MiddlewarePosition,
        message: &mut Message,
    ) -> Result<Flow, KernelError> {
        let stages: Vec<Arc<dyn Middleware>> = {
            let registry = self.0.registry.lock();
            registry.middleware_for(address, position)
        };
        if stages.is_empty() {
            return Ok(Flow::Continue);
        }
        let cx = MiddlewareContext::new(self.clone(), address.clone(), position);
        for stage in stages {
            if stage.apply(message, &cx).await? == Flow::Interrupt {
                return Ok(Flow::Interrupt);
            }
        }
        Ok(Flow::Continue)
    }
}
