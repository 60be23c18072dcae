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

use async_trait::async_trait;

use crate::common::{Direction, KernelError, LocalComputedMessageData};
use crate::message::Message;
use crate::traits::{Flow, Middleware, MiddlewareContext};

/// Runs the wrapped middleware only when its predicate holds for the message's
/// routing flags. Messages without routing flags are passed over.
pub struct Guarded<P, M> {
    predicate: P,
    inner: M,
}

#[async_trait]
impl<P, M> Middleware for Guarded<P, M>
where
    P: Fn(&LocalComputedMessageData) -> bool + Send + Sync + 'static,
    M: Middleware,
{
    async fn apply(
        &self,
        message: &mut Message,
        cx: &MiddlewareContext,
    ) -> Result<Flow, KernelError> {
        let admitted = message.local().is_some_and(|local| (self.predicate)(local));
        if !admitted {
            return Ok(Flow::Continue);
        }
        self.inner.apply(message, cx).await
    }
}

impl<P, M: fmt::Debug> fmt::Debug for Guarded<P, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Guarded").field("inner", &self.inner).finish()
    }
}

type Flag = fn(&LocalComputedMessageData) -> bool;

fn incoming(local: &LocalComputedMessageData) -> bool {
    local.direction == Direction::Incoming
}

fn outgoing(local: &LocalComputedMessageData) -> bool {
    local.direction == Direction::Outgoing
}

fn at_target(local: &LocalComputedMessageData) -> bool {
    local.at_target
}

fn at_source(local: &LocalComputedMessageData) -> bool {
    local.at_source
}

fn at_source_or_target(local: &LocalComputedMessageData) -> bool {
    local.at_source || local.at_target
}

/// Runs `middleware` only when `predicate` holds.
pub fn guard<P, M>(predicate: P, middleware: M) -> Guarded<P, M>
where
    P: Fn(&LocalComputedMessageData) -> bool + Send + Sync + 'static,
    M: Middleware,
{
    Guarded {
        predicate,
        inner: middleware,
    }
}

/// Runs `middleware` only for messages whose direction is incoming.
pub fn guard_incoming<M: Middleware>(middleware: M) -> Guarded<Flag, M> {
    guard(incoming as Flag, middleware)
}

/// Runs `middleware` only for messages whose direction is outgoing.
pub fn guard_outgoing<M: Middleware>(middleware: M) -> Guarded<Flag, M> {
    guard(outgoing as Flag, middleware)
}

/// Runs `middleware` only once the message has reached its target.
///
/// The guard correlation middleware runs under.
pub fn guard_at_target<M: Middleware>(middleware: M) -> Guarded<Flag, M> {
    guard(at_target as Flag, middleware)
}

/// Runs `middleware` only on the traversal where the message was created.
pub fn guard_at_source<M: Middleware>(middleware: M) -> Guarded<Flag, M> {
    guard(at_source as Flag, middleware)
}

/// Runs `middleware` at the message's source or at its target, skipping relays.
pub fn guard_at_source_or_target<M: Middleware>(middleware: M) -> Guarded<Flag, M> {
    guard(at_source_or_target as Flag, middleware)
}
