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

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::traits::MiddlewarePosition;

/// Whether a message is arriving at or departing from the local node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// The message targets the local address.
    Incoming,
    /// The message targets some other address.
    Outgoing,
}

impl From<Direction> for MiddlewarePosition {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Incoming => MiddlewarePosition::MsgIn,
            Direction::Outgoing => MiddlewarePosition::MsgOut,
        }
    }
}

/// Type-keyed values attached to a single delivery attempt.
#[derive(Clone, Default)]
pub struct Extensions(HashMap<TypeId, Arc<dyn Any + Send + Sync>>);

impl Extensions {
    /// Stores `value`, replacing any previous value of the same type.
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) {
        self.0.insert(TypeId::of::<T>(), Arc::new(value));
    }

    /// Returns the stored value of type `T`.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.0
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// Removes the value of type `T`, returning whether one was present.
    pub fn remove<T: Any + Send + Sync>(&mut self) -> bool {
        self.0.remove(&TypeId::of::<T>()).is_some()
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions").field("len", &self.0.len()).finish()
    }
}

/// Routing flags computed for one delivery attempt of a message.
///
/// A fresh record is created when a message is first sent or when it is received
/// from a channel. `at_source` is only `true` on the hop where the message was
/// constructed; `at_target` is raised by the target-marking middleware every
/// environment installs at its own address.
#[derive(Debug, Clone)]
pub struct LocalComputedMessageData {
    /// Direction relative to the local address.
    pub direction: Direction,
    /// The message is being processed where it was constructed.
    pub at_source: bool,
    /// The message is being processed at its target address.
    pub at_target: bool,
    /// Capabilities stashed by middleware, such as correlation responders.
    pub extensions: Extensions,
}

impl LocalComputedMessageData {
    /// Data for a message that was just constructed and is leaving its origin.
    pub fn originating(direction: Direction) -> Self {
        Self {
            direction,
            at_source: true,
            at_target: false,
            extensions: Extensions::default(),
        }
    }

    /// Data for a message that just arrived through a channel.
    pub fn received() -> Self {
        Self {
            direction: Direction::Incoming,
            at_source: false,
            at_target: false,
            extensions: Extensions::default(),
        }
    }

    /// Middleware position matching the current direction.
    pub fn position(&self) -> MiddlewarePosition {
        self.direction.into()
    }
}
