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
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::common::KernelError;
use crate::message::Message;
use crate::middleware::MiddlewareGroup;
use crate::traits::{Flow, Middleware, MiddlewareContext};

/// Named buckets of middleware run as one stage.
///
/// Buckets run in the order their keys were declared, each as a
/// [`MiddlewareGroup`]; the first interrupt in any bucket ends the stage. A
/// bucket can be reached by key and extended after the partition was registered.
///
/// ```ignore
/// let partition = Partition::new(["auth", "protocols"]);
/// kernel.use_middleware(&address, MiddlewarePosition::All, partition.clone());
/// partition.get("protocols").push(ProtocolMiddleware::new(Arc::new(PingProtocol)));
/// ```
#[derive(Clone, Default)]
pub struct Partition {
    buckets: Arc<RwLock<Vec<(String, MiddlewareGroup)>>>,
}

impl Partition {
    /// A partition with one empty bucket per key.
    pub fn new<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let partition = Self::default();
        for key in keys {
            partition.get(key);
        }
        partition
    }

    /// Adds `middleware` to the bucket named `key`.
    pub fn with<M: Middleware>(self, key: impl Into<String>, middleware: M) -> Self {
        self.get(key).push(middleware);
        self
    }

    /// The bucket named `key`, appended as the last bucket if it does not exist.
    pub fn get(&self, key: impl Into<String>) -> MiddlewareGroup {
        let key = key.into();
        if let Some(group) = self.find(&key) {
            return group;
        }
        let mut buckets = self.buckets.write();
        // Re-check under the write lock.
        if let Some((_, group)) = buckets.iter().find(|(name, _)| *name == key) {
            return group.clone();
        }
        let group = MiddlewareGroup::new();
        buckets.push((key, group.clone()));
        group
    }

    /// The bucket named `key`, if declared.
    pub fn find(&self, key: &str) -> Option<MiddlewareGroup> {
        self.buckets
            .read()
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, group)| group.clone())
    }

    /// Declared keys in run order.
    pub fn keys(&self) -> Vec<String> {
        self.buckets
            .read()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }
}

#[async_trait]
impl Middleware for Partition {
    async fn apply(
        &self,
        message: &mut Message,
        cx: &MiddlewareContext,
    ) -> Result<Flow, KernelError> {
        let groups: Vec<MiddlewareGroup> = self
            .buckets
            .read()
            .iter()
            .map(|(_, group)| group.clone())
            .collect();
        for group in groups {
            if group.apply(message, cx).await? == Flow::Interrupt {
                return Ok(Flow::Interrupt);
            }
        }
        Ok(Flow::Continue)
    }
}

impl fmt::Debug for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partition")
            .field("keys", &self.keys())
            .finish()
    }
}
