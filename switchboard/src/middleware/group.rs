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
use crate::traits::{Flow, Middleware, MiddlewareContext};

/// An ordered, shared list of middleware that runs as one stage.
///
/// Clones share the same list, so stages pushed after the group was registered
/// take part in later traversals. Runs in order and stops at the first interrupt,
/// which it reports to its caller.
#[derive(Clone, Default)]
pub struct MiddlewareGroup {
    items: Arc<RwLock<Vec<Arc<dyn Middleware>>>>,
    reversed: bool,
}

impl MiddlewareGroup {
    /// An empty group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage.
    pub fn push<M: Middleware>(&self, middleware: M) -> &Self {
        self.items.write().push(Arc::new(middleware));
        self
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    /// Returns `true` when the group has no stages.
    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// A view of the same stages that runs them last to first.
    pub fn reversed(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
            reversed: !self.reversed,
        }
    }

    /// Wraps the group so it never interrupts its caller.
    pub fn non_interrupting(self) -> NonInterrupting<Self> {
        NonInterrupting::new(self)
    }

    /// The group as a single shareable middleware.
    pub fn into_middleware(self) -> Arc<dyn Middleware> {
        Arc::new(self)
    }

    fn snapshot(&self) -> Vec<Arc<dyn Middleware>> {
        let mut stages = self.items.read().clone();
        if self.reversed {
            stages.reverse();
        }
        stages
    }
}

impl<M: Middleware> FromIterator<M> for MiddlewareGroup {
    fn from_iter<I: IntoIterator<Item = M>>(iter: I) -> Self {
        let items: Vec<Arc<dyn Middleware>> = iter
            .into_iter()
            .map(|m| Arc::new(m) as Arc<dyn Middleware>)
            .collect();
        Self {
            items: Arc::new(RwLock::new(items)),
            reversed: false,
        }
    }
}

#[async_trait]
impl Middleware for MiddlewareGroup {
    async fn apply(
        &self,
        message: &mut Message,
        cx: &MiddlewareContext,
    ) -> Result<Flow, KernelError> {
        for stage in self.snapshot() {
            if stage.apply(message, cx).await? == Flow::Interrupt {
                return Ok(Flow::Interrupt);
            }
        }
        Ok(Flow::Continue)
    }
}

impl fmt::Debug for MiddlewareGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareGroup")
            .field("len", &self.len())
            .field("reversed", &self.reversed)
            .finish()
    }
}

/// Runs the wrapped middleware and always reports [`Flow::Continue`].
///
/// An interrupt only ends the wrapped stage; errors still propagate.
#[derive(Debug, Clone)]
pub struct NonInterrupting<M>(M);

impl<M> NonInterrupting<M> {
    /// Wraps `inner` so its interrupts no longer end the enclosing stage.
    pub fn new(inner: M) -> Self {
        Self(inner)
    }

    /// Returns the wrapped middleware.
    pub fn into_inner(self) -> M {
        self.0
    }
}

#[async_trait]
impl<M: Middleware> Middleware for NonInterrupting<M> {
    async fn apply(
        &self,
        message: &mut Message,
        cx: &MiddlewareContext,
    ) -> Result<Flow, KernelError> {
        self.0.apply(message, cx).await?;
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::common::{Address, Kernel, SwitchboardConfig};
    use crate::message::ContentMap;
    use crate::middleware::middleware_fn;
    use crate::traits::MiddlewarePosition;

    fn recorder(
        log: &Arc<Mutex<Vec<&'static str>>>,
        name: &'static str,
        flow: Flow,
    ) -> impl Middleware {
        let log = Arc::clone(log);
        middleware_fn(move |_, _| {
            log.lock().push(name);
            Ok(flow)
        })
    }

    fn context() -> (MiddlewareContext, Message) {
        let kernel = Kernel::with_config(SwitchboardConfig::default());
        let address = Address::new("host", "group");
        let message = Message::new(address.clone(), ContentMap::new());
        (
            MiddlewareContext::new(kernel, address, MiddlewarePosition::All),
            message,
        )
    }

    #[tokio::test]
    async fn runs_in_order_until_interrupted() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let group = MiddlewareGroup::new();
        group
            .push(recorder(&log, "a", Flow::Continue))
            .push(recorder(&log, "b", Flow::Interrupt))
            .push(recorder(&log, "c", Flow::Continue));
        let (cx, mut message) = context();

        assert_eq!(group.apply(&mut message, &cx).await.unwrap(), Flow::Interrupt);
        assert_eq!(*log.lock(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn reversed_view_shares_stages() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let group = MiddlewareGroup::new();
        let reversed = group.reversed();
        group.push(recorder(&log, "a", Flow::Continue));
        group.push(recorder(&log, "b", Flow::Continue));
        let (cx, mut message) = context();

        assert_eq!(reversed.apply(&mut message, &cx).await.unwrap(), Flow::Continue);
        assert_eq!(*log.lock(), vec!["b", "a"]);
    }

    #[tokio::test]
    async fn non_interrupting_hides_the_interrupt() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let group = MiddlewareGroup::new();
        group.push(recorder(&log, "a", Flow::Interrupt));
        group.push(recorder(&log, "b", Flow::Continue));
        let wrapped = group.non_interrupting();
        let (cx, mut message) = context();

        assert_eq!(wrapped.apply(&mut message, &cx).await.unwrap(), Flow::Continue);
        assert_eq!(*log.lock(), vec!["a"]);
    }
}
