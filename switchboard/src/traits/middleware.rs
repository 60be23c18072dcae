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

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

use crate::common::{Address, Kernel, KernelError};
use crate::message::Message;

/// Result of running a middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flow {
    /// Hand the message to the next stage.
    Continue,
    /// Stop the pipeline; later middleware and local delivery are skipped.
    Interrupt,
}

/// Where in a traversal a middleware applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MiddlewarePosition {
    /// While the message is arriving.
    MsgIn,
    /// While the message is departing.
    MsgOut,
    /// Both directions.
    All,
}

impl MiddlewarePosition {
    /// Returns `true` if a middleware registered at `self` runs for a `requested` traversal.
    pub fn applies_to(self, requested: MiddlewarePosition) -> bool {
        self == MiddlewarePosition::All || self == requested
    }
}

/// What a middleware can see besides the message itself.
#[derive(Debug, Clone)]
pub struct MiddlewareContext {
    kernel: Kernel,
    address: Address,
    position: MiddlewarePosition,
}

impl MiddlewareContext {
    pub(crate) fn new(kernel: Kernel, address: Address, position: MiddlewarePosition) -> Self {
        Self {
            kernel,
            address,
            position,
        }
    }

    /// The kernel running the pipeline.
    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// The endpoint address whose pipeline is running.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// The position requested for this traversal.
    pub fn position(&self) -> MiddlewarePosition {
        self.position
    }
}

/// A stage run against a message at an endpoint.
///
/// Returning [`Flow::Interrupt`] consumes the message: later middleware do not run and
/// the message is not delivered further. Returning an error aborts the pipeline and
/// surfaces the error to whoever started the traversal.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    /// Inspects or transforms `message`.
    async fn apply(
        &self,
        message: &mut Message,
        cx: &MiddlewareContext,
    ) -> Result<Flow, KernelError>;
}

#[async_trait]
impl<M: Middleware + ?Sized> Middleware for Arc<M> {
    async fn apply(
        &self,
        message: &mut Message,
        cx: &MiddlewareContext,
    ) -> Result<Flow, KernelError> {
        (**self).apply(message, cx).await
    }
}

#[async_trait]
impl<M: Middleware + ?Sized> Middleware for Box<M> {
    async fn apply(
        &self,
        message: &mut Message,
        cx: &MiddlewareContext,
    ) -> Result<Flow, KernelError> {
        (**self).apply(message, cx).await
    }
}

/// Marks `at_target` on messages whose target is the endpoint running the pipeline.
///
/// Installed automatically at every environment's own address.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct TargetMarker;

#[async_trait]
impl Middleware for TargetMarker {
    async fn apply(
        &self,
        message: &mut Message,
        cx: &MiddlewareContext,
    ) -> Result<Flow, KernelError> {
        if message.target() == cx.address() {
            if let Some(local) = message.local_mut() {
                local.at_target = true;
            }
        }
        Ok(Flow::Continue)
    }
}

static_assertions::assert_impl_all!(MiddlewareContext: Send, Sync, Debug);
