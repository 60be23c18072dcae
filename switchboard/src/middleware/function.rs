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

use async_trait::async_trait;

use crate::common::KernelError;
use crate::message::Message;
use crate::traits::{Flow, Middleware, MiddlewareContext};

/// Middleware backed by a synchronous closure. Built with [`middleware_fn`].
#[derive(Clone)]
pub struct MiddlewareFn<F>(F);

/// Wraps a closure as a [`Middleware`].
///
/// ```ignore
/// kernel.use_middleware(&address, MiddlewarePosition::All, middleware_fn(|message, _cx| {
///     message.meta_data_mut().insert("seen".into(), true.into());
///     Ok(Flow::Continue)
/// }));
/// ```
pub fn middleware_fn<F>(f: F) -> MiddlewareFn<F>
where
    F: Fn(&mut Message, &MiddlewareContext) -> Result<Flow, KernelError> + Send + Sync + 'static,
{
    MiddlewareFn(f)
}

#[async_trait]
impl<F> Middleware for MiddlewareFn<F>
where
    F: Fn(&mut Message, &MiddlewareContext) -> Result<Flow, KernelError> + Send + Sync + 'static,
{
    async fn apply(
        &self,
        message: &mut Message,
        cx: &MiddlewareContext,
    ) -> Result<Flow, KernelError> {
        (self.0)(message, cx)
    }
}
