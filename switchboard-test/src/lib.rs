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

//! Test support for Switchboard kernels.
//!
//! Provides the [`switchboard_test`](prelude::switchboard_test) attribute for async
//! tests and [`TestChannel`], an in-memory communication channel that records what
//! it sends, fails on demand, and can be linked to a channel on another kernel.

pub use channel::TestChannel;

mod channel;

pub mod prelude {
    pub use switchboard_test_macro::switchboard_test;

    pub use crate::TestChannel;
}
