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

pub use address::Address;
pub use channels::{ChannelAttempt, ChannelCandidates, ChannelFailure, InboundHandle, RemoveHandle};
pub use config::{LimitsConfig, SwitchboardConfig, TimeoutConfig, CONFIG};
pub use environment::Environment;
pub use errors::{ChannelTransmissionError, KernelError, MessageProcessingError, ProtocolError};
pub use kernel::{ErrorListener, Kernel, Listener, ListenerId};
pub use local_data::{Direction, Extensions, LocalComputedMessageData};
pub use registry::{ChannelId, EndpointInfo};

mod address;
mod channels;
mod config;
mod environment;
mod errors;
pub(crate) mod kernel;
mod local_data;
pub(crate) mod registry;
mod routing;
