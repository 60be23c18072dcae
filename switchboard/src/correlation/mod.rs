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

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::common::{Address, KernelError};
use crate::message::Message;

pub use bidirectional::{
    BidirectionalEnvelope, BidirectionalHandler, BidirectionalMiddleware, BidirectionalRequest,
    Responder, BIDIRECTIONAL_META_KEY,
};
pub use chain::{
    ChainEnvelope, ChainHandler, ChainMiddleware, ChainReply, ChainResponder, CHAIN_META_KEY,
};
pub(crate) use pending::CorrelationTable;
pub use pending::PendingReply;

mod bidirectional;
mod chain;
mod pending;

/// Bidirectional entries: one per request id and awaiting address.
pub(crate) type BidirectionalKey = (String, Address);

/// Chain entries: one per chain id and hop index.
pub(crate) type ChainKey = (String, u64);

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

fn as_millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

fn stamp<T: Serialize>(message: &mut Message, key: &str, envelope: &T) -> Result<(), KernelError> {
    let value = serde_json::to_value(envelope).map_err(|e| KernelError::MessageSerialization {
        reason: e.to_string(),
    })?;
    message.meta_data_mut().insert(key.to_string(), value);
    Ok(())
}
