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

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::trace;

use crate::common::{Address, KernelError, LocalComputedMessageData};
use crate::message::{ContentMap, MessageContent, SerializedMessage};

/// Open metadata attached to a message.
///
/// Correlation and protocol layers keep their envelopes under dedicated keys.
pub type MetaData = Map<String, Value>;

/// On-the-wire shape of a message.
#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    target: String,
    content: String,
    #[serde(default)]
    meta_data: MetaData,
}

/// A routable message: target address, content and metadata.
///
/// Messages move by value through the kernel. Whichever layer currently holds one
/// may mutate it; the routing flags for the current delivery attempt travel with it
/// in [`local`](Self::local).
#[derive(Debug, Clone)]
pub struct Message {
    target: Address,
    content: MessageContent,
    meta_data: MetaData,
    local: Option<LocalComputedMessageData>,
}

impl Message {
    /// Creates a message with structured content.
    pub fn new(target: Address, content: ContentMap) -> Self {
        Self::with_content(target, MessageContent::from_map(content))
    }

    /// Creates a message whose content is raw JSON text.
    pub fn from_raw(target: Address, raw: impl Into<String>) -> Self {
        Self::with_content(target, MessageContent::from_raw(raw))
    }

    /// Creates a message from prepared content.
    pub fn with_content(target: Address, content: MessageContent) -> Self {
        Self {
            target,
            content,
            meta_data: MetaData::new(),
            local: None,
        }
    }

    /// Adds a metadata entry, builder style.
    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta_data.insert(key.into(), value);
        self
    }

    /// The address this message is routed to.
    pub fn target(&self) -> &Address {
        &self.target
    }

    /// Redirects the message.
    pub fn set_target(&mut self, target: Address) {
        self.target = target;
    }

    /// The content in whatever forms are currently cached.
    pub fn content(&self) -> &MessageContent {
        &self.content
    }

    /// Structured content, parsed and cached on first access.
    pub fn materialize(&mut self) -> Result<&ContentMap, KernelError> {
        self.content.materialize()
    }

    /// Replaces the content.
    pub fn set_content(&mut self, content: MessageContent) {
        self.content = content;
    }

    /// The metadata map.
    pub fn meta_data(&self) -> &MetaData {
        &self.meta_data
    }

    /// Mutable access to the metadata map.
    pub fn meta_data_mut(&mut self) -> &mut MetaData {
        &mut self.meta_data
    }

    /// Routing flags for the current delivery attempt, once routing has started.
    pub fn local(&self) -> Option<&LocalComputedMessageData> {
        self.local.as_ref()
    }

    /// Mutable routing flags for the current delivery attempt.
    pub fn local_mut(&mut self) -> Option<&mut LocalComputedMessageData> {
        self.local.as_mut()
    }

    pub(crate) fn set_local(&mut self, local: LocalComputedMessageData) {
        self.local = Some(local);
    }

    /// Returns `true` when routing flags mark this hop as the message's target.
    pub fn is_at_target(&self) -> bool {
        self.local.as_ref().is_some_and(|local| local.at_target)
    }

    /// Encodes the message to its wire form, caching the raw content.
    pub fn serialize(&mut self) -> Result<SerializedMessage, KernelError> {
        let content = self.content.encode()?.to_string();
        let wire = WireMessage {
            target: self.target.to_string(),
            content,
            meta_data: self.meta_data.clone(),
        };
        serde_json::to_string(&wire)
            .map(SerializedMessage::from)
            .map_err(|e| KernelError::MessageSerialization {
                reason: e.to_string(),
            })
    }

    /// Decodes a message from its wire form.
    ///
    /// The content stays raw until it is first materialized.
    pub fn deserialize(serialized: &SerializedMessage) -> Result<Self, KernelError> {
        let wire: WireMessage = serde_json::from_str(serialized.as_str()).map_err(|e| {
            KernelError::MessageDeserialization {
                reason: e.to_string(),
            }
        })?;
        let target =
            Address::deserialize(&wire.target).map_err(|e| KernelError::MessageDeserialization {
                reason: e.to_string(),
            })?;
        trace!(target = %target.to_compact(), "decoded message");
        Ok(Self {
            target,
            content: MessageContent::from_raw(wire.content),
            meta_data: wire.meta_data,
            local: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn content(value: Value) -> ContentMap {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn wire_round_trip_keeps_target_content_and_meta() {
        let target = Address::new("host", "component");
        let body = content(json!({"text": "hi", "list": [1, 2, 3]}));
        let mut message =
            Message::new(target.clone(), body.clone()).with_meta("trace", json!({"id": 7}));

        let wire = message.serialize().unwrap();
        let mut decoded = Message::deserialize(&wire).unwrap();

        assert_eq!(decoded.target(), &target);
        assert_eq!(decoded.materialize().unwrap(), &body);
        assert_eq!(decoded.meta_data()["trace"], json!({"id": 7}));
        assert!(decoded.local().is_none());
    }

    #[test]
    fn wire_shape_matches_the_documented_format() {
        let mut message = Message::from_raw(Address::new("a", "b"), r#"{"k":1}"#);
        let wire: Value = serde_json::from_str(message.serialize().unwrap().as_str()).unwrap();
        assert_eq!(wire["target"], json!("primary_id: a\nsecondary_id: b"));
        assert_eq!(wire["content"], json!(r#"{"k":1}"#));
        assert_eq!(wire["meta_data"], json!({}));
    }

    #[test]
    fn malformed_wire_text_is_rejected() {
        for text in [
            "not json",
            r#"{"content": "{}"}"#,
            r#"{"target": "primary_id: a\nsecondary_id: b"}"#,
            r#"{"target": "garbage", "content": "{}"}"#,
        ] {
            let error = Message::deserialize(&SerializedMessage::from(text)).unwrap_err();
            assert!(matches!(error, KernelError::MessageDeserialization { .. }), "{text}");
        }
    }

    #[test]
    fn missing_meta_data_defaults_to_empty() {
        let text = r#"{"target": "primary_id: a\nsecondary_id: b", "content": "{}"}"#;
        let message = Message::deserialize(&SerializedMessage::from(text)).unwrap();
        assert!(message.meta_data().is_empty());
    }
}
