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

use serde_json::{Map, Value};

use crate::common::KernelError;

/// Structured message content: a JSON object.
pub type ContentMap = Map<String, Value>;

/// Message content held as raw JSON text, as a parsed object, or both.
///
/// Whichever form the content was created from is authoritative. The other one is
/// computed on demand by [`materialize`](Self::materialize) or [`encode`](Self::encode)
/// and cached, so repeated access does not re-parse.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageContent {
    raw: Option<String>,
    parsed: Option<ContentMap>,
}

impl MessageContent {
    /// Content backed by raw JSON text.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self {
            raw: Some(raw.into()),
            parsed: None,
        }
    }

    /// Content backed by a parsed JSON object.
    pub fn from_map(map: ContentMap) -> Self {
        Self {
            raw: None,
            parsed: Some(map),
        }
    }

    /// The raw form, if it is present.
    pub fn raw(&self) -> Option<&str> {
        self.raw.as_deref()
    }

    /// The parsed form, if it is present.
    pub fn parsed(&self) -> Option<&ContentMap> {
        self.parsed.as_ref()
    }

    /// Returns the parsed form, parsing and caching the raw text if needed.
    pub fn materialize(&mut self) -> Result<&ContentMap, KernelError> {
        if self.parsed.is_none() {
            let map = Self::parse(self.raw.as_deref())?;
            self.parsed = Some(map);
        }
        self.parsed
            .as_ref()
            .ok_or_else(|| KernelError::MessageDeserialization {
                reason: "content has no representation".to_string(),
            })
    }

    /// Returns the raw form, encoding and caching the parsed object if needed.
    pub fn encode(&mut self) -> Result<&str, KernelError> {
        if self.raw.is_none() {
            let raw = Self::render(self.parsed.as_ref())?;
            self.raw = Some(raw);
        }
        self.raw
            .as_deref()
            .ok_or_else(|| KernelError::MessageSerialization {
                reason: "content has no representation".to_string(),
            })
    }

    /// Parsed form without touching the cache.
    pub fn to_map(&self) -> Result<ContentMap, KernelError> {
        match &self.parsed {
            Some(map) => Ok(map.clone()),
            None => Self::parse(self.raw.as_deref()),
        }
    }

    /// Raw form without touching the cache.
    pub fn to_raw(&self) -> Result<String, KernelError> {
        match &self.raw {
            Some(raw) => Ok(raw.clone()),
            None => Self::render(self.parsed.as_ref()),
        }
    }

    fn parse(raw: Option<&str>) -> Result<ContentMap, KernelError> {
        let raw = raw.ok_or_else(|| KernelError::MessageDeserialization {
            reason: "content has no representation".to_string(),
        })?;
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(KernelError::MessageDeserialization {
                reason: format!("content is not a JSON object: {}", other),
            }),
            Err(e) => Err(KernelError::MessageDeserialization {
                reason: e.to_string(),
            }),
        }
    }

    fn render(parsed: Option<&ContentMap>) -> Result<String, KernelError> {
        let map = parsed.ok_or_else(|| KernelError::MessageSerialization {
            reason: "content has no representation".to_string(),
        })?;
        serde_json::to_string(map).map_err(|e| KernelError::MessageSerialization {
            reason: e.to_string(),
        })
    }
}

impl From<ContentMap> for MessageContent {
    fn from(map: ContentMap) -> Self {
        Self::from_map(map)
    }
}
