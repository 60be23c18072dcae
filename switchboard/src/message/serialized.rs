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

/// A message in its JSON wire form, as handed to and received from channels.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SerializedMessage(String);

impl SerializedMessage {
    /// Wraps wire text without validating it.
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// The wire text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the wrapper, returning the wire text.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl From<String> for SerializedMessage {
    fn from(text: String) -> Self {
        Self(text)
    }
}

impl From<&str> for SerializedMessage {
    fn from(text: &str) -> Self {
        Self(text.to_string())
    }
}

impl AsRef<str> for SerializedMessage {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SerializedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
