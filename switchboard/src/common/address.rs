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
use std::str::FromStr;

use mti::prelude::*;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::common::KernelError;

const PRIMARY_PREFIX: &str = "primary_id: ";
const SECONDARY_PREFIX: &str = "secondary_id: ";

/// Identifier of a routable endpoint.
///
/// An address is a pair of opaque ids: `primary_id` usually names a host or process,
/// `secondary_id` a component on it. Equality and hashing cover both fields.
///
/// The canonical text form, used on the wire and by [`fmt::Display`], is two lines:
///
/// ```text
/// primary_id: <id>
/// secondary_id: <id>
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    primary_id: String,
    secondary_id: String,
}

impl Address {
    /// Creates an address from its two ids.
    pub fn new(primary_id: impl Into<String>, secondary_id: impl Into<String>) -> Self {
        Self {
            primary_id: primary_id.into(),
            secondary_id: secondary_id.into(),
        }
    }

    /// Creates an address with freshly generated, time-ordered ids.
    pub fn random() -> Self {
        Self::new(
            "host".create_type_id::<V7>().to_string(),
            "component".create_type_id::<V7>().to_string(),
        )
    }

    /// Creates a new address on the same host (same `primary_id`) with a fresh component id.
    pub fn sibling(&self) -> Self {
        Self::new(
            self.primary_id.clone(),
            "component".create_type_id::<V7>().to_string(),
        )
    }

    /// The host-level id.
    pub fn primary_id(&self) -> &str {
        &self.primary_id
    }

    /// The component-level id.
    pub fn secondary_id(&self) -> &str {
        &self.secondary_id
    }

    /// Returns `true` if both addresses share a `primary_id`.
    pub fn same_host(&self, other: &Address) -> bool {
        self.primary_id == other.primary_id
    }

    /// Canonical two-line wire form.
    pub fn serialize(&self) -> String {
        self.to_string()
    }

    /// Parses the canonical two-line wire form.
    pub fn deserialize(input: &str) -> Result<Self, KernelError> {
        input.parse()
    }

    /// Single-line form used in logs and error messages.
    pub fn to_compact(&self) -> String {
        format!("{}/{}", self.primary_id, self.secondary_id)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}\n{}{}",
            PRIMARY_PREFIX, self.primary_id, SECONDARY_PREFIX, self.secondary_id
        )
    }
}

impl FromStr for Address {
    type Err = KernelError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let rejected = |reason: &str| KernelError::AddressDeserialization {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let mut lines = input.split('\n');
        let primary = lines
            .next()
            .and_then(|line| line.strip_prefix(PRIMARY_PREFIX))
            .ok_or_else(|| rejected("missing primary_id line"))?;
        let secondary = lines
            .next()
            .and_then(|line| line.strip_prefix(SECONDARY_PREFIX))
            .ok_or_else(|| rejected("missing secondary_id line"))?;
        if lines.next().is_some() {
            return Err(rejected("unexpected trailing content"));
        }
        if primary.is_empty() || secondary.is_empty() {
            return Err(rejected("empty id"));
        }
        Ok(Address::new(primary, secondary))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
