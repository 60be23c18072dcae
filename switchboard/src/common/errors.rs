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
use std::time::Duration;

use derive_new::new;

use crate::common::{Address, ChannelId};
use crate::message::{Message, SerializedMessage};

/// Error reported by a [`CommunicationChannel`](crate::traits::CommunicationChannel)
/// when it cannot hand a message to its transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTransmissionError {
    /// Human readable description of the transport failure.
    pub reason: String,
}

impl ChannelTransmissionError {
    /// Creates a transmission error with the given reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ChannelTransmissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel transmission failed: {}", self.reason)
    }
}

impl std::error::Error for ChannelTransmissionError {}

/// Application level failure surfaced by the protocol layer.
///
/// Either the remote side flagged its reply with `is_error`, or the reply broke the
/// protocol's content contract. When the failure originates in the kernel (for example
/// a chain timeout) the original error is kept in `cause`.
#[derive(Debug, Clone)]
pub struct ProtocolError {
    /// Message describing the failure, as supplied by the remote side when available.
    pub message: String,
    /// Kernel error this protocol error wraps, if any.
    pub cause: Option<Box<KernelError>>,
}

impl ProtocolError {
    /// Creates a protocol error without an underlying cause.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }

    /// Creates a protocol error wrapping a kernel error.
    pub fn with_cause(message: impl Into<String>, cause: KernelError) -> Self {
        Self {
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }

    /// Error returned by protocols that do not answer first requests.
    pub fn not_implemented() -> Self {
        Self::new("Not implemented")
    }

    /// Returns `true` if this error wraps a correlation deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self.cause.as_deref(),
            Some(KernelError::ChainTimeout { .. } | KernelError::Timeout { .. })
        )
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "protocol error: {} ({})", self.message, cause),
            None => write!(f, "protocol error: {}", self.message),
        }
    }
}

impl std::error::Error for ProtocolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

impl From<KernelError> for ProtocolError {
    fn from(error: KernelError) -> Self {
        match error {
            KernelError::Protocol(inner) => inner,
            KernelError::ChainTimeout { .. } => ProtocolError::with_cause("Protocol timeout", error),
            other => ProtocolError::with_cause(other.to_string(), other),
        }
    }
}

/// Errors produced by the routing kernel and the layers built on top of it.
///
/// Every variant carries the data needed to identify the offending address,
/// message or correlation entry.
#[derive(Debug, Clone)]
pub enum KernelError {
    /// No endpoint or channel is registered for the address.
    AddressNotFound {
        /// The unknown address.
        address: Address,
    },
    /// The address already belongs to another registered endpoint.
    AddressAlreadyInUse {
        /// The contested address.
        address: Address,
    },
    /// Text could not be parsed as an address.
    AddressDeserialization {
        /// The rejected input.
        input: String,
        /// Why the input was rejected.
        reason: String,
    },
    /// A message could not be encoded to its wire form.
    MessageSerialization {
        /// Why encoding failed.
        reason: String,
    },
    /// Wire bytes could not be decoded into a message.
    MessageDeserialization {
        /// Why decoding failed.
        reason: String,
    },
    /// A single channel failed to transmit a message.
    ChannelTransmission {
        /// The address the channel serves.
        address: Address,
        /// The error reported by the channel.
        error: ChannelTransmissionError,
    },
    /// Every candidate channel for the address failed.
    NoValidCommunicationChannels {
        /// The address the message was routed to.
        address: Address,
        /// How many channel attempts were made.
        attempts: usize,
        /// The [`KernelError::ChannelTransmission`] of the last failed attempt.
        last_error: Option<Box<KernelError>>,
    },
    /// Inbound bytes or correlation metadata did not have the expected shape.
    InvalidMessageFormat {
        /// What was being decoded.
        description: String,
        /// Why decoding failed.
        reason: String,
    },
    /// A middleware aborted the pipeline.
    Middleware {
        /// The address whose pipeline was running.
        address: Address,
        /// Why the middleware failed.
        reason: String,
    },
    /// The environment was removed or its kernel was closed.
    EnvironmentInactive {
        /// The environment's own address.
        address: Address,
    },
    /// A channel rejected the callbacks the kernel tried to register.
    CallbackRegistration {
        /// The address the channel serves.
        address: Address,
        /// Why registration failed.
        reason: String,
    },
    /// No channel with this id is registered.
    ChannelNotFound {
        /// The unknown channel id.
        id: ChannelId,
    },
    /// A bidirectional request received no reply before its deadline.
    Timeout {
        /// The deadline that elapsed.
        timeout: Duration,
        /// Correlation id of the request.
        msg_uuid: String,
    },
    /// A chain hop received no continuation before its deadline.
    ChainTimeout {
        /// The deadline that elapsed.
        timeout: Duration,
        /// Chain id.
        msg_chain_uid: String,
        /// The hop that was waiting.
        hop: u64,
    },
    /// A chain message arrived for a hop nobody is waiting for.
    UnexpectedChainHop {
        /// Chain id.
        msg_chain_uid: String,
        /// Hop index carried by the message.
        hop: u64,
    },
    /// A newer registration under the same correlation key replaced a pending one.
    CorrelationSuperseded {
        /// The correlation key, rendered for display.
        key: String,
    },
    /// A correlation deadline could not be armed because no Tokio runtime is running.
    RuntimeUnavailable {
        /// Why the runtime lookup failed.
        reason: String,
    },
    /// The kernel was closed.
    KernelClosed,
    /// Failure raised by the protocol layer.
    Protocol(ProtocolError),
}

impl KernelError {
    /// Shorthand for a middleware failure at `address`.
    pub fn middleware(address: &Address, reason: impl Into<String>) -> Self {
        KernelError::Middleware {
            address: address.clone(),
            reason: reason.into(),
        }
    }

    /// Shorthand for malformed inbound data.
    pub fn invalid_format(description: impl Into<String>, reason: impl fmt::Display) -> Self {
        KernelError::InvalidMessageFormat {
            description: description.into(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::AddressNotFound { address } => {
                write!(f, "address not found: {}", address.to_compact())
            }
            KernelError::AddressAlreadyInUse { address } => {
                write!(f, "address already in use: {}", address.to_compact())
            }
            KernelError::AddressDeserialization { input, reason } => {
                write!(f, "invalid address {:?}: {}", input, reason)
            }
            KernelError::MessageSerialization { reason } => {
                write!(f, "message serialization failed: {}", reason)
            }
            KernelError::MessageDeserialization { reason } => {
                write!(f, "message deserialization failed: {}", reason)
            }
            KernelError::ChannelTransmission { address, error } => {
                write!(f, "{} for {}", error, address.to_compact())
            }
            KernelError::NoValidCommunicationChannels {
                address, attempts, ..
            } => write!(
                f,
                "no valid communication channel for {} after {} attempt(s)",
                address.to_compact(),
                attempts
            ),
            KernelError::InvalidMessageFormat {
                description,
                reason,
            } => write!(f, "{} {}", description, reason),
            KernelError::Middleware { address, reason } => {
                write!(f, "middleware failed at {}: {}", address.to_compact(), reason)
            }
            KernelError::EnvironmentInactive { address } => {
                write!(f, "environment {} is inactive", address.to_compact())
            }
            KernelError::CallbackRegistration { address, reason } => write!(
                f,
                "callback registration failed for channel at {}: {}",
                address.to_compact(),
                reason
            ),
            KernelError::ChannelNotFound { id } => write!(f, "channel {} not found", id),
            KernelError::Timeout { timeout, msg_uuid } => write!(
                f,
                "bidirectional message {} timed out after {:?}",
                msg_uuid, timeout
            ),
            KernelError::ChainTimeout {
                timeout,
                msg_chain_uid,
                hop,
            } => write!(
                f,
                "message chain {} timed out at hop {} after {:?}",
                msg_chain_uid, hop, timeout
            ),
            KernelError::UnexpectedChainHop { msg_chain_uid, hop } => write!(
                f,
                "message chain {} has no pending hop before {}",
                msg_chain_uid, hop
            ),
            KernelError::CorrelationSuperseded { key } => {
                write!(f, "correlation entry {} was superseded", key)
            }
            KernelError::RuntimeUnavailable { reason } => {
                write!(f, "no runtime to arm a correlation deadline: {}", reason)
            }
            KernelError::KernelClosed => write!(f, "kernel closed"),
            KernelError::Protocol(error) => write!(f, "{}", error),
        }
    }
}

impl std::error::Error for KernelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            KernelError::ChannelTransmission { error, .. } => Some(error),
            KernelError::NoValidCommunicationChannels {
                last_error: Some(last),
                ..
            } => Some(last.as_ref()),
            KernelError::Protocol(error) => Some(error),
            _ => None,
        }
    }
}

impl From<ProtocolError> for KernelError {
    fn from(error: ProtocolError) -> Self {
        KernelError::Protocol(error)
    }
}

/// A failure raised while processing a message outside of a caller's `send`.
///
/// Delivered to error listeners registered with
/// [`Kernel::listen_processing_errors`](crate::common::Kernel::listen_processing_errors).
#[derive(Debug, new)]
pub struct MessageProcessingError {
    /// The underlying failure.
    pub error: anyhow::Error,
    /// The wire form of the message, when the failure happened before decoding.
    pub serialized: Option<SerializedMessage>,
    /// The decoded message, when available.
    pub message: Option<Message>,
}

impl fmt::Display for MessageProcessingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(
                f,
                "processing message for {} failed: {}",
                message.target().to_compact(),
                self.error
            ),
            None => write!(f, "processing message failed: {}", self.error),
        }
    }
}

impl std::error::Error for MessageProcessingError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_timeout_becomes_protocol_timeout() {
        let error = ProtocolError::from(KernelError::ChainTimeout {
            timeout: Duration::from_millis(10),
            msg_chain_uid: "chain".to_string(),
            hop: 1,
        });
        assert_eq!(error.message, "Protocol timeout");
        assert!(error.is_timeout());
    }

    #[test]
    fn protocol_error_round_trips_through_kernel_error() {
        let kernel_error = KernelError::from(ProtocolError::new("remote failure"));
        let error = ProtocolError::from(kernel_error);
        assert_eq!(error.message, "remote failure");
        assert!(error.cause.is_none());
    }
}
