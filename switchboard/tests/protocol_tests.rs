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

//! Named protocols over message chains, including the ping protocol.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use switchboard::prelude::*;
use switchboard_test::prelude::*;

use crate::setup::{initialize_tracing, kernel, Inbox};

mod setup;

/// Answers with whatever it was sent, or with an error when sent `"fail"`.
struct EchoProtocol;

#[async_trait::async_trait]
impl Protocol for EchoProtocol {
    fn descriptor(&self) -> ProtocolDescriptor {
        ProtocolDescriptor::new("echo", json!({"kind": "echo"}), "1.0.0")
    }

    async fn on_first_request(&self, message: ProtocolMessage) -> Result<(), ProtocolError> {
        if message.data == json!("fail") {
            return message.respond_error("echo refused").await;
        }
        message.respond(message.data.clone()).await?.cancel();
        Ok(())
    }
}

/// Declares itself but never answers first requests.
struct SilentProtocol;

impl Protocol for SilentProtocol {
    fn descriptor(&self) -> ProtocolDescriptor {
        ProtocolDescriptor::new("silent", "silent", "0.1.0")
    }
}

fn with_protocol<P: Protocol>(env: &Environment, protocol: P) -> anyhow::Result<()> {
    env.use_middleware(
        MiddlewarePosition::All,
        ProtocolMiddleware::new(Arc::new(protocol)),
    )?;
    Ok(())
}

#[switchboard_test]
async fn test_ping_gets_pong() -> anyhow::Result<()> {
    initialize_tracing();
    let kernel = kernel("a");
    let alice = kernel.create_environment(Address::new("a", "alice"), Inbox::default().receiver())?;
    let bob_inbox = Inbox::default();
    let bob = kernel.create_environment(Address::new("a", "bob"), bob_inbox.receiver())?;
    with_protocol(&alice, PingProtocol)?;
    with_protocol(&bob, PingProtocol)?;

    PingProtocol
        .run_with_timeout(&alice, bob.own_address(), Duration::from_millis(200))
        .await?;
    assert_eq!(bob_inbox.len(), 0);
    Ok(())
}

#[switchboard_test]
async fn test_ping_without_a_peer_protocol_times_out() -> anyhow::Result<()> {
    initialize_tracing();
    let kernel = kernel("a");
    let alice = kernel.create_environment(Address::new("a", "alice"), Inbox::default().receiver())?;
    let bob_inbox = Inbox::default();
    let bob = kernel.create_environment(Address::new("a", "bob"), bob_inbox.receiver())?;
    with_protocol(&alice, PingProtocol)?;

    let error = PingProtocol
        .run_with_timeout(&alice, bob.own_address(), Duration::from_millis(30))
        .await
        .expect_err("nobody answers the ping");
    assert!(error.is_timeout());
    assert_eq!(error.message, "Protocol timeout");
    assert!(matches!(
        error.cause.as_deref(),
        Some(KernelError::ChainTimeout { hop: 1, .. })
    ));
    // The ping reached bob as an ordinary message.
    assert_eq!(bob_inbox.len(), 1);
    Ok(())
}

#[switchboard_test]
async fn test_protocol_round_trip_carries_data() -> anyhow::Result<()> {
    initialize_tracing();
    let kernel = kernel("a");
    let alice = kernel.create_environment(Address::new("a", "alice"), Inbox::default().receiver())?;
    let bob = kernel.create_environment(Address::new("a", "bob"), Inbox::default().receiver())?;
    with_protocol(&alice, EchoProtocol)?;
    with_protocol(&bob, EchoProtocol)?;

    let reply = send_first_message(
        &EchoProtocol,
        &alice,
        bob.own_address(),
        json!({"greeting": "hello"}),
        Duration::from_millis(200),
    )
    .await?
    .await?;
    assert_eq!(reply.data, json!({"greeting": "hello"}));
    assert_eq!(reply.envelope.descriptor, EchoProtocol.descriptor());
    assert!(!reply.envelope.is_error);
    Ok(())
}

#[switchboard_test]
async fn test_error_replies_become_protocol_errors() -> anyhow::Result<()> {
    initialize_tracing();
    let kernel = kernel("a");
    let alice = kernel.create_environment(Address::new("a", "alice"), Inbox::default().receiver())?;
    let bob = kernel.create_environment(Address::new("a", "bob"), Inbox::default().receiver())?;
    with_protocol(&alice, EchoProtocol)?;
    with_protocol(&bob, EchoProtocol)?;

    let error = send_first_message(
        &EchoProtocol,
        &alice,
        bob.own_address(),
        json!("fail"),
        Duration::from_millis(200),
    )
    .await?
    .await
    .expect_err("echo refuses");
    assert_eq!(error.message, "echo refused");
    assert!(!error.is_timeout());
    Ok(())
}

#[switchboard_test]
async fn test_unanswered_first_request_fails_the_send() -> anyhow::Result<()> {
    initialize_tracing();
    let kernel = kernel("a");
    let alice = kernel.create_environment(Address::new("a", "alice"), Inbox::default().receiver())?;
    let bob = kernel.create_environment(Address::new("a", "bob"), Inbox::default().receiver())?;
    with_protocol(&bob, SilentProtocol)?;

    let error = send_first_message(
        &SilentProtocol,
        &alice,
        bob.own_address(),
        json!(null),
        Duration::from_millis(200),
    )
    .await
    .expect_err("the silent protocol does not answer");
    assert_eq!(error.message, "Not implemented");
    assert_eq!(kernel.pending_chains(), 0);
    Ok(())
}

#[switchboard_test]
async fn test_other_protocols_fall_through() -> anyhow::Result<()> {
    initialize_tracing();
    let kernel = kernel("a");
    let alice = kernel.create_environment(Address::new("a", "alice"), Inbox::default().receiver())?;
    let bob_inbox = Inbox::default();
    let bob = kernel.create_environment(Address::new("a", "bob"), bob_inbox.receiver())?;
    with_protocol(&bob, PingProtocol)?;

    let reply = send_first_message(
        &EchoProtocol,
        &alice,
        bob.own_address(),
        json!("hello"),
        Duration::from_millis(30),
    )
    .await?;
    assert_eq!(bob_inbox.len(), 1);
    reply.cancel();
    assert_eq!(kernel.pending_chains(), 0);
    Ok(())
}

#[switchboard_test]
async fn test_malformed_protocol_metadata_is_rejected() -> anyhow::Result<()> {
    initialize_tracing();
    let kernel = kernel("a");
    let alice = kernel.create_environment(Address::new("a", "alice"), Inbox::default().receiver())?;
    let bob_inbox = Inbox::default();
    let bob = kernel.create_environment(Address::new("a", "bob"), bob_inbox.receiver())?;
    with_protocol(&bob, EchoProtocol)?;

    let mut content = ContentMap::new();
    content.insert("data".to_string(), json!("hello"));
    let mut message = Message::new(bob.own_address(), content.clone());
    message
        .meta_data_mut()
        .insert(PROTOCOL_META_KEY.to_string(), json!({"protocol": 5}));
    let pending = alice.make_chain(&mut message, Duration::from_millis(200))?;
    let result = alice.send(message).await;
    pending.cancel();
    assert!(matches!(
        result,
        Err(KernelError::InvalidMessageFormat { .. })
    ));
    assert_eq!(bob_inbox.len(), 0);

    // A chain message without protocol metadata is not the protocol's concern.
    let mut plain = Message::new(bob.own_address(), content);
    let pending = alice.make_chain(&mut plain, Duration::from_millis(200))?;
    alice.send(plain).await?;
    pending.cancel();
    assert_eq!(bob_inbox.len(), 1);
    Ok(())
}
