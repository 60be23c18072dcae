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

//! Routing through the kernel: middleware order, local delivery and channel fallback.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use switchboard::prelude::*;
use switchboard_test::prelude::*;

use crate::setup::{initialize_tracing, kernel, text, text_of, Inbox, Trail};

mod setup;

#[switchboard_test]
async fn test_middleware_runs_in_order_until_interrupted() -> anyhow::Result<()> {
    initialize_tracing();
    let kernel = kernel("a");
    let x = Address::new("a", "x");
    let trail = Trail::default();
    kernel.use_middleware(&x, MiddlewarePosition::All, trail.stage("a", Flow::Continue));
    kernel.use_middleware(&x, MiddlewarePosition::All, trail.stage("b", Flow::Interrupt));
    kernel.use_middleware(&x, MiddlewarePosition::All, trail.stage("c", Flow::Continue));

    let mut message = Message::new(x.clone(), text("hello"));
    let flow = kernel
        .run_middleware(&x, MiddlewarePosition::All, &mut message)
        .await?;
    assert_eq!(flow, Flow::Interrupt);
    assert_eq!(trail.entries(), vec!["a", "b"]);

    // Sending to x is consumed by the same pipeline and needs no channel.
    kernel.send(Message::new(x, text("again"))).await?;
    assert_eq!(trail.entries(), vec!["a", "b", "a", "b"]);
    Ok(())
}

#[switchboard_test]
async fn test_positions_filter_middleware() -> anyhow::Result<()> {
    initialize_tracing();
    let kernel = kernel("a");
    let x = Address::new("a", "x");
    let trail = Trail::default();
    kernel.use_middleware(&x, MiddlewarePosition::MsgIn, trail.stage("in", Flow::Continue));
    kernel.use_middleware(&x, MiddlewarePosition::MsgOut, trail.stage("out", Flow::Continue));
    kernel.use_middleware(&x, MiddlewarePosition::All, trail.stage("all", Flow::Continue));

    let mut message = Message::new(x.clone(), text("hello"));
    kernel
        .run_middleware(&x, MiddlewarePosition::MsgIn, &mut message)
        .await?;
    kernel
        .run_middleware(&x, MiddlewarePosition::MsgOut, &mut message)
        .await?;
    assert_eq!(trail.entries(), vec!["in", "all", "out", "all"]);
    Ok(())
}

#[switchboard_test]
async fn test_interrupt_suppresses_local_delivery() -> anyhow::Result<()> {
    initialize_tracing();
    let kernel = kernel("a");
    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&delivered);
    kernel.listen(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let local = kernel.local_address();
    kernel.send(Message::new(local.clone(), text("first"))).await?;
    assert_eq!(delivered.load(Ordering::SeqCst), 1);

    kernel.use_middleware(
        &local,
        MiddlewarePosition::MsgIn,
        middleware_fn(|_, _| Ok(Flow::Interrupt)),
    );
    kernel.send(Message::new(local, text("second"))).await?;
    assert_eq!(delivered.load(Ordering::SeqCst), 1);
    Ok(())
}

#[switchboard_test]
async fn test_listeners_see_flags_and_content() -> anyhow::Result<()> {
    initialize_tracing();
    let kernel = kernel("a");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    kernel.listen(move |message| {
        let local = message.local().expect("routing flags are set");
        sink.lock().push((text_of(message), local.direction, local.at_source, local.at_target));
        Ok(())
    });

    kernel
        .send(Message::new(kernel.local_address(), text("hi")))
        .await?;
    let seen = seen.lock().clone();
    assert_eq!(seen, vec![(Some("hi".to_string()), Direction::Incoming, true, true)]);
    Ok(())
}

#[switchboard_test]
async fn test_failing_listener_is_reported_and_others_still_run() -> anyhow::Result<()> {
    initialize_tracing();
    let kernel = kernel("a");
    let failures = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&failures);
    kernel.listen_processing_errors(move |failure| sink.lock().push(failure.to_string()));
    kernel.listen(|_| Err(anyhow::anyhow!("listener broke")));
    let reached = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&reached);
    kernel.listen(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    kernel
        .send(Message::new(kernel.local_address(), text("hi")))
        .await?;
    assert_eq!(reached.load(Ordering::SeqCst), 1);
    let failures = failures.lock().clone();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("listener broke"));
    Ok(())
}

#[switchboard_test]
async fn test_channel_fallback_moves_to_next_candidate() -> anyhow::Result<()> {
    initialize_tracing();
    let kernel = kernel("a");
    let y = Address::new("b", "y");
    let broken = Arc::new(TestChannel::new(y.clone()).failing());
    let working = Arc::new(TestChannel::new(y.clone()));
    kernel.register_channel(broken.clone())?;
    kernel.register_channel(working.clone())?;

    kernel.send(Message::new(y, text("hello"))).await?;
    assert_eq!(broken.attempts(), 1);
    assert_eq!(working.attempts(), 1);
    assert!(broken.sent().is_empty());

    let delivered = Message::deserialize(&working.sent()[0])?;
    assert_eq!(text_of(&delivered).as_deref(), Some("hello"));
    Ok(())
}

#[switchboard_test]
async fn test_exhausted_candidates_fail_the_send() -> anyhow::Result<()> {
    initialize_tracing();
    let kernel = kernel("a");
    let y = Address::new("b", "y");
    let first = Arc::new(TestChannel::new(y.clone()).failing());
    let second = Arc::new(TestChannel::new(y.clone()).failing());
    kernel.register_channel(first.clone())?;
    kernel.register_channel(second.clone())?;

    let result = kernel.send(Message::new(y.clone(), text("hello"))).await;
    match result {
        Err(KernelError::NoValidCommunicationChannels {
            address,
            attempts,
            last_error,
        }) => {
            assert_eq!(address, y);
            assert_eq!(attempts, 2);
            match last_error.as_deref() {
                Some(KernelError::ChannelTransmission { address, error }) => {
                    assert_eq!(address, &y);
                    assert!(error.reason.contains("failed attempt 1"));
                }
                other => panic!("expected the last channel failure, got {other:?}"),
            }
        }
        other => panic!("expected NoValidCommunicationChannels, got {other:?}"),
    }
    assert_eq!(first.attempts(), 1);
    assert_eq!(second.attempts(), 1);
    Ok(())
}

#[switchboard_test]
async fn test_try_again_retries_the_same_channel() -> anyhow::Result<()> {
    initialize_tracing();
    let kernel = kernel("a");
    let y = Address::new("b", "y");
    let flaky = Arc::new(TestChannel::new(y.clone()).failing_times(1));
    let id = kernel.register_channel(flaky.clone())?;

    let mut message = Message::new(y.clone(), text("hello"));
    let serialized = message.serialize()?;
    let candidates = kernel.out_channels(&y);
    assert_eq!(candidates.ids(), vec![id]);

    let failure = match kernel.try_channels(&serialized, candidates).await {
        ChannelAttempt::Failed(failure) => failure,
        other => panic!("expected a failure, got {other:?}"),
    };
    assert_eq!(failure.channel, id);
    assert!(failure.try_next().is_empty());

    match kernel.try_channels(&serialized, failure.try_again()).await {
        ChannelAttempt::Delivered(delivered) => assert_eq!(delivered, id),
        other => panic!("expected delivery, got {other:?}"),
    }
    assert_eq!(flaky.attempts(), 2);
    assert_eq!(flaky.sent().len(), 1);
    Ok(())
}

#[switchboard_test]
async fn test_unknown_target_is_not_found() -> anyhow::Result<()> {
    initialize_tracing();
    let kernel = kernel("a");
    let nowhere = Address::new("z", "nowhere");
    let result = kernel.send(Message::new(nowhere.clone(), text("hello"))).await;
    assert!(matches!(result, Err(KernelError::AddressNotFound { address }) if address == nowhere));
    assert!(matches!(
        kernel.find(&nowhere),
        Err(KernelError::AddressNotFound { .. })
    ));
    Ok(())
}

#[switchboard_test]
async fn test_host_level_channels_bridge_unknown_components() -> anyhow::Result<()> {
    initialize_tracing();
    let kernel = kernel("a");
    let gateway = Arc::new(TestChannel::new(Address::new("b", "gateway")));
    kernel.register_channel(gateway.clone())?;

    kernel
        .send(Message::new(Address::new("b", "worker"), text("bridged")))
        .await?;
    assert_eq!(gateway.sent().len(), 1);

    // An exact channel wins over the host-level one.
    let worker = Arc::new(TestChannel::new(Address::new("b", "worker")));
    kernel.register_channel(worker.clone())?;
    kernel
        .send(Message::new(Address::new("b", "worker"), text("direct")))
        .await?;
    assert_eq!(gateway.sent().len(), 1);
    assert_eq!(worker.sent().len(), 1);

    // Nothing bridges onto the local host.
    let result = kernel
        .send(Message::new(Address::new("a", "missing"), text("lost")))
        .await;
    assert!(matches!(result, Err(KernelError::AddressNotFound { .. })));
    Ok(())
}

#[switchboard_test]
async fn test_rejected_callbacks_undo_the_registration() -> anyhow::Result<()> {
    initialize_tracing();
    let kernel = kernel("a");
    let y = Address::new("b", "y");
    let channel = Arc::new(TestChannel::new(y.clone()).rejecting_callbacks());

    let result = kernel.register_channel(channel);
    assert!(matches!(
        result,
        Err(KernelError::CallbackRegistration { ref address, .. }) if *address == y
    ));
    assert!(kernel.endpoint(&y).is_none());
    Ok(())
}

#[switchboard_test]
async fn test_channels_can_remove_themselves() -> anyhow::Result<()> {
    initialize_tracing();
    let kernel = kernel("a");
    let y = Address::new("b", "y");
    let channel = Arc::new(TestChannel::new(y.clone()));
    let id = kernel.register_channel(channel.clone())?;
    assert_eq!(kernel.find(&y)?.channels, 1);

    assert!(channel.close());
    assert!(kernel.endpoint(&y).is_none());
    assert!(!channel.close());
    assert!(matches!(
        kernel.unregister_channel(id),
        Err(KernelError::ChannelNotFound { .. })
    ));
    Ok(())
}

#[switchboard_test]
async fn test_inbound_messages_are_forwarded_between_kernels() -> anyhow::Result<()> {
    initialize_tracing();
    let left = kernel("left");
    let right = kernel("right");

    // left reaches right's kernel address through a linked pair of channels.
    let outbound = Arc::new(TestChannel::new(right.local_address()));
    let inbound = Arc::new(TestChannel::new(right.local_address()));
    TestChannel::link(&outbound, &inbound);
    left.register_channel(outbound.clone())?;
    right.register_channel(inbound.clone())?;

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    right.listen(move |message| {
        let local = message.local().expect("routing flags are set");
        sink.lock().push((text_of(message), local.at_source));
        Ok(())
    });

    left.send(Message::new(right.local_address(), text("across")))
        .await?;
    let received = received.lock().clone();
    assert_eq!(received, vec![(Some("across".to_string()), false)]);
    Ok(())
}

#[switchboard_test]
async fn test_relay_kernel_forwards_to_a_third_kernel() -> anyhow::Result<()> {
    initialize_tracing();
    let origin = kernel("a");
    let relay = kernel("b");
    let destination = kernel("c");
    let service = Address::new("c", "service");

    // a reaches the relay through a channel serving the service address.
    let a_out = Arc::new(TestChannel::new(service.clone()).with_direction(ChannelDirection::Out));
    let b_in = Arc::new(TestChannel::new(relay.local_address()).with_direction(ChannelDirection::In));
    TestChannel::link(&a_out, &b_in);
    origin.register_channel(a_out.clone())?;
    relay.register_channel(b_in.clone())?;

    // The relay only knows the destination host's kernel address.
    let b_out = Arc::new(
        TestChannel::new(destination.local_address()).with_direction(ChannelDirection::Out),
    );
    let c_in = Arc::new(
        TestChannel::new(destination.local_address()).with_direction(ChannelDirection::In),
    );
    TestChannel::link(&b_out, &c_in);
    relay.register_channel(b_out.clone())?;
    destination.register_channel(c_in.clone())?;

    let inbox = Inbox::default();
    let _service = destination.create_environment(service.clone(), inbox.receiver())?;

    let trail = Trail::default();
    relay.use_middleware(
        &relay.local_address(),
        MiddlewarePosition::MsgIn,
        trail.stage("relay arrival", Flow::Continue),
    );
    let delivered_locally = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&delivered_locally);
    relay.listen(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    origin.send(Message::new(service.clone(), text("relayed"))).await?;

    assert_eq!(a_out.sent().len(), 1);
    assert_eq!(b_out.sent().len(), 1);
    assert_eq!(trail.entries(), vec!["relay arrival"]);
    assert_eq!(delivered_locally.load(Ordering::SeqCst), 0);
    let received = inbox.messages();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].target(), &service);
    assert_eq!(text_of(&received[0]).as_deref(), Some("relayed"));
    Ok(())
}

#[switchboard_test]
async fn test_undecodable_inbound_messages_are_reported() -> anyhow::Result<()> {
    initialize_tracing();
    let kernel = kernel("a");
    let channel = Arc::new(TestChannel::new(kernel.local_address()));
    kernel.register_channel(channel.clone())?;
    let failures = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&failures);
    kernel.listen_processing_errors(move |failure| {
        assert!(failure.serialized.is_some());
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let result = channel.inject(SerializedMessage::new("not json")).await;
    assert!(result.is_err());
    assert_eq!(failures.load(Ordering::SeqCst), 1);

    let direct = kernel
        .receive(SerializedMessage::new("not json"), &kernel.local_address())
        .await;
    assert!(matches!(direct, Err(KernelError::InvalidMessageFormat { .. })));
    Ok(())
}

#[switchboard_test]
async fn test_relabelling_the_local_address() -> anyhow::Result<()> {
    initialize_tracing();
    let kernel = kernel("a");
    let taken = Address::new("b", "taken");
    kernel.register_channel(Arc::new(TestChannel::new(taken.clone())))?;
    assert!(matches!(
        kernel.set_local_address(taken),
        Err(KernelError::AddressAlreadyInUse { .. })
    ));

    let renamed = Address::new("c", "kernel");
    kernel.set_local_address(renamed.clone())?;
    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&delivered);
    kernel.listen(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    kernel.send(Message::new(renamed, text("hi"))).await?;
    assert_eq!(delivered.load(Ordering::SeqCst), 1);
    Ok(())
}

#[switchboard_test]
async fn test_closed_kernel_refuses_to_route() -> anyhow::Result<()> {
    initialize_tracing();
    let kernel = kernel("a");
    let y = Address::new("b", "y");
    kernel.register_channel(Arc::new(TestChannel::new(y.clone())))?;
    kernel.close();

    assert!(kernel.is_closed());
    assert!(kernel.cancellation_token().is_cancelled());
    assert!(kernel.endpoint(&y).is_none());
    let result = kernel.send(Message::new(y, text("late"))).await;
    assert!(matches!(result, Err(KernelError::KernelClosed)));
    Ok(())
}
