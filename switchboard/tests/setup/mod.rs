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

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

use parking_lot::Mutex;
use switchboard::prelude::*;
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

// Ensures tracing initialization happens only once across all tests.
static INIT: Once = Once::new();

/// Installs a global subscriber writing to `logs/switchboard_tests.txt`.
///
/// `RUST_LOG` overrides the default filter.
pub fn initialize_tracing() {
    INIT.call_once(|| {
        std::fs::create_dir_all("logs").expect("could not create logs dir");

        let file_appender =
            RollingFileAppender::new(Rotation::NEVER, "logs", "switchboard_tests.txt");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // Keep the writer alive until the process exits.
        Box::leak(Box::new(guard));

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info")
                .add_directive("switchboard::common=trace".parse().unwrap())
                .add_directive("switchboard::correlation=trace".parse().unwrap())
                .add_directive("switchboard::protocols=debug".parse().unwrap())
                .add_directive("switchboard_test=trace".parse().unwrap())
        });

        let subscriber = FmtSubscriber::builder()
            .with_span_events(FmtSpan::NONE)
            .with_max_level(Level::TRACE)
            .compact()
            .with_line_number(true)
            .without_time()
            .with_target(true)
            .with_env_filter(filter)
            .with_writer(non_blocking)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .expect("setting default subscriber failed");
    });
}

/// A kernel with default configuration and a fixed local address.
pub fn kernel(host: &str) -> Kernel {
    Kernel::with_local_address(Address::new(host, "kernel"), SwitchboardConfig::default())
}

/// Content map with a single `text` entry.
pub fn text(value: &str) -> ContentMap {
    let mut content = ContentMap::new();
    content.insert("text".to_string(), value.into());
    content
}

/// Reads the `text` entry of a message's content.
pub fn text_of(message: &Message) -> Option<String> {
    message
        .content()
        .to_map()
        .ok()?
        .get("text")?
        .as_str()
        .map(str::to_string)
}

/// Records the names of middleware as they run.
#[derive(Clone, Default)]
pub struct Trail(Arc<Mutex<Vec<&'static str>>>);

impl Trail {
    pub fn stage(&self, name: &'static str, flow: Flow) -> impl Middleware {
        let trail = self.clone();
        middleware_fn(move |_, _| {
            trail.0.lock().push(name);
            Ok(flow)
        })
    }

    pub fn entries(&self) -> Vec<&'static str> {
        self.0.lock().clone()
    }
}

/// Collects messages handed to an environment's receive callback.
#[derive(Clone, Default)]
pub struct Inbox {
    messages: Arc<Mutex<Vec<Message>>>,
    count: Arc<AtomicUsize>,
}

impl Inbox {
    pub fn receiver(&self) -> impl Fn(Message) -> anyhow::Result<()> + Send + Sync + 'static {
        let inbox = self.clone();
        move |message| {
            inbox.count.fetch_add(1, Ordering::SeqCst);
            inbox.messages.lock().push(message);
            Ok(())
        }
    }

    pub fn len(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().clone()
    }
}
