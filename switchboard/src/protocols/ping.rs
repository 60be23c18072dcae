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

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::common::{Address, Environment, ProtocolError};
use crate::protocols::{send_first_message, Protocol, ProtocolDescriptor, ProtocolMessage};

/// Liveness check: sends `"Ping"` and expects `"Pong"`.
///
/// Register `ProtocolMiddleware::new(Arc::new(PingProtocol))` at both the pinging
/// and the answering address.
#[derive(Debug, Default, Clone, Copy)]
pub struct PingProtocol;

impl PingProtocol {
    /// Pings `address` using the kernel's configured protocol timeout.
    pub async fn run(&self, env: &Environment, address: Address) -> Result<(), ProtocolError> {
        let timeout = env.kernel().config().protocol_timeout();
        self.run_with_timeout(env, address, timeout).await
    }

    #[instrument(skip_all, fields(target = %address.to_compact(), ?timeout))]
    pub async fn run_with_timeout(
        &self,
        env: &Environment,
        address: Address,
        timeout: Duration,
    ) -> Result<(), ProtocolError> {
        let reply = send_first_message(self, env, address, json!("Ping"), timeout)
            .await?
            .await?;
        match reply.data {
            Value::String(ref pong) if pong == "Pong" => {
                debug!("pong received");
                Ok(())
            }
            other => Err(ProtocolError::new(format!("Unexpected ping reply: {other}"))),
        }
    }
}

#[async_trait]
impl Protocol for PingProtocol {
    fn descriptor(&self) -> ProtocolDescriptor {
        ProtocolDescriptor::new("ping", "ping", "1.0.0")
    }

    async fn on_first_request(&self, message: ProtocolMessage) -> Result<(), ProtocolError> {
        // The exchange ends here; nothing follows the pong.
        message.respond(json!("Pong")).await?.cancel();
        Ok(())
    }
}
