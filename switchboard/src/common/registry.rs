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
use std::sync::Arc;

use crate::common::{Address, KernelError};
use crate::traits::{CommunicationChannel, Middleware, MiddlewarePosition};

/// Identifier handed out when a channel is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub(crate) u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A channel as stored in the registry.
#[derive(Clone)]
pub(crate) struct RegisteredChannel {
    pub(crate) id: ChannelId,
    pub(crate) channel: Arc<dyn CommunicationChannel>,
}

impl fmt::Debug for RegisteredChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredChannel")
            .field("id", &self.id)
            .field("address", &self.channel.address().to_compact())
            .field("direction", &self.channel.direction())
            .finish()
    }
}

/// Snapshot of an endpoint's registration state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointInfo {
    /// The endpoint's address.
    pub address: Address,
    /// Number of registered channels.
    pub channels: usize,
    /// Number of registered middleware.
    pub middlewares: usize,
}

pub(crate) struct Endpoint {
    address: Address,
    channels: Vec<RegisteredChannel>,
    middlewares: Vec<(MiddlewarePosition, Arc<dyn Middleware>)>,
}

impl Endpoint {
    fn new(address: Address) -> Self {
        Self {
            address,
            channels: Vec::new(),
            middlewares: Vec::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.channels.is_empty() && self.middlewares.is_empty()
    }

    fn info(&self) -> EndpointInfo {
        EndpointInfo {
            address: self.address.clone(),
            channels: self.channels.len(),
            middlewares: self.middlewares.len(),
        }
    }

    fn outbound(&self) -> impl Iterator<Item = &RegisteredChannel> {
        self.channels
            .iter()
            .filter(|registered| registered.channel.direction().can_send())
    }
}

/// Endpoints keyed by address, plus the local address of the process.
///
/// Endpoints keep registration order so weak channel matches resolve deterministically.
/// Callers hold the kernel's registry lock for the duration of one method call.
pub(crate) struct Registry {
    local_address: Address,
    endpoints: Vec<Endpoint>,
}

impl Registry {
    pub(crate) fn new(local_address: Address) -> Self {
        Self {
            local_address,
            endpoints: Vec::new(),
        }
    }

    pub(crate) fn local_address(&self) -> &Address {
        &self.local_address
    }

    fn position(&self, address: &Address) -> Option<usize> {
        self.endpoints
            .iter()
            .position(|endpoint| &endpoint.address == address)
    }

    fn find_or_create(&mut self, address: &Address) -> &mut Endpoint {
        let index = match self.position(address) {
            Some(index) => index,
            None => {
                self.endpoints.push(Endpoint::new(address.clone()));
                self.endpoints.len() - 1
            }
        };
        &mut self.endpoints[index]
    }

    fn prune(&mut self) {
        self.endpoints.retain(|endpoint| !endpoint.is_empty());
    }

    pub(crate) fn find(&self, address: &Address) -> Option<EndpointInfo> {
        self.position(address).map(|index| self.endpoints[index].info())
    }

    pub(crate) fn add_channel(&mut self, address: &Address, channel: RegisteredChannel) {
        self.find_or_create(address).channels.push(channel);
    }

    /// Claims `address` for an environment: its target marker and its channel.
    ///
    /// Fails with [`KernelError::AddressAlreadyInUse`] for the local address or an
    /// address that already owns a channel. Middleware registered there beforehand
    /// stays in place.
    pub(crate) fn claim(
        &mut self,
        address: &Address,
        marker: Arc<dyn Middleware>,
        channel: RegisteredChannel,
    ) -> Result<(), KernelError> {
        let taken = address == &self.local_address
            || self
                .position(address)
                .is_some_and(|index| !self.endpoints[index].channels.is_empty());
        if taken {
            return Err(KernelError::AddressAlreadyInUse {
                address: address.clone(),
            });
        }
        let endpoint = self.find_or_create(address);
        endpoint.middlewares.push((MiddlewarePosition::All, marker));
        endpoint.channels.push(channel);
        Ok(())
    }

    /// Removes a channel by id, dropping its endpoint if nothing else is registered there.
    pub(crate) fn remove_channel(&mut self, id: ChannelId) -> Option<Address> {
        let endpoint = self
            .endpoints
            .iter_mut()
            .find(|endpoint| endpoint.channels.iter().any(|c| c.id == id))?;
        endpoint.channels.retain(|c| c.id != id);
        let address = endpoint.address.clone();
        self.prune();
        Some(address)
    }

    pub(crate) fn add_middleware(
        &mut self,
        address: &Address,
        position: MiddlewarePosition,
        middleware: Arc<dyn Middleware>,
    ) {
        self.find_or_create(address)
            .middlewares
            .push((position, middleware));
    }

    /// Drops every middleware registered at `address`.
    pub(crate) fn clear_middleware(&mut self, address: &Address) {
        if let Some(index) = self.position(address) {
            self.endpoints[index].middlewares.clear();
            self.prune();
        }
    }

    /// Middleware applying to `position` at `address`, in registration order.
    pub(crate) fn middleware_for(
        &self,
        address: &Address,
        position: MiddlewarePosition,
    ) -> Vec<Arc<dyn Middleware>> {
        self.position(address)
            .map(|index| {
                self.endpoints[index]
                    .middlewares
                    .iter()
                    .filter(|(registered, _)| registered.applies_to(position))
                    .map(|(_, middleware)| Arc::clone(middleware))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Ordered outbound candidates for `target`.
    ///
    /// Channels registered at the exact address win. Only when there are none do
    /// channels on the same host (same `primary_id`) qualify, and never those of the
    /// local host, which would loop the message back into this process.
    pub(crate) fn candidates(&self, target: &Address) -> Vec<RegisteredChannel> {
        if let Some(index) = self.position(target) {
            let strict: Vec<_> = self.endpoints[index].outbound().cloned().collect();
            if !strict.is_empty() {
                return strict;
            }
        }
        if target.same_host(&self.local_address) {
            return Vec::new();
        }
        self.endpoints
            .iter()
            .filter(|endpoint| endpoint.address != *target && endpoint.address.same_host(target))
            .flat_map(Endpoint::outbound)
            .cloned()
            .collect()
    }

    /// Moves the local endpoint to `new_address`.
    pub(crate) fn set_local_address(&mut self, new_address: Address) -> Result<(), KernelError> {
        if new_address == self.local_address {
            return Ok(());
        }
        if self.position(&new_address).is_some() {
            return Err(KernelError::AddressAlreadyInUse {
                address: new_address,
            });
        }
        if let Some(index) = self.position(&self.local_address) {
            self.endpoints[index].address = new_address.clone();
        }
        self.local_address = new_address;
        Ok(())
    }

    /// Removes every channel, keeping endpoints that still own middleware.
    pub(crate) fn clear_channels(&mut self) -> Vec<RegisteredChannel> {
        let removed = self
            .endpoints
            .iter_mut()
            .flat_map(|endpoint| endpoint.channels.drain(..))
            .collect();
        self.prune();
        removed
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("local_address", &self.local_address.to_compact())
            .field("endpoints", &self.endpoints.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::common::ChannelTransmissionError;
    use crate::message::SerializedMessage;
    use crate::traits::{ChannelDirection, TargetMarker};

    struct NullChannel(Address, ChannelDirection);

    #[async_trait]
    impl CommunicationChannel for NullChannel {
        fn address(&self) -> Address {
            self.0.clone()
        }

        fn direction(&self) -> ChannelDirection {
            self.1
        }

        async fn send(&self, _message: &SerializedMessage) -> Result<(), ChannelTransmissionError> {
            Ok(())
        }
    }

    fn channel(id: u64, address: &Address, direction: ChannelDirection) -> RegisteredChannel {
        RegisteredChannel {
            id: ChannelId(id),
            channel: Arc::new(NullChannel(address.clone(), direction)),
        }
    }

    fn ids(channels: &[RegisteredChannel]) -> Vec<u64> {
        channels.iter().map(|c| c.id.0).collect()
    }

    #[test]
    fn exact_channels_take_priority_over_host_matches() {
        let mut registry = Registry::new(Address::new("local", "kernel"));
        let bridge = Address::new("remote", "bridge");
        let target = Address::new("remote", "service");

        registry.add_channel(&bridge, channel(1, &bridge, ChannelDirection::InOut));
        assert_eq!(ids(&registry.candidates(&target)), vec![1]);

        registry.add_channel(&target, channel(2, &target, ChannelDirection::Out));
        assert_eq!(ids(&registry.candidates(&target)), vec![2]);
    }

    #[test]
    fn inbound_only_channels_are_never_candidates() {
        let mut registry = Registry::new(Address::new("local", "kernel"));
        let target = Address::new("remote", "service");
        registry.add_channel(&target, channel(1, &target, ChannelDirection::In));
        assert!(registry.candidates(&target).is_empty());
    }

    #[test]
    fn local_host_is_not_bridged() {
        let local = Address::new("local", "kernel");
        let mut registry = Registry::new(local.clone());
        let sibling = Address::new("local", "other");
        registry.add_channel(&sibling, channel(1, &sibling, ChannelDirection::InOut));
        assert!(registry
            .candidates(&Address::new("local", "missing"))
            .is_empty());
    }

    #[test]
    fn endpoints_are_dropped_with_their_last_registration() {
        let mut registry = Registry::new(Address::new("local", "kernel"));
        let target = Address::new("remote", "service");
        registry.add_channel(&target, channel(1, &target, ChannelDirection::InOut));
        assert_eq!(registry.remove_channel(ChannelId(1)), Some(target.clone()));
        assert!(registry.find(&target).is_none());
        assert_eq!(registry.remove_channel(ChannelId(1)), None);
    }

    #[test]
    fn relabel_refuses_registered_addresses() {
        let local = Address::new("local", "kernel");
        let taken = Address::new("remote", "service");
        let mut registry = Registry::new(local.clone());
        registry.add_channel(&local, channel(1, &local, ChannelDirection::InOut));
        registry.add_channel(&taken, channel(2, &taken, ChannelDirection::InOut));

        assert!(matches!(
            registry.set_local_address(taken.clone()),
            Err(KernelError::AddressAlreadyInUse { .. })
        ));

        let fresh = Address::new("local", "renamed");
        registry.set_local_address(fresh.clone()).unwrap();
        assert_eq!(registry.local_address(), &fresh);
        assert_eq!(registry.find(&fresh).map(|info| info.channels), Some(1));
        assert!(registry.find(&local).is_none());
    }

    #[test]
    fn claims_refuse_taken_addresses() {
        let local = Address::new("local", "kernel");
        let mut registry = Registry::new(local.clone());
        let component = Address::new("local", "component");

        registry
            .claim(&component, Arc::new(TargetMarker), channel(1, &component, ChannelDirection::Out))
            .unwrap();
        assert!(matches!(
            registry.claim(&component, Arc::new(TargetMarker), channel(2, &component, ChannelDirection::Out)),
            Err(KernelError::AddressAlreadyInUse { .. })
        ));
        assert!(matches!(
            registry.claim(&local, Arc::new(TargetMarker), channel(3, &local, ChannelDirection::Out)),
            Err(KernelError::AddressAlreadyInUse { .. })
        ));
        assert_eq!(
            registry.find(&component),
            Some(EndpointInfo {
                address: component.clone(),
                channels: 1,
                middlewares: 1,
            })
        );

        // Once released the address can be claimed again.
        registry.remove_channel(ChannelId(1));
        registry.clear_middleware(&component);
        registry
            .claim(&component, Arc::new(TargetMarker), channel(4, &component, ChannelDirection::Out))
            .unwrap();
    }
}
