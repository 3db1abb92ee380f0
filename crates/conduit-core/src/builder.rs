//! Freezes dirty proto-clusters into tickable [`NetworkCluster`]s.

use crate::cluster::NetworkCluster;
use crate::discovery::ProtoNetwork;
use crate::id::{ClusterId, NetworkId, ResourceType};
use crate::network::{Network, TypeRegistry};
use crate::node::NetworkNode;
use crate::rng::OffsetRng;
use std::collections::BTreeMap;

#[derive(Debug)]
pub struct ClusterBuilder {
    next_network: u64,
    rng: OffsetRng,
}

impl ClusterBuilder {
    pub fn new(seed: u64) -> Self {
        Self {
            next_network: 0,
            rng: OffsetRng::new(seed),
        }
    }

    /// Freeze a proto-network. Endpoints keep position order.
    pub fn freeze(&mut self, proto: &ProtoNetwork) -> Network {
        let id = NetworkId(self.next_network);
        self.next_network += 1;
        Network::new(
            id,
            proto.resource_type,
            proto.bridges.values().cloned().collect(),
            proto.end_points.values().cloned().collect(),
        )
    }

    /// Build a cluster snapshot from its proto-networks. Networks of a type
    /// without a registered [`NetworkType`](crate::network::NetworkType) still
    /// count towards validity but are not ticked.
    pub fn build<'a>(
        &mut self,
        id: ClusterId,
        protos: impl IntoIterator<Item = &'a ProtoNetwork>,
        registry: &TypeRegistry,
    ) -> NetworkCluster {
        let mut by_type: BTreeMap<ResourceType, Vec<Network>> = BTreeMap::new();
        let mut nodes: BTreeMap<_, NetworkNode> = BTreeMap::new();
        let mut complete = true;

        for proto in protos {
            complete &= proto.is_complete();
            for node in proto.nodes() {
                nodes.entry(node.pos()).or_insert(node);
            }
            by_type
                .entry(proto.resource_type)
                .or_default()
                .push(self.freeze(proto));
        }

        let mut groups = Vec::new();
        for (resource_type, networks) in by_type {
            match registry.get(resource_type) {
                Some(network_type) => {
                    let delay = network_type.tick_delay().max(1);
                    groups.push((network_type.create_group(networks), delay));
                }
                None => log::warn!("cluster {id:?}: no network type registered for {resource_type}"),
            }
        }

        let max_delay = groups.iter().map(|(_, delay)| *delay).max().unwrap_or(1);
        let offset = self.rng.offset(max_delay);
        let mut cluster = NetworkCluster::new(id, nodes.into_values().collect(), complete, offset);
        for (group, delay) in groups {
            cluster.add_group(group, delay);
        }
        log::debug!(
            "built cluster {id:?}: {} nodes, types {:?}, offset {offset}",
            cluster.nodes().len(),
            cluster.resource_types()
        );
        cluster
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::holder::ConnectionType;
    use crate::network::{NetworkGroup, NetworkType, TickError};
    use crate::proto::ProtoState;
    use crate::test_utils::{TestWorld, energy_holders, pos};
    use std::sync::Arc;

    #[derive(Debug)]
    struct CountingType {
        delay: u64,
    }

    #[derive(Debug)]
    struct CountingGroup {
        networks: Vec<Network>,
    }

    impl NetworkGroup for CountingGroup {
        fn resource_type(&self) -> ResourceType {
            ResourceType::Energy
        }

        fn networks(&self) -> &[Network] {
            &self.networks
        }

        fn tick(&mut self) -> Result<(), TickError> {
            Ok(())
        }
    }

    impl NetworkType for CountingType {
        fn resource_type(&self) -> ResourceType {
            ResourceType::Energy
        }

        fn tick_delay(&self) -> u64 {
            self.delay
        }

        fn create_group(&self, networks: Vec<Network>) -> Box<dyn NetworkGroup> {
            Box::new(CountingGroup { networks })
        }
    }

    fn two_end_point_state(world: &TestWorld) -> (ProtoState, ClusterId) {
        world.place_end_point(pos(0, 0, 0), energy_holders(100, 0, ConnectionType::Both));
        world.place_cable(pos(1, 0, 0), ResourceType::Energy);
        world.place_end_point(pos(2, 0, 0), energy_holders(100, 0, ConnectionType::Both));
        let mut state = ProtoState::new();
        let node = world.node(pos(1, 0, 0)).unwrap();
        state.add_node(node, world, None).unwrap();
        let cluster = state.cluster_of(pos(1, 0, 0)).unwrap();
        (state, cluster)
    }

    #[test]
    fn groups_networks_by_type() {
        let world = TestWorld::new();
        let (state, cluster_id) = two_end_point_state(&world);
        let mut registry = TypeRegistry::new();
        registry.register(Arc::new(CountingType { delay: 1 }));

        let mut builder = ClusterBuilder::new(0);
        let cluster = builder.build(cluster_id, state.networks_in(cluster_id), &registry);

        assert_eq!(cluster.resource_types(), vec![ResourceType::Energy]);
        assert_eq!(cluster.nodes().len(), 3);
        let group = cluster.groups().next().unwrap();
        assert_eq!(group.networks().len(), 1);
        assert_eq!(group.networks()[0].end_points().len(), 2);
    }

    #[test]
    fn unregistered_types_are_not_ticked() {
        let world = TestWorld::new();
        let (state, cluster_id) = two_end_point_state(&world);
        let mut builder = ClusterBuilder::new(0);
        let cluster = builder.build(cluster_id, state.networks_in(cluster_id), &TypeRegistry::new());
        assert!(cluster.resource_types().is_empty());
        assert_eq!(cluster.nodes().len(), 3);
    }

    #[test]
    fn tick_offset_is_below_max_delay() {
        let world = TestWorld::new();
        let (state, cluster_id) = two_end_point_state(&world);
        let mut registry = TypeRegistry::new();
        registry.register(Arc::new(CountingType { delay: 20 }));

        let mut builder = ClusterBuilder::new(99);
        for _ in 0..50 {
            let cluster = builder.build(cluster_id, state.networks_in(cluster_id), &registry);
            assert!(cluster.tick_offset() < 20);
        }
    }

    #[test]
    fn network_ids_are_never_reused() {
        let world = TestWorld::new();
        let (state, cluster_id) = two_end_point_state(&world);
        let mut builder = ClusterBuilder::new(0);
        let proto = state.networks_in(cluster_id).next().unwrap();
        let a = builder.freeze(proto);
        let b = builder.freeze(proto);
        assert_ne!(a.id(), b.id());
    }
}
