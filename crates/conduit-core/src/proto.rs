//! The mutable, incrementally maintained network state.
//!
//! [`ProtoState`] owns every [`ProtoNetwork`] and groups them into
//! [`ProtoNetworkCluster`]s: maximal sets of networks that share at least one
//! node, across resource types. Additions merge clusters eagerly. Removals
//! re-discover the affected networks from their survivors and leave the
//! cluster merged; [`ProtoState::split_dirty`] re-partitions dirty clusters
//! into connected components right before they are rebuilt.

use crate::discovery::{CancelToken, Discovery, DiscoveryError, ProtoNetwork};
use crate::id::{ClusterId, ProtoNetworkId};
use crate::node::NetworkNode;
use crate::position::{ChunkPos, Position};
use crate::provider::NodeProvider;
use slotmap::{SecondaryMap, SlotMap};
use std::collections::{BTreeMap, BTreeSet};

// ---------------------------------------------------------------------------
// ProtoNetworkCluster
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ProtoNetworkCluster {
    networks: BTreeSet<ProtoNetworkId>,
    dirty: bool,
}

impl ProtoNetworkCluster {
    pub fn networks(&self) -> &BTreeSet<ProtoNetworkId> {
        &self.networks
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

// ---------------------------------------------------------------------------
// ProtoState
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct ProtoState {
    networks: SlotMap<ProtoNetworkId, ProtoNetwork>,
    network_cluster: SecondaryMap<ProtoNetworkId, ClusterId>,
    clusters: SlotMap<ClusterId, ProtoNetworkCluster>,
    /// Which networks each position is a member of.
    memberships: BTreeMap<Position, BTreeSet<ProtoNetworkId>>,
    /// Every node that has been added and not removed.
    nodes: BTreeMap<Position, NetworkNode>,
    /// Clusters that ceased to exist since the last `take_removed`.
    removed: Vec<ClusterId>,
}

impl ProtoState {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Structural mutations
    // -----------------------------------------------------------------------

    /// Add (or re-confirm) a node and merge every network it touches.
    ///
    /// All discovery runs before any state changes, so a cancelled add leaves
    /// the state exactly as it was.
    pub fn add_node(
        &mut self,
        node: NetworkNode,
        provider: &dyn NodeProvider,
        token: Option<&CancelToken>,
    ) -> Result<(), DiscoveryError> {
        let mut discovery = Discovery::new(provider);
        if let Some(token) = token {
            discovery = discovery.with_token(token);
        }
        let mut discovered = Vec::new();
        for resource_type in node.resource_types() {
            discovered.extend(discovery.discover_node(&node, resource_type)?);
        }

        let pos = node.pos();
        let replaced = self.nodes.get(&pos).is_some_and(|known| !known.ptr_eq(&node));
        if replaced {
            self.remove_node(pos, provider)?;
        }

        node.set_valid(true);
        self.nodes.insert(pos, node);
        for network in discovered {
            self.insert_network(network, None);
        }
        Ok(())
    }

    /// Drop a node from every network it belonged to and re-discover those
    /// networks from their surviving members. The owning cluster is marked
    /// dirty but not split here.
    pub fn remove_node(
        &mut self,
        pos: Position,
        provider: &dyn NodeProvider,
    ) -> Result<Option<NetworkNode>, DiscoveryError> {
        let node = self.nodes.remove(&pos);
        if let Some(node) = &node {
            node.set_valid(false);
        }

        let ids = self.memberships.get(&pos).cloned().unwrap_or_default();
        let mut touched = BTreeSet::new();
        for id in ids {
            if let Some((network, cluster)) = self.take_network(id) {
                touched.insert(cluster);
                self.rediscover(&network, Some(pos), cluster, provider)?;
            }
        }
        for cluster in touched {
            self.prune_if_empty(cluster);
        }
        Ok(node)
    }

    /// Clear the validity of every known node in `chunk`. Their networks
    /// stay in place; clusters touching them stall until the chunk returns.
    pub fn mark_chunk_unknown(&mut self, chunk: ChunkPos) -> usize {
        let mut count = 0;
        for node in self.nodes.values().filter(|n| chunk.contains(n.pos())) {
            node.set_valid(false);
            count += 1;
        }
        count
    }

    /// Re-discover every network with an unknown edge whose far side the
    /// world can now vouch for.
    pub fn retry_incomplete(&mut self, provider: &dyn NodeProvider) -> Result<usize, DiscoveryError> {
        let resolved: Vec<ProtoNetworkId> = self
            .networks
            .iter()
            .filter(|(_, network)| {
                network.unknown.iter().any(|pos| {
                    !provider.is_unknown(*pos) && provider.get_node(*pos).is_none_or(|n| n.is_valid())
                })
            })
            .map(|(id, _)| id)
            .collect();

        let mut retried = 0;
        for id in resolved {
            // An earlier rediscovery in this loop may already have replaced it.
            if let Some((network, cluster)) = self.take_network(id) {
                self.rediscover(&network, None, cluster, provider)?;
                self.prune_if_empty(cluster);
                retried += 1;
            }
        }
        Ok(retried)
    }

    /// Split every dirty cluster into its connected components. The first
    /// component keeps the cluster id; the others get fresh ids. Returns
    /// every cluster that now needs a rebuild.
    pub fn split_dirty(&mut self) -> Vec<ClusterId> {
        let dirty: Vec<ClusterId> = self
            .clusters
            .iter()
            .filter(|(_, c)| c.dirty)
            .map(|(id, _)| id)
            .collect();

        let mut rebuild = Vec::with_capacity(dirty.len());
        for cluster_id in dirty {
            let components = self.components(cluster_id);
            for component in components.into_iter().skip(1) {
                let fresh = self.clusters.insert(ProtoNetworkCluster {
                    networks: component.iter().copied().collect(),
                    dirty: true,
                });
                for id in component {
                    self.network_cluster.insert(id, fresh);
                    if let Some(cluster) = self.clusters.get_mut(cluster_id) {
                        cluster.networks.remove(&id);
                    }
                }
                log::debug!("split {fresh:?} off {cluster_id:?}");
                rebuild.push(fresh);
            }
            rebuild.push(cluster_id);
        }
        rebuild
    }

    pub fn mark_clean(&mut self, cluster: ClusterId) {
        if let Some(cluster) = self.clusters.get_mut(cluster) {
            cluster.dirty = false;
        }
    }

    /// Force every cluster to be rebuilt, e.g. after a network type was
    /// registered.
    pub fn mark_all_dirty(&mut self) {
        for cluster in self.clusters.values_mut() {
            cluster.dirty = true;
        }
    }

    /// Clusters that were merged away or emptied since the last call.
    pub fn take_removed(&mut self) -> Vec<ClusterId> {
        std::mem::take(&mut self.removed)
    }

    pub fn clear(&mut self) {
        self.removed.extend(self.clusters.keys());
        self.networks.clear();
        self.network_cluster.clear();
        self.clusters.clear();
        self.memberships.clear();
        self.nodes.clear();
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn node(&self, pos: Position) -> Option<&NetworkNode> {
        self.nodes.get(&pos)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NetworkNode> {
        self.nodes.values()
    }

    pub fn network(&self, id: ProtoNetworkId) -> Option<&ProtoNetwork> {
        self.networks.get(id)
    }

    pub fn network_count(&self) -> usize {
        self.networks.len()
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    pub fn clusters(&self) -> impl Iterator<Item = (ClusterId, &ProtoNetworkCluster)> {
        self.clusters.iter()
    }

    pub fn cluster(&self, id: ClusterId) -> Option<&ProtoNetworkCluster> {
        self.clusters.get(id)
    }

    pub fn networks_in(&self, cluster: ClusterId) -> impl Iterator<Item = &ProtoNetwork> {
        self.clusters
            .get(cluster)
            .into_iter()
            .flat_map(|c| c.networks.iter())
            .filter_map(|id| self.networks.get(*id))
    }

    /// Every member position of a cluster.
    pub fn cluster_positions(&self, cluster: ClusterId) -> BTreeSet<Position> {
        self.networks_in(cluster).flat_map(|n| n.positions()).collect()
    }

    /// The cluster `pos` belongs to, if it is a member of any network.
    pub fn cluster_of(&self, pos: Position) -> Option<ClusterId> {
        let id = self.memberships.get(&pos)?.first()?;
        self.network_cluster.get(*id).copied()
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Insert a freshly discovered network. Same-type networks it overlaps are
    /// replaced; every cluster sharing a node with it, plus `hint`, is merged
    /// into one. Returns the new network's id.
    fn insert_network(&mut self, network: ProtoNetwork, hint: Option<ClusterId>) -> ProtoNetworkId {
        let hint = hint.filter(|c| self.clusters.contains_key(*c));
        let mut merge: BTreeSet<ClusterId> = hint.into_iter().collect();

        let neighbours: BTreeSet<ProtoNetworkId> = network
            .positions()
            .filter_map(|pos| self.memberships.get(&pos))
            .flatten()
            .copied()
            .collect();
        for id in neighbours {
            let overlapping = self.networks.get(id).is_some_and(|n| n.overlaps(&network));
            if overlapping {
                if let Some((_, cluster)) = self.take_network(id) {
                    merge.insert(cluster);
                }
            } else if let Some(cluster) = self.network_cluster.get(id) {
                merge.insert(*cluster);
            }
        }

        let target = match hint.or_else(|| merge.first().copied()) {
            Some(target) => target,
            None => self.clusters.insert(ProtoNetworkCluster::default()),
        };
        for other in merge.into_iter().filter(|c| *c != target) {
            self.absorb(target, other);
        }

        let positions: Vec<Position> = network.positions().collect();
        let id = self.networks.insert(network);
        for pos in positions {
            self.memberships.entry(pos).or_default().insert(id);
        }
        self.network_cluster.insert(id, target);
        if let Some(cluster) = self.clusters.get_mut(target) {
            cluster.networks.insert(id);
            cluster.dirty = true;
        }
        id
    }

    /// Move every network of `other` into `target` and drop `other`.
    fn absorb(&mut self, target: ClusterId, other: ClusterId) {
        let Some(absorbed) = self.clusters.remove(other) else {
            return;
        };
        for id in &absorbed.networks {
            self.network_cluster.insert(*id, target);
        }
        if let Some(cluster) = self.clusters.get_mut(target) {
            cluster.networks.extend(absorbed.networks);
            cluster.dirty = true;
        }
        log::debug!("merged {other:?} into {target:?}");
        self.removed.push(other);
    }

    /// Detach a network from every index. Its cluster is marked dirty and
    /// kept, even if now empty.
    fn take_network(&mut self, id: ProtoNetworkId) -> Option<(ProtoNetwork, ClusterId)> {
        let network = self.networks.remove(id)?;
        let cluster = self.network_cluster.remove(id)?;
        for pos in network.positions() {
            if let Some(ids) = self.memberships.get_mut(&pos) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.memberships.remove(&pos);
                }
            }
        }
        if let Some(c) = self.clusters.get_mut(cluster) {
            c.networks.remove(&id);
            c.dirty = true;
        }
        Some((network, cluster))
    }

    /// Re-discover a detached network from its members, skipping `skip`, and
    /// insert the results back into `cluster`.
    fn rediscover(
        &mut self,
        network: &ProtoNetwork,
        skip: Option<Position>,
        cluster: ClusterId,
        provider: &dyn NodeProvider,
    ) -> Result<(), DiscoveryError> {
        let mut discovery = Discovery::new(provider);
        if let Some(pos) = skip {
            discovery = discovery.skipping(pos);
        }
        let resource_type = network.resource_type;

        let mut found: Vec<ProtoNetwork> = Vec::new();
        for (pos, bridge) in &network.bridges {
            if skip == Some(*pos) || found.iter().any(|n| n.bridges.contains_key(pos)) {
                continue;
            }
            found.push(discovery.from_bridge(bridge, resource_type)?);
        }
        for (pos, (ep, faces)) in &network.end_points {
            if skip == Some(*pos) {
                continue;
            }
            for candidate in discovery.from_end_point(ep, resource_type)? {
                let through_old_face = candidate
                    .end_points
                    .get(pos)
                    .is_some_and(|(_, f)| f.iter().any(|face| faces.contains(face)));
                if through_old_face && !found.iter().any(|n| n.overlaps(&candidate)) {
                    found.push(candidate);
                }
            }
        }

        for network in found {
            self.insert_network(network, Some(cluster));
        }
        Ok(())
    }

    fn prune_if_empty(&mut self, cluster: ClusterId) {
        if self.clusters.get(cluster).is_some_and(|c| c.networks.is_empty()) {
            self.clusters.remove(cluster);
            self.removed.push(cluster);
        }
    }

    /// Connected components of a cluster's networks, linked by shared
    /// positions, in order of their first network id.
    fn components(&self, cluster: ClusterId) -> Vec<Vec<ProtoNetworkId>> {
        let ids: Vec<ProtoNetworkId> = match self.clusters.get(cluster) {
            Some(c) => c.networks.iter().copied().collect(),
            None => return Vec::new(),
        };

        let mut parent: Vec<usize> = (0..ids.len()).collect();
        let mut owner: BTreeMap<Position, usize> = BTreeMap::new();
        for (i, id) in ids.iter().enumerate() {
            let Some(network) = self.networks.get(*id) else {
                continue;
            };
            for pos in network.positions() {
                match owner.get(&pos) {
                    Some(&j) => union(&mut parent, i, j),
                    None => {
                        owner.insert(pos, i);
                    }
                }
            }
        }

        let mut by_root: BTreeMap<usize, usize> = BTreeMap::new();
        let mut components: Vec<Vec<ProtoNetworkId>> = Vec::new();
        for (i, id) in ids.iter().enumerate() {
            let root = find(&mut parent, i);
            let slot = *by_root.entry(root).or_insert_with(|| {
                components.push(Vec::new());
                components.len() - 1
            });
            components[slot].push(*id);
        }
        components
    }
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

fn union(parent: &mut [usize], a: usize, b: usize) {
    let ra = find(parent, a);
    let rb = find(parent, b);
    if ra != rb {
        parent[ra.max(rb)] = ra.min(rb);
    }
}
