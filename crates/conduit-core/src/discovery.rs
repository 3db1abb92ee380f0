//! Breadth-first discovery of single-type connected subgraphs.
//!
//! Traversal walks the six faces of every bridge it reaches, following only
//! edges both sides connect for the resource type. Endpoints are leaves: they
//! are recorded with the faces they attach through, but traversal never
//! continues past them. A neighbour the world cannot vouch for (unloaded or
//! invalid) truncates the walk at that edge and is remembered in
//! [`ProtoNetwork::unknown`] so the edge can be retried later.

use crate::id::ResourceType;
use crate::node::{Bridge, EndPoint, NetworkNode};
use crate::position::{BlockFace, FaceSet, Position};
use crate::provider::NodeProvider;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

// ---------------------------------------------------------------------------
// Errors and cancellation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiscoveryError {
    #[error("discovery was cancelled")]
    Cancelled,
}

/// Shared flag checked between traversal steps. Cancelling a queued add
/// before it is processed drops it without any visible mutation.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn check(&self) -> Result<(), DiscoveryError> {
        if self.is_cancelled() {
            Err(DiscoveryError::Cancelled)
        } else {
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// ProtoNetwork
// ---------------------------------------------------------------------------

/// A mutable connected subgraph of one resource type.
#[derive(Debug, Clone)]
pub struct ProtoNetwork {
    pub resource_type: ResourceType,
    pub bridges: BTreeMap<Position, Arc<Bridge>>,
    /// Endpoints and the faces through which they attach to this network.
    pub end_points: BTreeMap<Position, (Arc<EndPoint>, FaceSet)>,
    /// Neighbour positions whose state was unknown when discovered.
    pub unknown: BTreeSet<Position>,
}

impl ProtoNetwork {
    pub fn new(resource_type: ResourceType) -> Self {
        Self {
            resource_type,
            bridges: BTreeMap::new(),
            end_points: BTreeMap::new(),
            unknown: BTreeSet::new(),
        }
    }

    /// Every member position, bridges and endpoints alike.
    pub fn positions(&self) -> impl Iterator<Item = Position> + '_ {
        self.bridges.keys().chain(self.end_points.keys()).copied()
    }

    pub fn contains(&self, pos: Position) -> bool {
        self.bridges.contains_key(&pos) || self.end_points.contains_key(&pos)
    }

    pub fn node_count(&self) -> usize {
        self.bridges.len() + self.end_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.node_count() == 0
    }

    /// `false` while any edge leads to an unknown neighbour.
    pub fn is_complete(&self) -> bool {
        self.unknown.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = NetworkNode> + '_ {
        self.bridges
            .values()
            .map(|b| NetworkNode::Bridge(b.clone()))
            .chain(self.end_points.values().map(|(ep, _)| NetworkNode::EndPoint(ep.clone())))
    }

    /// Whether `other` describes (part of) the same component: same type and
    /// a shared bridge, or a shared endpoint attached through a shared face.
    pub fn overlaps(&self, other: &ProtoNetwork) -> bool {
        if self.resource_type != other.resource_type {
            return false;
        }
        if self.bridges.keys().any(|pos| other.bridges.contains_key(pos)) {
            return true;
        }
        self.end_points.iter().any(|(pos, (_, faces))| {
            other
                .end_points
                .get(pos)
                .is_some_and(|(_, other_faces)| faces.iter().any(|f| other_faces.contains(f)))
        })
    }

    fn attach_end_point(&mut self, ep: &Arc<EndPoint>, face: BlockFace) {
        self.end_points
            .entry(ep.pos())
            .or_insert_with(|| (ep.clone(), FaceSet::EMPTY))
            .1
            .insert(face);
    }
}

impl PartialEq for ProtoNetwork {
    fn eq(&self, other: &Self) -> bool {
        self.resource_type == other.resource_type
            && self.bridges.keys().eq(other.bridges.keys())
            && self
                .end_points
                .iter()
                .map(|(pos, (_, faces))| (pos, faces))
                .eq(other.end_points.iter().map(|(pos, (_, faces))| (pos, faces)))
            && self.unknown == other.unknown
    }
}

impl Eq for ProtoNetwork {}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

enum Neighbor {
    Bridge(Arc<Bridge>),
    EndPoint(Arc<EndPoint>),
    Unknown,
    Empty,
}

/// One discovery pass against a node provider.
pub struct Discovery<'a> {
    provider: &'a dyn NodeProvider,
    token: Option<&'a CancelToken>,
    skip: Option<Position>,
}

impl<'a> Discovery<'a> {
    pub fn new(provider: &'a dyn NodeProvider) -> Self {
        Self {
            provider,
            token: None,
            skip: None,
        }
    }

    pub fn with_token(mut self, token: &'a CancelToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Treat `pos` as empty even if the provider still reports a node there.
    pub fn skipping(mut self, pos: Position) -> Self {
        self.skip = Some(pos);
        self
    }

    /// Discover the `resource_type` networks around the node at `start`.
    /// Empty when there is no node there.
    pub fn discover(&self, start: Position, resource_type: ResourceType) -> Result<Vec<ProtoNetwork>, DiscoveryError> {
        match self.provider.get_node(start) {
            Some(node) => self.discover_node(&node, resource_type),
            None => Ok(Vec::new()),
        }
    }

    pub fn discover_node(
        &self,
        node: &NetworkNode,
        resource_type: ResourceType,
    ) -> Result<Vec<ProtoNetwork>, DiscoveryError> {
        match node {
            NetworkNode::Bridge(bridge) => {
                if bridge.faces(resource_type).is_empty() {
                    return Ok(Vec::new());
                }
                Ok(vec![self.from_bridge(bridge, resource_type)?])
            }
            NetworkNode::EndPoint(ep) => self.from_end_point(ep, resource_type),
        }
    }

    /// The full network reachable from `start`.
    pub fn from_bridge(&self, start: &Arc<Bridge>, resource_type: ResourceType) -> Result<ProtoNetwork, DiscoveryError> {
        let mut network = ProtoNetwork::new(resource_type);
        let mut queue = VecDeque::new();
        network.bridges.insert(start.pos(), start.clone());
        queue.push_back(start.clone());

        while let Some(bridge) = queue.pop_front() {
            self.check()?;
            for face in bridge.faces(resource_type).iter() {
                let Some(neighbour) = bridge.pos().offset(face) else {
                    continue;
                };
                match self.classify(neighbour, resource_type, face.opposite()) {
                    Neighbor::Bridge(next) => {
                        if !network.bridges.contains_key(&neighbour) {
                            network.bridges.insert(neighbour, next.clone());
                            queue.push_back(next);
                        }
                    }
                    Neighbor::EndPoint(ep) => network.attach_end_point(&ep, face.opposite()),
                    Neighbor::Unknown => {
                        log::debug!("deferring {resource_type} edge {} -> {neighbour}: unknown", bridge.pos());
                        network.unknown.insert(neighbour);
                    }
                    Neighbor::Empty => {}
                }
            }
        }

        Ok(network)
    }

    /// Every network `ep` attaches to, one per connected face, deduplicated.
    /// Adjacent endpoints form a two-node network; an unknown neighbour
    /// yields a network holding just `ep` and the pending edge.
    pub fn from_end_point(
        &self,
        ep: &Arc<EndPoint>,
        resource_type: ResourceType,
    ) -> Result<Vec<ProtoNetwork>, DiscoveryError> {
        let mut networks: Vec<ProtoNetwork> = Vec::new();

        for face in ep.connected_faces(resource_type).iter() {
            self.check()?;
            let Some(neighbour) = ep.pos().offset(face) else {
                continue;
            };
            match self.classify(neighbour, resource_type, face.opposite()) {
                Neighbor::Bridge(bridge) => {
                    if networks.iter().any(|n| n.bridges.contains_key(&neighbour)) {
                        continue;
                    }
                    networks.push(self.from_bridge(&bridge, resource_type)?);
                }
                Neighbor::EndPoint(other) => {
                    let mut network = ProtoNetwork::new(resource_type);
                    network.attach_end_point(ep, face);
                    network.attach_end_point(&other, face.opposite());
                    networks.push(network);
                }
                Neighbor::Unknown => {
                    log::debug!("deferring {resource_type} edge {} -> {neighbour}: unknown", ep.pos());
                    let mut network = ProtoNetwork::new(resource_type);
                    network.attach_end_point(ep, face);
                    network.unknown.insert(neighbour);
                    networks.push(network);
                }
                Neighbor::Empty => {}
            }
        }

        Ok(networks)
    }

    fn check(&self) -> Result<(), DiscoveryError> {
        match self.token {
            Some(token) => token.check(),
            None => Ok(()),
        }
    }

    /// What sits at `pos` from the point of view of an edge entering it
    /// through `facing`.
    fn classify(&self, pos: Position, resource_type: ResourceType, facing: BlockFace) -> Neighbor {
        if self.skip == Some(pos) {
            return Neighbor::Empty;
        }
        if self.provider.is_unknown(pos) {
            return Neighbor::Unknown;
        }
        let Some(node) = self.provider.get_node(pos) else {
            return Neighbor::Empty;
        };
        if !node.is_valid() {
            return Neighbor::Unknown;
        }
        if !node.connects(resource_type, facing) {
            return Neighbor::Empty;
        }
        match node {
            NetworkNode::Bridge(bridge) => Neighbor::Bridge(bridge),
            NetworkNode::EndPoint(ep) => Neighbor::EndPoint(ep),
        }
    }
}
