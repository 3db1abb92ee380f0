//! Graph vertices: endpoints that own holders, and bridges that only relay
//! connectivity.
//!
//! Nodes are shared (`Arc`) between the world, the proto-network layer and
//! any frozen clusters. A node's validity flag is cleared when it is removed
//! or its chunk unloads, which stalls every cluster that still references it.

use crate::holder::{ConnectionType, Holders};
use crate::id::ResourceType;
use crate::position::{BlockFace, FaceSet, Position};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

// ---------------------------------------------------------------------------
// EndPoint
// ---------------------------------------------------------------------------

/// A node that owns holders.
#[derive(Debug)]
pub struct EndPoint {
    pos: Position,
    holders: Mutex<Holders>,
    valid: AtomicBool,
}

impl EndPoint {
    pub fn new(pos: Position, holders: Holders) -> Arc<Self> {
        Arc::new(Self {
            pos,
            holders: Mutex::new(holders),
            valid: AtomicBool::new(true),
        })
    }

    pub fn pos(&self) -> Position {
        self.pos
    }

    /// Lock the holders. A poisoned lock is recovered: a panicking network
    /// phase is contained at group level and must not wedge the endpoint.
    pub fn lock(&self) -> MutexGuard<'_, Holders> {
        self.holders.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn resource_types(&self) -> Vec<ResourceType> {
        self.lock().resource_types()
    }

    pub fn connection(&self, resource_type: ResourceType, face: BlockFace) -> ConnectionType {
        self.lock().connection(resource_type, face)
    }

    /// Faces connected for `resource_type`.
    pub fn connected_faces(&self, resource_type: ResourceType) -> FaceSet {
        let holders = self.lock();
        FaceSet::of(
            BlockFace::ALL
                .into_iter()
                .filter(|face| holders.connection(resource_type, *face).is_connected()),
        )
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub fn set_valid(&self, valid: bool) {
        self.valid.store(valid, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

/// A passthrough node. Connects on a fixed set of faces per resource type.
#[derive(Debug)]
pub struct Bridge {
    pos: Position,
    faces: BTreeMap<ResourceType, FaceSet>,
    valid: AtomicBool,
}

impl Bridge {
    pub fn new(pos: Position, faces: BTreeMap<ResourceType, FaceSet>) -> Arc<Self> {
        Arc::new(Self {
            pos,
            faces,
            valid: AtomicBool::new(true),
        })
    }

    /// A cable of one resource type connecting on every face.
    pub fn cable(pos: Position, resource_type: ResourceType) -> Arc<Self> {
        Self::new(pos, BTreeMap::from([(resource_type, FaceSet::ALL)]))
    }

    pub fn pos(&self) -> Position {
        self.pos
    }

    pub fn resource_types(&self) -> Vec<ResourceType> {
        self.faces
            .iter()
            .filter(|(_, faces)| !faces.is_empty())
            .map(|(ty, _)| *ty)
            .collect()
    }

    pub fn faces(&self, resource_type: ResourceType) -> FaceSet {
        self.faces.get(&resource_type).copied().unwrap_or_default()
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub fn set_valid(&self, valid: bool) {
        self.valid.store(valid, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// NetworkNode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum NetworkNode {
    EndPoint(Arc<EndPoint>),
    Bridge(Arc<Bridge>),
}

impl NetworkNode {
    pub fn pos(&self) -> Position {
        match self {
            NetworkNode::EndPoint(ep) => ep.pos(),
            NetworkNode::Bridge(b) => b.pos(),
        }
    }

    pub fn resource_types(&self) -> Vec<ResourceType> {
        match self {
            NetworkNode::EndPoint(ep) => ep.resource_types(),
            NetworkNode::Bridge(b) => b.resource_types(),
        }
    }

    pub fn is_valid(&self) -> bool {
        match self {
            NetworkNode::EndPoint(ep) => ep.is_valid(),
            NetworkNode::Bridge(b) => b.is_valid(),
        }
    }

    pub fn set_valid(&self, valid: bool) {
        match self {
            NetworkNode::EndPoint(ep) => ep.set_valid(valid),
            NetworkNode::Bridge(b) => b.set_valid(valid),
        }
    }

    /// Whether this node accepts a `resource_type` connection through `face`.
    pub fn connects(&self, resource_type: ResourceType, face: BlockFace) -> bool {
        match self {
            NetworkNode::EndPoint(ep) => ep.connection(resource_type, face).is_connected(),
            NetworkNode::Bridge(b) => b.faces(resource_type).contains(face),
        }
    }

    pub fn as_end_point(&self) -> Option<&Arc<EndPoint>> {
        match self {
            NetworkNode::EndPoint(ep) => Some(ep),
            NetworkNode::Bridge(_) => None,
        }
    }

    /// Same underlying node object.
    pub fn ptr_eq(&self, other: &NetworkNode) -> bool {
        match (self, other) {
            (NetworkNode::EndPoint(a), NetworkNode::EndPoint(b)) => Arc::ptr_eq(a, b),
            (NetworkNode::Bridge(a), NetworkNode::Bridge(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<Arc<EndPoint>> for NetworkNode {
    fn from(ep: Arc<EndPoint>) -> Self {
        NetworkNode::EndPoint(ep)
    }
}

impl From<Arc<Bridge>> for NetworkNode {
    fn from(bridge: Arc<Bridge>) -> Self {
        NetworkNode::Bridge(bridge)
    }
}
