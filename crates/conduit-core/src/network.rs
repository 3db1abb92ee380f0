//! Frozen networks and the extension points resource algorithms plug into.
//!
//! A [`NetworkType`] is registered once per resource type. At rebuild time it
//! turns the frozen [`Network`]s of one cluster into a [`NetworkGroup`],
//! which is then driven through the five tick phases.

use crate::holder::{ConnectionType, HolderError};
use crate::id::{NetworkId, ResourceType};
use crate::node::{Bridge, EndPoint, NetworkNode};
use crate::position::{BlockFace, FaceSet, Position};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Errors and phases
// ---------------------------------------------------------------------------

/// A failure inside one group's phase. Contained at group level: logged,
/// and the group sits out the rest of the tick.
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    #[error("{resource_type} network failed: {message}")]
    Failed {
        resource_type: ResourceType,
        message: String,
    },
    #[error(transparent)]
    Holder(#[from] HolderError),
    #[error("panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TickPhase {
    PreTickSync,
    PreTick,
    Tick,
    PostTick,
    PostTickSync,
}

impl TickPhase {
    pub const ALL: [TickPhase; 5] = [
        TickPhase::PreTickSync,
        TickPhase::PreTick,
        TickPhase::Tick,
        TickPhase::PostTick,
        TickPhase::PostTickSync,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            TickPhase::PreTickSync => "pre_tick_sync",
            TickPhase::PreTick => "pre_tick",
            TickPhase::Tick => "tick",
            TickPhase::PostTick => "post_tick",
            TickPhase::PostTickSync => "post_tick_sync",
        }
    }

    pub fn run(self, group: &mut dyn NetworkGroup) -> Result<(), TickError> {
        match self {
            TickPhase::PreTickSync => group.pre_tick_sync(),
            TickPhase::PreTick => group.pre_tick(),
            TickPhase::Tick => group.tick(),
            TickPhase::PostTick => group.post_tick(),
            TickPhase::PostTickSync => group.post_tick_sync(),
        }
    }
}

impl fmt::Display for TickPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

/// One endpoint face attached to a network, with its side configuration
/// read under the endpoint's lock.
#[derive(Debug, Clone)]
pub struct Side {
    pub end_point: Arc<EndPoint>,
    pub face: BlockFace,
    pub connection: ConnectionType,
    pub channel: u32,
    pub insert_priority: i32,
    pub extract_priority: i32,
}

impl Side {
    pub fn pos(&self) -> Position {
        self.end_point.pos()
    }
}

/// An immutable snapshot of a proto-network.
#[derive(Debug, Clone)]
pub struct Network {
    id: NetworkId,
    resource_type: ResourceType,
    bridges: Vec<Arc<Bridge>>,
    end_points: Vec<(Arc<EndPoint>, FaceSet)>,
}

impl Network {
    pub fn new(
        id: NetworkId,
        resource_type: ResourceType,
        bridges: Vec<Arc<Bridge>>,
        end_points: Vec<(Arc<EndPoint>, FaceSet)>,
    ) -> Self {
        Self {
            id,
            resource_type,
            bridges,
            end_points,
        }
    }

    pub fn id(&self) -> NetworkId {
        self.id
    }

    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    pub fn bridges(&self) -> &[Arc<Bridge>] {
        &self.bridges
    }

    /// Endpoints in position order, with the faces attaching them here.
    pub fn end_points(&self) -> &[(Arc<EndPoint>, FaceSet)] {
        &self.end_points
    }

    pub fn nodes(&self) -> impl Iterator<Item = NetworkNode> + '_ {
        self.bridges
            .iter()
            .map(|b| NetworkNode::Bridge(b.clone()))
            .chain(self.end_points.iter().map(|(ep, _)| NetworkNode::EndPoint(ep.clone())))
    }

    pub fn is_valid(&self) -> bool {
        self.bridges.iter().all(|b| b.is_valid()) && self.end_points.iter().all(|(ep, _)| ep.is_valid())
    }

    /// Connected sides of every attached endpoint, in position then face
    /// order. Endpoints without a holder of this network's type are skipped.
    pub fn sides(&self) -> Vec<Side> {
        let mut sides = Vec::new();
        for (ep, faces) in &self.end_points {
            let holders = ep.lock();
            let Some(config) = holders.side_config(self.resource_type) else {
                continue;
            };
            for face in faces.iter() {
                let connection = config.connection(face);
                if !connection.is_connected() {
                    continue;
                }
                sides.push(Side {
                    end_point: ep.clone(),
                    face,
                    connection,
                    channel: config.channel(face),
                    insert_priority: config.insert_priority(face),
                    extract_priority: config.extract_priority(face),
                });
            }
        }
        sides
    }

    /// [`sides`](Self::sides) partitioned by channel.
    pub fn sides_by_channel(&self) -> BTreeMap<u32, Vec<Side>> {
        let mut channels: BTreeMap<u32, Vec<Side>> = BTreeMap::new();
        for side in self.sides() {
            channels.entry(side.channel).or_default().push(side);
        }
        channels
    }
}

// ---------------------------------------------------------------------------
// Extension traits
// ---------------------------------------------------------------------------

/// A resource type's algorithm, registered with the manager.
pub trait NetworkType: Send + Sync + fmt::Debug {
    fn resource_type(&self) -> ResourceType;

    /// Ticks between executions of this type's phases. At least 1.
    fn tick_delay(&self) -> u64 {
        1
    }

    /// Build the tickable group for all networks of this type in a cluster.
    fn create_group(&self, networks: Vec<Network>) -> Box<dyn NetworkGroup>;
}

/// All networks of one type in one cluster. `pre_tick_sync` and
/// `post_tick_sync` run on the thread with exclusive world access; the other
/// three phases may run on a worker thread.
pub trait NetworkGroup: Send + fmt::Debug {
    fn resource_type(&self) -> ResourceType;

    fn networks(&self) -> &[Network];

    fn pre_tick_sync(&mut self) -> Result<(), TickError> {
        Ok(())
    }

    fn pre_tick(&mut self) -> Result<(), TickError> {
        Ok(())
    }

    fn tick(&mut self) -> Result<(), TickError>;

    fn post_tick(&mut self) -> Result<(), TickError> {
        Ok(())
    }

    fn post_tick_sync(&mut self) -> Result<(), TickError> {
        Ok(())
    }
}

/// Registered network types, keyed by resource type.
#[derive(Debug, Default, Clone)]
pub struct TypeRegistry {
    types: BTreeMap<ResourceType, Arc<dyn NetworkType>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `network_type`, replacing any earlier one for the same
    /// resource type.
    pub fn register(&mut self, network_type: Arc<dyn NetworkType>) -> Option<Arc<dyn NetworkType>> {
        self.types.insert(network_type.resource_type(), network_type)
    }

    pub fn get(&self, resource_type: ResourceType) -> Option<&Arc<dyn NetworkType>> {
        self.types.get(&resource_type)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::holder::{DEFAULT_CHANNEL, DEFAULT_PRIORITY};
    use crate::test_utils::{energy_holders, pos};

    #[test]
    fn sides_follow_attachment_faces() {
        let ep = EndPoint::new(pos(0, 0, 0), energy_holders(100, 0, ConnectionType::Insert));
        let network = Network::new(
            NetworkId(0),
            ResourceType::Energy,
            Vec::new(),
            vec![(ep, FaceSet::of([BlockFace::East, BlockFace::Up]))],
        );

        let sides = network.sides();
        assert_eq!(sides.len(), 2);
        assert_eq!(sides[0].face, BlockFace::East);
        assert_eq!(sides[0].connection, ConnectionType::Insert);
        assert_eq!(sides[0].channel, DEFAULT_CHANNEL);
        assert_eq!(sides[1].insert_priority, DEFAULT_PRIORITY);
    }

    #[test]
    fn sides_group_by_channel() {
        let mut holders = energy_holders(100, 0, ConnectionType::Both);
        if let Some(energy) = holders.energy.as_mut() {
            energy.set_channel(BlockFace::Up, 3);
        }
        let ep = EndPoint::new(pos(0, 0, 0), holders);
        let network = Network::new(
            NetworkId(0),
            ResourceType::Energy,
            Vec::new(),
            vec![(ep, FaceSet::of([BlockFace::East, BlockFace::Up]))],
        );

        let channels = network.sides_by_channel();
        assert_eq!(channels.keys().copied().collect::<Vec<_>>(), vec![0, 3]);
    }

    #[test]
    fn end_point_without_matching_holder_has_no_sides() {
        let ep = EndPoint::new(pos(0, 0, 0), energy_holders(100, 0, ConnectionType::Both));
        let network = Network::new(NetworkId(0), ResourceType::Fluid, Vec::new(), vec![(ep, FaceSet::ALL)]);
        assert!(network.sides().is_empty());
    }

    #[test]
    fn validity_tracks_every_node() {
        let ep = EndPoint::new(pos(0, 0, 0), energy_holders(100, 0, ConnectionType::Both));
        let cable = Bridge::cable(pos(1, 0, 0), ResourceType::Energy);
        let network = Network::new(
            NetworkId(0),
            ResourceType::Energy,
            vec![cable.clone()],
            vec![(ep, FaceSet::of([BlockFace::East]))],
        );
        assert!(network.is_valid());
        cable.set_valid(false);
        assert!(!network.is_valid());
    }
}
