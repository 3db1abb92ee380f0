//! Holders: per-endpoint, per-resource-type configuration and storage.
//!
//! An endpoint owns at most one holder per [`ResourceType`]. Every holder
//! carries a [`SideConfig`] (connection type, channel and priorities per face);
//! item and fluid holders additionally map each face to one of their
//! containers through a [`ContainerSet`].
//!
//! Holders are owned by the world, never by a network. Networks only reach
//! them through the endpoint's lock.

pub mod energy;
pub mod fluid;
pub mod item;

pub use energy::EnergyHolder;
pub use fluid::{FluidContainer, FluidHolder};
pub use item::{FilterMode, ItemContainer, ItemFilter, ItemHolder};

use crate::id::{ContainerId, ResourceType};
use crate::position::{BlockFace, FaceMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_PRIORITY: i32 = 50;
pub const DEFAULT_CHANNEL: u32 = 0;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Configuration or data corruption inside a holder. These surface to the
/// caller; a holder never silently drops configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HolderError {
    #[error("side configuration references container {0:?}, which does not exist")]
    UnknownContainer(ContainerId),
    #[error("no container is configured on face {0:?}")]
    NoContainerOnFace(BlockFace),
    #[error("endpoint has no {0} holder")]
    MissingHolder(ResourceType),
    #[error("a holder needs at least one container")]
    EmptyContainerSet,
    #[error("container id {0:?} is used twice")]
    DuplicateContainer(ContainerId),
    #[error("face {face:?} is set to {connection:?}, wider than the holder allows")]
    ConnectionNotAllowed { face: BlockFace, connection: ConnectionType },
    #[error("stored amount {amount} exceeds capacity {capacity}")]
    OverCapacity { amount: u64, capacity: u64 },
    #[error("container {0:?} has a fluid type without an amount, or an amount without a type")]
    UntypedFluid(ContainerId),
}

// ---------------------------------------------------------------------------
// Connection type
// ---------------------------------------------------------------------------

/// How a face takes part in a network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConnectionType {
    #[default]
    None,
    Insert,
    Extract,
    Both,
}

impl ConnectionType {
    pub fn from_flags(insert: bool, extract: bool) -> Self {
        match (insert, extract) {
            (false, false) => ConnectionType::None,
            (true, false) => ConnectionType::Insert,
            (false, true) => ConnectionType::Extract,
            (true, true) => ConnectionType::Both,
        }
    }

    pub fn insert(self) -> bool {
        matches!(self, ConnectionType::Insert | ConnectionType::Both)
    }

    pub fn extract(self) -> bool {
        matches!(self, ConnectionType::Extract | ConnectionType::Both)
    }

    pub fn is_connected(self) -> bool {
        self != ConnectionType::None
    }

    /// Restrict `self` to what `allowed` supports.
    pub fn clamp_to(self, allowed: ConnectionType) -> ConnectionType {
        ConnectionType::from_flags(
            self.insert() && allowed.insert(),
            self.extract() && allowed.extract(),
        )
    }
}

// ---------------------------------------------------------------------------
// Side configuration
// ---------------------------------------------------------------------------

/// Per-face connection, channel and priority settings shared by all holder
/// kinds. Higher priority values are served first.
///
/// Connection types only change through the owning holder, which clamps them
/// to what it allows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideConfig {
    connections: FaceMap<ConnectionType>,
    channels: FaceMap<u32>,
    insert_priorities: FaceMap<i32>,
    extract_priorities: FaceMap<i32>,
}

impl Default for SideConfig {
    fn default() -> Self {
        Self {
            connections: FaceMap::splat(ConnectionType::None),
            channels: FaceMap::splat(DEFAULT_CHANNEL),
            insert_priorities: FaceMap::splat(DEFAULT_PRIORITY),
            extract_priorities: FaceMap::splat(DEFAULT_PRIORITY),
        }
    }
}

impl SideConfig {
    pub fn connection(&self, face: BlockFace) -> ConnectionType {
        self.connections[face]
    }

    pub fn channel(&self, face: BlockFace) -> u32 {
        self.channels[face]
    }

    pub fn insert_priority(&self, face: BlockFace) -> i32 {
        self.insert_priorities[face]
    }

    pub fn extract_priority(&self, face: BlockFace) -> i32 {
        self.extract_priorities[face]
    }

    /// Store an already clamped connection type.
    pub(crate) fn set_connection(&mut self, face: BlockFace, connection: ConnectionType) {
        self.connections[face] = connection;
    }

    pub(crate) fn set_channel(&mut self, face: BlockFace, channel: u32) {
        self.channels[face] = channel;
    }

    pub(crate) fn set_insert_priority(&mut self, face: BlockFace, priority: i32) {
        self.insert_priorities[face] = priority;
    }

    pub(crate) fn set_extract_priority(&mut self, face: BlockFace, priority: i32) {
        self.extract_priorities[face] = priority;
    }

    /// Fails on the first face whose connection type `clamp` would narrow.
    pub(crate) fn check_connections(
        &self,
        clamp: impl Fn(BlockFace, ConnectionType) -> Result<ConnectionType, HolderError>,
    ) -> Result<(), HolderError> {
        for face in BlockFace::ALL {
            let connection = self.connections[face];
            if clamp(face, connection)? != connection {
                return Err(HolderError::ConnectionNotAllowed { face, connection });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Containers
// ---------------------------------------------------------------------------

/// Something a holder can expose on a face: an item inventory or a fluid
/// container.
pub trait Container {
    fn id(&self) -> ContainerId;

    /// The widest connection type this container supports.
    fn allowed(&self) -> ConnectionType;
}

/// The containers of an item or fluid holder and which one each face exposes.
///
/// Deserializing runs the same checks as [`ContainerSet::from_parts`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "RawContainerSet<C>",
    bound(deserialize = "C: Container + Deserialize<'de>")
)]
pub struct ContainerSet<C> {
    containers: BTreeMap<ContainerId, C>,
    sides: FaceMap<Option<ContainerId>>,
}

/// Persisted layout of a [`ContainerSet`], not yet checked.
#[derive(Deserialize)]
struct RawContainerSet<C> {
    containers: BTreeMap<ContainerId, C>,
    sides: FaceMap<Option<ContainerId>>,
}

impl<C: Container> TryFrom<RawContainerSet<C>> for ContainerSet<C> {
    type Error = HolderError;

    fn try_from(raw: RawContainerSet<C>) -> Result<Self, HolderError> {
        if let Some((key, _)) = raw.containers.iter().find(|(key, c)| c.id() != **key) {
            return Err(HolderError::UnknownContainer(*key));
        }
        Self::from_parts(raw.containers.into_values().collect(), raw.sides)
    }
}

impl<C: Container> ContainerSet<C> {
    pub fn new(containers: Vec<C>) -> Result<Self, HolderError> {
        if containers.is_empty() {
            return Err(HolderError::EmptyContainerSet);
        }
        let mut by_id = BTreeMap::new();
        for container in containers {
            let id = container.id();
            if by_id.insert(id, container).is_some() {
                return Err(HolderError::DuplicateContainer(id));
            }
        }
        Ok(Self {
            containers: by_id,
            sides: FaceMap::default(),
        })
    }

    /// Rebuild from persisted parts. Every id referenced by `sides` must be
    /// one of `containers`.
    pub fn from_parts(
        containers: Vec<C>,
        sides: FaceMap<Option<ContainerId>>,
    ) -> Result<Self, HolderError> {
        let set = Self {
            sides,
            ..Self::new(containers)?
        };
        for (_, id) in set.sides.iter() {
            if let Some(id) = id {
                set.get(*id)?;
            }
        }
        Ok(set)
    }

    pub fn get(&self, id: ContainerId) -> Result<&C, HolderError> {
        self.containers.get(&id).ok_or(HolderError::UnknownContainer(id))
    }

    pub(crate) fn get_mut(&mut self, id: ContainerId) -> Result<&mut C, HolderError> {
        self.containers
            .get_mut(&id)
            .ok_or(HolderError::UnknownContainer(id))
    }

    /// The container id configured on `face`, if any.
    pub fn side(&self, face: BlockFace) -> Option<ContainerId> {
        self.sides[face]
    }

    /// The container exposed on `face`. A configured id that no longer
    /// resolves is an error, not an empty face.
    pub fn on_face(&self, face: BlockFace) -> Result<Option<&C>, HolderError> {
        match self.sides[face] {
            Some(id) => self.get(id).map(Some),
            None => Ok(None),
        }
    }

    pub(crate) fn set_side(&mut self, face: BlockFace, id: Option<ContainerId>) -> Result<(), HolderError> {
        if let Some(id) = id {
            self.get(id)?;
        }
        self.sides[face] = id;
        Ok(())
    }

    /// Point `face` at `id` without checking it exists, to fabricate
    /// corrupt persisted data.
    #[cfg(test)]
    pub(crate) fn set_side_unchecked(&mut self, face: BlockFace, id: ContainerId) {
        self.sides[face] = Some(id);
    }

    pub fn iter(&self) -> impl Iterator<Item = &C> {
        self.containers.values()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut C> {
        self.containers.values_mut()
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    /// The connection type `wanted` clamped to what the container on `face`
    /// allows.
    pub(crate) fn clamp_connection(
        &self,
        face: BlockFace,
        wanted: ConnectionType,
    ) -> Result<ConnectionType, HolderError> {
        if wanted == ConnectionType::None {
            return Ok(ConnectionType::None);
        }
        match self.on_face(face)? {
            Some(container) => Ok(wanted.clamp_to(container.allowed())),
            None => Err(HolderError::NoContainerOnFace(face)),
        }
    }
}

// ---------------------------------------------------------------------------
// Holders
// ---------------------------------------------------------------------------

/// The fixed capability set of an endpoint: one optional holder per resource
/// type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holders {
    pub energy: Option<EnergyHolder>,
    pub item: Option<ItemHolder>,
    pub fluid: Option<FluidHolder>,
}

impl Holders {
    pub fn supports(&self, resource_type: ResourceType) -> bool {
        self.side_config(resource_type).is_some()
    }

    pub fn resource_types(&self) -> Vec<ResourceType> {
        ResourceType::ALL
            .into_iter()
            .filter(|ty| self.supports(*ty))
            .collect()
    }

    pub fn side_config(&self, resource_type: ResourceType) -> Option<&SideConfig> {
        match resource_type {
            ResourceType::Energy => self.energy.as_ref().map(|h| h.config()),
            ResourceType::Item => self.item.as_ref().map(|h| h.config()),
            ResourceType::Fluid => self.fluid.as_ref().map(|h| h.config()),
        }
    }

    /// The connection type on `face` for `resource_type`; `None` when the
    /// endpoint has no such holder.
    pub fn connection(&self, resource_type: ResourceType, face: BlockFace) -> ConnectionType {
        self.side_config(resource_type)
            .map(|c| c.connection(face))
            .unwrap_or(ConnectionType::None)
    }

    pub fn energy(&self) -> Result<&EnergyHolder, HolderError> {
        self.energy
            .as_ref()
            .ok_or(HolderError::MissingHolder(ResourceType::Energy))
    }

    pub fn energy_mut(&mut self) -> Result<&mut EnergyHolder, HolderError> {
        self.energy
            .as_mut()
            .ok_or(HolderError::MissingHolder(ResourceType::Energy))
    }

    pub fn item(&self) -> Result<&ItemHolder, HolderError> {
        self.item
            .as_ref()
            .ok_or(HolderError::MissingHolder(ResourceType::Item))
    }

    pub fn item_mut(&mut self) -> Result<&mut ItemHolder, HolderError> {
        self.item
            .as_mut()
            .ok_or(HolderError::MissingHolder(ResourceType::Item))
    }

    pub fn fluid(&self) -> Result<&FluidHolder, HolderError> {
        self.fluid
            .as_ref()
            .ok_or(HolderError::MissingHolder(ResourceType::Fluid))
    }

    pub fn fluid_mut(&mut self) -> Result<&mut FluidHolder, HolderError> {
        self.fluid
            .as_mut()
            .ok_or(HolderError::MissingHolder(ResourceType::Fluid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::Inventory;

    #[test]
    fn connection_type_clamp() {
        assert_eq!(ConnectionType::Both.clamp_to(ConnectionType::Extract), ConnectionType::Extract);
        assert_eq!(ConnectionType::Insert.clamp_to(ConnectionType::Extract), ConnectionType::None);
        assert_eq!(ConnectionType::Both.clamp_to(ConnectionType::Both), ConnectionType::Both);
    }

    #[test]
    fn side_config_defaults() {
        let config = SideConfig::default();
        for face in BlockFace::ALL {
            assert_eq!(config.connection(face), ConnectionType::None);
            assert_eq!(config.channel(face), DEFAULT_CHANNEL);
            assert_eq!(config.insert_priority(face), DEFAULT_PRIORITY);
            assert_eq!(config.extract_priority(face), DEFAULT_PRIORITY);
        }
    }

    #[test]
    fn container_set_rejects_empty() {
        let result = ContainerSet::<ItemContainer>::new(Vec::new());
        assert_eq!(result.unwrap_err(), HolderError::EmptyContainerSet);
    }

    #[test]
    fn from_parts_surfaces_dangling_container_id() {
        let mut sides = FaceMap::default();
        sides[BlockFace::Up] = Some(ContainerId(9));
        let containers = vec![ItemContainer::new(ContainerId(0), Inventory::new(1, 64), ConnectionType::Both)];

        let result = ContainerSet::from_parts(containers, sides);
        assert_eq!(result.unwrap_err(), HolderError::UnknownContainer(ContainerId(9)));
    }

    #[test]
    fn duplicate_container_ids_are_rejected() {
        let containers = vec![
            ItemContainer::new(ContainerId(3), Inventory::new(1, 64), ConnectionType::Both),
            ItemContainer::new(ContainerId(3), Inventory::new(2, 64), ConnectionType::Both),
        ];
        assert_eq!(
            ContainerSet::new(containers).unwrap_err(),
            HolderError::DuplicateContainer(ContainerId(3))
        );
    }

    #[test]
    fn deserializing_checks_side_references() {
        let containers = vec![ItemContainer::new(ContainerId(0), Inventory::new(1, 64), ConnectionType::Both)];
        let mut set = ContainerSet::new(containers).unwrap();
        set.set_side(BlockFace::Up, Some(ContainerId(0))).unwrap();
        let text = ron::to_string(&set).unwrap();
        let restored: ContainerSet<ItemContainer> = ron::from_str(&text).unwrap();
        assert_eq!(restored, set);

        set.set_side_unchecked(BlockFace::Down, ContainerId(7));
        let text = ron::to_string(&set).unwrap();
        let err = ron::from_str::<ContainerSet<ItemContainer>>(&text).unwrap_err();
        assert!(err.to_string().contains("ContainerId(7)"), "{err}");
    }

    #[test]
    fn connection_check_reports_the_face() {
        let mut config = SideConfig::default();
        config.set_connection(BlockFace::West, ConnectionType::Both);
        let result = config.check_connections(|_, wanted| Ok(wanted.clamp_to(ConnectionType::Insert)));
        assert_eq!(
            result.unwrap_err(),
            HolderError::ConnectionNotAllowed {
                face: BlockFace::West,
                connection: ConnectionType::Both,
            }
        );
    }

    #[test]
    fn missing_holder_is_reported() {
        let holders = Holders::default();
        assert_eq!(holders.energy().unwrap_err(), HolderError::MissingHolder(ResourceType::Energy));
        assert!(!holders.supports(ResourceType::Item));
        assert_eq!(holders.connection(ResourceType::Fluid, BlockFace::Up), ConnectionType::None);
    }
}
