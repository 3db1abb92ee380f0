use super::{ConnectionType, Container, ContainerSet, HolderError, SideConfig};
use crate::id::{ContainerId, ItemTypeId};
use crate::item::Inventory;
use crate::position::{BlockFace, FaceMap};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterMode {
    Whitelist,
    Blacklist,
}

/// An allow or deny list of item types attached to a face.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFilter {
    pub mode: FilterMode,
    pub items: BTreeSet<ItemTypeId>,
}

impl ItemFilter {
    pub fn whitelist(items: impl IntoIterator<Item = ItemTypeId>) -> Self {
        Self {
            mode: FilterMode::Whitelist,
            items: items.into_iter().collect(),
        }
    }

    pub fn blacklist(items: impl IntoIterator<Item = ItemTypeId>) -> Self {
        Self {
            mode: FilterMode::Blacklist,
            items: items.into_iter().collect(),
        }
    }

    pub fn allows(&self, item: ItemTypeId) -> bool {
        match self.mode {
            FilterMode::Whitelist => self.items.contains(&item),
            FilterMode::Blacklist => !self.items.contains(&item),
        }
    }
}

// ---------------------------------------------------------------------------
// Containers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemContainer {
    id: ContainerId,
    allowed: ConnectionType,
    pub inventory: Inventory,
}

impl ItemContainer {
    pub fn new(id: ContainerId, inventory: Inventory, allowed: ConnectionType) -> Self {
        Self {
            id,
            allowed,
            inventory,
        }
    }

    pub fn id(&self) -> ContainerId {
        self.id
    }

    pub fn allowed(&self) -> ConnectionType {
        self.allowed
    }
}

impl Container for ItemContainer {
    fn id(&self) -> ContainerId {
        self.id
    }

    fn allowed(&self) -> ConnectionType {
        self.allowed
    }
}

// ---------------------------------------------------------------------------
// ItemHolder
// ---------------------------------------------------------------------------

/// Item storage of an endpoint: one or more inventories, the inventory each
/// face exposes, and per-face insert/extract filters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawItemHolder")]
pub struct ItemHolder {
    containers: ContainerSet<ItemContainer>,
    config: SideConfig,
    pub insert_filters: BTreeMap<BlockFace, ItemFilter>,
    pub extract_filters: BTreeMap<BlockFace, ItemFilter>,
}

#[derive(Deserialize)]
struct RawItemHolder {
    containers: ContainerSet<ItemContainer>,
    config: SideConfig,
    insert_filters: BTreeMap<BlockFace, ItemFilter>,
    extract_filters: BTreeMap<BlockFace, ItemFilter>,
}

impl TryFrom<RawItemHolder> for ItemHolder {
    type Error = HolderError;

    fn try_from(raw: RawItemHolder) -> Result<Self, HolderError> {
        raw.config
            .check_connections(|face, wanted| raw.containers.clamp_connection(face, wanted))?;
        Ok(Self {
            containers: raw.containers,
            config: raw.config,
            insert_filters: raw.insert_filters,
            extract_filters: raw.extract_filters,
        })
    }
}

impl ItemHolder {
    pub fn new(containers: Vec<ItemContainer>) -> Result<Self, HolderError> {
        Ok(Self {
            containers: ContainerSet::new(containers)?,
            config: SideConfig::default(),
            insert_filters: BTreeMap::new(),
            extract_filters: BTreeMap::new(),
        })
    }

    /// Rebuild from persisted parts, validating every side reference and
    /// every face's connection type.
    pub fn from_parts(
        containers: Vec<ItemContainer>,
        sides: FaceMap<Option<ContainerId>>,
        config: SideConfig,
    ) -> Result<Self, HolderError> {
        RawItemHolder {
            containers: ContainerSet::from_parts(containers, sides)?,
            config,
            insert_filters: BTreeMap::new(),
            extract_filters: BTreeMap::new(),
        }
        .try_into()
    }

    pub fn containers(&self) -> &ContainerSet<ItemContainer> {
        &self.containers
    }

    pub fn config(&self) -> &SideConfig {
        &self.config
    }

    /// Expose `container` on `face` with the widest connection it allows.
    pub fn attach(&mut self, face: BlockFace, container: ContainerId) -> Result<ConnectionType, HolderError> {
        self.containers.set_side(face, Some(container))?;
        let allowed = self.containers.get(container)?.allowed;
        self.set_connection(face, allowed)
    }

    /// Set the connection type of `face`, clamped to the container there.
    pub fn set_connection(&mut self, face: BlockFace, wanted: ConnectionType) -> Result<ConnectionType, HolderError> {
        let applied = self.containers.clamp_connection(face, wanted)?;
        self.config.set_connection(face, applied);
        Ok(applied)
    }

    pub fn set_channel(&mut self, face: BlockFace, channel: u32) {
        self.config.set_channel(face, channel);
    }

    pub fn set_insert_priority(&mut self, face: BlockFace, priority: i32) {
        self.config.set_insert_priority(face, priority);
    }

    pub fn set_extract_priority(&mut self, face: BlockFace, priority: i32) {
        self.config.set_extract_priority(face, priority);
    }

    #[cfg(test)]
    pub(crate) fn set_side_unchecked(&mut self, face: BlockFace, id: ContainerId) {
        self.containers.set_side_unchecked(face, id);
    }

    pub fn inventory_on(&self, face: BlockFace) -> Result<Option<&Inventory>, HolderError> {
        Ok(self.containers.on_face(face)?.map(|c| &c.inventory))
    }

    pub fn inventory_mut(&mut self, id: ContainerId) -> Result<&mut Inventory, HolderError> {
        Ok(&mut self.containers.get_mut(id)?.inventory)
    }

    pub fn can_insert(&self, face: BlockFace, item: ItemTypeId) -> bool {
        self.insert_filters.get(&face).is_none_or(|f| f.allows(item))
    }

    pub fn can_extract(&self, face: BlockFace, item: ItemTypeId) -> bool {
        self.extract_filters.get(&face).is_none_or(|f| f.allows(item))
    }

    /// Item counts across every container, regardless of side.
    pub fn merged_contents(&self) -> BTreeMap<ItemTypeId, u32> {
        let mut merged = BTreeMap::new();
        for container in self.containers.iter() {
            for (item, qty) in container.inventory.contents() {
                *merged.entry(item).or_insert(0) += qty;
            }
        }
        merged
    }

    /// Insert into the containers in id order until everything fits.
    /// Returns what didn't fit anywhere.
    #[must_use = "overflow count indicates items that did not fit"]
    pub fn merged_insert(&mut self, item: ItemTypeId, quantity: u32) -> u32 {
        let mut remaining = quantity;
        for container in self.containers.iter_mut() {
            if remaining == 0 {
                break;
            }
            remaining = container.inventory.add(item, remaining);
        }
        remaining
    }
}
