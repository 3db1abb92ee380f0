use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use std::fmt;

new_key_type! {
    /// Identifies a proto-network in the mutable network state.
    pub struct ProtoNetworkId;

    /// Identifies a cluster. Survives rebuilds of the same cluster; a split
    /// keeps the id for one component and allocates fresh ids for the rest.
    pub struct ClusterId;
}

/// Identifies a world (dimension). Cheap to copy and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorldId(pub u32);

/// Identifies an item type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemTypeId(pub u32);

/// Identifies a fluid type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FluidTypeId(pub u32);

/// Identifies an item inventory or fluid container inside a holder.
/// Persisted side configuration refers to containers by this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContainerId(pub u64);

/// Identifies a frozen [`Network`](crate::network::Network). Assigned by the
/// cluster builder and never reused within one manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NetworkId(pub u64);

/// The resource types a network can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    Energy,
    Item,
    Fluid,
}

impl ResourceType {
    pub const ALL: [ResourceType; 3] = [ResourceType::Energy, ResourceType::Item, ResourceType::Fluid];

    pub fn name(&self) -> &'static str {
        match self {
            ResourceType::Energy => "energy",
            ResourceType::Item => "item",
            ResourceType::Fluid => "fluid",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
