use super::{ConnectionType, Container, ContainerSet, HolderError, SideConfig};
use crate::id::{ContainerId, FluidTypeId};
use crate::position::{BlockFace, FaceMap};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// FluidContainer
// ---------------------------------------------------------------------------

/// A single tank. Once it holds a fluid it only accepts that fluid until it
/// is drained empty again. A tank holds a fluid type exactly when its amount
/// is positive, and never more than its capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawFluidContainer")]
pub struct FluidContainer {
    id: ContainerId,
    allowed: ConnectionType,
    fluid: Option<FluidTypeId>,
    amount: u64,
    capacity: u64,
}

#[derive(Deserialize)]
struct RawFluidContainer {
    id: ContainerId,
    allowed: ConnectionType,
    fluid: Option<FluidTypeId>,
    amount: u64,
    capacity: u64,
}

impl TryFrom<RawFluidContainer> for FluidContainer {
    type Error = HolderError;

    fn try_from(raw: RawFluidContainer) -> Result<Self, HolderError> {
        if raw.amount > raw.capacity {
            return Err(HolderError::OverCapacity {
                amount: raw.amount,
                capacity: raw.capacity,
            });
        }
        if raw.fluid.is_some() != (raw.amount > 0) {
            return Err(HolderError::UntypedFluid(raw.id));
        }
        Ok(Self {
            id: raw.id,
            allowed: raw.allowed,
            fluid: raw.fluid,
            amount: raw.amount,
            capacity: raw.capacity,
        })
    }
}

impl FluidContainer {
    pub fn new(id: ContainerId, capacity: u64, allowed: ConnectionType) -> Self {
        Self {
            id,
            allowed,
            fluid: None,
            amount: 0,
            capacity,
        }
    }

    /// Pre-fill the tank, clamped to capacity. A zero amount leaves it untyped.
    pub fn with_fluid(mut self, fluid: FluidTypeId, amount: u64) -> Self {
        self.amount = amount.min(self.capacity);
        self.fluid = (self.amount > 0).then_some(fluid);
        self
    }

    pub fn id(&self) -> ContainerId {
        self.id
    }

    pub fn allowed(&self) -> ConnectionType {
        self.allowed
    }

    pub fn fluid(&self) -> Option<FluidTypeId> {
        self.fluid
    }

    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn remaining(&self) -> u64 {
        self.capacity.saturating_sub(self.amount)
    }

    pub fn is_empty(&self) -> bool {
        self.amount == 0
    }

    /// Whether `fluid` could go into this tank at all.
    pub fn accepts(&self, fluid: FluidTypeId) -> bool {
        self.fluid.is_none_or(|held| held == fluid)
    }

    /// Insert up to `amount` of `fluid`. A mismatching type is rejected
    /// outright and leaves the tank untouched. Returns the amount accepted.
    pub fn insert(&mut self, fluid: FluidTypeId, amount: u64) -> u64 {
        if !self.accepts(fluid) {
            return 0;
        }
        let accepted = amount.min(self.remaining());
        if accepted > 0 {
            self.amount += accepted;
            self.fluid = Some(fluid);
        }
        accepted
    }

    /// Drain up to `amount`. Returns the fluid type and amount drained.
    pub fn extract(&mut self, amount: u64) -> Option<(FluidTypeId, u64)> {
        let fluid = self.fluid?;
        let taken = amount.min(self.amount);
        self.amount -= taken;
        if self.amount == 0 {
            self.fluid = None;
        }
        Some((fluid, taken))
    }
}

impl Container for FluidContainer {
    fn id(&self) -> ContainerId {
        self.id
    }

    fn allowed(&self) -> ConnectionType {
        self.allowed
    }
}

// ---------------------------------------------------------------------------
// FluidHolder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawFluidHolder")]
pub struct FluidHolder {
    containers: ContainerSet<FluidContainer>,
    config: SideConfig,
}

#[derive(Deserialize)]
struct RawFluidHolder {
    containers: ContainerSet<FluidContainer>,
    config: SideConfig,
}

impl TryFrom<RawFluidHolder> for FluidHolder {
    type Error = HolderError;

    fn try_from(raw: RawFluidHolder) -> Result<Self, HolderError> {
        raw.config
            .check_connections(|face, wanted| raw.containers.clamp_connection(face, wanted))?;
        Ok(Self {
            containers: raw.containers,
            config: raw.config,
        })
    }
}

impl FluidHolder {
    pub fn new(containers: Vec<FluidContainer>) -> Result<Self, HolderError> {
        Ok(Self {
            containers: ContainerSet::new(containers)?,
            config: SideConfig::default(),
        })
    }

    pub fn from_parts(
        containers: Vec<FluidContainer>,
        sides: FaceMap<Option<ContainerId>>,
        config: SideConfig,
    ) -> Result<Self, HolderError> {
        RawFluidHolder {
            containers: ContainerSet::from_parts(containers, sides)?,
            config,
        }
        .try_into()
    }

    pub fn containers(&self) -> &ContainerSet<FluidContainer> {
        &self.containers
    }

    pub fn config(&self) -> &SideConfig {
        &self.config
    }

    pub fn attach(&mut self, face: BlockFace, container: ContainerId) -> Result<ConnectionType, HolderError> {
        self.containers.set_side(face, Some(container))?;
        let allowed = self.containers.get(container)?.allowed;
        self.set_connection(face, allowed)
    }

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

    pub fn container_on(&self, face: BlockFace) -> Result<Option<&FluidContainer>, HolderError> {
        self.containers.on_face(face)
    }

    pub fn container_mut(&mut self, id: ContainerId) -> Result<&mut FluidContainer, HolderError> {
        self.containers.get_mut(id)
    }
}
