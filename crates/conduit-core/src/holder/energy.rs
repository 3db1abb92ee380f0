use super::{ConnectionType, HolderError, SideConfig};
use crate::position::BlockFace;
use serde::{Deserialize, Serialize};

/// Energy storage of an endpoint.
///
/// `max_insert`/`max_extract` bound how much may move in or out during one
/// execution of the energy algorithm. Stored energy never exceeds
/// `max_energy`, and no face is connected wider than `allowed`; both hold
/// for deserialized holders too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawEnergyHolder")]
pub struct EnergyHolder {
    energy: u64,
    max_energy: u64,
    pub max_insert: u64,
    pub max_extract: u64,
    /// The widest connection type any face may be set to.
    allowed: ConnectionType,
    config: SideConfig,
}

#[derive(Deserialize)]
struct RawEnergyHolder {
    energy: u64,
    max_energy: u64,
    max_insert: u64,
    max_extract: u64,
    allowed: ConnectionType,
    config: SideConfig,
}

impl TryFrom<RawEnergyHolder> for EnergyHolder {
    type Error = HolderError;

    fn try_from(raw: RawEnergyHolder) -> Result<Self, HolderError> {
        if raw.energy > raw.max_energy {
            return Err(HolderError::OverCapacity {
                amount: raw.energy,
                capacity: raw.max_energy,
            });
        }
        raw.config.check_connections(|_, wanted| Ok(wanted.clamp_to(raw.allowed)))?;
        Ok(Self {
            energy: raw.energy,
            max_energy: raw.max_energy,
            max_insert: raw.max_insert,
            max_extract: raw.max_extract,
            allowed: raw.allowed,
            config: raw.config,
        })
    }
}

impl EnergyHolder {
    pub fn new(max_energy: u64, max_insert: u64, max_extract: u64, allowed: ConnectionType) -> Self {
        Self {
            energy: 0,
            max_energy,
            max_insert,
            max_extract,
            allowed,
            config: SideConfig::default(),
        }
    }

    /// Set the stored amount, clamped to capacity.
    pub fn with_energy(mut self, energy: u64) -> Self {
        self.energy = energy.min(self.max_energy);
        self
    }

    /// Store `energy` as is, to fabricate corrupt persisted data.
    #[cfg(test)]
    pub(crate) fn set_energy_unchecked(&mut self, energy: u64) {
        self.energy = energy;
    }

    pub fn energy(&self) -> u64 {
        self.energy
    }

    pub fn max_energy(&self) -> u64 {
        self.max_energy
    }

    pub fn allowed(&self) -> ConnectionType {
        self.allowed
    }

    /// How much this holder could accept right now.
    pub fn insertable(&self) -> u64 {
        if !self.allowed.insert() {
            return 0;
        }
        self.max_energy.saturating_sub(self.energy).min(self.max_insert)
    }

    /// How much this holder could give up right now.
    pub fn extractable(&self) -> u64 {
        if !self.allowed.extract() {
            return 0;
        }
        self.energy.min(self.max_extract)
    }

    /// Add up to `amount`, returning what was accepted.
    pub fn insert(&mut self, amount: u64) -> u64 {
        let accepted = amount.min(self.max_energy.saturating_sub(self.energy));
        self.energy += accepted;
        accepted
    }

    /// Remove up to `amount`, returning what was taken.
    pub fn extract(&mut self, amount: u64) -> u64 {
        let taken = amount.min(self.energy);
        self.energy -= taken;
        taken
    }

    pub fn config(&self) -> &SideConfig {
        &self.config
    }

    /// Set the connection type of `face`, clamped to what the holder allows.
    /// Returns the type actually applied.
    pub fn set_connection(&mut self, face: BlockFace, wanted: ConnectionType) -> ConnectionType {
        let applied = wanted.clamp_to(self.allowed);
        self.config.set_connection(face, applied);
        applied
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

    /// Connect every face with the widest allowed type.
    pub fn connect_all(&mut self) {
        for face in BlockFace::ALL {
            self.set_connection(face, self.allowed);
        }
    }
}
