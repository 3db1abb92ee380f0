//! Hand-off of holder state to a persistence layer.
//!
//! The engine does not own an on-disk format. On `stop` it passes every known
//! endpoint's holders to a [`HolderPersistence`]; [`BitcodeStore`] is an
//! in-memory implementation that keeps bitcode-encoded snapshots.

use crate::holder::Holders;
use crate::position::Position;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("bitcode encoding failed: {0}")]
    Encode(String),
    #[error("bitcode decoding failed: {0}")]
    Decode(String),
    #[error("no holders stored for {0}")]
    Missing(Position),
}

pub trait HolderPersistence: Send {
    fn save(&mut self, pos: Position, holders: &Holders) -> Result<(), PersistError>;
}

/// Lets the host keep a handle on a store it gave to the manager.
impl<P: HolderPersistence> HolderPersistence for Arc<Mutex<P>> {
    fn save(&mut self, pos: Position, holders: &Holders) -> Result<(), PersistError> {
        self.lock().unwrap_or_else(PoisonError::into_inner).save(pos, holders)
    }
}

#[derive(Debug, Default, Clone)]
pub struct BitcodeStore {
    entries: BTreeMap<Position, Vec<u8>>,
}

impl BitcodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self, pos: Position) -> Result<Holders, PersistError> {
        let bytes = self.entries.get(&pos).ok_or(PersistError::Missing(pos))?;
        bitcode::deserialize(bytes).map_err(|e| PersistError::Decode(e.to_string()))
    }

    pub fn positions(&self) -> impl Iterator<Item = Position> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl HolderPersistence for BitcodeStore {
    fn save(&mut self, pos: Position, holders: &Holders) -> Result<(), PersistError> {
        let bytes = bitcode::serialize(holders).map_err(|e| PersistError::Encode(e.to_string()))?;
        self.entries.insert(pos, bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::holder::{ConnectionType, ItemFilter};
    use crate::id::ContainerId;
    use crate::position::BlockFace;
    use crate::test_utils::{energy_holders, fluid_holder, iron, item_holder, pos, water};

    #[test]
    fn holders_survive_a_store_round_trip() {
        let mut holders = energy_holders(500, 123, ConnectionType::Extract);
        let mut items = item_holder(2, 64, ConnectionType::Both);
        let _ = items.merged_insert(iron(), 70);
        items.insert_filters.insert(BlockFace::Up, ItemFilter::whitelist([iron()]));
        holders.item = Some(items);
        let mut fluid = fluid_holder(1000, ConnectionType::Insert);
        if let Ok(tank) = fluid.container_mut(ContainerId(0)) {
            tank.insert(water(), 300);
        }
        holders.fluid = Some(fluid);

        let mut store = BitcodeStore::new();
        store.save(pos(1, 2, 3), &holders).unwrap();
        assert_eq!(store.load(pos(1, 2, 3)).unwrap(), holders);
    }

    #[test]
    fn dangling_side_reference_fails_to_load() {
        let mut items = item_holder(2, 64, ConnectionType::Both);
        items.set_side_unchecked(BlockFace::Down, ContainerId(5));
        let holders = Holders {
            item: Some(items),
            ..Holders::default()
        };

        let mut store = BitcodeStore::new();
        store.save(pos(0, 0, 0), &holders).unwrap();
        assert!(matches!(store.load(pos(0, 0, 0)), Err(PersistError::Decode(_))));
    }

    #[test]
    fn energy_over_capacity_fails_to_load() {
        let mut holders = energy_holders(100, 100, ConnectionType::Both);
        let mut store = BitcodeStore::new();
        store.save(pos(0, 0, 0), &holders).unwrap();
        assert!(store.load(pos(0, 0, 0)).is_ok());

        if let Some(energy) = holders.energy.as_mut() {
            energy.set_energy_unchecked(101);
        }
        store.save(pos(0, 0, 0), &holders).unwrap();
        assert!(matches!(store.load(pos(0, 0, 0)), Err(PersistError::Decode(_))));
    }

    #[test]
    fn missing_position() {
        let store = BitcodeStore::new();
        assert!(matches!(store.load(pos(0, 0, 0)), Err(PersistError::Missing(_))));
    }

    #[test]
    fn corrupt_bytes_fail_to_decode() {
        let mut store = BitcodeStore::new();
        store.entries.insert(pos(0, 0, 0), vec![0xFF; 3]);
        assert!(matches!(store.load(pos(0, 0, 0)), Err(PersistError::Decode(_))));
    }
}
