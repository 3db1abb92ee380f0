//! Item networks.
//!
//! Every execution moves up to `transfer_amount` items per channel. Each
//! inventory takes a role on a channel from the connection types of the
//! faces exposing it there: extract only makes it a provider, insert only a
//! consumer, both a buffer. Providers feed consumers, then buffers; buffers
//! then feed consumers. Buffers never feed each other, and an inventory only
//! offers what it held when the execution started.
//!
//! Within one flow, extract sides are visited by descending extract
//! priority, then position; each offers its inventory's contents in item-id
//! order, subject to the side's extract filter. Every item type is split
//! across the insert sides of other endpoints whose insert filter admits it
//! and whose inventory has room: higher insert priority first, evenly within
//! a priority.
//!
//! Transfers are planned against copies of the inventories and applied in
//! `post_tick`. If a destination turns out to be full at apply time the
//! remainder goes back to its source, so partial transfers never lose items.

use conduit_core::config::ItemConfig;
use conduit_core::distribute::{self, Claim, FLOWS, Role};
use conduit_core::holder::{ConnectionType, ItemFilter};
use conduit_core::id::{ContainerId, ItemTypeId, ResourceType};
use conduit_core::item::Inventory;
use conduit_core::network::{Network, NetworkGroup, NetworkType, TickError};
use conduit_core::node::EndPoint;
use conduit_core::position::{BlockFace, Position};
use std::collections::BTreeMap;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Network type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ItemNetworkType {
    tick_delay: u64,
    transfer_amount: u32,
}

impl ItemNetworkType {
    pub fn new(config: &ItemConfig) -> Self {
        Self {
            tick_delay: config.tick_delay.max(1),
            transfer_amount: config.transfer_amount,
        }
    }
}

impl Default for ItemNetworkType {
    fn default() -> Self {
        Self::new(&ItemConfig::default())
    }
}

impl NetworkType for ItemNetworkType {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Item
    }

    fn tick_delay(&self) -> u64 {
        self.tick_delay
    }

    fn create_group(&self, networks: Vec<Network>) -> Box<dyn NetworkGroup> {
        Box::new(ItemGroup::new(networks, self.transfer_amount))
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// An inventory, addressed by its endpoint and container id.
type Slot = (Position, ContainerId);

/// One connected face, with the container and filters it exposes.
#[derive(Debug, Clone)]
struct ItemSide {
    pos: Position,
    face: BlockFace,
    container: ContainerId,
    connection: ConnectionType,
    insert_priority: i32,
    extract_priority: i32,
    insert_filter: Option<ItemFilter>,
    extract_filter: Option<ItemFilter>,
}

impl ItemSide {
    fn slot(&self) -> Slot {
        (self.pos, self.container)
    }

    fn accepts(&self, item: ItemTypeId) -> bool {
        self.connection.insert() && self.insert_filter.as_ref().is_none_or(|f| f.allows(item))
    }

    fn offers(&self, item: ItemTypeId) -> bool {
        self.connection.extract() && self.extract_filter.as_ref().is_none_or(|f| f.allows(item))
    }
}

/// The role of every inventory on `channel`, from all faces exposing it.
fn slot_roles(channel: &[ItemSide]) -> BTreeMap<Slot, Role> {
    let mut flags: BTreeMap<Slot, (bool, bool)> = BTreeMap::new();
    for side in channel {
        let entry = flags.entry(side.slot()).or_default();
        entry.0 |= side.connection.insert();
        entry.1 |= side.connection.extract();
    }
    flags
        .into_iter()
        .filter_map(|(slot, (insert, extract))| Some((slot, Role::from_flags(insert, extract)?)))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemTransfer {
    pub from: Position,
    pub from_container: ContainerId,
    pub to: Position,
    pub to_container: ContainerId,
    pub item: ItemTypeId,
    pub quantity: u32,
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ItemGroup {
    networks: Vec<Network>,
    transfer_amount: u32,
    channels: Vec<Vec<ItemSide>>,
    end_points: BTreeMap<Position, Arc<EndPoint>>,
    /// Planned inventory contents for the current execution.
    ledger: BTreeMap<Slot, Inventory>,
    /// What each inventory may still give up this execution. Starts at its
    /// contents in `pre_tick` and never grows.
    offers: BTreeMap<Slot, BTreeMap<ItemTypeId, u32>>,
    transfers: Vec<ItemTransfer>,
}

impl ItemGroup {
    pub fn new(networks: Vec<Network>, transfer_amount: u32) -> Self {
        Self {
            networks,
            transfer_amount,
            channels: Vec::new(),
            end_points: BTreeMap::new(),
            ledger: BTreeMap::new(),
            offers: BTreeMap::new(),
            transfers: Vec::new(),
        }
    }

    /// Transfers planned (and, after `post_tick`, applied) by the last
    /// execution.
    pub fn transfers(&self) -> &[ItemTransfer] {
        &self.transfers
    }

    /// Insert targets for `item` among `targets`, on endpoints other than
    /// `source`, with the best priority any of their faces offers for that
    /// inventory.
    fn destinations(&self, targets: &[&ItemSide], source: Position, item: ItemTypeId) -> Vec<(Slot, Claim)> {
        let mut best: BTreeMap<Slot, i32> = BTreeMap::new();
        for side in targets.iter().filter(|s| s.pos != source && s.accepts(item)) {
            let priority = best.entry(side.slot()).or_insert(side.insert_priority);
            *priority = (*priority).max(side.insert_priority);
        }
        best.into_iter()
            .filter_map(|(slot, priority)| {
                let space = self.ledger.get(&slot)?.space_for(item);
                (space > 0).then(|| (slot, Claim::new(priority, slot.0, u64::from(space))))
            })
            .collect()
    }

    fn move_channel(&mut self, channel: &[ItemSide]) {
        let roles = slot_roles(channel);
        let with = |role: Role| {
            channel
                .iter()
                .filter(|s| roles.get(&s.slot()) == Some(&role))
                .collect::<Vec<_>>()
        };
        let mut budget = self.transfer_amount;
        for (from, to) in FLOWS {
            if budget == 0 {
                break;
            }
            let mut sources: Vec<&ItemSide> = with(from).into_iter().filter(|s| s.connection.extract()).collect();
            sources.sort_by(|a, b| {
                b.extract_priority
                    .cmp(&a.extract_priority)
                    .then(a.pos.cmp(&b.pos))
                    .then(a.face.cmp(&b.face))
            });
            budget = self.flow(&sources, &with(to), budget);
        }
    }

    /// Move items from `sources` into `targets`, spending at most `budget`.
    /// Returns the budget left.
    fn flow(&mut self, sources: &[&ItemSide], targets: &[&ItemSide], mut budget: u32) -> u32 {
        for source in sources {
            if budget == 0 {
                break;
            }
            let from = source.slot();
            let Some(contents) = self.offers.get(&from).cloned() else {
                continue;
            };
            for (item, available) in contents {
                if budget == 0 {
                    break;
                }
                if !source.offers(item) {
                    continue;
                }
                let destinations = self.destinations(targets, source.pos, item);
                let claims: Vec<Claim> = destinations.iter().map(|(_, claim)| *claim).collect();
                let amount = u64::from(available.min(budget)).min(distribute::total(&claims));
                if amount == 0 {
                    continue;
                }

                for ((to, _), given) in destinations.iter().zip(distribute::split_even(amount, &claims)) {
                    let Ok(given) = u32::try_from(given) else {
                        continue;
                    };
                    if given == 0 {
                        continue;
                    }
                    let overflow = self.ledger.get_mut(to).map_or(given, |inv| inv.add(item, given));
                    let moved = given - overflow;
                    if moved == 0 {
                        continue;
                    }
                    if let Some(inv) = self.ledger.get_mut(&from) {
                        let _ = inv.remove(item, moved);
                    }
                    if let Some(left) = self.offers.get_mut(&from).and_then(|o| o.get_mut(&item)) {
                        *left = left.saturating_sub(moved);
                    }
                    budget -= moved;
                    self.transfers.push(ItemTransfer {
                        from: from.0,
                        from_container: from.1,
                        to: to.0,
                        to_container: to.1,
                        item,
                        quantity: moved,
                    });
                }
            }
        }
        budget
    }

    fn apply(&self, transfer: &ItemTransfer) -> Result<(), TickError> {
        let (Some(src), Some(dst)) = (self.end_points.get(&transfer.from), self.end_points.get(&transfer.to)) else {
            log::warn!("item transfer {transfer:?} references an endpoint outside this group");
            return Ok(());
        };

        let removed = src
            .lock()
            .item_mut()?
            .inventory_mut(transfer.from_container)?
            .remove(transfer.item, transfer.quantity);
        if removed < transfer.quantity {
            log::warn!(
                "items at {} changed during the tick: planned {}, removed {removed}",
                transfer.from,
                transfer.quantity
            );
        }
        if removed == 0 {
            return Ok(());
        }

        let overflow = dst
            .lock()
            .item_mut()?
            .inventory_mut(transfer.to_container)?
            .add(transfer.item, removed);
        if overflow > 0 {
            log::warn!("inventory at {} is full, returning {overflow} items to {}", transfer.to, transfer.from);
            let lost = src
                .lock()
                .item_mut()?
                .inventory_mut(transfer.from_container)?
                .add(transfer.item, overflow);
            if lost > 0 {
                return Err(TickError::Failed {
                    resource_type: ResourceType::Item,
                    message: format!("{lost} items could not be returned to {}", transfer.from),
                });
            }
        }
        Ok(())
    }
}

impl NetworkGroup for ItemGroup {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Item
    }

    fn networks(&self) -> &[Network] {
        &self.networks
    }

    /// Snapshot each side's container and filters under the endpoint lock.
    fn pre_tick_sync(&mut self) -> Result<(), TickError> {
        self.channels.clear();
        self.end_points.clear();
        for network in &self.networks {
            for sides in network.sides_by_channel().into_values() {
                let mut channel = Vec::with_capacity(sides.len());
                for side in sides {
                    let holders = side.end_point.lock();
                    let holder = holders.item()?;
                    let Some(container) = holder.containers().side(side.face) else {
                        continue;
                    };
                    channel.push(ItemSide {
                        pos: side.pos(),
                        face: side.face,
                        container,
                        connection: side.connection,
                        insert_priority: side.insert_priority,
                        extract_priority: side.extract_priority,
                        insert_filter: holder.insert_filters.get(&side.face).cloned(),
                        extract_filter: holder.extract_filters.get(&side.face).cloned(),
                    });
                    self.end_points
                        .entry(side.pos())
                        .or_insert_with(|| side.end_point.clone());
                }
                self.channels.push(channel);
            }
        }
        Ok(())
    }

    fn pre_tick(&mut self) -> Result<(), TickError> {
        self.ledger.clear();
        self.offers.clear();
        self.transfers.clear();
        for side in self.channels.iter().flatten() {
            if self.ledger.contains_key(&side.slot()) {
                continue;
            }
            let Some(ep) = self.end_points.get(&side.pos) else {
                continue;
            };
            let holders = ep.lock();
            let inventory = holders.item()?.containers().get(side.container)?.inventory.clone();
            self.offers.insert(side.slot(), inventory.contents());
            self.ledger.insert(side.slot(), inventory);
        }
        Ok(())
    }

    fn tick(&mut self) -> Result<(), TickError> {
        let channels = std::mem::take(&mut self.channels);
        for channel in &channels {
            self.move_channel(channel);
        }
        self.channels = channels;
        Ok(())
    }

    fn post_tick(&mut self) -> Result<(), TickError> {
        for transfer in &self.transfers {
            self.apply(transfer)?;
        }
        log::trace!("item group applied {} transfers", self.transfers.len());
        Ok(())
    }
}
