//! Fluid networks.
//!
//! Works like the item network with volumes instead of stacks: up to
//! `transfer_rate` units move per channel per execution, tanks take the same
//! provider, consumer and buffer roles, sources are visited by extract
//! priority then position, and each source's fluid is split across insert
//! sides by insert priority. A tank only offers what it held when the
//! execution started. A tank holding one fluid never accepts another; an
//! empty tank takes whatever arrives first and is typed from then on.

use conduit_core::config::FluidConfig;
use conduit_core::distribute::{self, Claim, FLOWS, Role};
use conduit_core::holder::{ConnectionType, FluidContainer};
use conduit_core::id::{ContainerId, FluidTypeId, ResourceType};
use conduit_core::network::{Network, NetworkGroup, NetworkType, TickError};
use conduit_core::node::EndPoint;
use conduit_core::position::{BlockFace, Position};
use std::collections::BTreeMap;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Network type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FluidNetworkType {
    tick_delay: u64,
    transfer_rate: u64,
}

impl FluidNetworkType {
    pub fn new(config: &FluidConfig) -> Self {
        Self {
            tick_delay: config.tick_delay.max(1),
            transfer_rate: config.transfer_rate,
        }
    }
}

impl Default for FluidNetworkType {
    fn default() -> Self {
        Self::new(&FluidConfig::default())
    }
}

impl NetworkType for FluidNetworkType {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Fluid
    }

    fn tick_delay(&self) -> u64 {
        self.tick_delay
    }

    fn create_group(&self, networks: Vec<Network>) -> Box<dyn NetworkGroup> {
        Box::new(FluidGroup::new(networks, self.transfer_rate))
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

type Tank = (Position, ContainerId);

#[derive(Debug, Clone, Copy)]
struct FluidSide {
    pos: Position,
    face: BlockFace,
    container: ContainerId,
    connection: ConnectionType,
    insert_priority: i32,
    extract_priority: i32,
}

impl FluidSide {
    fn tank(&self) -> Tank {
        (self.pos, self.container)
    }
}

fn tank_roles(channel: &[FluidSide]) -> BTreeMap<Tank, Role> {
    let mut flags: BTreeMap<Tank, (bool, bool)> = BTreeMap::new();
    for side in channel {
        let entry = flags.entry(side.tank()).or_default();
        entry.0 |= side.connection.insert();
        entry.1 |= side.connection.extract();
    }
    flags
        .into_iter()
        .filter_map(|(tank, (insert, extract))| Some((tank, Role::from_flags(insert, extract)?)))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FluidTransfer {
    pub from: Position,
    pub from_container: ContainerId,
    pub to: Position,
    pub to_container: ContainerId,
    pub fluid: FluidTypeId,
    pub amount: u64,
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct FluidGroup {
    networks: Vec<Network>,
    transfer_rate: u64,
    channels: Vec<Vec<FluidSide>>,
    end_points: BTreeMap<Position, Arc<EndPoint>>,
    ledger: BTreeMap<Tank, FluidContainer>,
    /// Fluid each tank may still give up this execution, from its contents
    /// in `pre_tick`.
    offers: BTreeMap<Tank, (FluidTypeId, u64)>,
    transfers: Vec<FluidTransfer>,
}

impl FluidGroup {
    pub fn new(networks: Vec<Network>, transfer_rate: u64) -> Self {
        Self {
            networks,
            transfer_rate,
            channels: Vec::new(),
            end_points: BTreeMap::new(),
            ledger: BTreeMap::new(),
            offers: BTreeMap::new(),
            transfers: Vec::new(),
        }
    }

    pub fn transfers(&self) -> &[FluidTransfer] {
        &self.transfers
    }

    fn destinations(&self, targets: &[&FluidSide], source: Position, fluid: FluidTypeId) -> Vec<(Tank, Claim)> {
        let mut best: BTreeMap<Tank, i32> = BTreeMap::new();
        for side in targets.iter().filter(|s| s.pos != source && s.connection.insert()) {
            let priority = best.entry(side.tank()).or_insert(side.insert_priority);
            *priority = (*priority).max(side.insert_priority);
        }
        best.into_iter()
            .filter_map(|(tank, priority)| {
                let container = self.ledger.get(&tank)?;
                let space = if container.accepts(fluid) { container.remaining() } else { 0 };
                (space > 0).then(|| (tank, Claim::new(priority, tank.0, space)))
            })
            .collect()
    }

    fn move_channel(&mut self, channel: &[FluidSide]) {
        let roles = tank_roles(channel);
        let with = |role: Role| {
            channel
                .iter()
                .filter(|s| roles.get(&s.tank()) == Some(&role))
                .collect::<Vec<_>>()
        };
        let mut budget = self.transfer_rate;
        for (from, to) in FLOWS {
            if budget == 0 {
                break;
            }
            let mut sources: Vec<&FluidSide> = with(from).into_iter().filter(|s| s.connection.extract()).collect();
            sources.sort_by(|a, b| {
                b.extract_priority
                    .cmp(&a.extract_priority)
                    .then(a.pos.cmp(&b.pos))
                    .then(a.face.cmp(&b.face))
            });
            budget = self.flow(&sources, &with(to), budget);
        }
    }

    /// Move fluid from `sources` into `targets`, spending at most `budget`.
    /// Returns the budget left.
    fn flow(&mut self, sources: &[&FluidSide], targets: &[&FluidSide], mut budget: u64) -> u64 {
        for source in sources {
            if budget == 0 {
                break;
            }
            let from = source.tank();
            let Some(&(fluid, available)) = self.offers.get(&from) else {
                continue;
            };
            let destinations = self.destinations(targets, source.pos, fluid);
            let claims: Vec<Claim> = destinations.iter().map(|(_, claim)| *claim).collect();
            let amount = available.min(budget).min(distribute::total(&claims));
            if amount == 0 {
                continue;
            }

            for ((to, _), given) in destinations.iter().zip(distribute::split_even(amount, &claims)) {
                if given == 0 {
                    continue;
                }
                let accepted = self.ledger.get_mut(to).map_or(0, |c| c.insert(fluid, given));
                if accepted == 0 {
                    continue;
                }
                if let Some(container) = self.ledger.get_mut(&from) {
                    container.extract(accepted);
                }
                if let Some((_, left)) = self.offers.get_mut(&from) {
                    *left = left.saturating_sub(accepted);
                }
                budget -= accepted;
                self.transfers.push(FluidTransfer {
                    from: from.0,
                    from_container: from.1,
                    to: to.0,
                    to_container: to.1,
                    fluid,
                    amount: accepted,
                });
            }
        }
        budget
    }

    fn apply(&self, transfer: &FluidTransfer) -> Result<(), TickError> {
        let (Some(src), Some(dst)) = (self.end_points.get(&transfer.from), self.end_points.get(&transfer.to)) else {
            log::warn!("fluid transfer {transfer:?} references an endpoint outside this group");
            return Ok(());
        };

        let drained = src
            .lock()
            .fluid_mut()?
            .container_mut(transfer.from_container)?
            .extract(transfer.amount);
        let taken = match drained {
            Some((fluid, taken)) if fluid == transfer.fluid => taken,
            other => {
                log::warn!("tank at {} changed during the tick: expected {:?}, found {other:?}", transfer.from, transfer.fluid);
                if let Some((fluid, taken)) = other {
                    src.lock().fluid_mut()?.container_mut(transfer.from_container)?.insert(fluid, taken);
                }
                return Ok(());
            }
        };
        if taken == 0 {
            return Ok(());
        }

        let accepted = dst
            .lock()
            .fluid_mut()?
            .container_mut(transfer.to_container)?
            .insert(transfer.fluid, taken);
        if accepted < taken {
            let back = taken - accepted;
            log::warn!("tank at {} rejected {back} units, returning them to {}", transfer.to, transfer.from);
            let returned = src
                .lock()
                .fluid_mut()?
                .container_mut(transfer.from_container)?
                .insert(transfer.fluid, back);
            if returned < back {
                return Err(TickError::Failed {
                    resource_type: ResourceType::Fluid,
                    message: format!("{} units could not be returned to {}", back - returned, transfer.from),
                });
            }
        }
        Ok(())
    }
}

impl NetworkGroup for FluidGroup {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Fluid
    }

    fn networks(&self) -> &[Network] {
        &self.networks
    }

    fn pre_tick_sync(&mut self) -> Result<(), TickError> {
        self.channels.clear();
        self.end_points.clear();
        for network in &self.networks {
            for sides in network.sides_by_channel().into_values() {
                let mut channel = Vec::with_capacity(sides.len());
                for side in sides {
                    let Some(container) = side.end_point.lock().fluid()?.containers().side(side.face) else {
                        continue;
                    };
                    channel.push(FluidSide {
                        pos: side.pos(),
                        face: side.face,
                        container,
                        connection: side.connection,
                        insert_priority: side.insert_priority,
                        extract_priority: side.extract_priority,
                    });
                    self.end_points.entry(side.pos()).or_insert(side.end_point);
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
            if self.ledger.contains_key(&side.tank()) {
                continue;
            }
            let Some(ep) = self.end_points.get(&side.pos) else {
                continue;
            };
            let container = ep.lock().fluid()?.containers().get(side.container)?.clone();
            if let Some(fluid) = container.fluid() {
                self.offers.insert(side.tank(), (fluid, container.amount()));
            }
            self.ledger.insert(side.tank(), container);
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
        Ok(())
    }
}
