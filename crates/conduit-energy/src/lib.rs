//! Energy networks.
//!
//! Each execution balances every channel of every energy network in a
//! cluster independently. Endpoints take one of three roles per channel,
//! decided by the connection types of their faces on that channel:
//!
//! - **Providers** (extract only) offer `min(stored, max_extract)`.
//! - **Consumers** (insert only) accept `min(free capacity, max_insert)`.
//! - **Buffers** (insert and extract) absorb surplus and cover deficits.
//!
//! Providers feed consumers first, any surplus charges buffers, and any
//! remaining demand is served from buffers. Buffers never feed each other.
//! Destinations are filled by descending insert priority and split evenly
//! within a priority; sources are drained by descending extract priority,
//! then position. Energy is conserved: the per-tick plan is computed on a
//! ledger and only applied to holders in `post_tick`.

use conduit_core::config::EnergyConfig;
use conduit_core::distribute::{self, Claim, FLOWS, Role};
use conduit_core::id::ResourceType;
use conduit_core::network::{Network, NetworkGroup, NetworkType, Side, TickError};
use conduit_core::node::EndPoint;
use conduit_core::position::Position;
use std::collections::BTreeMap;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Network type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EnergyNetworkType {
    tick_delay: u64,
}

impl EnergyNetworkType {
    pub fn new(config: &EnergyConfig) -> Self {
        Self {
            tick_delay: config.tick_delay.max(1),
        }
    }
}

impl Default for EnergyNetworkType {
    fn default() -> Self {
        Self::new(&EnergyConfig::default())
    }
}

impl NetworkType for EnergyNetworkType {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Energy
    }

    fn tick_delay(&self) -> u64 {
        self.tick_delay
    }

    fn create_group(&self, networks: Vec<Network>) -> Box<dyn NetworkGroup> {
        Box::new(EnergyGroup::new(networks))
    }
}

// ---------------------------------------------------------------------------
// Participants and ledger
// ---------------------------------------------------------------------------

/// One endpoint on one channel, aggregated over its faces. A priority is
/// the highest of the faces that allow that direction.
#[derive(Debug, Clone)]
struct Participant {
    pos: Position,
    role: Role,
    insert_priority: i32,
    extract_priority: i32,
}

fn participants(sides: &[Side]) -> Vec<Participant> {
    let mut by_pos: BTreeMap<Position, (Option<i32>, Option<i32>)> = BTreeMap::new();
    for side in sides {
        let entry = by_pos.entry(side.pos()).or_default();
        if side.connection.insert() {
            entry.0 = Some(entry.0.map_or(side.insert_priority, |p| p.max(side.insert_priority)));
        }
        if side.connection.extract() {
            entry.1 = Some(entry.1.map_or(side.extract_priority, |p| p.max(side.extract_priority)));
        }
    }

    by_pos
        .into_iter()
        .filter_map(|(pos, (insert, extract))| {
            Some(Participant {
                pos,
                role: Role::from_flags(insert.is_some(), extract.is_some())?,
                insert_priority: insert.unwrap_or(0),
                extract_priority: extract.unwrap_or(0),
            })
        })
        .collect()
}

/// Working copy of one endpoint's energy for the current execution.
#[derive(Debug)]
struct Account {
    end_point: Arc<EndPoint>,
    start: u64,
    energy: u64,
    capacity: u64,
    insert_left: u64,
    extract_left: u64,
}

impl Account {
    fn insertable(&self) -> u64 {
        self.capacity.saturating_sub(self.energy).min(self.insert_left)
    }

    fn extractable(&self) -> u64 {
        self.energy.min(self.extract_left)
    }
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct EnergyGroup {
    networks: Vec<Network>,
    /// Participants per (network, channel), snapshotted in `pre_tick_sync`.
    channels: Vec<Vec<Participant>>,
    end_points: BTreeMap<Position, Arc<EndPoint>>,
    accounts: BTreeMap<Position, Account>,
    transferred: u64,
}

impl EnergyGroup {
    pub fn new(networks: Vec<Network>) -> Self {
        Self {
            networks,
            channels: Vec::new(),
            end_points: BTreeMap::new(),
            accounts: BTreeMap::new(),
            transferred: 0,
        }
    }

    /// Energy moved during the last execution.
    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    /// Move as much as possible from `from` to `to`. Returns the amount.
    fn flow(&mut self, from: &[&Participant], to: &[&Participant]) -> u64 {
        let offers: Vec<Claim> = from
            .iter()
            .map(|p| {
                let amount = self.accounts.get(&p.pos).map_or(0, Account::extractable);
                Claim::new(p.extract_priority, p.pos, amount)
            })
            .collect();
        let demands: Vec<Claim> = to
            .iter()
            .map(|p| {
                let amount = self.accounts.get(&p.pos).map_or(0, Account::insertable);
                Claim::new(p.insert_priority, p.pos, amount)
            })
            .collect();

        let amount = distribute::total(&offers).min(distribute::total(&demands));
        if amount == 0 {
            return 0;
        }
        for (claim, taken) in offers.iter().zip(distribute::take_ordered(amount, &offers)) {
            if let Some(account) = self.accounts.get_mut(&claim.pos) {
                account.energy -= taken;
                account.extract_left -= taken;
            }
        }
        for (claim, given) in demands.iter().zip(distribute::split_even(amount, &demands)) {
            if let Some(account) = self.accounts.get_mut(&claim.pos) {
                account.energy += given;
                account.insert_left -= given;
            }
        }
        amount
    }

    fn balance(&mut self, channel: &[Participant]) -> u64 {
        let with = |role: Role| channel.iter().filter(|p| p.role == role).collect::<Vec<_>>();
        FLOWS
            .iter()
            .map(|&(from, to)| self.flow(&with(from), &with(to)))
            .sum()
    }
}

impl NetworkGroup for EnergyGroup {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Energy
    }

    fn networks(&self) -> &[Network] {
        &self.networks
    }

    fn pre_tick_sync(&mut self) -> Result<(), TickError> {
        self.channels.clear();
        self.end_points.clear();
        for network in &self.networks {
            for sides in network.sides_by_channel().into_values() {
                for side in &sides {
                    self.end_points.entry(side.pos()).or_insert_with(|| side.end_point.clone());
                }
                self.channels.push(participants(&sides));
            }
        }
        Ok(())
    }

    fn pre_tick(&mut self) -> Result<(), TickError> {
        self.accounts.clear();
        for (pos, ep) in &self.end_points {
            let holders = ep.lock();
            let holder = holders.energy()?;
            let allowed = holder.allowed();
            self.accounts.insert(
                *pos,
                Account {
                    end_point: ep.clone(),
                    start: holder.energy(),
                    energy: holder.energy(),
                    capacity: holder.max_energy(),
                    insert_left: if allowed.insert() { holder.max_insert } else { 0 },
                    extract_left: if allowed.extract() { holder.max_extract } else { 0 },
                },
            );
        }
        Ok(())
    }

    fn tick(&mut self) -> Result<(), TickError> {
        let channels = std::mem::take(&mut self.channels);
        let moved = channels.iter().map(|channel| self.balance(channel)).sum();
        self.channels = channels;
        self.transferred = moved;
        Ok(())
    }

    fn post_tick(&mut self) -> Result<(), TickError> {
        for (pos, account) in std::mem::take(&mut self.accounts) {
            if account.energy == account.start {
                continue;
            }
            let mut holders = account.end_point.lock();
            let holder = holders.energy_mut()?;
            if holder.energy() != account.start {
                log::warn!("energy at {pos} changed during the tick, applying delta anyway");
            }
            if account.energy > account.start {
                let delta = account.energy - account.start;
                let accepted = holder.insert(delta);
                if accepted != delta {
                    log::warn!("energy at {pos}: planned insert {delta}, holder accepted {accepted}");
                }
            } else {
                let delta = account.start - account.energy;
                let taken = holder.extract(delta);
                if taken != delta {
                    log::warn!("energy at {pos}: planned extract {delta}, holder gave {taken}");
                }
            }
        }
        log::trace!("energy group moved {}", self.transferred);
        Ok(())
    }
}
