//! Immutable, tickable cluster snapshots.

use crate::id::{ClusterId, ResourceType};
use crate::network::{NetworkGroup, TickError, TickPhase};
use crate::node::NetworkNode;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

#[derive(Debug)]
struct GroupSlot {
    group: Box<dyn NetworkGroup>,
    tick_delay: u64,
    /// Tick on which this group failed a phase and sits out the rest.
    failed_on: Option<u64>,
}

/// A frozen cluster. Replaced, never mutated structurally, whenever its
/// proto-cluster changes.
#[derive(Debug)]
pub struct NetworkCluster {
    id: ClusterId,
    groups: Vec<GroupSlot>,
    nodes: Vec<NetworkNode>,
    complete: bool,
    valid: bool,
    tick_offset: u64,
}

impl NetworkCluster {
    pub fn new(id: ClusterId, nodes: Vec<NetworkNode>, complete: bool, tick_offset: u64) -> Self {
        Self {
            id,
            groups: Vec::new(),
            nodes,
            complete,
            valid: false,
            tick_offset,
        }
    }

    pub fn add_group(&mut self, group: Box<dyn NetworkGroup>, tick_delay: u64) {
        self.groups.push(GroupSlot {
            group,
            tick_delay: tick_delay.max(1),
            failed_on: None,
        });
    }

    pub fn id(&self) -> ClusterId {
        self.id
    }

    pub fn tick_offset(&self) -> u64 {
        self.tick_offset
    }

    /// Validity as of the last `pre_tick_sync`.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn nodes(&self) -> &[NetworkNode] {
        &self.nodes
    }

    pub fn groups(&self) -> impl Iterator<Item = &dyn NetworkGroup> {
        self.groups.iter().map(|slot| slot.group.as_ref())
    }

    pub fn resource_types(&self) -> Vec<ResourceType> {
        self.groups.iter().map(|slot| slot.group.resource_type()).collect()
    }

    /// Whether a group with `tick_delay` runs on `tick`.
    pub fn is_due(&self, tick: u64, tick_delay: u64) -> bool {
        tick.wrapping_add(self.tick_offset) % tick_delay.max(1) == 0
    }

    // -----------------------------------------------------------------------
    // Phases
    // -----------------------------------------------------------------------

    /// Revalidate, then run the first phase. Every member node must be
    /// valid and every network complete, otherwise the whole cluster waits.
    pub fn pre_tick_sync(&mut self, tick: u64) {
        self.valid = self.complete && self.nodes.iter().all(|n| n.is_valid());
        if !self.valid {
            log::debug!("cluster {:?} is waiting on invalid or unknown nodes", self.id);
            return;
        }
        self.run_phase(TickPhase::PreTickSync, tick);
    }

    /// `pre_tick`, `tick` and `post_tick`: the phases allowed off the world
    /// thread.
    pub fn run_parallel_phases(&mut self, tick: u64) {
        self.run_phase(TickPhase::PreTick, tick);
        self.run_phase(TickPhase::Tick, tick);
        self.run_phase(TickPhase::PostTick, tick);
    }

    pub fn post_tick_sync(&mut self, tick: u64) {
        self.run_phase(TickPhase::PostTickSync, tick);
    }

    /// Run `phase` on every due group. A returned error or a panic is logged
    /// and benches that group for the rest of `tick`.
    pub fn run_phase(&mut self, phase: TickPhase, tick: u64) {
        if !self.valid {
            return;
        }
        let offset = self.tick_offset;
        for slot in &mut self.groups {
            if tick.wrapping_add(offset) % slot.tick_delay != 0 || slot.failed_on == Some(tick) {
                continue;
            }
            let resource_type = slot.group.resource_type();
            log::trace!("cluster {:?}: {resource_type} {phase}", self.id);

            let result = panic::catch_unwind(AssertUnwindSafe(|| phase.run(slot.group.as_mut())));
            let err = match result {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err,
                Err(payload) => TickError::Panicked(panic_message(payload.as_ref())),
            };
            log::error!("cluster {:?}: {resource_type} group failed in {phase}: {err}", self.id);
            slot.failed_on = Some(tick);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Network;
    use crate::node::Bridge;
    use crate::test_utils::pos;
    use slotmap::SlotMap;
    use std::sync::{Arc, Mutex};

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Behaviour {
        Ok,
        FailPreTick,
        Panic,
    }

    #[derive(Debug)]
    struct Recorder {
        resource_type: ResourceType,
        behaviour: Behaviour,
        log: Arc<Mutex<Vec<(ResourceType, TickPhase)>>>,
    }

    impl Recorder {
        fn record(&self, phase: TickPhase) {
            self.log.lock().unwrap().push((self.resource_type, phase));
        }
    }

    impl NetworkGroup for Recorder {
        fn resource_type(&self) -> ResourceType {
            self.resource_type
        }

        fn networks(&self) -> &[Network] {
            &[]
        }

        fn pre_tick_sync(&mut self) -> Result<(), TickError> {
            self.record(TickPhase::PreTickSync);
            Ok(())
        }

        fn pre_tick(&mut self) -> Result<(), TickError> {
            if self.behaviour == Behaviour::FailPreTick {
                return Err(TickError::Failed {
                    resource_type: self.resource_type,
                    message: "broken".into(),
                });
            }
            self.record(TickPhase::PreTick);
            Ok(())
        }

        fn tick(&mut self) -> Result<(), TickError> {
            if self.behaviour == Behaviour::Panic {
                panic!("boom");
            }
            self.record(TickPhase::Tick);
            Ok(())
        }

        fn post_tick(&mut self) -> Result<(), TickError> {
            self.record(TickPhase::PostTick);
            Ok(())
        }

        fn post_tick_sync(&mut self) -> Result<(), TickError> {
            self.record(TickPhase::PostTickSync);
            Ok(())
        }
    }

    fn cluster_id() -> ClusterId {
        let mut map = SlotMap::<ClusterId, ()>::with_key();
        map.insert(())
    }

    fn cluster_with(
        groups: &[(ResourceType, Behaviour, u64)],
        offset: u64,
    ) -> (NetworkCluster, Arc<Mutex<Vec<(ResourceType, TickPhase)>>>, Arc<Bridge>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let cable = Bridge::cable(pos(0, 0, 0), ResourceType::Energy);
        let mut cluster = NetworkCluster::new(cluster_id(), vec![NetworkNode::Bridge(cable.clone())], true, offset);
        for (resource_type, behaviour, delay) in groups {
            cluster.add_group(
                Box::new(Recorder {
                    resource_type: *resource_type,
                    behaviour: *behaviour,
                    log: log.clone(),
                }),
                *delay,
            );
        }
        (cluster, log, cable)
    }

    fn run_tick(cluster: &mut NetworkCluster, tick: u64) {
        cluster.pre_tick_sync(tick);
        cluster.run_parallel_phases(tick);
        cluster.post_tick_sync(tick);
    }

    // -----------------------------------------------------------------------
    // Tests
    // -----------------------------------------------------------------------

    #[test]
    fn phases_run_in_order() {
        let (mut cluster, log, _) = cluster_with(&[(ResourceType::Energy, Behaviour::Ok, 1)], 0);
        run_tick(&mut cluster, 0);
        let phases: Vec<TickPhase> = log.lock().unwrap().iter().map(|(_, p)| *p).collect();
        assert_eq!(phases, TickPhase::ALL.to_vec());
    }

    #[test]
    fn invalid_cluster_skips_everything() {
        let (mut cluster, log, cable) = cluster_with(&[(ResourceType::Energy, Behaviour::Ok, 1)], 0);
        cable.set_valid(false);
        run_tick(&mut cluster, 0);
        assert!(!cluster.is_valid());
        assert!(log.lock().unwrap().is_empty());

        cable.set_valid(true);
        run_tick(&mut cluster, 1);
        assert!(cluster.is_valid());
        assert_eq!(log.lock().unwrap().len(), 5);
    }

    #[test]
    fn incomplete_cluster_waits() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut cluster = NetworkCluster::new(cluster_id(), Vec::new(), false, 0);
        cluster.add_group(
            Box::new(Recorder {
                resource_type: ResourceType::Item,
                behaviour: Behaviour::Ok,
                log: log.clone(),
            }),
            1,
        );
        run_tick(&mut cluster, 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn tick_delay_and_offset_gate_groups() {
        let (mut cluster, log, _) = cluster_with(
            &[(ResourceType::Energy, Behaviour::Ok, 1), (ResourceType::Item, Behaviour::Ok, 4)],
            1,
        );
        for tick in 0..8 {
            run_tick(&mut cluster, tick);
        }
        let item_ticks = log
            .lock()
            .unwrap()
            .iter()
            .filter(|(ty, p)| *ty == ResourceType::Item && *p == TickPhase::Tick)
            .count();
        let energy_ticks = log
            .lock()
            .unwrap()
            .iter()
            .filter(|(ty, p)| *ty == ResourceType::Energy && *p == TickPhase::Tick)
            .count();
        // (tick + 1) % 4 == 0 for ticks 3 and 7.
        assert_eq!(item_ticks, 2);
        assert_eq!(energy_ticks, 8);
        assert!(cluster.is_due(3, 4));
        assert!(!cluster.is_due(4, 4));
    }

    #[test]
    fn failing_group_sits_out_the_tick_without_affecting_others() {
        let (mut cluster, log, _) = cluster_with(
            &[(ResourceType::Energy, Behaviour::FailPreTick, 1), (ResourceType::Fluid, Behaviour::Ok, 1)],
            0,
        );
        run_tick(&mut cluster, 0);
        let log = log.lock().unwrap();
        let energy: Vec<TickPhase> = log.iter().filter(|(t, _)| *t == ResourceType::Energy).map(|(_, p)| *p).collect();
        let fluid = log.iter().filter(|(t, _)| *t == ResourceType::Fluid).count();
        assert_eq!(energy, vec![TickPhase::PreTickSync]);
        assert_eq!(fluid, 5);
    }

    #[test]
    fn panicking_group_is_contained() {
        let (mut cluster, log, _) = cluster_with(
            &[(ResourceType::Item, Behaviour::Panic, 1), (ResourceType::Energy, Behaviour::Ok, 1)],
            0,
        );
        run_tick(&mut cluster, 0);
        run_tick(&mut cluster, 1);
        let log = log.lock().unwrap();
        let energy = log.iter().filter(|(ty, _)| *ty == ResourceType::Energy).count();
        assert_eq!(energy, 10);
        // The panicking group still gets its sync phase on the next tick.
        let item_syncs = log
            .iter()
            .filter(|(ty, p)| *ty == ResourceType::Item && *p == TickPhase::PreTickSync)
            .count();
        assert_eq!(item_syncs, 2);
    }

    #[test]
    fn panic_messages_are_extracted() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
    }
}
