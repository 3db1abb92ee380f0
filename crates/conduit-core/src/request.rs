//! Queued access to holder state from outside the tick.
//!
//! UI and other consumers never touch holders directly while networks tick.
//! Reads and updates are queued and run at the safe point after
//! `pre_tick_sync`, before any cluster enters its parallel phases.

use crate::holder::Holders;
use crate::node::EndPoint;
use crate::position::Position;
use crossbeam_channel::{Receiver, Sender};
use std::fmt;
use std::sync::Arc;

pub type ReadFn = Box<dyn FnOnce(&Holders) + Send>;
pub type UpdateFn = Box<dyn FnOnce(&mut Holders) + Send>;

pub enum HolderRequest {
    Read { pos: Position, f: ReadFn },
    /// Mutate the holders; the node is invalidated afterwards so changed
    /// connections take effect on the next cycle.
    Update { pos: Position, f: UpdateFn },
}

impl HolderRequest {
    pub fn pos(&self) -> Position {
        match self {
            HolderRequest::Read { pos, .. } | HolderRequest::Update { pos, .. } => *pos,
        }
    }
}

impl fmt::Debug for HolderRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HolderRequest::Read { pos, .. } => f.debug_struct("Read").field("pos", pos).finish_non_exhaustive(),
            HolderRequest::Update { pos, .. } => f.debug_struct("Update").field("pos", pos).finish_non_exhaustive(),
        }
    }
}

#[derive(Debug)]
pub struct RequestQueue {
    tx: Sender<HolderRequest>,
    rx: Receiver<HolderRequest>,
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestQueue {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    pub fn sender(&self) -> Sender<HolderRequest> {
        self.tx.clone()
    }

    pub fn pending_count(&self) -> usize {
        self.rx.len()
    }

    /// Run every queued request against the endpoint `lookup` finds for its
    /// position. Requests for positions without an endpoint are dropped.
    /// Returns the positions whose holders were updated.
    pub fn drain(&self, lookup: impl Fn(Position) -> Option<Arc<EndPoint>>) -> Vec<Position> {
        let mut updated = Vec::new();
        for request in self.rx.try_iter() {
            let pos = request.pos();
            let Some(ep) = lookup(pos) else {
                log::warn!("dropping holder request for {pos}: no endpoint there");
                continue;
            };
            match request {
                HolderRequest::Read { f, .. } => f(&ep.lock()),
                HolderRequest::Update { f, .. } => {
                    f(&mut ep.lock());
                    updated.push(pos);
                }
            }
        }
        updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::holder::ConnectionType;
    use crate::test_utils::{energy_holders, pos};
    use std::sync::Mutex;

    #[test]
    fn reads_and_updates_run_in_order() {
        let queue = RequestQueue::new();
        let ep = EndPoint::new(pos(0, 0, 0), energy_holders(100, 10, ConnectionType::Both));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = seen.clone();
        queue
            .sender()
            .send(HolderRequest::Read {
                pos: pos(0, 0, 0),
                f: Box::new(move |h| s.lock().unwrap().push(h.energy().unwrap().energy())),
            })
            .unwrap();
        queue
            .sender()
            .send(HolderRequest::Update {
                pos: pos(0, 0, 0),
                f: Box::new(|h| {
                    h.energy_mut().unwrap().insert(5);
                }),
            })
            .unwrap();
        let s = seen.clone();
        queue
            .sender()
            .send(HolderRequest::Read {
                pos: pos(0, 0, 0),
                f: Box::new(move |h| s.lock().unwrap().push(h.energy().unwrap().energy())),
            })
            .unwrap();

        let target = ep.clone();
        let updated = queue.drain(|p| (p == target.pos()).then(|| target.clone()));
        assert_eq!(updated, vec![pos(0, 0, 0)]);
        assert_eq!(*seen.lock().unwrap(), vec![10, 15]);
    }

    #[test]
    fn requests_without_end_point_are_dropped() {
        let queue = RequestQueue::new();
        queue
            .sender()
            .send(HolderRequest::Update {
                pos: pos(9, 9, 9),
                f: Box::new(|_| panic!("must not run")),
            })
            .unwrap();
        assert!(queue.drain(|_| None).is_empty());
        assert_eq!(queue.pending_count(), 0);
    }
}
