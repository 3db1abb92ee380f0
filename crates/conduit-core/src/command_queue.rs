//! Queue of structural mutations, applied between tick cycles.
//!
//! Any thread may submit tasks through a cloned sender. The manager drains
//! the queue at one well-defined point per tick, so no cluster is ever
//! restructured mid-tick.

use crate::discovery::CancelToken;
use crate::node::NetworkNode;
use crate::position::{ChunkPos, Position};
use crossbeam_channel::{Receiver, Sender};
use std::collections::BTreeSet;

// ---------------------------------------------------------------------------
// NetworkTask
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum NetworkTask {
    /// Discover and merge the networks around a node.
    AddNode { node: NetworkNode, token: CancelToken },
    /// Drop a node and re-discover the networks it belonged to.
    RemoveNode { pos: Position },
    /// Re-read a node's configuration: remove it, then add it back.
    InvalidateNode { pos: Position },
    /// Add every node the world reports in a freshly loaded chunk.
    LoadChunk { chunk: ChunkPos },
    /// Mark every known node in the chunk as unknown.
    UnloadChunk { chunk: ChunkPos },
}

impl NetworkTask {
    pub fn add(node: NetworkNode) -> (Self, CancelToken) {
        let token = CancelToken::new();
        (
            NetworkTask::AddNode {
                node,
                token: token.clone(),
            },
            token,
        )
    }
}

// ---------------------------------------------------------------------------
// TaskQueue
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct TaskQueue {
    tx: Sender<NetworkTask>,
    rx: Receiver<NetworkTask>,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    pub fn sender(&self) -> Sender<NetworkTask> {
        self.tx.clone()
    }

    pub fn push(&self, task: NetworkTask) {
        // Both ends live in `self`, so the channel cannot be disconnected.
        let _ = self.tx.send(task);
    }

    pub fn pending_count(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Drain everything queued so far, in submission order. An add followed
    /// by a remove of the same position is cancelled and dropped; the remove
    /// is kept.
    pub fn drain(&self) -> Vec<NetworkTask> {
        let tasks: Vec<NetworkTask> = self.rx.try_iter().collect();

        let mut removed_later: BTreeSet<Position> = BTreeSet::new();
        let mut keep = vec![true; tasks.len()];
        for (i, task) in tasks.iter().enumerate().rev() {
            match task {
                NetworkTask::RemoveNode { pos } => {
                    removed_later.insert(*pos);
                }
                NetworkTask::AddNode { node, token } => {
                    if token.is_cancelled() || removed_later.contains(&node.pos()) {
                        token.cancel();
                        keep[i] = false;
                        log::debug!("dropped queued add at {}", node.pos());
                    }
                }
                _ => {}
            }
        }

        tasks
            .into_iter()
            .zip(keep)
            .filter_map(|(task, keep)| keep.then_some(task))
            .collect()
    }
}
