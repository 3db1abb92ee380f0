//! The world-data boundary: what node, if any, lives at a position.

use crate::node::NetworkNode;
use crate::position::{ChunkPos, Position};

/// Answers node-presence queries for the engine. The engine only ever reads
/// through this trait; it never changes world state.
pub trait NodeProvider: Send + Sync {
    /// The node at `pos`, if the world has one there and it is loaded.
    fn get_node(&self, pos: Position) -> Option<NetworkNode>;

    /// Every node in a loaded chunk.
    fn get_nodes(&self, chunk: ChunkPos) -> Vec<NetworkNode>;

    /// `true` when the world cannot say whether `pos` holds a node, usually
    /// because its chunk is not loaded. Unknown is neither present nor absent.
    fn is_unknown(&self, _pos: Position) -> bool {
        false
    }
}
