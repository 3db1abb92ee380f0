//! Conduit Core -- tile-entity network simulation for block worlds.
//!
//! Cables ("bridges") and machines ("endpoints") placed in the world form
//! networks per resource type. This crate discovers those networks, keeps
//! them up to date as blocks are placed, broken, reconfigured or unloaded,
//! and drives the per-type transfer algorithms once per world tick.
//!
//! # State
//!
//! - [`proto::ProtoState`] is the mutable graph: every [`discovery::ProtoNetwork`]
//!   and the [`proto::ProtoNetworkCluster`]s that group networks sharing a node.
//! - [`cluster::NetworkCluster`] is an immutable snapshot built from a
//!   proto-cluster by [`builder::ClusterBuilder`]. Snapshots are replaced,
//!   never edited, whenever their proto-cluster changes.
//!
//! # Five-Phase Tick
//!
//! Each call to [`manager::NetworkManager::tick`] runs:
//!
//! 1. **Pending** -- Apply queued structural tasks and rebuild dirty clusters.
//! 2. **Pre-tick sync** -- Revalidate every cluster; a cluster with an
//!    invalid or unknown node skips the whole tick.
//! 3. **Requests** -- Run queued holder reads and updates.
//! 4. **Pre-tick / tick / post-tick** -- Per-cluster work, on a rayon pool
//!    when the `parallel` feature and config allow it.
//! 5. **Post-tick sync** -- Final single-threaded phase.
//!
//! # Mutation Pattern
//!
//! Nothing touches network state directly. Structural changes and holder
//! access go through a [`manager::ManagerHandle`]:
//!
//! ```rust,ignore
//! let handle = manager.handle();
//! let token = handle.queue_add_node(cable)?;
//! handle.queue_read(pos, |holders| println!("{:?}", holders.energy()))?;
//! manager.tick()?;
//! ```
//!
//! # Key Types
//!
//! - [`node::NetworkNode`] -- An [`node::EndPoint`] (owns holders) or a
//!   [`node::Bridge`] (only connects).
//! - [`holder::Holders`] -- Energy, item and fluid storage with per-face
//!   connection, channel and priority configuration.
//! - [`network::NetworkType`] / [`network::NetworkGroup`] -- The plug-in
//!   seam for transfer algorithms.
//! - [`provider::NodeProvider`] -- The host world, as seen by discovery.

pub mod builder;
pub mod cluster;
pub mod command_queue;
pub mod config;
pub mod discovery;
pub mod distribute;
pub mod holder;
pub mod id;
pub mod item;
pub mod manager;
pub mod network;
pub mod node;
pub mod persist;
pub mod position;
pub mod proto;
pub mod provider;
pub mod request;
pub mod rng;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
