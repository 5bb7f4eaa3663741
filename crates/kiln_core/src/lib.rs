//! Kiln Core - scheduling and work distribution.
//!
//! This crate provides the pieces the frame scheduler is built from:
//!
//! - **`ApproxPriorityQueue`**: sharded, randomized, thread-safe priority queue
//! - **`TileArena` / `ArenaSet`**: per-thread bump allocation of scheduling records
//! - **`WorkQueue`**: flat, chunked index-range dispenser
//! - **`LoadBalancer`**: the seam between the traverser and work distribution,
//!   implemented locally by `WorkQueueBalancer` and across a cluster by
//!   `ClusterBalancer`

pub mod approx_queue;
pub mod arena;
pub mod balancer;
pub mod cluster;
pub mod error;
pub mod work_queue;

pub use approx_queue::{ApproxPriorityQueue, Pop, PopAttempt};
pub use arena::{ArenaHandle, ArenaSet, TileArena};
pub use balancer::{LoadBalancer, WorkQueueBalancer};
pub use cluster::{
    ClusterBalancer, ClusterConfig, Coordinator, ServeControl, ServeReport, StaticSplit,
    WorkRange,
};
pub use error::{ClusterError, SchedError, SchedResult};
pub use work_queue::WorkQueue;
