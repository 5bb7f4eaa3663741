//! Two-level work distribution across a cluster.
//!
//! One coordinator rank owns a master [`crate::WorkQueue`] over "master
//! chunks" (groups of `threads_per_node` assignments) and deals them out to
//! `N` render ranks. Each render rank re-dispenses its range to its own
//! worker threads through a local work queue, and only its first thread
//! to run dry talks to the coordinator. The first range of every rank is
//! computed locally, without a network exchange.

mod balancer;
pub mod tcp;
pub mod transport;
pub mod wire;

use serde::{Deserialize, Serialize};

pub use balancer::{
    initial_assignment, master_chunks, tune_granularity, ClusterBalancer, Coordinator,
    ServeControl, ServeReport,
};
pub use transport::{
    channel_links, ChannelCoordinatorLink, ChannelNodeLink, CoordinatorLink, NodeLink,
};
pub use wire::WorkRange;

/// How the first assignment of each render rank is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaticSplit {
    /// Rank `r` starts with `[r * total / N, (r + 1) * total / N)`; the
    /// whole frame is distributed statically.
    Even,
    /// Rank `r` starts with the `r`-th master chunk of this granularity.
    Chunks(usize),
}

impl Default for StaticSplit {
    fn default() -> Self {
        StaticSplit::Chunks(10)
    }
}

/// Cluster load balancing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Render threads per node (`T`); master chunks are `T` assignments.
    pub threads_per_node: usize,
    pub static_split: StaticSplit,
    /// Granularity of each node's local work queue.
    pub local_granularity: usize,
    /// Lower clamp of the re-tuned master granularity.
    pub min_granularity: usize,
    /// Optional upper clamp of the re-tuned master granularity.
    pub max_granularity: Option<usize>,
    /// Desired seconds of rendering per master chunk.
    pub target_sec_per_assignment: f64,
    /// How long a render rank waits for the coordinator. `None` waits forever.
    pub reply_timeout_ms: Option<u64>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            threads_per_node: 8,
            static_split: StaticSplit::default(),
            local_granularity: 5,
            min_granularity: 5,
            max_granularity: None,
            target_sec_per_assignment: 2e-3,
            reply_timeout_ms: None,
        }
    }
}

impl ClusterConfig {
    pub fn reply_timeout(&self) -> Option<std::time::Duration> {
        self.reply_timeout_ms.map(std::time::Duration::from_millis)
    }
}
