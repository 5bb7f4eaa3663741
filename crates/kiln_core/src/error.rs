//! Error taxonomy for scheduling and work distribution.
//!
//! A best-effort queue miss is not an error and has no variant here; see
//! [`crate::PopAttempt`]. Overrunning a frame deadline is not an error either.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by the scheduling primitives.
#[derive(Error, Debug)]
pub enum SchedError {
    /// A per-thread arena ran out of slots. Arenas are sized from the
    /// worst case of the active region, so this indicates a bad configuration.
    #[error("tile arena {arena} exhausted its capacity of {capacity} records")]
    Capacity { arena: usize, capacity: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),
}

/// Errors raised by cluster transports. All of them are fatal to the frame.
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("peer disconnected")]
    Disconnected,

    #[error("no reply from coordinator within {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    /// The frame was given up after a render rank failed.
    #[error("frame aborted after a render rank failed")]
    Aborted,
}

pub type SchedResult<T> = Result<T, SchedError>;
