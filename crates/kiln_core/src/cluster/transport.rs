//! Request/response links between render ranks and the coordinator.
//!
//! A render rank's link performs one blocking exchange per call: send the
//! rank id, wait for a `[start, end)` reply. The coordinator's link
//! receives requests from any rank and replies to a specific one. Any
//! transport that can do this satisfies the contract; this module has
//! the in-process one, [`super::tcp`] has sockets.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};

use super::wire::{Frame, WorkRange};
use crate::error::ClusterError;

/// Render-rank side of the work exchange.
pub trait NodeLink: Send + Sync {
    /// Ask the coordinator for more work. Blocks until it replies.
    fn request_work(&self, rank: usize) -> Result<WorkRange, ClusterError>;
}

/// Coordinator side of the work exchange.
pub trait CoordinatorLink: Send + Sync {
    /// Wait up to `timeout` for the next request. `Ok(None)` if none arrived.
    fn poll_request(&self, timeout: Duration) -> Result<Option<usize>, ClusterError>;

    /// Wait for the next request and return the requesting rank.
    fn recv_request(&self) -> Result<usize, ClusterError> {
        loop {
            if let Some(rank) = self.poll_request(Duration::from_secs(1))? {
                return Ok(rank);
            }
        }
    }

    /// Answer `rank`'s pending request.
    fn reply(&self, rank: usize, range: WorkRange) -> Result<(), ClusterError>;
}

/// In-process render-rank link.
pub struct ChannelNodeLink {
    rank: usize,
    requests: Sender<Frame>,
    replies: Receiver<Frame>,
    timeout: Option<Duration>,
}

impl ChannelNodeLink {
    pub fn rank(&self) -> usize {
        self.rank
    }
}

impl NodeLink for ChannelNodeLink {
    fn request_work(&self, rank: usize) -> Result<WorkRange, ClusterError> {
        self.requests
            .send(Frame::request(rank)?)
            .map_err(|_| ClusterError::Disconnected)?;
        let frame = match self.timeout {
            Some(timeout) => self.replies.recv_timeout(timeout).map_err(|e| match e {
                RecvTimeoutError::Timeout => ClusterError::Timeout(timeout),
                RecvTimeoutError::Disconnected => ClusterError::Disconnected,
            })?,
            None => self.replies.recv().map_err(|_| ClusterError::Disconnected)?,
        };
        frame.into_reply()
    }
}

/// In-process coordinator link.
pub struct ChannelCoordinatorLink {
    requests: Receiver<Frame>,
    replies: Vec<Sender<Frame>>,
}

impl CoordinatorLink for ChannelCoordinatorLink {
    fn poll_request(&self, timeout: Duration) -> Result<Option<usize>, ClusterError> {
        match self.requests.recv_timeout(timeout) {
            Ok(frame) => frame.into_request().map(Some),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(ClusterError::Disconnected),
        }
    }

    fn reply(&self, rank: usize, range: WorkRange) -> Result<(), ClusterError> {
        let sender = self
            .replies
            .get(rank)
            .ok_or_else(|| ClusterError::Protocol(format!("unknown rank {rank}")))?;
        // A rank that gave up on an earlier reply never reads it
        sender.try_send(Frame::reply(range)?).map_err(|e| match e {
            TrySendError::Full(_) => {
                ClusterError::Protocol(format!("rank {rank} has not read its previous reply"))
            }
            TrySendError::Disconnected(_) => ClusterError::Disconnected,
        })
    }
}

/// Wire up a coordinator and `num_nodes` render ranks inside one process.
///
/// `timeout` bounds how long a render rank waits for a reply.
pub fn channel_links(
    num_nodes: usize,
    timeout: Option<Duration>,
) -> (ChannelCoordinatorLink, Vec<ChannelNodeLink>) {
    let (request_tx, request_rx) = crossbeam_channel::unbounded();
    let mut replies = Vec::with_capacity(num_nodes);
    let mut nodes = Vec::with_capacity(num_nodes);
    for rank in 0..num_nodes {
        // One outstanding reply per rank at most
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        replies.push(reply_tx);
        nodes.push(ChannelNodeLink {
            rank,
            requests: request_tx.clone(),
            replies: reply_rx,
            timeout,
        });
    }
    (
        ChannelCoordinatorLink {
            requests: request_rx,
            replies,
        },
        nodes,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_reply_round_trip() {
        let (coordinator, nodes) = channel_links(2, None);
        std::thread::scope(|s| {
            s.spawn(|| {
                for _ in 0..2 {
                    let rank = coordinator.recv_request().unwrap();
                    coordinator
                        .reply(rank, WorkRange::new(rank * 10, rank * 10 + 5))
                        .unwrap();
                }
            });
            let handles: Vec<_> = nodes
                .iter()
                .map(|node| s.spawn(move || node.request_work(node.rank()).unwrap()))
                .collect();
            let ranges: Vec<WorkRange> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            assert_eq!(ranges[0], WorkRange::new(0, 5));
            assert_eq!(ranges[1], WorkRange::new(10, 15));
        });
    }

    #[test]
    fn test_dead_coordinator_times_out() {
        let (coordinator, nodes) = channel_links(1, Some(Duration::from_millis(20)));
        let result = nodes[0].request_work(0);
        assert!(matches!(result, Err(ClusterError::Timeout(_))));
        drop(coordinator);
    }

    #[test]
    fn test_dropped_coordinator_disconnects() {
        let (coordinator, nodes) = channel_links(1, None);
        drop(coordinator);
        assert!(matches!(
            nodes[0].request_work(0),
            Err(ClusterError::Disconnected)
        ));
    }

    #[test]
    fn test_poll_without_requests() {
        let (coordinator, _nodes) = channel_links(1, None);
        assert_eq!(
            coordinator.poll_request(Duration::from_millis(5)).unwrap(),
            None
        );
    }

    #[test]
    fn test_unread_reply_does_not_block() {
        let (coordinator, nodes) = channel_links(1, Some(Duration::ZERO));
        // The node gives up before anyone answers
        assert!(matches!(
            nodes[0].request_work(0),
            Err(ClusterError::Timeout(_))
        ));
        assert!(matches!(
            nodes[0].request_work(0),
            Err(ClusterError::Timeout(_))
        ));

        assert_eq!(coordinator.recv_request().unwrap(), 0);
        coordinator.reply(0, WorkRange::new(0, 4)).unwrap();
        assert_eq!(coordinator.recv_request().unwrap(), 0);
        assert!(matches!(
            coordinator.reply(0, WorkRange::new(4, 8)),
            Err(ClusterError::Protocol(_))
        ));
    }

    #[test]
    fn test_reply_to_unknown_rank() {
        let (coordinator, _nodes) = channel_links(1, None);
        assert!(matches!(
            coordinator.reply(3, WorkRange::EMPTY),
            Err(ClusterError::Protocol(_))
        ));
    }
}
