//! The seam between the image traverser and work distribution.
//!
//! A traverser asks its load balancer for flat assignment ranges (coarse
//! tile indices) until it gets `None`. The local implementation is a
//! [`WorkQueue`] per display channel; the cluster implementation lives in
//! [`crate::cluster`].

use std::ops::Range;

use crate::error::SchedResult;
use crate::work_queue::WorkQueue;

/// Hands out disjoint assignment ranges to worker threads.
///
/// `setup_*` calls happen between pipeline stages with exclusive access;
/// `next_assignment` is called concurrently by every worker of a frame.
pub trait LoadBalancer: Send + Sync {
    /// Size per-channel state for `num_channels` channels rendered by
    /// `num_procs` worker threads.
    fn setup_begin(&mut self, num_channels: usize, num_procs: usize);

    /// Record how many assignments a channel has.
    fn setup_display_channel(&mut self, channel: usize, num_assignments: usize);

    /// Prepare the assignments of the next frame.
    fn setup_frame(&mut self, channel: usize) -> SchedResult<()>;

    /// Claim the next range for worker `proc`, or `None` when the frame's
    /// assignments are used up.
    fn next_assignment(&self, channel: usize, proc: usize) -> SchedResult<Option<Range<usize>>>;
}

#[derive(Debug, Default)]
struct ChannelInfo {
    num_assignments: usize,
    workq: WorkQueue,
}

/// Single-process balancer: one work queue per channel, refilled every frame.
#[derive(Debug)]
pub struct WorkQueueBalancer {
    granularity: usize,
    num_procs: usize,
    channels: Vec<ChannelInfo>,
}

impl WorkQueueBalancer {
    /// `granularity` is the number of assignments per pull (0 = automatic).
    pub fn new(granularity: usize) -> Self {
        Self {
            granularity,
            num_procs: 1,
            channels: Vec::new(),
        }
    }

    pub fn granularity(&self) -> usize {
        self.granularity
    }
}

impl LoadBalancer for WorkQueueBalancer {
    fn setup_begin(&mut self, num_channels: usize, num_procs: usize) {
        self.num_procs = num_procs.max(1);
        self.channels.resize_with(num_channels, ChannelInfo::default);
    }

    fn setup_display_channel(&mut self, channel: usize, num_assignments: usize) {
        self.channels[channel].num_assignments = num_assignments;
    }

    fn setup_frame(&mut self, channel: usize) -> SchedResult<()> {
        let ci = &self.channels[channel];
        ci.workq
            .refill(ci.num_assignments, self.num_procs, self.granularity);
        Ok(())
    }

    fn next_assignment(&self, channel: usize, _proc: usize) -> SchedResult<Option<Range<usize>>> {
        Ok(self.channels[channel].workq.next_assignment())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_each_frame_covers_all_assignments() {
        let mut balancer = WorkQueueBalancer::new(3);
        balancer.setup_begin(2, 4);
        balancer.setup_display_channel(0, 10);
        balancer.setup_display_channel(1, 4);

        for _frame in 0..2 {
            balancer.setup_frame(0).unwrap();
            let mut covered = Vec::new();
            while let Some(range) = balancer.next_assignment(0, 0).unwrap() {
                covered.extend(range);
            }
            assert_eq!(covered, (0..10).collect::<Vec<_>>());
        }

        // Channel 1 is independent of channel 0
        balancer.setup_frame(1).unwrap();
        assert_eq!(balancer.next_assignment(1, 2).unwrap(), Some(0..3));
        assert_eq!(balancer.next_assignment(1, 3).unwrap(), Some(3..4));
        assert_eq!(balancer.next_assignment(1, 0).unwrap(), None);
    }
}
