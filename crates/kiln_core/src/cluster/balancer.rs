use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::transport::{CoordinatorLink, NodeLink};
use super::wire::WorkRange;
use super::{ClusterConfig, StaticSplit};
use crate::balancer::LoadBalancer;
use crate::error::{ClusterError, SchedError, SchedResult};
use crate::work_queue::WorkQueue;

/// Number of master chunks covering `total` assignments.
pub fn master_chunks(total: usize, threads_per_node: usize) -> usize {
    total.div_ceil(threads_per_node.max(1))
}

fn scale(range: Range<usize>, threads_per_node: usize, total: usize) -> Range<usize> {
    let start = range.start.saturating_mul(threads_per_node).min(total);
    let end = range.end.saturating_mul(threads_per_node).min(total);
    start..end
}

/// The first range of `rank`, in assignment units.
///
/// Every rank computes the same answer from the same inputs, so no
/// exchange with the coordinator is needed to start a frame.
pub fn initial_assignment(
    rank: usize,
    num_nodes: usize,
    total: usize,
    threads_per_node: usize,
    split: StaticSplit,
) -> Range<usize> {
    let num_nodes = num_nodes.max(1);
    match split {
        StaticSplit::Even => {
            let share = |r: usize| (r as u128 * total as u128 / num_nodes as u128) as usize;
            share(rank).min(total)..share(rank + 1).min(total)
        }
        StaticSplit::Chunks(granularity) => {
            let masterq = WorkQueue::new();
            masterq.refill(master_chunks(total, threads_per_node), num_nodes, granularity);
            for i in 0..=rank {
                match masterq.next_assignment() {
                    Some(chunk) if i == rank => return scale(chunk, threads_per_node, total),
                    Some(_) => {}
                    None => break,
                }
            }
            total..total
        }
    }
}

/// New master granularity from the measured cost per master chunk.
///
/// `max(min, round(5 * observed / target))`, optionally capped by `max`.
pub fn tune_granularity(
    observed_sec_per_assignment: f64,
    target_sec_per_assignment: f64,
    min: usize,
    max: Option<usize>,
) -> usize {
    let raw = 5.0 * observed_sec_per_assignment / target_sec_per_assignment;
    let tuned = if raw.is_finite() && raw > 0.0 {
        (raw.round() as usize).max(min)
    } else {
        min
    };
    match max {
        Some(max) => tuned.min(max.max(min)),
        None => tuned,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct MasterChannel {
    num_assignments: usize,
    master_chunks: usize,
    workq: WorkQueue,
    /// Master chunks consumed before the current refill.
    start_assignment: usize,
    granularity: usize,
    frame_start: Option<Instant>,
}

/// What the coordinator did during one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServeReport {
    pub requests: usize,
    pub ranges: usize,
    pub assignments: usize,
}

/// How often a serving coordinator checks its [`ServeControl`].
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Stops a coordinator that is serving a frame, from another thread.
#[derive(Debug, Default)]
pub struct ServeControl {
    aborted: AtomicBool,
    finished: AtomicBool,
}

impl ServeControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// A render rank failed. Every further request gets an empty range
    /// and the frame ends with [`ClusterError::Aborted`].
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }

    /// Every render rank has stopped asking for work this frame.
    pub fn finish(&self) {
        self.finished.store(true, Ordering::Release);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

/// The coordinator rank. It renders nothing and answers work requests.
pub struct Coordinator {
    num_nodes: usize,
    config: ClusterConfig,
    link: Box<dyn CoordinatorLink>,
    channels: Vec<Mutex<MasterChannel>>,
}

impl Coordinator {
    pub fn new(
        num_nodes: usize,
        config: ClusterConfig,
        link: impl CoordinatorLink + 'static,
    ) -> Self {
        Self {
            num_nodes,
            config,
            link: Box::new(link),
            channels: Vec::new(),
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn setup_begin(&mut self, num_channels: usize) {
        let initial = match self.config.static_split {
            StaticSplit::Chunks(g) => g.max(self.config.min_granularity),
            StaticSplit::Even => self.config.min_granularity,
        };
        self.channels.resize_with(num_channels, || {
            Mutex::new(MasterChannel {
                granularity: initial,
                ..Default::default()
            })
        });
    }

    pub fn setup_display_channel(&mut self, channel: usize, num_assignments: usize) {
        channel_mut(&mut self.channels[channel]).num_assignments = num_assignments;
    }

    /// Pre-consume one master chunk per render rank, re-tune the master
    /// granularity from the previous frame and refill over what is left.
    pub fn setup_frame(&mut self, channel: usize) {
        let config = &self.config;
        let num_nodes = self.num_nodes;
        let ci = channel_mut(&mut self.channels[channel]);
        let now = Instant::now();

        ci.master_chunks = master_chunks(ci.num_assignments, config.threads_per_node);
        ci.start_assignment = ci.master_chunks;

        if let StaticSplit::Chunks(static_granularity) = config.static_split {
            ci.workq.refill(ci.master_chunks, num_nodes, static_granularity);
            let mut consumed = 0;
            let mut got_work = true;
            for _ in 0..num_nodes {
                match ci.workq.next_assignment() {
                    Some(chunk) => consumed = chunk.end,
                    None => {
                        got_work = false;
                        break;
                    }
                }
            }

            if got_work {
                if let Some(previous) = ci.frame_start {
                    let frame_time = now.duration_since(previous).as_secs_f64();
                    let observed = frame_time / ci.master_chunks.max(1) as f64;
                    ci.granularity = tune_granularity(
                        observed,
                        config.target_sec_per_assignment,
                        config.min_granularity,
                        config.max_granularity,
                    );
                    log::debug!(
                        "Channel {}: {:.3e} s per master chunk, granularity now {}",
                        channel,
                        observed,
                        ci.granularity
                    );
                }
                ci.start_assignment = consumed;
            }
        }

        let remaining = ci.master_chunks - ci.start_assignment;
        ci.workq.refill(remaining, num_nodes, ci.granularity);
        ci.frame_start = Some(now);
    }

    /// Current master granularity of a channel.
    pub fn granularity(&self, channel: usize) -> usize {
        lock(&self.channels[channel]).granularity
    }

    /// Answer work requests until every render rank has been told there
    /// is nothing left for this frame.
    pub fn serve_frame(&self, channel: usize) -> SchedResult<ServeReport> {
        self.serve_frame_with(channel, &ServeControl::new())
    }

    /// [`Self::serve_frame`], but also stop once `control` is finished.
    ///
    /// A rank that fails mid-frame never asks again, so without `control`
    /// the coordinator would wait for it forever.
    pub fn serve_frame_with(
        &self,
        channel: usize,
        control: &ServeControl,
    ) -> SchedResult<ServeReport> {
        let mut report = ServeReport::default();
        if lock(&self.channels[channel]).num_assignments == 0 {
            return Ok(report);
        }

        let mut exhausted = vec![false; self.num_nodes];
        let mut remaining = self.num_nodes;
        while remaining > 0 && !control.is_finished() {
            let Some(rank) = self.link.poll_request(POLL_INTERVAL)? else {
                continue;
            };
            if rank >= self.num_nodes {
                return Err(
                    ClusterError::Protocol(format!("request from unknown rank {rank}")).into(),
                );
            }
            let aborted = control.is_aborted();
            let range = if aborted {
                WorkRange::EMPTY
            } else {
                self.give_assignment(channel)
            };
            log::trace!("Rank {} gets [{}, {})", rank, range.start, range.end);
            match self.link.reply(rank, range) {
                Ok(()) => {}
                Err(e) if aborted => log::debug!("Dropped reply to rank {}: {}", rank, e),
                Err(e) => return Err(e.into()),
            }

            report.requests += 1;
            if range.is_empty() {
                if !exhausted[rank] {
                    exhausted[rank] = true;
                    remaining -= 1;
                }
            } else {
                report.ranges += 1;
                report.assignments += range.len();
            }
        }

        if control.is_aborted() {
            return Err(ClusterError::Aborted.into());
        }
        Ok(report)
    }

    fn give_assignment(&self, channel: usize) -> WorkRange {
        let ci = lock(&self.channels[channel]);
        match ci.workq.next_assignment() {
            Some(chunk) => {
                let offset = ci.start_assignment;
                let chunk = (chunk.start + offset)..(chunk.end + offset);
                scale(chunk, self.config.threads_per_node, ci.num_assignments).into()
            }
            None => WorkRange::EMPTY,
        }
    }
}

fn channel_mut<T>(mutex: &mut Mutex<T>) -> &mut T {
    mutex.get_mut().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct NodeChannel {
    num_assignments: usize,
    workq: WorkQueue,
    /// Offset of the local work queue in assignment units.
    start_assignment: usize,
    no_more_data: bool,
}

/// Load balancer of a render rank.
///
/// The local work queue is refilled from the coordinator by whichever
/// worker finds it empty first; the others wait on the channel mutex
/// instead of contacting the coordinator themselves.
pub struct ClusterBalancer {
    rank: usize,
    num_nodes: usize,
    num_procs: usize,
    config: ClusterConfig,
    link: Box<dyn NodeLink>,
    channels: Vec<Mutex<NodeChannel>>,
}

impl ClusterBalancer {
    pub fn new(
        rank: usize,
        num_nodes: usize,
        config: ClusterConfig,
        link: impl NodeLink + 'static,
    ) -> SchedResult<Self> {
        if rank >= num_nodes {
            return Err(SchedError::InvalidConfig(format!(
                "rank {rank} out of range for {num_nodes} render nodes"
            )));
        }
        if config.threads_per_node == 0 {
            return Err(SchedError::InvalidConfig("threads_per_node must be at least 1".into()));
        }
        Ok(Self {
            rank,
            num_nodes,
            num_procs: 1,
            config,
            link: Box::new(link),
            channels: Vec::new(),
        })
    }

    pub fn rank(&self) -> usize {
        self.rank
    }
}

impl LoadBalancer for ClusterBalancer {
    fn setup_begin(&mut self, num_channels: usize, num_procs: usize) {
        self.num_procs = num_procs.max(1);
        self.channels.resize_with(num_channels, Default::default);
    }

    fn setup_display_channel(&mut self, channel: usize, num_assignments: usize) {
        channel_mut(&mut self.channels[channel]).num_assignments = num_assignments;
    }

    fn setup_frame(&mut self, channel: usize) -> SchedResult<()> {
        let ci = channel_mut(&mut self.channels[channel]);
        let first = initial_assignment(
            self.rank,
            self.num_nodes,
            ci.num_assignments,
            self.config.threads_per_node,
            self.config.static_split,
        );
        log::debug!(
            "Rank {} starts channel {} with [{}, {})",
            self.rank,
            channel,
            first.start,
            first.end
        );
        ci.start_assignment = first.start;
        ci.workq
            .refill(first.len(), self.num_procs, self.config.local_granularity);
        ci.no_more_data = ci.num_assignments == 0;
        Ok(())
    }

    fn next_assignment(&self, channel: usize, _proc: usize) -> SchedResult<Option<Range<usize>>> {
        let mut ci = lock(&self.channels[channel]);
        if ci.no_more_data {
            return Ok(None);
        }

        let local = match ci.workq.next_assignment() {
            Some(local) => local,
            None => {
                let reply = self.link.request_work(self.rank)?;
                if reply.is_empty() {
                    log::debug!("Rank {} has no more data for channel {}", self.rank, channel);
                    ci.no_more_data = true;
                    return Ok(None);
                }
                ci.start_assignment = reply.start;
                ci.workq
                    .refill(reply.len(), self.num_procs, self.config.local_granularity);
                match ci.workq.next_assignment() {
                    Some(local) => local,
                    None => return Ok(None),
                }
            }
        };

        let offset = ci.start_assignment;
        Ok(Some((local.start + offset)..(local.end + offset)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::transport::channel_links;

    /// A link for tests that must never touch the network.
    struct Unreachable;

    impl NodeLink for Unreachable {
        fn request_work(&self, _rank: usize) -> Result<WorkRange, ClusterError> {
            Err(ClusterError::Disconnected)
        }
    }

    fn config(threads_per_node: usize, static_split: StaticSplit) -> ClusterConfig {
        ClusterConfig {
            threads_per_node,
            static_split,
            ..Default::default()
        }
    }

    #[test]
    fn test_even_split_is_local() {
        let expected = [0..250, 250..500, 500..750, 750..1000];
        for (rank, range) in expected.iter().enumerate() {
            assert_eq!(
                initial_assignment(rank, 4, 1000, 8, StaticSplit::Even),
                *range
            );
        }

        // The balancer starts from that range without contacting anyone
        let mut balancer =
            ClusterBalancer::new(1, 4, config(8, StaticSplit::Even), Unreachable).unwrap();
        balancer.setup_begin(1, 8);
        balancer.setup_display_channel(0, 1000);
        balancer.setup_frame(0).unwrap();
        assert_eq!(balancer.next_assignment(0, 0).unwrap(), Some(250..255));
    }

    #[test]
    fn test_chunked_split_scales_by_threads() {
        // 125 master chunks, 10 per rank
        for rank in 0..4 {
            assert_eq!(
                initial_assignment(rank, 4, 1000, 8, StaticSplit::Chunks(10)),
                (rank * 80)..(rank * 80 + 80)
            );
        }
        // The last master chunk is clipped to the total
        assert_eq!(initial_assignment(1, 2, 10, 8, StaticSplit::Chunks(1)), 8..10);
        // Ranks beyond the master chunks start empty
        assert_eq!(initial_assignment(3, 4, 10, 8, StaticSplit::Chunks(1)), 10..10);
    }

    #[test]
    fn test_tune_granularity() {
        assert_eq!(tune_granularity(1e-3, 1e-3, 5, None), 5);
        assert_eq!(tune_granularity(1e-5, 1e-3, 5, None), 5);
        assert_eq!(tune_granularity(1e-2, 1e-3, 5, None), 50);
        assert_eq!(tune_granularity(1e-2, 1e-3, 5, Some(20)), 20);
        assert_eq!(tune_granularity(1.0, 0.0, 7, None), 7);
    }

    #[test]
    fn test_invalid_rank() {
        assert!(matches!(
            ClusterBalancer::new(4, 4, ClusterConfig::default(), Unreachable),
            Err(SchedError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_unknown_rank_is_a_protocol_error() {
        let (coordinator_link, nodes) =
            channel_links(1, Some(Duration::from_millis(200)));
        let mut coordinator = Coordinator::new(1, ClusterConfig::default(), coordinator_link);
        coordinator.setup_begin(1);
        coordinator.setup_display_channel(0, 10);
        coordinator.setup_frame(0);

        // A node link claiming to be rank 5; it times out waiting for a reply
        std::thread::scope(|s| {
            s.spawn(|| {
                let _ = nodes[0].request_work(5);
            });
            assert!(matches!(
                coordinator.serve_frame(0),
                Err(SchedError::Cluster(ClusterError::Protocol(_)))
            ));
        });
    }

    /// Run one frame over in-process links with `threads` workers per node
    /// and return every range handed to a worker.
    fn run_frame(
        coordinator: &mut Coordinator,
        nodes: &mut [ClusterBalancer],
        threads: usize,
    ) -> (Vec<Range<usize>>, ServeReport) {
        coordinator.setup_frame(0);
        for node in nodes.iter_mut() {
            node.setup_frame(0).unwrap();
        }

        let coordinator = &*coordinator;
        let nodes = &*nodes;
        std::thread::scope(|s| {
            let server = s.spawn(|| coordinator.serve_frame(0).unwrap());
            let mut workers = Vec::new();
            for node in nodes {
                for proc in 0..threads {
                    workers.push(s.spawn(move || {
                        let mut mine = Vec::new();
                        while let Some(range) = node.next_assignment(0, proc).unwrap() {
                            mine.push(range);
                        }
                        mine
                    }));
                }
            }
            let ranges = workers
                .into_iter()
                .flat_map(|w| w.join().unwrap())
                .collect();
            (ranges, server.join().unwrap())
        })
    }

    fn assert_exact_cover(mut ranges: Vec<Range<usize>>, total: usize) {
        ranges.sort_by_key(|r| r.start);
        let mut next = 0;
        for range in ranges {
            assert_eq!(range.start, next, "gap or overlap before {:?}", range);
            assert!(range.end > range.start);
            next = range.end;
        }
        assert_eq!(next, total);
    }

    fn cluster_config(threads: usize, split: StaticSplit) -> ClusterConfig {
        ClusterConfig {
            local_granularity: 3,
            min_granularity: 1,
            ..config(threads, split)
        }
    }

    fn build_cluster(
        num_nodes: usize,
        threads: usize,
        total: usize,
        split: StaticSplit,
    ) -> (Coordinator, Vec<ClusterBalancer>) {
        build_cluster_with(num_nodes, total, cluster_config(threads, split))
    }

    fn build_cluster_with(
        num_nodes: usize,
        total: usize,
        cfg: ClusterConfig,
    ) -> (Coordinator, Vec<ClusterBalancer>) {
        let threads = cfg.threads_per_node;
        let (coordinator_link, node_links) = channel_links(num_nodes, cfg.reply_timeout());
        let mut coordinator = Coordinator::new(num_nodes, cfg.clone(), coordinator_link);
        coordinator.setup_begin(1);
        coordinator.setup_display_channel(0, total);

        let nodes = node_links
            .into_iter()
            .enumerate()
            .map(|(rank, link)| {
                let mut node = ClusterBalancer::new(rank, num_nodes, cfg.clone(), link).unwrap();
                node.setup_begin(1, threads);
                node.setup_display_channel(0, total);
                node
            })
            .collect();
        (coordinator, nodes)
    }

    #[test]
    fn test_cluster_frames_cover_every_assignment_once() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (mut coordinator, mut nodes) = build_cluster(3, 4, 997, StaticSplit::Chunks(2));
        for _frame in 0..3 {
            let (ranges, report) = run_frame(&mut coordinator, &mut nodes, 4);
            assert_exact_cover(ranges, 997);
            // Every rank got exactly one empty reply
            assert_eq!(report.requests, report.ranges + 3);
        }
    }

    #[test]
    fn test_even_split_needs_one_request_per_rank() {
        let (mut coordinator, mut nodes) = build_cluster(4, 2, 1000, StaticSplit::Even);
        let (ranges, report) = run_frame(&mut coordinator, &mut nodes, 2);
        assert_exact_cover(ranges, 1000);
        assert_eq!(
            report,
            ServeReport {
                requests: 4,
                ranges: 0,
                assignments: 0
            }
        );
    }

    #[test]
    fn test_empty_channel_needs_no_exchange() {
        let (mut coordinator, mut nodes) = build_cluster(2, 2, 0, StaticSplit::Chunks(4));
        let (ranges, report) = run_frame(&mut coordinator, &mut nodes, 2);
        assert!(ranges.is_empty());
        assert_eq!(report.requests, 0);
    }

    #[test]
    fn test_granularity_follows_frame_cost() {
        let _ = env_logger::builder().is_test(true).try_init();
        let cfg = ClusterConfig {
            max_granularity: Some(16),
            target_sec_per_assignment: 1e-9,
            ..cluster_config(4, StaticSplit::Chunks(2))
        };
        let (mut coordinator, mut nodes) = build_cluster_with(3, 997, cfg);

        // The first frame has no timing yet and keeps the static granularity
        let (ranges, _) = run_frame(&mut coordinator, &mut nodes, 4);
        assert_exact_cover(ranges, 997);
        assert_eq!(coordinator.granularity(0), 2);

        // Master chunks now look far more expensive than the target
        std::thread::sleep(Duration::from_millis(20));
        let (ranges, report) = run_frame(&mut coordinator, &mut nodes, 4);
        assert_eq!(coordinator.granularity(0), 16);
        assert_exact_cover(ranges, 997);
        assert_eq!(report.requests, report.ranges + 3);
        assert_eq!(report.assignments, 997 - 3 * 2 * 4);
    }

    #[test]
    fn test_failed_rank_does_not_stall_the_coordinator() {
        let cfg = ClusterConfig {
            reply_timeout_ms: Some(10),
            local_granularity: 5,
            ..cluster_config(8, StaticSplit::Chunks(1))
        };
        let (mut coordinator, mut nodes) = build_cluster_with(1, 10, cfg);
        coordinator.setup_frame(0);
        nodes[0].setup_frame(0).unwrap();

        // The node works through its static range, then nobody answers
        let error = loop {
            match nodes[0].next_assignment(0, 0) {
                Ok(Some(_)) => continue,
                Ok(None) => panic!("the node ran out of work without asking"),
                Err(e) => break e,
            }
        };
        assert!(matches!(error, SchedError::Cluster(ClusterError::Timeout(_))));

        // The coordinator answers the late request, then is told to stop
        let control = ServeControl::new();
        std::thread::scope(|s| {
            let server = s.spawn(|| coordinator.serve_frame_with(0, &control));
            std::thread::sleep(Duration::from_millis(50));
            control.abort();
            control.finish();
            assert!(matches!(
                server.join().unwrap(),
                Err(SchedError::Cluster(ClusterError::Aborted))
            ));
        });
    }
}
