//! Deadline-driven adaptive tile scheduler.
//!
//! Each frame of a channel runs through
//! `Init -> CoarsePass -> RefineLoop -> {Converged | DeadlineReached} -> Done`.
//!
//! The coarse pass pulls tile indices from the load balancer and renders
//! every coarse tile of the region once, so a complete low-resolution
//! image exists before any adaptive work starts. Each rendered tile is
//! ranked by the priority scheme; tiles that still need work are split
//! into the tiles of the next level and pushed on the approximate
//! priority queue. Workers then pop, render and split until the queue is
//! drained or the deadline passes. The deadline only gates dispatch: a
//! tile already popped is always finished, and tiles still queued when
//! it passes are dropped with the frame.
//!
//! Records live in per-thread arenas that are reset when a new frame
//! starts, which requires exclusive access and therefore happens in
//! [`FrameScheduler::setup_frame`], between frames.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::time::Duration;

use kiln_core::{
    ApproxPriorityQueue, ArenaHandle, ArenaSet, LoadBalancer, Pop, SchedError, SchedResult,
};
use kiln_math::{Rect, Region};

use crate::context::{FrameInfo, RenderContext, SchedulerContext, SetupContext};
use crate::fragment::Fragment;
use crate::priority::{Priority, PriorityParams, PriorityScheme, TileStats};
use crate::tile::{coarse_tiles, max_refined_records, Level, Tile};

/// Largest first arena block, in records.
const MAX_FIRST_BLOCK: usize = 4096;

/// Where a channel is in its frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum FrameState {
    Init = 0,
    CoarsePass = 1,
    RefineLoop = 2,
    Converged = 3,
    DeadlineReached = 4,
    Done = 5,
}

impl FrameState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => FrameState::Init,
            1 => FrameState::CoarsePass,
            2 => FrameState::RefineLoop,
            3 => FrameState::Converged,
            4 => FrameState::DeadlineReached,
            _ => FrameState::Done,
        }
    }
}

/// How a frame ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Every tile reached the convergence threshold or the sample cap.
    Converged,
    /// The deadline passed with refinement work left.
    DeadlineReached,
    /// Progressive rendering had already converged; nothing was rendered.
    Idle,
}

/// Summary of one frame of one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameReport {
    pub serial: u64,
    pub outcome: FrameOutcome,
    pub coarse_tiles: usize,
    pub refined_tiles: usize,
    /// Records allocated this frame.
    pub records: usize,
    pub samples: u64,
    /// Records discarded unrendered at the end of the frame.
    pub dropped: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
struct Counters {
    coarse_tiles: AtomicUsize,
    refined_tiles: AtomicUsize,
    records: AtomicUsize,
    samples: AtomicU64,
    finest_spp: AtomicU32,
}

impl Counters {
    fn reset(&mut self) {
        *self = Counters::default();
    }
}

struct Channel {
    region: Region,
    coarse: Vec<Rect>,
    queue: ApproxPriorityQueue<ArenaHandle, Priority>,
    arenas: ArenaSet<Tile>,
    seq: AtomicU64,
    /// Records queued or being rendered.
    live: AtomicUsize,
    /// Workers still in the coarse pass.
    coarse_active: AtomicUsize,
    state: AtomicU8,
    deadline_hit: AtomicBool,
    aborted: AtomicBool,
    counters: Counters,
    coarse_pending: bool,
    restart: bool,
    idle: bool,
}

impl Channel {
    fn advance(&self, state: FrameState) {
        self.state.fetch_max(state as u8, Ordering::AcqRel);
    }

    fn set_state(&mut self, state: FrameState) {
        *self.state.get_mut() = state as u8;
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }
}

/// Decrements a counter when dropped, also on early return.
struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Orders and refines rendering work under a per-frame deadline.
pub struct FrameScheduler {
    ctx: SchedulerContext,
    coarse_level: Level,
    packet: [u32; 2],
    params: PriorityParams,
    balancer: Box<dyn LoadBalancer>,
    channels: Vec<Option<Channel>>,
}

impl FrameScheduler {
    pub fn new(ctx: SchedulerContext, balancer: Box<dyn LoadBalancer>) -> Self {
        let coarse_level = Level::coarse(ctx.settings.coarse_magnification);
        let packet = ctx.settings.packet();
        let params = ctx.settings.priority_params();
        Self {
            coarse_level,
            packet,
            params,
            balancer,
            channels: Vec::new(),
            ctx,
        }
    }

    pub fn context(&self) -> &SchedulerContext {
        &self.ctx
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Size per-channel state. Channels must then be set up one by one.
    pub fn setup_begin(&mut self, num_channels: usize) {
        self.balancer.setup_begin(num_channels, self.ctx.num_procs);
        self.channels.clear();
        self.channels.resize_with(num_channels, || None);
    }

    /// Compute the region, coarse tiles, queue and arenas of a channel.
    pub fn setup_display_channel(&mut self, setup: &mut SetupContext) -> SchedResult<()> {
        let settings = &self.ctx.settings;
        let num_procs = self.ctx.num_procs;
        if setup.num_procs != num_procs {
            return Err(SchedError::InvalidConfig(format!(
                "channel set up for {} workers, scheduler has {}",
                setup.num_procs, num_procs
            )));
        }
        let slot = self.channels.get_mut(setup.channel).ok_or_else(|| {
            SchedError::InvalidConfig(format!(
                "channel {} was not announced in setup_begin",
                setup.channel
            ))
        })?;

        // One frame in flight: arenas are reset between frames.
        setup.constrain_pipeline_depth(1, 1);

        let region = settings.region_in(setup.xres, setup.yres);
        if region.rect.is_empty() {
            return Err(SchedError::InvalidConfig(format!(
                "render region is empty for a {}x{} channel",
                setup.xres, setup.yres
            )));
        }
        let coarse = coarse_tiles(&region, settings.tile_size, settings.coarse_order);
        let capacity = max_refined_records(
            &region.rect,
            settings.tile_size,
            settings.coarse_magnification,
            settings.refinement_ratio,
            settings.max_spp,
        );
        let first_block = capacity.div_ceil(num_procs).clamp(1, MAX_FIRST_BLOCK);
        log::debug!(
            "Channel {}: {} coarse tiles over {:?}, arenas capped at {} records",
            setup.channel,
            coarse.len(),
            region.rect,
            capacity
        );

        self.balancer.setup_display_channel(setup.channel, coarse.len());
        *slot = Some(Channel {
            region,
            coarse,
            queue: ApproxPriorityQueue::new(settings.queue_shards, num_procs),
            arenas: ArenaSet::new(num_procs, first_block, capacity),
            seq: AtomicU64::new(0),
            live: AtomicUsize::new(0),
            coarse_active: AtomicUsize::new(0),
            state: AtomicU8::new(FrameState::Init as u8),
            deadline_hit: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            counters: Counters::default(),
            coarse_pending: false,
            restart: true,
            idle: false,
        });
        Ok(())
    }

    /// Prepare a channel for the next frame.
    ///
    /// A restarting frame (every frame unless progressive) drops the
    /// previous frame's records and re-runs the coarse pass. A progressive
    /// frame continues from the queue the previous frame left behind.
    pub fn setup_frame(&mut self, channel: usize) -> SchedResult<()> {
        let num_procs = self.ctx.num_procs;
        let progressive = self.ctx.settings.progressive;
        let ch = channel_slot(&mut self.channels, channel)?;

        if ch.restart || !progressive {
            ch.queue.clear();
            ch.arenas.reset_all();
            *ch.seq.get_mut() = 0;
            *ch.live.get_mut() = 0;
            *ch.coarse_active.get_mut() = num_procs;
            ch.coarse_pending = true;
            ch.restart = false;
            ch.idle = false;
            self.balancer.setup_frame(channel)?;
        } else {
            *ch.coarse_active.get_mut() = 0;
            ch.coarse_pending = false;
        }

        ch.counters.reset();
        *ch.deadline_hit.get_mut() = false;
        *ch.aborted.get_mut() = false;
        ch.set_state(FrameState::Init);
        Ok(())
    }

    /// Restart every channel at its next frame.
    pub fn mark_scene_changed(&mut self) {
        for ch in self.channels.iter_mut().flatten() {
            ch.restart = true;
        }
    }

    pub fn state(&self, channel: usize) -> Option<FrameState> {
        let ch = self.channels.get(channel)?.as_ref()?;
        Some(FrameState::from_u8(ch.state.load(Ordering::Acquire)))
    }

    /// Records still queued or in flight.
    pub fn pending_records(&self, channel: usize) -> usize {
        self.channel(channel)
            .map(|ch| ch.live.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Exact emptiness of a channel's refinement queue.
    pub fn queue_is_empty(&self, channel: usize) -> bool {
        self.channel(channel).map_or(true, |ch| ch.queue.is_empty())
    }

    /// Render one frame of a channel on the calling worker.
    ///
    /// Called once per frame by every worker `0..num_procs`, concurrently.
    pub fn render_image(&self, ctx: &mut RenderContext<'_>, channel: usize) -> SchedResult<()> {
        let ch = self.channel(channel)?;
        if ch.idle {
            return Ok(());
        }
        let result = self.render_channel(ctx, channel, ch);
        if result.is_err() {
            ch.aborted.store(true, Ordering::Release);
        }
        result
    }

    /// Close a frame after every worker returned from `render_image`.
    pub fn finish_frame(&mut self, channel: usize, frame: &FrameInfo) -> SchedResult<FrameReport> {
        let progressive = self.ctx.settings.progressive;
        let ch = channel_slot(&mut self.channels, channel)?;

        let remaining = *ch.live.get_mut();
        let outcome = if ch.idle {
            FrameOutcome::Idle
        } else if remaining == 0 {
            FrameOutcome::Converged
        } else {
            FrameOutcome::DeadlineReached
        };
        let dropped = if outcome == FrameOutcome::DeadlineReached && !progressive {
            remaining
        } else {
            0
        };

        let counters = &ch.counters;
        let report = FrameReport {
            serial: frame.serial,
            outcome,
            coarse_tiles: counters.coarse_tiles.load(Ordering::Relaxed),
            refined_tiles: counters.refined_tiles.load(Ordering::Relaxed),
            records: counters.records.load(Ordering::Relaxed),
            samples: counters.samples.load(Ordering::Relaxed),
            dropped,
            elapsed: frame.started.elapsed(),
        };

        match outcome {
            FrameOutcome::Converged => {
                log::info!(
                    "Frame {} channel {}: refined to {} spp in {:.3} s",
                    frame.serial,
                    channel,
                    counters.finest_spp.load(Ordering::Relaxed),
                    report.elapsed.as_secs_f64()
                );
                if progressive {
                    ch.idle = true;
                }
            }
            FrameOutcome::DeadlineReached => log::debug!(
                "Frame {} channel {}: deadline reached, {} records {}",
                frame.serial,
                channel,
                remaining,
                if progressive { "carried over" } else { "dropped" }
            ),
            FrameOutcome::Idle => {}
        }
        ch.set_state(FrameState::Done);
        Ok(report)
    }

    fn channel(&self, channel: usize) -> SchedResult<&Channel> {
        self.channels
            .get(channel)
            .and_then(Option::as_ref)
            .ok_or_else(|| SchedError::InvalidConfig(format!("channel {channel} is not set up")))
    }

    fn render_channel(
        &self,
        ctx: &mut RenderContext<'_>,
        channel: usize,
        ch: &Channel,
    ) -> SchedResult<()> {
        if ch.coarse_pending {
            ch.advance(FrameState::CoarsePass);
            let _active = ActiveGuard(&ch.coarse_active);
            while let Some(range) = self.balancer.next_assignment(channel, ctx.proc)? {
                for index in range {
                    let Some(&rect) = ch.coarse.get(index) else {
                        return Err(SchedError::InvalidConfig(format!(
                            "assignment {index} beyond {} coarse tiles",
                            ch.coarse.len()
                        )));
                    };
                    let tile = Tile {
                        rect,
                        level: self.coarse_level,
                        seq: ch.next_seq(),
                    };
                    self.render_tile(ctx, ch, &tile)?;
                    ch.counters.coarse_tiles.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        ch.advance(FrameState::RefineLoop);
        loop {
            if ch.aborted.load(Ordering::Acquire) {
                return Ok(());
            }
            if ctx.frame.past_deadline() {
                ch.deadline_hit.store(true, Ordering::Release);
                ch.advance(FrameState::DeadlineReached);
                return Ok(());
            }

            match ch.queue.pop_or_confirm(ctx.proc) {
                Pop::Item(handle) => {
                    let result = match ch.arenas.get(handle) {
                        Some(tile) => self.render_tile(ctx, ch, tile),
                        None => {
                            log::warn!("Dropping stale record {:?}", handle);
                            Ok(())
                        }
                    };
                    ch.live.fetch_sub(1, Ordering::AcqRel);
                    result?;
                    ch.counters.refined_tiles.fetch_add(1, Ordering::Relaxed);
                }
                Pop::Retry => std::thread::yield_now(),
                Pop::Drained => {
                    if ch.coarse_active.load(Ordering::Acquire) == 0
                        && ch.live.load(Ordering::Acquire) == 0
                    {
                        ch.advance(FrameState::Converged);
                        return Ok(());
                    }
                    std::thread::yield_now();
                }
            }
        }
    }

    /// Shade and publish one tile, then queue its children if it needs more work.
    fn render_tile(
        &self,
        ctx: &mut RenderContext<'_>,
        ch: &Channel,
        tile: &Tile,
    ) -> SchedResult<()> {
        let settings = &self.ctx.settings;

        let mut fragment = Fragment::new(tile.rect, &tile.level);
        ctx.shader.shade(&mut fragment, &mut *ctx.rng);
        ctx.image.publish(&fragment);
        ch.counters
            .samples
            .fetch_add(fragment.num_samples(), Ordering::Relaxed);
        ch.counters
            .finest_spp
            .fetch_max(tile.level.samples_per_pixel(), Ordering::Relaxed);

        let stats = TileStats {
            seq: tile.seq,
            spp: tile.level.samples_per_pixel(),
            variance: fragment.luminance_variance(),
            contrast: fragment.max_adjacent_contrast(),
            center_distance: 0.0,
        };
        let threshold = settings.convergence_threshold;
        if !needs_refinement(settings.priority, &stats, &self.params, threshold) {
            return Ok(());
        }
        let Some((level, rects)) =
            tile.children(settings.refinement_ratio, self.packet, settings.max_spp)
        else {
            return Ok(());
        };

        for rect in rects {
            let seq = ch.next_seq();
            let (cx, cy) = rect.center();
            let child_stats = TileStats {
                seq,
                center_distance: ch.region.distance_to_center(cx, cy),
                ..stats
            };
            let priority = settings.priority.evaluate(&child_stats, &self.params);
            let handle = ch.arenas.allocate(ctx.proc, Tile { rect, level, seq })?;
            ch.live.fetch_add(1, Ordering::AcqRel);
            ch.queue.push(handle, priority, ctx.proc);
            ch.counters.records.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

/// Whether a rendered tile should be split further.
///
/// Schemes without an error measure refine until the sample cap.
pub fn needs_refinement(
    scheme: PriorityScheme,
    stats: &TileStats,
    params: &PriorityParams,
    threshold: f32,
) -> bool {
    match scheme.error(stats, params) {
        Some(error) => error > threshold,
        None => true,
    }
}

fn channel_slot(channels: &mut [Option<Channel>], channel: usize) -> SchedResult<&mut Channel> {
    channels
        .get_mut(channel)
        .and_then(Option::as_mut)
        .ok_or_else(|| SchedError::InvalidConfig(format!("channel {channel} is not set up")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::SharedImage;
    use crate::settings::RenderSettings;
    use crate::shader::{ImageSink, PixelShader};
    use kiln_core::WorkQueueBalancer;
    use kiln_math::Color;
    use rand::rngs::StdRng;
    use rand::{RngCore, SeedableRng};
    use std::sync::Mutex;
    use std::time::Instant;

    /// Constant color everywhere.
    struct Flat;

    impl PixelShader for Flat {
        fn sample(&self, _x: f32, _y: f32, _rng: &mut dyn RngCore) -> Color {
            Color::splat(0.5)
        }
    }

    /// Records every published fragment rectangle.
    struct Recorder {
        image: SharedImage,
        published: Mutex<Vec<(Rect, [u32; 2], [u32; 2])>>,
    }

    impl ImageSink for Recorder {
        fn publish(&self, fragment: &Fragment) {
            self.image.publish(fragment);
            self.published
                .lock()
                .unwrap()
                .push((fragment.rect, fragment.block, fragment.spp));
        }
    }

    fn scheduler(settings: RenderSettings, num_procs: usize) -> FrameScheduler {
        let ctx = SchedulerContext::new(settings.clone(), num_procs).unwrap();
        let balancer = WorkQueueBalancer::new(settings.granularity);
        let mut scheduler = FrameScheduler::new(ctx, Box::new(balancer));
        scheduler.setup_begin(1);
        let mut setup = SetupContext::new(num_procs, 0, settings.width, settings.height);
        scheduler.setup_display_channel(&mut setup).unwrap();
        assert_eq!(setup.pipeline_depth(), (1, 1));
        scheduler
    }

    fn run_frame(
        scheduler: &mut FrameScheduler,
        serial: u64,
        budget: Duration,
        shader: &dyn PixelShader,
        image: &dyn ImageSink,
    ) -> FrameReport {
        scheduler.setup_frame(0).unwrap();
        let num_procs = scheduler.context().num_procs;
        let frame = FrameInfo::new(serial, Instant::now(), budget);
        let shared = &*scheduler;
        std::thread::scope(|s| {
            for proc in 0..num_procs {
                s.spawn(move || {
                    let mut rng = StdRng::seed_from_u64(proc as u64);
                    let mut ctx = RenderContext {
                        proc,
                        num_procs,
                        frame,
                        shader,
                        image,
                        rng: &mut rng,
                    };
                    shared.render_image(&mut ctx, 0).unwrap();
                });
            }
        });
        scheduler.finish_frame(0, &frame).unwrap()
    }

    fn small_settings() -> RenderSettings {
        RenderSettings {
            width: 32,
            height: 16,
            tile_size: [8, 8],
            coarse_magnification: [4, 4],
            max_spp: 4,
            priority: PriorityScheme::Fifo,
            threads: Some(3),
            ..Default::default()
        }
    }

    #[test]
    fn test_fifo_refines_everything_to_max_spp() {
        let settings = small_settings();
        let mut scheduler = scheduler(settings.clone(), 3);
        let recorder = Recorder {
            image: SharedImage::new(32, 16),
            published: Mutex::new(Vec::new()),
        };
        let report = run_frame(&mut scheduler, 0, Duration::from_secs(600), &Flat, &recorder);

        assert_eq!(report.outcome, FrameOutcome::Converged);
        assert_eq!(report.coarse_tiles, 8);
        assert_eq!(report.dropped, 0);
        assert_eq!(report.records, report.refined_tiles);
        assert_eq!(scheduler.state(0), Some(FrameState::Done));
        assert!(scheduler.queue_is_empty(0));

        // Levels: 4px blocks, 2px, 1px, then 2x2 samples per pixel
        let published = recorder.published.into_inner().unwrap();
        let finest: Vec<_> = published.iter().filter(|(_, _, spp)| *spp == [2, 2]).collect();
        let area: u64 = finest.iter().map(|(r, _, _)| r.area()).sum();
        assert_eq!(area, 32 * 16);
        assert_eq!(recorder.image.get(31, 15), Color::splat(0.5));
    }

    #[test]
    fn test_records_of_a_level_never_overlap() {
        let settings = small_settings();
        let mut scheduler = scheduler(settings, 2);
        let recorder = Recorder {
            image: SharedImage::new(32, 16),
            published: Mutex::new(Vec::new()),
        };
        run_frame(&mut scheduler, 0, Duration::from_secs(600), &Flat, &recorder);

        let published = recorder.published.into_inner().unwrap();
        let region = Rect::from_size(32, 16);
        for block in [[4, 4], [2, 2]] {
            let level: Vec<Rect> = published
                .iter()
                .filter(|(_, b, _)| *b == block)
                .map(|(r, _, _)| *r)
                .collect();
            let area: u64 = level.iter().map(|r| r.area()).sum();
            assert_eq!(area, region.area(), "level {:?}", block);
            for (i, a) in level.iter().enumerate() {
                for b in &level[i + 1..] {
                    assert!(!a.overlaps(b));
                }
            }
        }
    }

    #[test]
    fn test_flat_image_converges_at_coarse_level() {
        let settings = RenderSettings {
            priority: PriorityScheme::LuminanceVariance,
            ..small_settings()
        };
        let mut scheduler = scheduler(settings, 2);
        let image = SharedImage::new(32, 16);
        let report = run_frame(&mut scheduler, 0, Duration::from_secs(600), &Flat, &image);
        assert_eq!(report.outcome, FrameOutcome::Converged);
        assert_eq!(report.coarse_tiles, 8);
        assert_eq!(report.records, 0);
        assert_eq!(report.samples, 8 * 4);
    }

    #[test]
    fn test_expired_deadline_still_renders_coarse_pass() {
        let mut scheduler = scheduler(small_settings(), 2);
        let image = SharedImage::new(32, 16);
        let report = run_frame(&mut scheduler, 4, Duration::ZERO, &Flat, &image);

        assert_eq!(report.serial, 4);
        assert_eq!(report.outcome, FrameOutcome::DeadlineReached);
        assert_eq!(report.coarse_tiles, 8);
        assert_eq!(report.refined_tiles, 0);
        assert_eq!(report.dropped, report.records);
        for y in 0..16 {
            for x in 0..32 {
                assert_eq!(image.get(x, y), Color::splat(0.5));
            }
        }

        // The next frame starts over
        let report = run_frame(&mut scheduler, 5, Duration::from_secs(600), &Flat, &image);
        assert_eq!(report.outcome, FrameOutcome::Converged);
        assert_eq!(report.coarse_tiles, 8);
    }

    #[test]
    fn test_progressive_continues_then_idles() {
        let settings = RenderSettings {
            progressive: true,
            ..small_settings()
        };
        let mut scheduler = scheduler(settings, 2);
        let image = SharedImage::new(32, 16);

        let first = run_frame(&mut scheduler, 0, Duration::ZERO, &Flat, &image);
        assert_eq!(first.outcome, FrameOutcome::DeadlineReached);
        assert_eq!(first.dropped, 0);
        assert_eq!(scheduler.pending_records(0), first.records);

        let second = run_frame(&mut scheduler, 1, Duration::from_secs(600), &Flat, &image);
        assert_eq!(second.outcome, FrameOutcome::Converged);
        assert_eq!(second.coarse_tiles, 0);
        assert!(second.refined_tiles >= first.records);

        let third = run_frame(&mut scheduler, 2, Duration::from_secs(600), &Flat, &image);
        assert_eq!(third.outcome, FrameOutcome::Idle);
        assert_eq!(third.samples, 0);

        scheduler.mark_scene_changed();
        let fourth = run_frame(&mut scheduler, 3, Duration::from_secs(600), &Flat, &image);
        assert_eq!(fourth.outcome, FrameOutcome::Converged);
        assert_eq!(fourth.coarse_tiles, 8);
    }

    #[test]
    fn test_undeclared_channel() {
        let ctx = SchedulerContext::new(small_settings(), 1).unwrap();
        let mut scheduler = FrameScheduler::new(ctx, Box::new(WorkQueueBalancer::new(0)));
        scheduler.setup_begin(1);
        let mut setup = SetupContext::new(1, 3, 32, 16);
        assert!(scheduler.setup_display_channel(&mut setup).is_err());
        assert!(scheduler.setup_frame(0).is_err());
    }

    #[test]
    fn test_needs_refinement() {
        let params = PriorityParams { fifo_cutoff_spp: 4 };
        let quiet = TileStats {
            variance: 1e-6,
            contrast: 1e-6,
            spp: 16,
            ..Default::default()
        };
        assert!(!needs_refinement(PriorityScheme::LuminanceVariance, &quiet, &params, 1e-4));
        assert!(!needs_refinement(PriorityScheme::Contrast, &quiet, &params, 1e-4));
        assert!(needs_refinement(PriorityScheme::Fifo, &quiet, &params, 1e-4));
        assert!(needs_refinement(PriorityScheme::Center, &quiet, &params, 1e-4));
        let young = TileStats { spp: 1, ..quiet };
        assert!(needs_refinement(PriorityScheme::FifoThenVariance, &young, &params, 1e-4));
        assert!(!needs_refinement(PriorityScheme::FifoThenVariance, &quiet, &params, 1e-4));
    }
}
