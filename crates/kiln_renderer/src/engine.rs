//! Multi-threaded frame driver.
//!
//! The engine owns a rayon thread pool with one worker per processor
//! slot. Setup stages run on the calling thread with exclusive access to
//! the scheduler; rendering is broadcast to every pool thread, and the
//! broadcast returning is the barrier that ends the frame.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use kiln_core::{LoadBalancer, WorkQueueBalancer};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::context::{FrameInfo, RenderContext, SchedulerContext, SetupContext};
use crate::error::RenderResult;
use crate::image::SharedImage;
use crate::scheduler::{FrameReport, FrameScheduler};
use crate::settings::RenderSettings;
use crate::shader::PixelShader;

/// Renders frames of a single display channel.
pub struct Engine {
    settings: RenderSettings,
    pool: rayon::ThreadPool,
    scheduler: FrameScheduler,
    shader: Arc<dyn PixelShader>,
    image: Arc<SharedImage>,
    rngs: Vec<Mutex<StdRng>>,
    serial: u64,
}

impl Engine {
    /// An engine that balances coarse tiles over its own threads.
    pub fn new(settings: RenderSettings, shader: Arc<dyn PixelShader>) -> RenderResult<Self> {
        let balancer = WorkQueueBalancer::new(settings.granularity);
        let image = Arc::new(SharedImage::new(settings.width, settings.height));
        Self::with_balancer(settings, shader, Box::new(balancer), image)
    }

    /// An engine with a caller-provided balancer, writing into `image`.
    pub fn with_balancer(
        settings: RenderSettings,
        shader: Arc<dyn PixelShader>,
        balancer: Box<dyn LoadBalancer>,
        image: Arc<SharedImage>,
    ) -> RenderResult<Self> {
        settings.validate()?;
        if (image.width(), image.height()) != (settings.width, settings.height) {
            return Err(crate::RenderError::Config(format!(
                "image is {}x{} but settings ask for {}x{}",
                image.width(),
                image.height(),
                settings.width,
                settings.height
            )));
        }

        let num_procs = settings.num_threads();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_procs)
            .thread_name(|i| format!("kiln-worker-{}", i))
            .build()?;

        let context = SchedulerContext::new(settings.clone(), num_procs)?;
        let mut scheduler = FrameScheduler::new(context, balancer);
        scheduler.setup_begin(1);
        let mut setup = SetupContext::new(num_procs, 0, settings.width, settings.height);
        scheduler.setup_display_channel(&mut setup)?;
        log::debug!(
            "Engine ready: {} threads, pipeline depth {:?}",
            num_procs,
            setup.pipeline_depth()
        );

        let rngs = (0..num_procs)
            .map(|i| {
                let seed = settings.seed.wrapping_add(i as u64 * 0x9E37_79B9);
                Mutex::new(StdRng::seed_from_u64(seed))
            })
            .collect();

        Ok(Self {
            settings,
            pool,
            scheduler,
            shader,
            image,
            rngs,
            serial: 0,
        })
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    pub fn num_threads(&self) -> usize {
        self.rngs.len()
    }

    pub fn image(&self) -> &SharedImage {
        &self.image
    }

    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }

    /// Restart refinement from the coarse pass at the next frame.
    pub fn mark_scene_changed(&mut self) {
        self.scheduler.mark_scene_changed();
    }

    /// Render one frame: setup, render on every worker, report.
    pub fn render_frame(&mut self) -> RenderResult<FrameReport> {
        let frame = self.prepare_frame()?;
        self.render_prepared(&frame)?;
        self.finish_frame(&frame)
    }

    /// Setup stage of a frame. Starts the frame clock.
    pub fn prepare_frame(&mut self) -> RenderResult<FrameInfo> {
        self.scheduler.setup_frame(0)?;
        let frame = FrameInfo::new(self.serial, Instant::now(), self.settings.frame_duration());
        self.serial += 1;
        Ok(frame)
    }

    /// Render stage of a prepared frame, on every pool thread.
    pub fn render_prepared(&self, frame: &FrameInfo) -> RenderResult<()> {
        let num_procs = self.num_threads();
        let results = self.pool.broadcast(|worker| {
            let proc = worker.index();
            let mut rng = self.rngs[proc].lock().unwrap_or_else(PoisonError::into_inner);
            let mut ctx = RenderContext {
                proc,
                num_procs,
                frame: *frame,
                shader: &*self.shader,
                image: &*self.image,
                rng: &mut *rng,
            };
            self.scheduler.render_image(&mut ctx, 0)
        });
        for result in results {
            result?;
        }
        Ok(())
    }

    /// Report stage of a rendered frame.
    pub fn finish_frame(&mut self, frame: &FrameInfo) -> RenderResult<FrameReport> {
        Ok(self.scheduler.finish_frame(0, frame)?)
    }
}
