//! Contexts handed to the scheduler by the driving engine.

use std::time::{Duration, Instant};

use kiln_core::SchedError;
use rand::RngCore;

use crate::settings::RenderSettings;
use crate::shader::{ImageSink, PixelShader};

/// Run-wide scheduler configuration, built once and owned by the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerContext {
    pub settings: RenderSettings,
    pub num_procs: usize,
}

impl SchedulerContext {
    pub fn new(settings: RenderSettings, num_procs: usize) -> Result<Self, SchedError> {
        settings.validate()?;
        if num_procs == 0 {
            return Err(SchedError::InvalidConfig("at least one worker thread is required".into()));
        }
        Ok(Self {
            settings,
            num_procs,
        })
    }
}

/// What a pipeline stage sees while a display channel is being set up.
#[derive(Debug, Clone)]
pub struct SetupContext {
    pub num_procs: usize,
    pub channel: usize,
    pub xres: u32,
    pub yres: u32,
    min_depth: usize,
    max_depth: usize,
}

impl SetupContext {
    pub fn new(num_procs: usize, channel: usize, xres: u32, yres: u32) -> Self {
        Self {
            num_procs,
            channel,
            xres,
            yres,
            min_depth: 1,
            max_depth: usize::MAX,
        }
    }

    /// Narrow the allowed number of frames in flight.
    pub fn constrain_pipeline_depth(&mut self, min: usize, max: usize) {
        self.min_depth = self.min_depth.max(min);
        self.max_depth = self.max_depth.min(max);
    }

    /// The `(min, max)` pipeline depth every stage agreed on.
    pub fn pipeline_depth(&self) -> (usize, usize) {
        (self.min_depth, self.max_depth)
    }
}

/// Frame metadata shared by every worker of a frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameInfo {
    pub serial: u64,
    pub started: Instant,
    pub deadline: Instant,
}

impl FrameInfo {
    pub fn new(serial: u64, started: Instant, budget: Duration) -> Self {
        Self {
            serial,
            started,
            deadline: started + budget,
        }
    }

    pub fn past_deadline(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// What one worker thread sees while rendering a frame.
pub struct RenderContext<'a> {
    pub proc: usize,
    pub num_procs: usize,
    pub frame: FrameInfo,
    pub shader: &'a dyn PixelShader,
    pub image: &'a dyn ImageSink,
    pub rng: &'a mut dyn RngCore,
}
