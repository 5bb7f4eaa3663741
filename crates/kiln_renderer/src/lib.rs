//! Kiln Renderer - deadline-driven adaptive tile scheduling
//!
//! Frames start with a coarse pass over the render region, one sample per
//! magnified block. Tiles whose error is still high are split into finer
//! child tiles and pushed to an approximate priority queue; worker threads
//! keep pulling the most promising tiles until the frame converges or its
//! deadline passes.
//!
//! The engine drives one display channel with a rayon pool. The cluster
//! engine runs several such engines against one coordinator.

mod cluster;
mod context;
mod engine;
mod error;
mod fragment;
mod image;
mod priority;
mod scheduler;
mod settings;
mod shader;
mod tile;

pub use cluster::{ClusterEngine, ClusterFrameReport};
pub use context::{FrameInfo, RenderContext, SchedulerContext, SetupContext};
pub use engine::Engine;
pub use error::{RenderError, RenderResult};
pub use fragment::Fragment;
pub use image::{color_to_rgba, linear_to_gamma, SharedImage};
pub use priority::{Priority, PriorityParams, PriorityScheme, TileStats};
pub use scheduler::{needs_refinement, FrameOutcome, FrameReport, FrameScheduler, FrameState};
pub use settings::{CoarseOrder, RenderSettings};
pub use shader::{ImageSink, PixelShader};
pub use tile::{coarse_tiles, Level, Tile};

/// Re-export the color type shaders return
pub use kiln_math::Color;
