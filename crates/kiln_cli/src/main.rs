//! kiln - render a procedural scene under a frame deadline.
//!
//! Renders a few frames with the adaptive tile scheduler, logs what each
//! frame achieved and writes the last one to a PNG.

mod scene;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use kiln_renderer::{
    ClusterEngine, Engine, FrameReport, PriorityScheme, RenderSettings, SharedImage,
};

use scene::SphereScene;

/// Deadline-driven adaptive renderer.
#[derive(Parser, Debug)]
#[command(name = "kiln", version, about)]
struct Cli {
    /// JSON settings file; command line flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Image width in pixels.
    #[arg(long)]
    width: Option<u32>,

    /// Image height in pixels.
    #[arg(long)]
    height: Option<u32>,

    /// Number of frames to render.
    #[arg(long, default_value_t = 1)]
    frames: u32,

    /// Worker threads (per node in cluster mode).
    #[arg(long)]
    threads: Option<usize>,

    /// Priority scheme: fifo, luminance_variance, contrast,
    /// fifo_then_variance or center.
    #[arg(long)]
    priority: Option<String>,

    /// Hard cap on samples per pixel.
    #[arg(long)]
    max_spp: Option<u32>,

    /// Frame budget in milliseconds.
    #[arg(long)]
    deadline_ms: Option<f64>,

    /// Keep refining across frames.
    #[arg(long)]
    progressive: bool,

    /// Render on this many in-process cluster nodes.
    #[arg(long)]
    cluster_nodes: Option<usize>,

    /// Output PNG path.
    #[arg(long, short, default_value = "kiln.png")]
    output: PathBuf,
}

impl Cli {
    fn settings(&self) -> Result<RenderSettings> {
        let mut settings = match &self.config {
            Some(path) => RenderSettings::from_json_file(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?,
            None => RenderSettings::default(),
        };

        if let Some(width) = self.width {
            settings.width = width;
        }
        if let Some(height) = self.height {
            settings.height = height;
        }
        if let Some(name) = &self.priority {
            settings.priority = PriorityScheme::from_name(name)
                .with_context(|| format!("Unknown priority scheme '{}'", name))?;
        }
        if let Some(max_spp) = self.max_spp {
            settings.max_spp = max_spp;
        }
        if let Some(ms) = self.deadline_ms {
            settings.frame_rate = 1000.0 / ms;
        }
        if let Some(threads) = self.threads {
            settings.threads = Some(threads);
            settings.cluster.threads_per_node = threads;
        }
        settings.progressive |= self.progressive;

        settings.validate().context("Invalid settings")?;
        Ok(settings)
    }
}

fn log_frame(report: &FrameReport) {
    log::info!(
        "Frame {}: {:?} in {:.1} ms, {} coarse + {} refined tiles, {} samples",
        report.serial,
        report.outcome,
        report.elapsed.as_secs_f64() * 1e3,
        report.coarse_tiles,
        report.refined_tiles,
        report.samples
    );
    if report.dropped > 0 {
        log::warn!("Frame {}: {} refinements dropped", report.serial, report.dropped);
    }
}

fn save_png(image: &SharedImage, path: &Path) -> Result<()> {
    image::save_buffer(
        path,
        &image.to_rgba(),
        image.width(),
        image.height(),
        image::ColorType::Rgba8,
    )
    .with_context(|| format!("Failed to write {}", path.display()))
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let cli = Cli::parse();
    let settings = cli.settings()?;
    log::info!(
        "Rendering {}x{} with {:?}, {:.1} ms per frame",
        settings.width,
        settings.height,
        settings.priority,
        settings.frame_duration().as_secs_f64() * 1e3
    );

    let shader = Arc::new(SphereScene::new(settings.width, settings.height));

    match cli.cluster_nodes {
        Some(nodes) => {
            let mut cluster = ClusterEngine::new(settings, nodes, shader)?;
            for _ in 0..cli.frames {
                let report = cluster.render_frame()?;
                log::info!(
                    "Cluster frame {}: {} coarse tiles, {} samples, {} requests",
                    report.serial,
                    report.coarse_tiles(),
                    report.samples(),
                    report.serve.requests
                );
                report.nodes.iter().for_each(log_frame);
            }
            save_png(cluster.image(), &cli.output)?;
        }
        None => {
            let mut engine = Engine::new(settings, shader)?;
            for _ in 0..cli.frames {
                log_frame(&engine.render_frame()?);
            }
            save_png(engine.image(), &cli.output)?;
        }
    }

    log::info!("Wrote {}", cli.output.display());
    Ok(())
}
