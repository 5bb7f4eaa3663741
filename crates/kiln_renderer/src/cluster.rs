//! In-process cluster: one coordinator and several render nodes.
//!
//! Every node is a full [`Engine`] with its own thread pool and a
//! [`ClusterBalancer`] in place of the local work queue. Nodes write into
//! one shared image; the coarse tiles they pull are disjoint, and so are
//! the records refined from them. The coordinator serves work requests on
//! its own thread while the nodes render.
//!
//! A failed node fails the frame and leaves the cluster unusable; the
//! transports give no way to resynchronise with the coordinator.

use std::sync::Arc;
use std::thread;

use kiln_core::cluster::channel_links;
use kiln_core::{ClusterBalancer, ClusterError, Coordinator, SchedError, ServeControl, ServeReport};

use crate::engine::Engine;
use crate::error::{RenderError, RenderResult};
use crate::image::SharedImage;
use crate::scheduler::FrameReport;
use crate::settings::RenderSettings;
use crate::shader::PixelShader;
use crate::tile::coarse_tiles;

/// One frame of a cluster run.
#[derive(Debug, Clone)]
pub struct ClusterFrameReport {
    pub serial: u64,
    pub serve: ServeReport,
    pub nodes: Vec<FrameReport>,
}

impl ClusterFrameReport {
    pub fn coarse_tiles(&self) -> usize {
        self.nodes.iter().map(|r| r.coarse_tiles).sum()
    }

    pub fn samples(&self) -> u64 {
        self.nodes.iter().map(|r| r.samples).sum()
    }
}

/// A coordinator plus `num_nodes` render nodes in this process.
pub struct ClusterEngine {
    coordinator: Coordinator,
    nodes: Vec<Engine>,
    image: Arc<SharedImage>,
    serial: u64,
    failed: bool,
}

impl ClusterEngine {
    pub fn new(
        settings: RenderSettings,
        num_nodes: usize,
        shader: Arc<dyn PixelShader>,
    ) -> RenderResult<Self> {
        if num_nodes == 0 {
            return Err(RenderError::Config("a cluster needs at least one render node".into()));
        }
        settings.validate()?;

        let mut node_settings = settings.clone();
        node_settings.threads = Some(settings.cluster.threads_per_node);
        if node_settings.progressive {
            // Nodes must pull coarse work every frame to answer the coordinator
            log::warn!(
                "Progressive mode is not available in a cluster, rendering every frame from scratch"
            );
            node_settings.progressive = false;
        }

        let num_coarse =
            coarse_tiles(&settings.region(), settings.tile_size, settings.coarse_order).len();
        let (coordinator_link, node_links) =
            channel_links(num_nodes, settings.cluster.reply_timeout());
        let mut coordinator =
            Coordinator::new(num_nodes, settings.cluster.clone(), coordinator_link);
        coordinator.setup_begin(1);
        coordinator.setup_display_channel(0, num_coarse);

        let image = Arc::new(SharedImage::new(settings.width, settings.height));
        let nodes = node_links
            .into_iter()
            .enumerate()
            .map(|(rank, link)| {
                let balancer =
                    ClusterBalancer::new(rank, num_nodes, settings.cluster.clone(), link)?;
                Engine::with_balancer(
                    node_settings.clone(),
                    shader.clone(),
                    Box::new(balancer),
                    image.clone(),
                )
            })
            .collect::<RenderResult<Vec<_>>>()?;

        log::info!(
            "Cluster ready: {} nodes x {} threads, {} coarse tiles",
            num_nodes,
            settings.cluster.threads_per_node,
            num_coarse
        );
        Ok(Self {
            coordinator,
            nodes,
            image,
            serial: 0,
            failed: false,
        })
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn image(&self) -> &SharedImage {
        &self.image
    }

    pub fn node(&self, rank: usize) -> Option<&Engine> {
        self.nodes.get(rank)
    }

    /// Current master granularity of the coordinator.
    pub fn granularity(&self) -> usize {
        self.coordinator.granularity(0)
    }

    /// Render one frame on every node.
    pub fn render_frame(&mut self) -> RenderResult<ClusterFrameReport> {
        if self.failed {
            return Err(SchedError::from(ClusterError::Aborted).into());
        }
        self.coordinator.setup_frame(0);
        let frames = self
            .nodes
            .iter_mut()
            .map(Engine::prepare_frame)
            .collect::<RenderResult<Vec<_>>>()?;

        let coordinator = &self.coordinator;
        let nodes = &self.nodes;
        let control = ServeControl::new();
        let control = &control;
        let (serve, rendered) = thread::scope(|s| {
            let server = s.spawn(move || coordinator.serve_frame_with(0, control));
            let workers: Vec<_> = nodes
                .iter()
                .zip(&frames)
                .map(|(node, frame)| {
                    s.spawn(move || {
                        let result = node.render_prepared(frame);
                        if result.is_err() {
                            control.abort();
                        }
                        result
                    })
                })
                .collect();
            let rendered: Vec<RenderResult<()>> = workers
                .into_iter()
                .map(|w| w.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                .collect();
            control.finish();
            let serve = server.join().unwrap_or_else(|e| std::panic::resume_unwind(e));
            (serve, rendered)
        });

        // The node's own error says more than the coordinator's abort
        if let Some(err) = rendered.into_iter().find_map(Result::err) {
            log::error!("Cluster frame {} failed: {}", self.serial, err);
            self.failed = true;
            return Err(err);
        }
        let serve = serve.map_err(|e| {
            self.failed = true;
            e
        })?;

        let reports = self
            .nodes
            .iter_mut()
            .zip(&frames)
            .map(|(node, frame)| node.finish_frame(frame))
            .collect::<RenderResult<Vec<_>>>()?;

        let report = ClusterFrameReport {
            serial: self.serial,
            serve,
            nodes: reports,
        };
        self.serial += 1;
        log::debug!(
            "Cluster frame {}: {} requests, {} ranges, granularity {}",
            report.serial,
            report.serve.requests,
            report.serve.ranges,
            self.granularity()
        );
        Ok(report)
    }
}
