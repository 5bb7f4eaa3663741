//! Render settings, loadable from JSON.

use std::path::Path;
use std::time::Duration;

use kiln_core::{ClusterConfig, SchedError};
use kiln_math::{Rect, Region};
use serde::{Deserialize, Serialize};

use crate::error::RenderResult;
use crate::priority::{PriorityParams, PriorityScheme};

/// Order in which coarse tiles are handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoarseOrder {
    /// Row by row from the top left.
    Scanline,
    /// Nearest to the region center first.
    #[default]
    Spiral,
}

/// Everything that controls how a run is scheduled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Frames per second; the frame deadline is its inverse
    pub frame_rate: f64,
    /// Coarse tile size in pixels
    pub tile_size: [u32; 2],
    /// Pixels per sample in the coarse pass
    pub coarse_magnification: [u32; 2],
    /// Magnification divisor per refinement level
    pub refinement_ratio: [u32; 2],
    pub priority: PriorityScheme,
    /// Samples per pixel where `fifo_then_variance` switches to variance
    pub fifo_cutoff_spp: u32,
    /// Hard cap on samples per pixel
    pub max_spp: u32,
    /// Error below which a tile is not refined further
    pub convergence_threshold: f32,
    /// Optional sub-region `[x0, y0, x1, y1]`, clipped to the image
    pub render_region: Option<[u32; 4]>,
    /// Point the `center` scheme measures from; defaults to the region center
    pub center: Option<[f32; 2]>,
    /// Number of refinement queue shards
    pub queue_shards: usize,
    /// Worker threads; `None` uses every logical CPU
    pub threads: Option<usize>,
    /// Coarse tiles per work queue pull; 0 picks one automatically
    pub granularity: usize,
    pub coarse_order: CoarseOrder,
    /// Keep refining across frames while the scene is unchanged
    pub progressive: bool,
    /// Seed of the per-thread sample generators
    pub seed: u64,
    pub cluster: ClusterConfig,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            frame_rate: 15.0,
            tile_size: [64, 64],
            coarse_magnification: [8, 8],
            refinement_ratio: [2, 2],
            priority: PriorityScheme::default(),
            fifo_cutoff_spp: 4,
            max_spp: 1024,
            convergence_threshold: 1e-4,
            render_region: None,
            center: None,
            queue_shards: 16,
            threads: None,
            granularity: 0,
            coarse_order: CoarseOrder::default(),
            progressive: false,
            seed: 0,
            cluster: ClusterConfig::default(),
        }
    }
}

impl RenderSettings {
    pub fn from_json_str(json: &str) -> RenderResult<Self> {
        let settings: RenderSettings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> RenderResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Check every field for values the scheduler cannot work with.
    pub fn validate(&self) -> Result<(), SchedError> {
        let invalid = |msg: String| Err(SchedError::InvalidConfig(msg));

        if self.width == 0 || self.height == 0 {
            return invalid(format!("image size {}x{} is empty", self.width, self.height));
        }
        if !(self.frame_rate.is_finite() && self.frame_rate > 0.0) {
            return invalid(format!("frame_rate must be positive, got {}", self.frame_rate));
        }
        if self.tile_size.contains(&0) {
            return invalid("tile_size must be at least 1".into());
        }
        if self.coarse_magnification.contains(&0) {
            return invalid("coarse_magnification must be at least 1".into());
        }
        if self.refinement_ratio.iter().any(|&r| r < 2) {
            return invalid("refinement_ratio must be at least 2".into());
        }
        if self.max_spp == 0 {
            return invalid("max_spp must be at least 1".into());
        }
        if !(self.convergence_threshold >= 0.0) {
            return invalid("convergence_threshold must be non-negative".into());
        }
        if self.queue_shards == 0 {
            return invalid("queue_shards must be at least 1".into());
        }
        if self.threads == Some(0) {
            return invalid("threads must be at least 1".into());
        }
        if self.region_rect().is_empty() {
            return invalid(format!(
                "render_region {:?} does not overlap the {}x{} image",
                self.render_region, self.width, self.height
            ));
        }
        if self.cluster.threads_per_node == 0 {
            return invalid("cluster.threads_per_node must be at least 1".into());
        }
        if self.cluster.min_granularity == 0 {
            return invalid("cluster.min_granularity must be at least 1".into());
        }
        if !(self.cluster.target_sec_per_assignment > 0.0) {
            return invalid("cluster.target_sec_per_assignment must be positive".into());
        }
        Ok(())
    }

    /// Wall-clock budget of one frame.
    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_rate)
    }

    /// The active rectangle: the configured sub-region clipped to the image.
    pub fn region_rect(&self) -> Rect {
        self.region_rect_in(self.width, self.height)
    }

    /// The active rectangle of a `width` x `height` channel.
    pub fn region_rect_in(&self, width: u32, height: u32) -> Rect {
        let image = Rect::from_size(width, height);
        match self.render_region {
            Some([x0, y0, x1, y1]) => image.intersect(&Rect::new(x0, y0, x1, y1)),
            None => image,
        }
    }

    pub fn region(&self) -> Region {
        self.region_in(self.width, self.height)
    }

    pub fn region_in(&self, width: u32, height: u32) -> Region {
        let region = Region::new(self.region_rect_in(width, height));
        match self.center {
            Some([x, y]) => region.with_center(x, y),
            None => region,
        }
    }

    /// Samples per fragment side.
    pub fn packet(&self) -> [u32; 2] {
        [
            (self.tile_size[0] / self.coarse_magnification[0].max(1)).max(1),
            (self.tile_size[1] / self.coarse_magnification[1].max(1)).max(1),
        ]
    }

    pub fn priority_params(&self) -> PriorityParams {
        PriorityParams {
            fifo_cutoff_spp: self.fifo_cutoff_spp,
        }
    }

    pub fn num_threads(&self) -> usize {
        self.threads
            .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, |n| n.get()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = RenderSettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.packet(), [8, 8]);
        assert_eq!(settings.frame_duration(), Duration::from_secs_f64(1.0 / 15.0));
    }

    #[test]
    fn test_partial_json() {
        let settings = RenderSettings::from_json_str(
            r#"{
                "width": 64,
                "height": 32,
                "priority": "fifo_then_variance",
                "render_region": [16, 0, 100, 16],
                "coarse_order": "scanline",
                "cluster": { "threads_per_node": 2 }
            }"#,
        )
        .unwrap();
        assert_eq!(settings.priority, PriorityScheme::FifoThenVariance);
        assert_eq!(settings.region_rect(), Rect::new(16, 0, 64, 16));
        assert_eq!(settings.region().center, (40.0, 8.0));
        assert_eq!(settings.coarse_order, CoarseOrder::Scanline);
        assert_eq!(settings.cluster.threads_per_node, 2);
        assert_eq!(settings.max_spp, 1024);
    }

    #[test]
    fn test_center_override() {
        let settings = RenderSettings {
            center: Some([1.0, 2.0]),
            ..Default::default()
        };
        assert_eq!(settings.region().center, (1.0, 2.0));
    }

    #[test]
    fn test_rejects_bad_values() {
        let cases = [
            RenderSettings {
                width: 0,
                ..Default::default()
            },
            RenderSettings {
                frame_rate: 0.0,
                ..Default::default()
            },
            RenderSettings {
                refinement_ratio: [1, 2],
                ..Default::default()
            },
            RenderSettings {
                threads: Some(0),
                ..Default::default()
            },
            RenderSettings {
                render_region: Some([700, 0, 800, 10]),
                ..Default::default()
            },
            RenderSettings {
                convergence_threshold: f32::NAN,
                ..Default::default()
            },
        ];
        for settings in cases {
            assert!(matches!(settings.validate(), Err(SchedError::InvalidConfig(_))));
        }
    }

    #[test]
    fn test_unknown_scheme_is_a_json_error() {
        assert!(matches!(
            RenderSettings::from_json_str(r#"{ "priority": "random" }"#),
            Err(crate::RenderError::Json(_))
        ));
    }
}
