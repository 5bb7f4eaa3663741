//! Priority schemes for the refinement queue.
//!
//! Each scheme is a pure function from the statistics of a freshly
//! rendered tile to the priority its children are queued with. Larger
//! priorities are refined first.

use serde::{Deserialize, Serialize};

/// Queue priority type.
pub type Priority = f64;

/// What the scheduler knows about a tile when it ranks its children.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TileStats {
    /// Insertion sequence number of the record being ranked.
    pub seq: u64,
    /// Samples per pixel the tile was just rendered with.
    pub spp: u32,
    /// Variance of per-cell luminance.
    pub variance: f32,
    /// Largest luminance delta between adjacent cells.
    pub contrast: f32,
    /// Distance from the record's center to the region center, in pixels.
    pub center_distance: f32,
}

/// Scheme-independent inputs to the priority functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityParams {
    /// Samples per pixel below which `FifoThenVariance` behaves as `Fifo`.
    pub fifo_cutoff_spp: u32,
}

/// How refinement work is ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityScheme {
    /// Oldest record first.
    Fifo,
    /// Noisiest tile first.
    #[default]
    LuminanceVariance,
    /// Sharpest edge first.
    Contrast,
    /// `Fifo` until the cutoff sample count, `LuminanceVariance` after.
    FifoThenVariance,
    /// Closest to the region center first.
    Center,
}

pub type PriorityFn = fn(&TileStats, &PriorityParams) -> Priority;

fn fifo(stats: &TileStats, _params: &PriorityParams) -> Priority {
    -(stats.seq as Priority)
}

fn luminance_variance(stats: &TileStats, _params: &PriorityParams) -> Priority {
    stats.variance as Priority
}

fn contrast(stats: &TileStats, _params: &PriorityParams) -> Priority {
    stats.contrast as Priority
}

fn fifo_then_variance(stats: &TileStats, params: &PriorityParams) -> Priority {
    if stats.spp < params.fifo_cutoff_spp {
        fifo(stats, params)
    } else {
        luminance_variance(stats, params)
    }
}

fn center(stats: &TileStats, _params: &PriorityParams) -> Priority {
    1.0 / (stats.center_distance as Priority).max(1.0)
}

impl PriorityScheme {
    pub const ALL: [PriorityScheme; 5] = [
        PriorityScheme::Fifo,
        PriorityScheme::LuminanceVariance,
        PriorityScheme::Contrast,
        PriorityScheme::FifoThenVariance,
        PriorityScheme::Center,
    ];

    /// The priority function of this scheme.
    pub fn function(self) -> PriorityFn {
        match self {
            PriorityScheme::Fifo => fifo,
            PriorityScheme::LuminanceVariance => luminance_variance,
            PriorityScheme::Contrast => contrast,
            PriorityScheme::FifoThenVariance => fifo_then_variance,
            PriorityScheme::Center => center,
        }
    }

    pub fn evaluate(self, stats: &TileStats, params: &PriorityParams) -> Priority {
        (self.function())(stats, params)
    }

    /// The error measure that decides convergence, if this scheme has one
    /// at the given sample count.
    ///
    /// `Fifo` and `Center` rank by position, not by image error, so tiles
    /// under them keep refining until the sample cap.
    pub fn error(self, stats: &TileStats, params: &PriorityParams) -> Option<f32> {
        match self {
            PriorityScheme::LuminanceVariance => Some(stats.variance),
            PriorityScheme::Contrast => Some(stats.contrast),
            PriorityScheme::FifoThenVariance if stats.spp >= params.fifo_cutoff_spp => {
                Some(stats.variance)
            }
            PriorityScheme::FifoThenVariance
            | PriorityScheme::Fifo
            | PriorityScheme::Center => None,
        }
    }

    /// Parse a scheme name as used in settings files and on the command line.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().replace('-', "_").as_str() {
            "fifo" => Some(PriorityScheme::Fifo),
            "luminance_variance" | "variance" | "lumvar" => Some(PriorityScheme::LuminanceVariance),
            "contrast" => Some(PriorityScheme::Contrast),
            "fifo_then_variance" | "fifo_lumvar" => Some(PriorityScheme::FifoThenVariance),
            "center" => Some(PriorityScheme::Center),
            _ => None,
        }
    }
}
