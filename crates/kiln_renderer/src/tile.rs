//! Scheduling records and refinement-level geometry.
//!
//! A tile is rendered as a grid of cells. At coarse levels one sample
//! covers a `block` of pixels; once refinement reaches one sample per
//! pixel, further levels add stratified samples inside each pixel.

use kiln_math::{Rect, Region};

use crate::settings::CoarseOrder;

/// Sampling density along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AxisDensity {
    /// Pixels covered by one sample (1 once at pixel resolution)
    pub block: u32,
    /// Samples per pixel (1 while `block > 1`)
    pub spp: u32,
}

impl AxisDensity {
    fn coarse(magnification: u32) -> Self {
        Self {
            block: magnification.max(1),
            spp: 1,
        }
    }

    fn refine(self, ratio: u32) -> Self {
        let ratio = ratio.max(2);
        if self.block <= 1 {
            Self {
                block: 1,
                spp: self.spp.saturating_mul(ratio),
            }
        } else if self.block >= ratio {
            Self {
                block: self.block / ratio,
                spp: 1,
            }
        } else {
            // Magnification drops below one
            Self {
                block: 1,
                spp: (ratio as f32 / self.block as f32).round().max(1.0) as u32,
            }
        }
    }

    /// Tile side along this axis for a fragment of `packet` samples.
    fn tile_side(self, packet: u32) -> u32 {
        if self.spp > 1 {
            (packet / self.spp).max(1)
        } else {
            packet.saturating_mul(self.block).max(1)
        }
    }
}

/// One refinement level: depth plus per-axis sampling density.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Level {
    pub depth: u32,
    pub x: AxisDensity,
    pub y: AxisDensity,
}

impl Level {
    /// The coarse-pass level.
    pub fn coarse(magnification: [u32; 2]) -> Self {
        Self {
            depth: 0,
            x: AxisDensity::coarse(magnification[0]),
            y: AxisDensity::coarse(magnification[1]),
        }
    }

    /// The next finer level.
    pub fn refine(&self, ratio: [u32; 2]) -> Self {
        Self {
            depth: self.depth + 1,
            x: self.x.refine(ratio[0]),
            y: self.y.refine(ratio[1]),
        }
    }

    pub fn block(&self) -> [u32; 2] {
        [self.x.block, self.y.block]
    }

    pub fn spp(&self) -> [u32; 2] {
        [self.x.spp, self.y.spp]
    }

    /// Samples per pixel; 1 for every level coarser than pixel resolution.
    pub fn samples_per_pixel(&self) -> u32 {
        self.x.spp.saturating_mul(self.y.spp)
    }

    /// True if refining stopped changing the density.
    fn saturated(&self, previous: &Level) -> bool {
        self.x == previous.x && self.y == previous.y
    }

    /// Size of the tiles rendered at this level.
    pub fn tile_size(&self, packet: [u32; 2]) -> [u32; 2] {
        [self.x.tile_side(packet[0]), self.y.tile_side(packet[1])]
    }
}

/// A scheduling record: pixels to render and the level to render them at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tile {
    pub rect: Rect,
    pub level: Level,
    pub seq: u64,
}

impl Tile {
    /// Split into the tiles of the next level, or `None` if that level
    /// would exceed `max_spp`. Children partition `self.rect` exactly.
    pub fn children(
        &self,
        ratio: [u32; 2],
        packet: [u32; 2],
        max_spp: u32,
    ) -> Option<(Level, Vec<Rect>)> {
        let next = self.level.refine(ratio);
        if next.samples_per_pixel() > max_spp || next.saturated(&self.level) {
            return None;
        }
        let [w, h] = next.tile_size(packet);
        Some((next, self.rect.grid(w, h)))
    }
}

/// Coarse tiles of a region in dispatch order.
pub fn coarse_tiles(region: &Region, tile_size: [u32; 2], order: CoarseOrder) -> Vec<Rect> {
    let mut tiles = region.rect.grid(tile_size[0], tile_size[1]);
    if order == CoarseOrder::Spiral {
        sort_spiral(&mut tiles, region);
    }
    tiles
}

/// Sort tiles by distance from the region center, nearest first.
fn sort_spiral(tiles: &mut [Rect], region: &Region) {
    tiles.sort_by(|a, b| {
        let (ax, ay) = a.center();
        let (bx, by) = b.center();
        let a_dist = region.distance_to_center(ax, ay);
        let b_dist = region.distance_to_center(bx, by);
        a_dist.partial_cmp(&b_dist).unwrap_or(std::cmp::Ordering::Equal)
    });
}

fn split_segments(segments: &[(u32, u32)], side: u32) -> Vec<(u32, u32)> {
    let side = side.max(1);
    let mut out = Vec::with_capacity(segments.len());
    for &(start, end) in segments {
        let mut s = start;
        while s < end {
            let e = s.saturating_add(side).min(end);
            out.push((s, e));
            s = e;
        }
    }
    out
}

/// Upper bound on the records one frame can create below the coarse level.
///
/// Tile grids are separable, so the tiles of a level are the product of
/// the per-axis segment lists; each level splits the previous one.
pub fn max_refined_records(
    region: &Rect,
    tile_size: [u32; 2],
    coarse_magnification: [u32; 2],
    ratio: [u32; 2],
    max_spp: u32,
) -> usize {
    let packet = [
        (tile_size[0] / coarse_magnification[0].max(1)).max(1),
        (tile_size[1] / coarse_magnification[1].max(1)).max(1),
    ];
    let mut xs = split_segments(&[(region.x0, region.x1)], tile_size[0]);
    let mut ys = split_segments(&[(region.y0, region.y1)], tile_size[1]);
    let mut level = Level::coarse(coarse_magnification);
    let mut total = 0usize;
    loop {
        let next = level.refine(ratio);
        if next.samples_per_pixel() > max_spp || next.saturated(&level) {
            return total;
        }
        let [w, h] = next.tile_size(packet);
        xs = split_segments(&xs, w);
        ys = split_segments(&ys, h);
        total = total.saturating_add(xs.len().saturating_mul(ys.len()));
        level = next;
    }
}
