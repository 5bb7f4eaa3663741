//! Pixel batches: the unit handed to the shader and the image.

use kiln_math::{luminance, Color, Rect};
use rand::{Rng, RngCore};

use crate::tile::Level;

/// The cells of one tile at one level, with their shaded colors.
///
/// Cells are laid out row-major. Each cell covers `block` pixels and is
/// estimated from `spp` stratified samples.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub rect: Rect,
    pub block: [u32; 2],
    pub spp: [u32; 2],
    pub cols: u32,
    pub rows: u32,
    pub colors: Vec<Color>,
}

impl Fragment {
    /// A fragment of black cells covering `rect` at `level`.
    pub fn new(rect: Rect, level: &Level) -> Self {
        let block = level.block();
        let cols = rect.width().div_ceil(block[0]);
        let rows = rect.height().div_ceil(block[1]);
        Self {
            rect,
            block,
            spp: level.spp(),
            cols,
            rows,
            colors: vec![Color::ZERO; (cols * rows) as usize],
        }
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    /// Pixels covered by cell `index`, clipped to the tile.
    pub fn cell(&self, index: usize) -> Rect {
        let col = index as u32 % self.cols.max(1);
        let row = index as u32 / self.cols.max(1);
        let x0 = self.rect.x0 + col * self.block[0];
        let y0 = self.rect.y0 + row * self.block[1];
        Rect::new(
            x0,
            y0,
            (x0 + self.block[0]).min(self.rect.x1),
            (y0 + self.block[1]).min(self.rect.y1),
        )
    }

    pub fn samples_per_cell(&self) -> u32 {
        self.spp[0] * self.spp[1]
    }

    /// Total samples needed to shade the fragment.
    pub fn num_samples(&self) -> u64 {
        self.len() as u64 * self.samples_per_cell() as u64
    }

    /// Jittered, stratified sample positions inside cell `index`.
    pub fn sample_positions(&self, index: usize, rng: &mut dyn RngCore) -> Vec<(f32, f32)> {
        let cell = self.cell(index);
        let [sx, sy] = self.spp;
        let w = cell.width() as f32;
        let h = cell.height() as f32;
        let mut positions = Vec::with_capacity((sx * sy) as usize);
        for j in 0..sy {
            for i in 0..sx {
                let u = (i as f32 + rng.gen::<f32>()) / sx as f32;
                let v = (j as f32 + rng.gen::<f32>()) / sy as f32;
                positions.push((cell.x0 as f32 + u * w, cell.y0 as f32 + v * h));
            }
        }
        positions
    }

    fn luminances(&self) -> impl Iterator<Item = f32> + '_ {
        self.colors.iter().map(|c| luminance(*c))
    }

    /// Population variance of the per-cell luminance.
    pub fn luminance_variance(&self) -> f32 {
        let n = self.len();
        if n < 2 {
            return 0.0;
        }
        let mean = self.luminances().sum::<f32>() / n as f32;
        self.luminances().map(|l| (l - mean) * (l - mean)).sum::<f32>() / n as f32
    }

    /// Largest luminance difference between horizontally or vertically
    /// adjacent cells.
    pub fn max_adjacent_contrast(&self) -> f32 {
        let lum: Vec<f32> = self.luminances().collect();
        let cols = self.cols as usize;
        let mut max = 0.0f32;
        for (i, &l) in lum.iter().enumerate() {
            if (i + 1) % cols != 0 {
                if let Some(&right) = lum.get(i + 1) {
                    max = max.max((l - right).abs());
                }
            }
            if let Some(&below) = lum.get(i + cols) {
                max = max.max((l - below).abs());
            }
        }
        max
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_coarse_cells_cover_tile() {
        let level = Level::coarse([4, 4]);
        let fragment = Fragment::new(Rect::new(10, 10, 20, 17), &level);
        assert_eq!((fragment.cols, fragment.rows), (3, 2));
        assert_eq!(fragment.len(), 6);
        assert_eq!(fragment.cell(0), Rect::new(10, 10, 14, 14));
        assert_eq!(fragment.cell(5), Rect::new(18, 14, 20, 17));
        let area: u64 = (0..fragment.len()).map(|i| fragment.cell(i).area()).sum();
        assert_eq!(area, fragment.rect.area());
    }

    #[test]
    fn test_stratified_samples_stay_in_cell() {
        let level = Level::coarse([1, 1]).refine([2, 2]).refine([2, 2]);
        let fragment = Fragment::new(Rect::new(3, 5, 5, 6), &level);
        assert_eq!(fragment.samples_per_cell(), 16);
        assert_eq!(fragment.num_samples(), 32);

        let mut rng = StdRng::seed_from_u64(7);
        let positions = fragment.sample_positions(1, &mut rng);
        assert_eq!(positions.len(), 16);
        for (x, y) in positions {
            assert!((4.0..5.0).contains(&x));
            assert!((5.0..6.0).contains(&y));
        }
    }

    #[test]
    fn test_flat_fragment_has_no_error() {
        let level = Level::coarse([1, 1]);
        let mut fragment = Fragment::new(Rect::from_size(4, 4), &level);
        fragment.colors.fill(Color::splat(0.5));
        assert_eq!(fragment.luminance_variance(), 0.0);
        assert_eq!(fragment.max_adjacent_contrast(), 0.0);
    }

    #[test]
    fn test_edge_statistics() {
        // Left column black, the rest white
        let level = Level::coarse([1, 1]);
        let mut fragment = Fragment::new(Rect::from_size(4, 2), &level);
        for i in 0..fragment.len() {
            if i % 4 != 0 {
                fragment.colors[i] = Color::ONE;
            }
        }
        assert!((fragment.max_adjacent_contrast() - 1.0).abs() < 1e-5);
        // 2 of 8 black: variance = 0.25 * 0.75
        assert!((fragment.luminance_variance() - 0.1875).abs() < 1e-5);
    }
}
