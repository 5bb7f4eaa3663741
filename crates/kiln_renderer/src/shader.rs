//! The two operations the scheduler needs from the rest of the engine.

use kiln_math::Color;
use rand::RngCore;

use crate::fragment::Fragment;

/// Produces colors for image-plane samples.
///
/// Implementations wrap whatever actually computes radiance: a camera,
/// an acceleration structure and materials, or a procedural pattern.
pub trait PixelShader: Send + Sync {
    /// Radiance arriving at continuous pixel position `(x, y)`.
    fn sample(&self, x: f32, y: f32, rng: &mut dyn RngCore) -> Color;

    /// Shade every cell of a fragment with its stratified samples.
    fn shade(&self, fragment: &mut Fragment, rng: &mut dyn RngCore) {
        let weight = 1.0 / fragment.samples_per_cell() as f32;
        for index in 0..fragment.len() {
            let mut color = Color::ZERO;
            for (x, y) in fragment.sample_positions(index, rng) {
                color += self.sample(x, y, rng);
            }
            fragment.colors[index] = color * weight;
        }
    }
}

/// Receives shaded fragments.
pub trait ImageSink: Send + Sync {
    /// Write a fragment's cells to the pixels they cover.
    fn publish(&self, fragment: &Fragment);
}
