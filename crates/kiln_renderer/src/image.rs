//! Shared frame buffer.
//!
//! Workers publish fragments concurrently without locking: every record
//! owns a disjoint set of pixels for as long as it is being rendered, and
//! each channel value is stored as the bits of an `f32` in an atomic.

use std::sync::atomic::{AtomicU32, Ordering};

use kiln_math::Color;

use crate::fragment::Fragment;
use crate::shader::ImageSink;

/// Apply gamma correction (gamma = 2.0).
#[inline]
pub fn linear_to_gamma(linear: f32) -> f32 {
    if linear > 0.0 {
        linear.sqrt()
    } else {
        0.0
    }
}

/// Convert a color to 8-bit RGBA.
pub fn color_to_rgba(color: Color) -> [u8; 4] {
    let r = (255.0 * linear_to_gamma(color.x).clamp(0.0, 1.0)) as u8;
    let g = (255.0 * linear_to_gamma(color.y).clamp(0.0, 1.0)) as u8;
    let b = (255.0 * linear_to_gamma(color.z).clamp(0.0, 1.0)) as u8;
    [r, g, b, 255]
}

/// An image that many threads can write at once.
pub struct SharedImage {
    width: u32,
    height: u32,
    pixels: Vec<[AtomicU32; 3]>,
}

impl SharedImage {
    /// Create a new image filled with black.
    pub fn new(width: u32, height: u32) -> Self {
        let pixels = (0..width as usize * height as usize)
            .map(|_| [AtomicU32::new(0), AtomicU32::new(0), AtomicU32::new(0)])
            .collect();
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Get the pixel at (x, y).
    pub fn get(&self, x: u32, y: u32) -> Color {
        let [r, g, b] = &self.pixels[self.index(x, y)];
        Color::new(
            f32::from_bits(r.load(Ordering::Relaxed)),
            f32::from_bits(g.load(Ordering::Relaxed)),
            f32::from_bits(b.load(Ordering::Relaxed)),
        )
    }

    /// Set the pixel at (x, y).
    pub fn set(&self, x: u32, y: u32, color: Color) {
        let [r, g, b] = &self.pixels[self.index(x, y)];
        r.store(color.x.to_bits(), Ordering::Relaxed);
        g.store(color.y.to_bits(), Ordering::Relaxed);
        b.store(color.z.to_bits(), Ordering::Relaxed);
    }

    /// Reset every pixel to black.
    pub fn clear(&self) {
        for pixel in &self.pixels {
            for channel in pixel {
                channel.store(0, Ordering::Relaxed);
            }
        }
    }

    /// Convert to RGBA bytes (for display or saving).
    pub fn to_rgba(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.pixels.len() * 4);
        for y in 0..self.height {
            for x in 0..self.width {
                bytes.extend_from_slice(&color_to_rgba(self.get(x, y)));
            }
        }
        bytes
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }
}

impl ImageSink for SharedImage {
    fn publish(&self, fragment: &Fragment) {
        for (index, color) in fragment.colors.iter().enumerate() {
            let cell = fragment.cell(index);
            for y in cell.y0..cell.y1.min(self.height) {
                for x in cell.x0..cell.x1.min(self.width) {
                    self.set(x, y, *color);
                }
            }
        }
    }
}
