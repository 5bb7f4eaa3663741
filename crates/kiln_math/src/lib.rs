//! Kiln math - pixel-space geometry and color helpers.

// Re-export glam for convenience
pub use glam::*;

mod rect;
pub use rect::{Rect, Region};

/// Linear RGB color.
pub type Color = Vec3;

/// Rec. 709 luminance of a linear RGB color.
#[inline]
pub fn luminance(color: Color) -> f32 {
    0.2126 * color.x + 0.7152 * color.y + 0.0722 * color.z
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_luminance_white_is_one() {
        assert!((luminance(Color::ONE) - 1.0).abs() < 1e-6);
        assert_eq!(luminance(Color::ZERO), 0.0);
    }

    #[test]
    fn test_luminance_green_dominates() {
        let red = luminance(Color::new(1.0, 0.0, 0.0));
        let green = luminance(Color::new(0.0, 1.0, 0.0));
        let blue = luminance(Color::new(0.0, 0.0, 1.0));
        assert!(green > red);
        assert!(red > blue);
    }
}
