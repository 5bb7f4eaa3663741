use serde::{Deserialize, Serialize};

/// A half-open pixel rectangle `[x0, x1) x [y0, y1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl Rect {
    /// Create a new rectangle from its corners.
    pub fn new(x0: u32, y0: u32, x1: u32, y1: u32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Rectangle covering a whole `width` x `height` image.
    pub fn from_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }

    /// Number of pixels covered.
    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    /// Returns true if the rectangle covers no pixels.
    pub fn is_empty(&self) -> bool {
        self.x1 <= self.x0 || self.y1 <= self.y0
    }

    /// Returns true if pixel (x, y) lies inside.
    pub fn contains(&self, x: u32, y: u32) -> bool {
        self.x0 <= x && x < self.x1 && self.y0 <= y && y < self.y1
    }

    /// Returns true if `other` lies entirely inside this rectangle.
    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.is_empty()
            || (self.x0 <= other.x0
                && other.x1 <= self.x1
                && self.y0 <= other.y0
                && other.y1 <= self.y1)
    }

    /// Intersection of two rectangles (possibly empty).
    pub fn intersect(&self, other: &Rect) -> Rect {
        Rect::new(
            self.x0.max(other.x0),
            self.y0.max(other.y0),
            self.x1.min(other.x1),
            self.y1.min(other.y1),
        )
    }

    /// Returns true if the two rectangles share at least one pixel.
    pub fn overlaps(&self, other: &Rect) -> bool {
        !self.intersect(other).is_empty()
    }

    /// Center of the rectangle in continuous pixel coordinates.
    pub fn center(&self) -> (f32, f32) {
        (
            (self.x0 as f32 + self.x1 as f32) * 0.5,
            (self.y0 as f32 + self.y1 as f32) * 0.5,
        )
    }

    /// Split into a grid of cells at most `cell_w` x `cell_h`, row-major.
    ///
    /// Cells on the right and bottom edges are clipped, so the cells
    /// partition the rectangle exactly.
    pub fn grid(&self, cell_w: u32, cell_h: u32) -> Vec<Rect> {
        let cell_w = cell_w.max(1);
        let cell_h = cell_h.max(1);
        let mut cells = Vec::new();
        let mut y = self.y0;
        while y < self.y1 {
            let y1 = y.saturating_add(cell_h).min(self.y1);
            let mut x = self.x0;
            while x < self.x1 {
                let x1 = x.saturating_add(cell_w).min(self.x1);
                cells.push(Rect::new(x, y, x1, y1));
                x = x1;
            }
            y = y1;
        }
        cells
    }
}

/// The active render region: a rectangle plus the point that the
/// center-distance priority measures from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    pub rect: Rect,
    pub center: (f32, f32),
}

impl Region {
    /// Region centered on its own rectangle.
    pub fn new(rect: Rect) -> Self {
        Self {
            rect,
            center: rect.center(),
        }
    }

    /// Override the center point.
    pub fn with_center(mut self, x: f32, y: f32) -> Self {
        self.center = (x, y);
        self
    }

    /// Euclidean distance from the region center to `(x, y)`.
    pub fn distance_to_center(&self, x: f32, y: f32) -> f32 {
        let dx = x - self.center.0;
        let dy = y - self.center.1;
        (dx * dx + dy * dy).sqrt()
    }
}
