//! Quadrilateral regions in image coordinates

use serde::{Deserialize, Serialize};

/// Four corners of a detected rectangle, in image pixel coordinates.
///
/// After [`Region::reordered`] the corners are stored as
/// top-left, top-right, bottom-left, bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub corners: [(f32, f32); 4],
}

impl Region {
    /// Create a region from four points in any order
    pub fn new(corners: [(f32, f32); 4]) -> Self {
        Self { corners }
    }

    /// Normalize corner order to (top-left, top-right, bottom-left, bottom-right).
    ///
    /// Top-left has the smallest `x + y` and bottom-right the largest.
    /// Top-right has the smallest `y - x` and bottom-left the largest.
    pub fn reordered(&self) -> Self {
        let sum = |p: &(f32, f32)| p.0 + p.1;
        let diff = |p: &(f32, f32)| p.1 - p.0;

        let top_left = argmin(&self.corners, sum);
        let bottom_right = argmax(&self.corners, sum);
        let top_right = argmin(&self.corners, diff);
        let bottom_left = argmax(&self.corners, diff);

        Self {
            corners: [
                self.corners[top_left],
                self.corners[top_right],
                self.corners[bottom_left],
                self.corners[bottom_right],
            ],
        }
    }

    /// Enclosed area of a reordered region (shoelace over TL, TR, BR, BL)
    pub fn area(&self) -> f64 {
        let [tl, tr, bl, br] = self.corners;
        polygon_area(&[tl, tr, br, bl])
    }

    /// Whether the region encloses no usable area
    pub fn is_degenerate(&self, min_area: f64) -> bool {
        let area = self.area();
        !area.is_finite() || area <= min_area
    }

    /// Scale every corner, used to map working-resolution detections back to the source frame
    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self {
            corners: self.corners.map(|(x, y)| (x * sx, y * sy)),
        }
    }
}

fn argmin(points: &[(f32, f32); 4], key: impl Fn(&(f32, f32)) -> f32) -> usize {
    let mut best = 0;
    for i in 1..points.len() {
        if key(&points[i]) < key(&points[best]) {
            best = i;
        }
    }
    best
}

fn argmax(points: &[(f32, f32); 4], key: impl Fn(&(f32, f32)) -> f32) -> usize {
    let mut best = 0;
    for i in 1..points.len() {
        if key(&points[i]) > key(&points[best]) {
            best = i;
        }
    }
    best
}

/// Absolute shoelace area of a closed polygon given in traversal order
pub fn polygon_area(points: &[(f32, f32)]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice_area = 0.0f64;
    for (i, &(x0, y0)) in points.iter().enumerate() {
        let (x1, y1) = points[(i + 1) % points.len()];
        twice_area += x0 as f64 * y1 as f64 - x1 as f64 * y0 as f64;
    }
    (twice_area / 2.0).abs()
}

/// Whether a closed polygon in traversal order is strictly convex
pub fn is_convex(points: &[(f32, f32)]) -> bool {
    let n = points.len();
    if n < 3 {
        return false;
    }
    let mut sign = 0.0f64;
    for i in 0..n {
        let (ax, ay) = points[i];
        let (bx, by) = points[(i + 1) % n];
        let (cx, cy) = points[(i + 2) % n];
        let cross = (bx - ax) as f64 * (cy - by) as f64 - (by - ay) as f64 * (cx - bx) as f64;
        if cross == 0.0 {
            return false;
        }
        if sign == 0.0 {
            sign = cross.signum();
        } else if cross.signum() != sign {
            return false;
        }
    }
    true
}
