//! Sheet region localization
//!
//! Finds the printed answer block and grade block in a raw photo by tracing
//! the outer contours of an edge map and keeping the ones that simplify to a
//! convex quadrilateral.

use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometry::{approximate_polygon_dp, arc_length};
use imageproc::point::Point;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

use super::geometry::{is_convex, polygon_area, Region};

/// Configuration for region localization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    /// Width frames are resized to before edge detection
    pub working_width: u32,
    /// Height frames are resized to before edge detection
    pub working_height: u32,
    /// Gaussian blur sigma applied before edge detection
    pub blur_sigma: f32,
    /// Canny lower hysteresis threshold
    pub canny_low: f32,
    /// Canny upper hysteresis threshold
    pub canny_high: f32,
    /// Minimum contour area in working pixels
    pub min_area: f64,
    /// Polygon approximation tolerance as a fraction of contour perimeter
    pub approx_epsilon: f64,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            working_width: 600,
            working_height: 400,
            blur_sigma: 1.0,
            canny_low: 10.0,
            canny_high: 70.0,
            min_area: 50.0,
            approx_epsilon: 0.02,
        }
    }
}

/// A located quadrilateral with its enclosed area in source pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub region: Region,
    pub area: f64,
}

/// Locates rectangular printed regions in a frame
#[derive(Debug, Clone, Default)]
pub struct RegionLocator {
    config: LocatorConfig,
}

impl RegionLocator {
    pub fn new(config: LocatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LocatorConfig {
        &self.config
    }

    /// Find quadrilateral candidates ordered by descending area.
    ///
    /// Corners are returned in source-frame coordinates and already reordered.
    pub fn locate(&self, frame: &RgbImage) -> Vec<Candidate> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return vec![];
        }

        let start = Instant::now();
        let work_w = self.config.working_width.max(1);
        let work_h = self.config.working_height.max(1);

        let gray = imageops::grayscale(frame);
        let gray = if (width, height) == (work_w, work_h) {
            gray
        } else {
            imageops::resize(&gray, work_w, work_h, FilterType::Triangle)
        };

        let mut candidates = self.locate_in_gray(&gray);

        // Back to source coordinates
        let sx = width as f32 / work_w as f32;
        let sy = height as f32 / work_h as f32;
        for c in &mut candidates {
            c.region = c.region.scaled(sx, sy);
            c.area = c.region.area();
        }

        debug!(
            "Region localization complete in {:?}: {} candidates",
            start.elapsed(),
            candidates.len()
        );

        candidates
    }

    /// Run edge detection and contour filtering on an already-resized grayscale image
    fn locate_in_gray(&self, gray: &GrayImage) -> Vec<Candidate> {
        let blurred = if self.config.blur_sigma > 0.0 {
            gaussian_blur_f32(gray, self.config.blur_sigma)
        } else {
            gray.clone()
        };
        let edges = canny(&blurred, self.config.canny_low, self.config.canny_high);

        let contours: Vec<Contour<i32>> = find_contours(&edges);

        let mut candidates: Vec<Candidate> = contours
            .iter()
            .filter(|c| c.parent.is_none() && c.border_type == BorderType::Outer)
            .filter_map(|c| self.quad_from_contour(&c.points))
            .collect();

        candidates.sort_by(|a, b| b.area.total_cmp(&a.area));
        candidates
    }

    /// Simplify one outer contour, keeping it only if it is a large convex quad
    fn quad_from_contour(&self, points: &[Point<i32>]) -> Option<Candidate> {
        let outline: Vec<(f32, f32)> = points.iter().map(|p| (p.x as f32, p.y as f32)).collect();
        if polygon_area(&outline) <= self.config.min_area {
            return None;
        }

        let perimeter = arc_length(points, true);
        let epsilon = self.config.approx_epsilon * perimeter;
        if epsilon <= 0.0 {
            return None;
        }

        let approx = approximate_closed_polygon(points, epsilon);
        if approx.len() != 4 {
            return None;
        }

        let quad: Vec<(f32, f32)> = approx.iter().map(|p| (p.x as f32, p.y as f32)).collect();
        if !is_convex(&quad) {
            return None;
        }

        let region = Region::new([quad[0], quad[1], quad[2], quad[3]]).reordered();
        let area = region.area();
        if area <= self.config.min_area {
            return None;
        }

        Some(Candidate { region, area })
    }
}

/// Douglas-Peucker over a closed contour.
///
/// `find_contours` starts each contour at its first pixel in raster order,
/// which usually lies partway along the top edge. The contour is split
/// instead at two mutually distant points, both hull vertices, and each half
/// is simplified as an open curve, so the start pixel never survives unless
/// it is a real corner.
fn approximate_closed_polygon(points: &[Point<i32>], epsilon: f64) -> Vec<Point<i32>> {
    if points.len() < 3 {
        return points.to_vec();
    }

    let farthest_from = |from: Point<i32>| {
        points
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let dx = (p.x - from.x) as i64;
                let dy = (p.y - from.y) as i64;
                (i, dx * dx + dy * dy)
            })
            .max_by_key(|&(_, d)| d)
            .unwrap_or((0, 0))
    };

    let (a, _) = farthest_from(points[0]);
    let (b, span) = farthest_from(points[a]);
    if span == 0 {
        return vec![points[0]];
    }

    let (lo, hi) = (a.min(b), a.max(b));
    let forward = &points[lo..=hi];
    let backward: Vec<Point<i32>> = points[hi..].iter().chain(&points[..=lo]).copied().collect();

    let mut result = approximate_polygon_dp(forward, epsilon, false);
    let tail = approximate_polygon_dp(&backward, epsilon, false);

    // `hi` ends the first half and starts the second; `lo` closes the loop
    result.pop();
    result.extend(tail);
    result.pop();
    result.dedup();
    result
}
