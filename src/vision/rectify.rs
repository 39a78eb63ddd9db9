//! Perspective rectification of located regions

use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_into, Interpolation};

use super::geometry::Region;
use super::homography::Homography;
use crate::error::GradeError;

/// A region warped to a fixed canonical size.
///
/// Keeps the transform it was produced with so overlays drawn in canonical
/// space can be warped back through the exact inverse.
#[derive(Debug, Clone)]
pub struct RectifiedImage {
    /// Canonical-size pixels
    pub image: RgbImage,
    /// Source region (reordered corners, frame coordinates)
    pub region: Region,
    /// Frame -> canonical transform
    pub transform: Homography,
}

impl RectifiedImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Map a canonical-space point to frame coordinates
    pub fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        self.transform.unproject(x, y)
    }

    /// Warp a canonical-size canvas back into frame space.
    ///
    /// Pixels outside the region come out black so the result can be added
    /// onto the frame.
    pub fn unwarp(&self, canvas: &RgbImage, frame_width: u32, frame_height: u32) -> Result<RgbImage, GradeError> {
        let back = self.transform.inverted().to_projection()?;
        let mut out = RgbImage::new(frame_width, frame_height);
        warp_into(canvas, &back, Interpolation::Bilinear, Rgb([0, 0, 0]), &mut out);
        Ok(out)
    }
}

/// Canonical (top-left, top-right, bottom-left, bottom-right) corners for a size
pub fn canonical_corners(width: u32, height: u32) -> [(f32, f32); 4] {
    let (w, h) = (width as f32, height as f32);
    [(0.0, 0.0), (w, 0.0), (0.0, h), (w, h)]
}

/// Warp `region` of `frame` to `width` x `height`
pub fn rectify(frame: &RgbImage, region: &Region, width: u32, height: u32) -> Result<RectifiedImage, GradeError> {
    if width == 0 || height == 0 {
        return Err(GradeError::InvalidCanonicalSize { width, height });
    }

    let region = region.reordered();
    let area = region.area();
    if region.is_degenerate(0.0) {
        return Err(GradeError::DegenerateRegion { area });
    }

    let transform = Homography::from_points(&region.corners, &canonical_corners(width, height))?;
    let projection = transform.to_projection()?;

    let mut image = RgbImage::new(width, height);
    warp_into(frame, &projection, Interpolation::Bilinear, Rgb([255, 255, 255]), &mut image);

    Ok(RectifiedImage {
        image,
        region,
        transform,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;

    #[test]
    fn test_axis_aligned_region_is_cropped_and_scaled() {
        let mut frame = RgbImage::from_pixel(400, 300, Rgb([255, 255, 255]));
        // dark left half of the region 100..300 x 50..250
        draw_filled_rect_mut(&mut frame, Rect::at(100, 50).of_size(100, 200), Rgb([0, 0, 0]));

        let region = Region::new([(100.0, 50.0), (300.0, 50.0), (100.0, 250.0), (300.0, 250.0)]);
        let rectified = rectify(&frame, &region, 100, 100).unwrap();

        assert_eq!(rectified.image.dimensions(), (100, 100));
        assert!(rectified.image.get_pixel(20, 50).0[0] < 50);
        assert!(rectified.image.get_pixel(80, 50).0[0] > 200);
    }

    #[test]
    fn test_round_trip_recovers_corners() {
        let frame = RgbImage::from_pixel(640, 480, Rgb([200, 200, 200]));
        let region = Region::new([(520.0, 410.0), (90.0, 60.0), (560.0, 80.0), (70.0, 430.0)]);

        let rectified = rectify(&frame, &region, 600, 400).unwrap();
        let expected = region.reordered().corners;

        for (canonical, original) in canonical_corners(600, 400).iter().zip(expected.iter()) {
            let back = rectified.to_frame(canonical.0, canonical.1);
            assert!((back.0 - original.0).abs() < 0.05);
            assert!((back.1 - original.1).abs() < 0.05);
        }
    }

    #[test]
    fn test_unwarp_places_canvas_inside_region() {
        let frame = RgbImage::from_pixel(400, 300, Rgb([255, 255, 255]));
        let region = Region::new([(100.0, 50.0), (300.0, 50.0), (100.0, 250.0), (300.0, 250.0)]);
        let rectified = rectify(&frame, &region, 100, 100).unwrap();

        let canvas = RgbImage::from_pixel(100, 100, Rgb([0, 200, 0]));
        let back = rectified.unwarp(&canvas, 400, 300).unwrap();

        assert_eq!(back.get_pixel(200, 150), &Rgb([0, 200, 0]));
        assert_eq!(back.get_pixel(20, 20), &Rgb([0, 0, 0]));
        assert_eq!(back.get_pixel(350, 280), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_degenerate_region_is_rejected() {
        let frame = RgbImage::new(100, 100);
        let region = Region::new([(0.0, 0.0), (10.0, 10.0), (20.0, 20.0), (30.0, 30.0)]);
        assert!(matches!(
            rectify(&frame, &region, 60, 40),
            Err(GradeError::DegenerateRegion { .. })
        ));
    }

    #[test]
    fn test_zero_canonical_size_is_rejected() {
        let frame = RgbImage::new(100, 100);
        let region = Region::new([(0.0, 0.0), (50.0, 0.0), (0.0, 50.0), (50.0, 50.0)]);
        assert_eq!(
            rectify(&frame, &region, 0, 40).unwrap_err(),
            GradeError::InvalidCanonicalSize { width: 0, height: 40 }
        );
    }
}
