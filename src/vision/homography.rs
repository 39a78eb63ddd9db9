//! Four-point projective transforms
//!
//! Solves the exact 8-unknown system for a homography mapping four source
//! points onto four destination points (h33 fixed to 1), and keeps the
//! algebraic inverse alongside it so forward and backward warps always come
//! from the same solve.

use imageproc::geometric_transformations::Projection;
use nalgebra::{Matrix3, SMatrix, SVector, Vector3};

use crate::error::GradeError;

/// Smallest |det| accepted for a forward transform
const MIN_DETERMINANT: f64 = 1e-12;

/// A homography together with its inverse
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography {
    forward: Matrix3<f64>,
    inverse: Matrix3<f64>,
}

impl Homography {
    /// Compute the transform taking `src[i]` to `dst[i]` for all four points
    pub fn from_points(src: &[(f32, f32); 4], dst: &[(f32, f32); 4]) -> Result<Self, GradeError> {
        // no three points of either quad may be collinear
        if has_collinear_triple(src) || has_collinear_triple(dst) {
            return Err(GradeError::SingularTransform);
        }

        let mut a = SMatrix::<f64, 8, 8>::zeros();
        let mut b = SVector::<f64, 8>::zeros();

        for i in 0..4 {
            let (x, y) = (src[i].0 as f64, src[i].1 as f64);
            let (u, v) = (dst[i].0 as f64, dst[i].1 as f64);

            let r = 2 * i;
            a[(r, 0)] = x;
            a[(r, 1)] = y;
            a[(r, 2)] = 1.0;
            a[(r, 6)] = -x * u;
            a[(r, 7)] = -y * u;
            b[r] = u;

            a[(r + 1, 3)] = x;
            a[(r + 1, 4)] = y;
            a[(r + 1, 5)] = 1.0;
            a[(r + 1, 6)] = -x * v;
            a[(r + 1, 7)] = -y * v;
            b[r + 1] = v;
        }

        let h = a.lu().solve(&b).ok_or(GradeError::SingularTransform)?;
        if h.iter().any(|v| !v.is_finite()) {
            return Err(GradeError::SingularTransform);
        }

        let forward = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0);
        Self::from_matrix(forward)
    }

    /// Wrap an existing forward matrix, computing its inverse
    pub fn from_matrix(forward: Matrix3<f64>) -> Result<Self, GradeError> {
        if forward.determinant().abs() < MIN_DETERMINANT {
            return Err(GradeError::SingularTransform);
        }
        let mut inverse = forward.try_inverse().ok_or(GradeError::SingularTransform)?;
        let scale = inverse[(2, 2)];
        if scale.abs() > f64::EPSILON {
            inverse /= scale;
        }
        Ok(Self { forward, inverse })
    }

    /// Forward 3x3 matrix (source -> destination)
    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.forward
    }

    /// Inverse 3x3 matrix (destination -> source)
    pub fn inverse_matrix(&self) -> &Matrix3<f64> {
        &self.inverse
    }

    /// The same pair with directions swapped
    pub fn inverted(&self) -> Self {
        Self {
            forward: self.inverse,
            inverse: self.forward,
        }
    }

    /// Map a source point to destination coordinates
    pub fn project(&self, x: f32, y: f32) -> (f32, f32) {
        apply(&self.forward, x, y)
    }

    /// Map a destination point back to source coordinates
    pub fn unproject(&self, x: f32, y: f32) -> (f32, f32) {
        apply(&self.inverse, x, y)
    }

    /// Forward transform as an imageproc projection for warping
    pub fn to_projection(&self) -> Result<Projection, GradeError> {
        Projection::from_matrix(row_major_f32(&self.forward)).ok_or(GradeError::SingularTransform)
    }
}

fn apply(m: &Matrix3<f64>, x: f32, y: f32) -> (f32, f32) {
    let p = m * Vector3::new(x as f64, y as f64, 1.0);
    if p[2].abs() < 1e-15 {
        return (f32::NAN, f32::NAN);
    }
    ((p[0] / p[2]) as f32, (p[1] / p[2]) as f32)
}

fn has_collinear_triple(points: &[(f32, f32); 4]) -> bool {
    const TRIPLES: [(usize, usize, usize); 4] = [(0, 1, 2), (0, 1, 3), (0, 2, 3), (1, 2, 3)];
    TRIPLES.iter().any(|&(i, j, k)| {
        let (ax, ay) = (points[i].0 as f64, points[i].1 as f64);
        let (bx, by) = (points[j].0 as f64, points[j].1 as f64);
        let (cx, cy) = (points[k].0 as f64, points[k].1 as f64);
        let cross = (bx - ax) * (cy - ay) - (by - ay) * (cx - ax);
        cross.abs() < 1e-6
    })
}

fn row_major_f32(m: &Matrix3<f64>) -> [f32; 9] {
    [
        m[(0, 0)] as f32,
        m[(0, 1)] as f32,
        m[(0, 2)] as f32,
        m[(1, 0)] as f32,
        m[(1, 1)] as f32,
        m[(1, 2)] as f32,
        m[(2, 0)] as f32,
        m[(2, 1)] as f32,
        m[(2, 2)] as f32,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    const CANONICAL: [(f32, f32); 4] = [(0.0, 0.0), (600.0, 0.0), (0.0, 400.0), (600.0, 400.0)];

    fn assert_close(a: (f32, f32), b: (f32, f32), tol: f32) {
        assert!(
            (a.0 - b.0).abs() < tol && (a.1 - b.1).abs() < tol,
            "{:?} != {:?}",
            a,
            b
        );
    }

    #[test]
    fn test_maps_corners_to_canonical() {
        let src = [(112.0, 85.0), (498.0, 102.0), (90.0, 377.0), (530.0, 360.0)];
        let h = Homography::from_points(&src, &CANONICAL).unwrap();

        for (s, d) in src.iter().zip(CANONICAL.iter()) {
            assert_close(h.project(s.0, s.1), *d, 1e-2);
        }
    }

    #[test]
    fn test_inverse_round_trip_recovers_corners() {
        let src = [(112.0, 85.0), (498.0, 102.0), (90.0, 377.0), (530.0, 360.0)];
        let h = Homography::from_points(&src, &CANONICAL).unwrap();

        for (s, d) in src.iter().zip(CANONICAL.iter()) {
            assert_close(h.unproject(d.0, d.1), *s, 1e-2);
        }

        // an interior point also survives the round trip
        let p = h.project(300.0, 200.0);
        assert_close(h.unproject(p.0, p.1), (300.0, 200.0), 1e-2);
    }

    #[test]
    fn test_identity_for_matching_points() {
        let h = Homography::from_points(&CANONICAL, &CANONICAL).unwrap();
        let m = h.matrix();
        assert!((m - Matrix3::<f64>::identity()).abs().max() < 1e-9);
    }

    #[test]
    fn test_inverted_swaps_directions() {
        let src = [(10.0, 20.0), (210.0, 25.0), (5.0, 180.0), (220.0, 170.0)];
        let h = Homography::from_points(&src, &CANONICAL).unwrap();
        let back = h.inverted();
        assert_close(back.project(600.0, 400.0), (220.0, 170.0), 1e-2);
    }

    #[test]
    fn test_collinear_points_are_singular() {
        let src = [(0.0, 0.0), (10.0, 10.0), (20.0, 20.0), (30.0, 30.0)];
        let result = Homography::from_points(&src, &CANONICAL);
        assert_eq!(result, Err(GradeError::SingularTransform));
    }
}
