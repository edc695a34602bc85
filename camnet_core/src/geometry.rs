//! Planar geometry: headings, world bounds and field-of-view overlap.
//!
//! Headings are radians measured clockwise from north, so a heading of 0
//! looks along +y and a heading of π/2 looks along +x.
//!
//! Overlap treats each camera as a disc of radius `range`:
//!
//! ```text
//!            P1
//!           /|\
//!       a  / | \  b
//!         /  |y \
//!    C1 ●----+---● C2
//!          x   c-x
//!           \ | /
//!            \|/
//!            P2
//! ```
//!
//! The chord P1P2 splits the lens into one circular segment per disc.

use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

/// Unit vector a camera or target faces for `heading`.
pub fn heading_vector(heading: f64) -> Vector2<f64> {
    Vector2::new(heading.sin(), heading.cos())
}

/// Heading pointing from `from` towards `to`.
pub fn heading_towards(from: &Point2<f64>, to: &Point2<f64>) -> f64 {
    let d = to - from;
    d.x.atan2(d.y)
}

/// Unsigned angle between `heading` at `from` and the ray towards `to`.
///
/// Returns 0 when both points coincide.
pub fn angle_to(heading: f64, from: &Point2<f64>, to: &Point2<f64>) -> f64 {
    let v = to - from;
    let len = v.norm();
    if len == 0.0 {
        return 0.0;
    }
    let dot = heading_vector(heading).dot(&(v / len)).clamp(-1.0, 1.0);
    dot.acos()
}

/// Rectangular simulation area.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldBounds {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl Default for WorldBounds {
    fn default() -> Self {
        Self {
            min_x: -30.0,
            max_x: 30.0,
            min_y: -30.0,
            max_y: 30.0,
        }
    }
}

impl WorldBounds {
    /// Returns true if `p` lies inside the bounds (edges included).
    pub fn contains(&self, p: &Point2<f64>) -> bool {
        p.x >= self.min_x && p.x <= self.max_x && p.y >= self.min_y && p.y <= self.max_y
    }

    /// Width along x.
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Height along y.
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }
}

/// Area shared by two discs (camera ranges).
///
/// Coinciding centres, disjoint discs and tangent discs all yield 0. So do
/// discs where one lies wholly inside the other, because the chord term
/// goes negative.
pub fn fov_overlap(c1: &Point2<f64>, r1: f64, c2: &Point2<f64>, r2: f64) -> f64 {
    let c = (c2 - c1).norm();
    if c == 0.0 {
        return 0.0;
    }

    let x = (r1 * r1 + c * c - r2 * r2) / (2.0 * c);
    let y_sq = r1 * r1 - x * x;
    if y_sq <= 0.0 {
        return 0.0;
    }
    let y = y_sq.sqrt();

    // Half-angles subtended at each centre by one intersection point.
    let half1 = y.atan2(x);
    let half2 = y.atan2(c - x);

    segment_area(r1, 2.0 * half1) + segment_area(r2, 2.0 * half2)
}

fn segment_area(radius: f64, angle: f64) -> f64 {
    radius * radius / 2.0 * (angle - angle.sin())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;
    use std::f64::consts::{FRAC_PI_2, PI};

    #[test]
    fn test_heading_convention() {
        let north = heading_vector(0.0);
        assert_relative_eq!(north.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(north.y, 1.0, epsilon = 1e-12);

        let east = heading_vector(FRAC_PI_2);
        assert_relative_eq!(east.x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(east.y, 0.0, epsilon = 1e-12);

        let h = heading_towards(&Point2::origin(), &Point2::new(1.0, 0.0));
        assert_relative_eq!(h, FRAC_PI_2, epsilon = 1e-12);
    }

    #[test]
    fn test_angle_to() {
        let origin = Point2::origin();
        assert_relative_eq!(angle_to(0.0, &origin, &Point2::new(0.0, 5.0)), 0.0, epsilon = 1e-12);
        assert_relative_eq!(angle_to(0.0, &origin, &Point2::new(5.0, 0.0)), FRAC_PI_2, epsilon = 1e-12);
        assert_relative_eq!(angle_to(0.0, &origin, &Point2::new(0.0, -5.0)), PI, epsilon = 1e-12);
        assert_eq!(angle_to(1.0, &origin, &origin), 0.0);
    }

    #[test]
    fn test_bounds() {
        let b = WorldBounds::default();
        assert!(b.contains(&Point2::new(30.0, -30.0)));
        assert!(!b.contains(&Point2::new(30.1, 0.0)));
        assert_eq!(b.width(), 60.0);
    }

    #[test]
    fn test_overlap_degenerate_cases() {
        let a = Point2::new(1.0, 1.0);
        assert_eq!(fov_overlap(&a, 5.0, &a, 5.0), 0.0);
        assert_eq!(fov_overlap(&a, 5.0, &a, 2.0), 0.0);

        // Ranges sum to less than the separation
        assert_eq!(fov_overlap(&Point2::new(0.0, 0.0), 1.0, &Point2::new(3.0, 0.0), 1.5), 0.0);

        // Tangent
        assert_eq!(fov_overlap(&Point2::new(0.0, 0.0), 1.0, &Point2::new(2.0, 0.0), 1.0), 0.0);
    }

    #[test]
    fn test_overlap_unit_lens() {
        // Lens of two unit discs one unit apart: 2π/3 - √3/2
        let area = fov_overlap(&Point2::new(0.0, 0.0), 1.0, &Point2::new(1.0, 0.0), 1.0);
        assert_relative_eq!(area, 2.0 * PI / 3.0 - 3f64.sqrt() / 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_overlap_unequal_radii() {
        // Closed form lens area for r1=2, r2=1, d=1.5
        let (r1, r2, d): (f64, f64, f64) = (2.0, 1.0, 1.5);
        let expected = r1 * r1 * ((d * d + r1 * r1 - r2 * r2) / (2.0 * d * r1)).acos()
            + r2 * r2 * ((d * d + r2 * r2 - r1 * r1) / (2.0 * d * r2)).acos()
            - 0.5 * ((-d + r1 + r2) * (d + r1 - r2) * (d - r1 + r2) * (d + r1 + r2)).sqrt();

        let area = fov_overlap(&Point2::new(0.0, 0.0), r1, &Point2::new(d, 0.0), r2);
        assert_relative_eq!(area, expected, epsilon = 1e-9);
    }

    proptest! {
        #[test]
        fn prop_overlap_symmetric_and_bounded(
            x in -20.0f64..20.0,
            y in -20.0f64..20.0,
            r1 in 0.5f64..15.0,
            r2 in 0.5f64..15.0,
        ) {
            let a = Point2::new(0.0, 0.0);
            let b = Point2::new(x, y);
            let ab = fov_overlap(&a, r1, &b, r2);
            let ba = fov_overlap(&b, r2, &a, r1);

            prop_assert!(ab >= 0.0);
            prop_assert!((ab - ba).abs() < 1e-6);
            let smaller = r1.min(r2);
            prop_assert!(ab <= PI * smaller * smaller + 1e-6);
        }
    }
}
