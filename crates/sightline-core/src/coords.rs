//! Raw capture coordinates to logical input coordinates.

use crate::geometry::{Point, Size};
use crate::scale::ScaleFactor;

/// Convert a raw pixel-space location into logical space.
///
/// The result is `raw / scale`, clamped per axis to `[0, bound - 1]` so the
/// input backend never receives a point outside the screen.
pub fn map(raw: Point, scale: ScaleFactor, bounds: Size) -> Point {
    let s = scale.get();
    clamp(Point::new(raw.x / s, raw.y / s), bounds)
}

/// Clamp a logical point to the screen.
pub fn clamp(point: Point, bounds: Size) -> Point {
    Point::new(
        clamp_axis(point.x, bounds.width),
        clamp_axis(point.y, bounds.height),
    )
}

fn clamp_axis(value: f64, bound: u32) -> f64 {
    let max = f64::from(bound.saturating_sub(1));
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;
    const SCREEN: Size = Size {
        width: 1440,
        height: 900,
    };

    fn scale(v: f64) -> ScaleFactor {
        ScaleFactor::new(v).unwrap()
    }

    #[test]
    fn test_map_retina_center() {
        let p = map(Point::new(200.0, 100.0), scale(2.0), SCREEN);
        assert_eq!(p, Point::new(100.0, 50.0));
    }

    #[test]
    fn test_map_is_division_inside_bounds() {
        for s in [1.0, 1.25, 1.5, 2.0, 3.0] {
            for (x, y) in [(0.0, 0.0), (17.0, 33.0), (1000.0, 700.0), (1439.0, 899.0)] {
                let p = map(Point::new(x, y), scale(s), SCREEN);
                assert!((p.x - x / s).abs() < EPS, "x at scale {s}");
                assert!((p.y - y / s).abs() < EPS, "y at scale {s}");
            }
        }
    }

    #[test]
    fn test_map_clamps_to_screen() {
        let p = map(Point::new(5000.0, 5000.0), scale(2.0), SCREEN);
        assert_eq!(p, Point::new(1439.0, 899.0));

        let p = map(Point::new(-10.0, 20.0), scale(1.0), SCREEN);
        assert_eq!(p, Point::new(0.0, 20.0));
    }

    #[test]
    fn test_clamp_degenerate_bounds() {
        let p = clamp(Point::new(10.0, f64::NAN), Size::new(0, 0));
        assert_eq!(p, Point::new(0.0, 0.0));
    }
}
