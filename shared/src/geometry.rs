use serde::{Deserialize, Serialize};

///Represents a vector in 2D world space.
/// Screen convention: x grows to the right, y grows downward.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct Vector2 {
    pub x: f32,
    pub y: f32,
}

impl Vector2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    ///Returns the magnitude of the vector.
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    ///Returns the normalized vector, or zero for a zero-length input.
    pub fn normalize(&self) -> Vector2 {
        let mag = self.magnitude();
        if mag == 0.0 {
            Vector2::default()
        } else {
            Vector2 {
                x: self.x / mag,
                y: self.y / mag,
            }
        }
    }

    ///Returns the scaled vector.
    pub fn scale(&self, scalar: f32) -> Vector2 {
        Vector2 {
            x: self.x * scalar,
            y: self.y * scalar,
        }
    }

    ///Returns the sum of two vectors.
    pub fn add(&self, other: &Vector2) -> Vector2 {
        Vector2 {
            x: self.x + other.x,
            y: self.y + other.y,
        }
    }

    ///Returns `self - other`.
    pub fn sub(&self, other: &Vector2) -> Vector2 {
        Vector2 {
            x: self.x - other.x,
            y: self.y - other.y,
        }
    }

    pub fn distance(&self, other: &Vector2) -> f32 {
        self.sub(other).magnitude()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Playable area of a map. Positions are clamped into `[0, width] x [0, height]`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Bounds {
    pub width: f32,
    pub height: f32,
}

impl Bounds {
    pub fn clamp(&self, point: Vector2) -> Vector2 {
        Vector2 {
            x: point.x.clamp(0.0, self.width),
            y: point.y.clamp(0.0, self.height),
        }
    }

    pub fn contains(&self, point: Vector2) -> bool {
        point.x >= 0.0 && point.x <= self.width && point.y >= 0.0 && point.y <= self.height
    }
}

/// Even-odd ray cast. Polygons with fewer than three vertices contain nothing.
pub fn point_in_polygon(point: Vector2, polygon: &[Vector2]) -> bool {
    if polygon.len() < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (a, b) = (polygon[i], polygon[j]);
        if (a.y > point.y) != (b.y > point.y)
            && point.x < (b.x - a.x) * (point.y - a.y) / (b.y - a.y) + a.x
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn square() -> Vec<Vector2> {
        vec![
            Vector2::new(0.0, 0.0),
            Vector2::new(100.0, 0.0),
            Vector2::new(100.0, 100.0),
            Vector2::new(0.0, 100.0),
        ]
    }

    #[test]
    fn test_vector_normalize() {
        let v = Vector2::new(3.0, 4.0).normalize();
        assert_approx_eq!(v.x, 0.6, 1e-6);
        assert_approx_eq!(v.y, 0.8, 1e-6);
        assert_eq!(Vector2::default().normalize(), Vector2::default());
    }

    #[test]
    fn test_distance() {
        let a = Vector2::new(100.0, 100.0);
        let b = Vector2::new(100.0, 130.0);
        assert_approx_eq!(a.distance(&b), 30.0, 1e-6);
    }

    #[test]
    fn test_bounds_clamp() {
        let bounds = Bounds {
            width: 800.0,
            height: 600.0,
        };
        assert_eq!(
            bounds.clamp(Vector2::new(-5.0, 700.0)),
            Vector2::new(0.0, 600.0)
        );
        assert!(bounds.contains(Vector2::new(800.0, 600.0)));
        assert!(!bounds.contains(Vector2::new(800.5, 10.0)));
    }

    #[test]
    fn test_point_in_polygon() {
        let poly = square();
        assert!(point_in_polygon(Vector2::new(50.0, 50.0), &poly));
        assert!(!point_in_polygon(Vector2::new(150.0, 50.0), &poly));
        assert!(!point_in_polygon(Vector2::new(50.0, -1.0), &poly));
    }

    #[test]
    fn test_degenerate_polygon() {
        let line = vec![Vector2::new(0.0, 0.0), Vector2::new(10.0, 10.0)];
        assert!(!point_in_polygon(Vector2::new(5.0, 5.0), &line));
    }
}
