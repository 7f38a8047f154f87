//! Coordinate transform: screen = s * world + (tx, ty).

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(self, other: Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// A host coordinate transform: uniform scale `s` plus translation
/// `(tx, ty)`. The identity transform (`tx=0, ty=0, s=1`) is what the
/// controller uses when no adapter is registered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub tx: f64,
    pub ty: f64,
    pub s: f64,
}

impl Transform {
    pub const IDENTITY: Transform = Transform { tx: 0.0, ty: 0.0, s: 1.0 };

    pub fn to_screen(self, world: Point) -> Point {
        Point::new(self.s * world.x + self.tx, self.s * world.y + self.ty)
    }

    pub fn to_world(self, screen: Point) -> Point {
        if self.s == 0.0 {
            return Point::new(screen.x - self.tx, screen.y - self.ty);
        }
        Point::new((screen.x - self.tx) / self.s, (screen.y - self.ty) / self.s)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Transform::IDENTITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_transform_is_pass_through() {
        let p = Point::new(3.0, 4.0);
        assert_eq!(Transform::IDENTITY.to_screen(p), p);
        assert_eq!(Transform::IDENTITY.to_world(p), p);
    }

    #[test]
    fn to_world_inverts_to_screen() {
        let t = Transform { tx: 10.0, ty: -5.0, s: 2.0 };
        let world = Point::new(3.0, 4.0);
        let screen = t.to_screen(world);
        let recovered = t.to_world(screen);
        assert!(recovered.distance_to(world) < 1e-9);
    }
}
