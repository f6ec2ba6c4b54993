//! Geometric primitives.

use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Sub};

/// A 2D point.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const ZERO: Point = Point { x: 0.0, y: 0.0 };

    #[inline]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    #[inline]
    pub fn distance(&self, other: Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    #[inline]
    pub fn lerp(&self, other: Point, t: f32) -> Point {
        Point::new(
            self.x + (other.x - self.x) * t,
            self.y + (other.y - self.y) * t,
        )
    }
}

impl Add for Point {
    type Output = Point;
    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Point;
    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Point {
    type Output = Point;
    fn mul(self, rhs: f32) -> Point {
        Point::new(self.x * rhs, self.y * rhs)
    }
}

/// A 2D size.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub const ZERO: Size = Size { width: 0.0, height: 0.0 };

    #[inline]
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    #[inline]
    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// A 2D rectangle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const ZERO: Rect = Rect { x: 0.0, y: 0.0, width: 0.0, height: 0.0 };

    #[inline]
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    #[inline]
    pub fn from_origin_size(origin: Point, size: Size) -> Self {
        Self {
            x: origin.x,
            y: origin.y,
            width: size.width,
            height: size.height,
        }
    }

    #[inline]
    pub fn origin(&self) -> Point {
        Point::new(self.x, self.y)
    }

    #[inline]
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    #[inline]
    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    #[inline]
    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    #[inline]
    pub fn contains_point(&self, point: Point) -> bool {
        point.x >= self.x
            && point.x < self.x + self.width
            && point.y >= self.y
            && point.y < self.y + self.height
    }

    pub fn union(&self, other: &Rect) -> Rect {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        Rect::new(x, y, right - x, bottom - y)
    }

    #[inline]
    pub fn translate(&self, dx: f32, dy: f32) -> Rect {
        Rect::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// A 2D affine transformation matrix.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub m11: f32,
    pub m12: f32,
    pub m21: f32,
    pub m22: f32,
    pub m31: f32,
    pub m32: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform {
    pub const fn identity() -> Self {
        Self {
            m11: 1.0,
            m12: 0.0,
            m21: 0.0,
            m22: 1.0,
            m31: 0.0,
            m32: 0.0,
        }
    }

    pub fn translation(x: f32, y: f32) -> Self {
        Self {
            m11: 1.0,
            m12: 0.0,
            m21: 0.0,
            m22: 1.0,
            m31: x,
            m32: y,
        }
    }

    pub fn scale(sx: f32, sy: f32) -> Self {
        Self {
            m11: sx,
            m12: 0.0,
            m21: 0.0,
            m22: sy,
            m31: 0.0,
            m32: 0.0,
        }
    }

    /// Rotation by `angle` radians.
    pub fn rotation(angle: f32) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self {
            m11: cos,
            m12: sin,
            m21: -sin,
            m22: cos,
            m31: 0.0,
            m32: 0.0,
        }
    }

    pub fn then(&self, other: &Transform) -> Transform {
        Transform {
            m11: self.m11 * other.m11 + self.m12 * other.m21,
            m12: self.m11 * other.m12 + self.m12 * other.m22,
            m21: self.m21 * other.m11 + self.m22 * other.m21,
            m22: self.m21 * other.m12 + self.m22 * other.m22,
            m31: self.m31 * other.m11 + self.m32 * other.m21 + other.m31,
            m32: self.m31 * other.m12 + self.m32 * other.m22 + other.m32,
        }
    }

    pub fn transform_point(&self, point: Point) -> Point {
        Point::new(
            self.m11 * point.x + self.m21 * point.y + self.m31,
            self.m12 * point.x + self.m22 * point.y + self.m32,
        )
    }

    pub fn transform_rect(&self, rect: Rect) -> Rect {
        let p1 = self.transform_point(Point::new(rect.x, rect.y));
        let p2 = self.transform_point(Point::new(rect.right(), rect.y));
        let p3 = self.transform_point(Point::new(rect.x, rect.bottom()));
        let p4 = self.transform_point(Point::new(rect.right(), rect.bottom()));

        let min_x = p1.x.min(p2.x).min(p3.x).min(p4.x);
        let min_y = p1.y.min(p2.y).min(p3.y).min(p4.y);
        let max_x = p1.x.max(p2.x).max(p3.x).max(p4.x);
        let max_y = p1.y.max(p2.y).max(p3.y).max(p4.y);

        Rect::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }

    pub fn determinant(&self) -> f32 {
        self.m11 * self.m22 - self.m12 * self.m21
    }

    pub fn inverse(&self) -> Option<Transform> {
        let det = self.determinant();
        if det.abs() < f32::EPSILON {
            return None;
        }
        let inv_det = 1.0 / det;
        Some(Transform {
            m11: self.m22 * inv_det,
            m12: -self.m12 * inv_det,
            m21: -self.m21 * inv_det,
            m22: self.m11 * inv_det,
            m31: (self.m21 * self.m32 - self.m22 * self.m31) * inv_det,
            m32: (self.m12 * self.m31 - self.m11 * self.m32) * inv_det,
        })
    }

    pub fn is_identity(&self) -> bool {
        (self.m11 - 1.0).abs() < f32::EPSILON
            && self.m12.abs() < f32::EPSILON
            && self.m21.abs() < f32::EPSILON
            && (self.m22 - 1.0).abs() < f32::EPSILON
            && self.m31.abs() < f32::EPSILON
            && self.m32.abs() < f32::EPSILON
    }

    /// Splits the matrix into translation, rotation, skew and scale.
    ///
    /// The factors are chosen so that [`DecomposedTransform::compose`]
    /// rebuilds the original matrix. A mirrored matrix reads back as a
    /// rotation of ±180° with a negative Y scale, which composes to the
    /// same transform.
    pub fn decompose(&self) -> DecomposedTransform {
        let rotation = self.m12.atan2(self.m11);
        let (sin, cos) = rotation.sin_cos();
        let scale_x = (self.m11 * self.m11 + self.m12 * self.m12).sqrt();
        let scale_y = cos * self.m22 - sin * self.m21;
        let shear = cos * self.m21 + sin * self.m22;
        // A collapsed axis carries no skew information; treat it as unit
        // length so the extraction stays finite.
        let safe_y = if scale_y == 0.0 { 1.0 } else { scale_y };
        let skew_x = (shear / safe_y).atan();
        DecomposedTransform {
            position: Point::new(self.m31, self.m32),
            scale: Point::new(scale_x, scale_y),
            rotation: rotation.to_degrees(),
            skew_x: skew_x.to_degrees(),
        }
    }
}

/// The rotate → skew → scale factorization of an affine matrix, with the
/// translation split out.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecomposedTransform {
    pub position: Point,
    pub scale: Point,
    /// Degrees, counter-clockwise.
    pub rotation: f32,
    /// X shear angle in degrees. No Y shear axis is modeled.
    pub skew_x: f32,
}

impl Default for DecomposedTransform {
    fn default() -> Self {
        Self {
            position: Point::ZERO,
            scale: Point::new(1.0, 1.0),
            rotation: 0.0,
            skew_x: 0.0,
        }
    }
}

impl DecomposedTransform {
    /// Rebuilds the matrix as rotate, then skew, then scale, then translate.
    pub fn compose(&self) -> Transform {
        let (sin, cos) = self.rotation.to_radians().sin_cos();
        let tan = self.skew_x.to_radians().tan();
        Transform {
            m11: cos * self.scale.x,
            m12: sin * self.scale.x,
            m21: (cos * tan - sin) * self.scale.y,
            m22: (sin * tan + cos) * self.scale.y,
            m31: self.position.x,
            m32: self.position.y,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f32, b: f32) {
        assert!((a - b).abs() < 1e-4, "{} != {}", a, b);
    }

    fn assert_transforms_close(a: &Transform, b: &Transform) {
        assert_close(a.m11, b.m11);
        assert_close(a.m12, b.m12);
        assert_close(a.m21, b.m21);
        assert_close(a.m22, b.m22);
        assert_close(a.m31, b.m31);
        assert_close(a.m32, b.m32);
    }

    #[test]
    fn test_point_arithmetic() {
        let p = Point::new(1.0, 2.0) + Point::new(3.0, 4.0);
        assert_eq!(p, Point::new(4.0, 6.0));
        assert_eq!(p - Point::new(4.0, 6.0), Point::ZERO);
        assert_eq!(Point::new(1.0, -2.0) * 3.0, Point::new(3.0, -6.0));
    }

    #[test]
    fn test_rect_union() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(5.0, 5.0, 10.0, 10.0);
        assert_eq!(a.union(&b), Rect::new(0.0, 0.0, 15.0, 15.0));
    }

    #[test]
    fn test_transform_then_order() {
        // Scale applied first, then translate.
        let m = Transform::scale(2.0, 2.0).then(&Transform::translation(10.0, 0.0));
        assert_eq!(m.transform_point(Point::new(1.0, 1.0)), Point::new(12.0, 2.0));
    }

    #[test]
    fn test_transform_inverse() {
        let m = Transform::rotation(0.5)
            .then(&Transform::scale(2.0, 3.0))
            .then(&Transform::translation(7.0, -4.0));
        let inv = m.inverse().unwrap();
        assert!(m.then(&inv).is_identity());

        assert!(Transform::scale(0.0, 1.0).inverse().is_none());
    }

    #[test]
    fn test_decompose_identity() {
        let d = Transform::identity().decompose();
        assert_close(d.rotation, 0.0);
        assert_close(d.skew_x, 0.0);
        assert_close(d.scale.x, 1.0);
        assert_close(d.scale.y, 1.0);
        assert_eq!(d.position, Point::ZERO);
    }

    #[test]
    fn test_decompose_known_factors() {
        let m = DecomposedTransform {
            position: Point::new(30.0, -12.0),
            scale: Point::new(2.0, 3.0),
            rotation: 30.0,
            skew_x: 20.0,
        }
        .compose();
        let d = m.decompose();
        assert_close(d.rotation, 30.0);
        assert_close(d.skew_x, 20.0);
        assert_close(d.scale.x, 2.0);
        assert_close(d.scale.y, 3.0);
        assert_close(d.position.x, 30.0);
        assert_close(d.position.y, -12.0);
    }

    #[test]
    fn test_decompose_compose_round_trip() {
        let cases = [
            Transform::translation(5.0, 9.0),
            Transform::rotation(2.5),
            Transform::scale(0.5, -1.5),
            Transform::rotation(-2.0)
                .then(&Transform::scale(3.0, 0.25))
                .then(&Transform::translation(-40.0, 13.0)),
            Transform {
                m11: 1.0,
                m12: 0.0,
                m21: 0.7,
                m22: 1.0,
                m31: 0.0,
                m32: 0.0,
            },
        ];
        for m in &cases {
            assert_transforms_close(&m.decompose().compose(), m);
        }
    }

    #[test]
    fn test_decompose_compose_factor_grid() {
        for rotation in [-170.0f32, -90.0, -45.0, 0.0, 30.0, 90.0, 150.0] {
            for skew_x in [-60.0f32, -30.0, 0.0, 30.0, 60.0] {
                for scale in [
                    Point::new(1.0, 1.0),
                    Point::new(2.0, 0.5),
                    Point::new(0.75, -1.25),
                ] {
                    let m = DecomposedTransform {
                        position: Point::new(12.0, -7.0),
                        scale,
                        rotation,
                        skew_x,
                    }
                    .compose();
                    assert_transforms_close(&m.decompose().compose(), &m);
                }
            }
        }
    }

    #[test]
    fn test_decompose_mirrored_matrix() {
        // An X flip factors as a half turn with negative Y scale.
        let m = Transform::scale(-1.0, 1.0);
        let d = m.decompose();
        assert_close(d.rotation.abs(), 180.0);
        assert_close(d.scale.x, 1.0);
        assert_close(d.scale.y, -1.0);
        assert_transforms_close(&d.compose(), &m);
    }

    #[test]
    fn test_decompose_collapsed_axis() {
        let m = Transform::scale(0.0, 2.0);
        let d = m.decompose();
        assert_close(d.scale.x, 0.0);
        assert_close(d.scale.y, 2.0);
        assert_close(d.skew_x, 0.0);
        assert_transforms_close(&d.compose(), &m);
    }
}
