//! 3D value types shared between the voxel model and the wire layer.
//!
//! These are deliberately plain serde-friendly structs rather than a math
//! crate: every field crosses a process boundary (JSON envelope or binary
//! wire payload), so the layout is part of the contract.
//!
//! Equality on all of these is exact per-component `f32` equality. Replicated
//! values are only re-sent when they change, and "changed" must mean the same
//! thing on every peer, so no epsilon comparisons are used anywhere.

use serde::{Deserialize, Serialize};
use std::ops::{Add, Div, Mul, Sub};

/// 3D position/direction in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };
    pub const ONE: Vec3 = Vec3 { x: 1.0, y: 1.0, z: 1.0 };
    pub const UP: Vec3 = Vec3 { x: 0.0, y: 1.0, z: 0.0 };
    pub const FORWARD: Vec3 = Vec3 { x: 0.0, y: 0.0, z: -1.0 };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Component-wise minimum.
    pub fn min(&self, other: &Vec3) -> Vec3 {
        Vec3 {
            x: self.x.min(other.x),
            y: self.y.min(other.y),
            z: self.z.min(other.z),
        }
    }

    /// Component-wise maximum.
    pub fn max(&self, other: &Vec3) -> Vec3 {
        Vec3 {
            x: self.x.max(other.x),
            y: self.y.max(other.y),
            z: self.z.max(other.z),
        }
    }

    /// Euclidean distance to another point.
    pub fn distance(&self, other: &Vec3) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Linear interpolation toward `target` by factor `t` ∈ [0, 1].
    pub fn lerp(&self, target: &Vec3, t: f32) -> Vec3 {
        Vec3 {
            x: self.x + (target.x - self.x) * t,
            y: self.y + (target.y - self.y) * t,
            z: self.z + (target.z - self.z) * t,
        }
    }

    /// The raw bit patterns of the three components.
    ///
    /// Used as a hash-map key wherever positions must match exactly, which
    /// sidesteps `f32: !Eq` without introducing approximate matching.
    pub fn key(&self) -> [u32; 3] {
        [self.x.to_bits(), self.y.to_bits(), self.z.to_bits()]
    }
}

impl Default for Vec3 {
    fn default() -> Self {
        Self::ZERO
    }
}

impl Add for Vec3 {
    type Output = Vec3;
    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Vec3;
    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Vec3;
    fn mul(self, rhs: f32) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Div<f32> for Vec3 {
    type Output = Vec3;
    fn div(self, rhs: f32) -> Vec3 {
        Vec3::new(self.x / rhs, self.y / rhs, self.z / rhs)
    }
}

/// Rotation quaternion (x, y, z, w).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Quat {
    pub const IDENTITY: Quat = Quat { x: 0.0, y: 0.0, z: 0.0, w: 1.0 };

    pub fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// RGBA color with float components in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorRgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl ColorRgba {
    pub const WHITE: ColorRgba = ColorRgba { r: 1.0, g: 1.0, b: 1.0, a: 1.0 };
    pub const BLACK: ColorRgba = ColorRgba { r: 0.0, g: 0.0, b: 0.0, a: 1.0 };
    /// Marker color recorded on delete edits, never rendered.
    pub const MAGENTA: ColorRgba = ColorRgba { r: 1.0, g: 0.0, b: 1.0, a: 1.0 };

    pub fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }
}

impl Default for ColorRgba {
    fn default() -> Self {
        Self::WHITE
    }
}

/// Position + orientation pair, the unit of avatar tracking.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vec3,
    pub orientation: Quat,
}

impl Pose {
    pub fn new(position: Vec3, orientation: Quat) -> Self {
        Self { position, orientation }
    }
}

/// Axis-aligned bounding box as center + dimensions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub center: Vec3,
    pub dimensions: Vec3,
}

impl Bounds {
    /// Build from two opposite corners.
    pub fn from_corners(min: Vec3, max: Vec3) -> Self {
        Self {
            center: (min + max) / 2.0,
            dimensions: max - min,
        }
    }

    pub fn min(&self) -> Vec3 {
        self.center - self.dimensions / 2.0
    }

    pub fn max(&self) -> Vec3 {
        self.center + self.dimensions / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec3_min_max() {
        let a = Vec3::new(1.0, -2.0, 3.0);
        let b = Vec3::new(-1.0, 2.0, 0.5);

        assert_eq!(a.min(&b), Vec3::new(-1.0, -2.0, 0.5));
        assert_eq!(a.max(&b), Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_vec3_lerp() {
        let a = Vec3::ZERO;
        let b = Vec3::new(10.0, 20.0, 30.0);

        assert_eq!(a.lerp(&b, 0.0), a);
        assert_eq!(a.lerp(&b, 1.0), b);
        assert_eq!(a.lerp(&b, 0.5), Vec3::new(5.0, 10.0, 15.0));
    }

    #[test]
    fn test_vec3_distance() {
        let a = Vec3::new(1.0, 0.0, 0.0);
        let b = Vec3::new(4.0, 4.0, 0.0);
        assert_eq!(a.distance(&b), 5.0);
    }

    #[test]
    fn test_vec3_key_is_exact() {
        // 0.0 and -0.0 compare equal but have distinct bit patterns; positions
        // are produced by grid snapping on one peer and replayed verbatim on
        // the others, so the bit key never sees both spellings of zero.
        let a = Vec3::new(1.5, 2.5, 3.5);
        let b = Vec3::new(1.5, 2.5, 3.5);
        assert_eq!(a.key(), b.key());

        let c = Vec3::new(1.5, 2.5, 3.5000001);
        assert_ne!(a.key(), c.key());
    }

    #[test]
    fn test_quat_identity_default() {
        assert_eq!(Quat::default(), Quat::IDENTITY);
        assert_eq!(Quat::IDENTITY.w, 1.0);
    }

    #[test]
    fn test_bounds_from_corners() {
        let bounds = Bounds::from_corners(Vec3::new(-1.0, -1.0, -1.0), Vec3::new(3.0, 1.0, 1.0));
        assert_eq!(bounds.center, Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(bounds.dimensions, Vec3::new(4.0, 2.0, 2.0));
        assert_eq!(bounds.min(), Vec3::new(-1.0, -1.0, -1.0));
        assert_eq!(bounds.max(), Vec3::new(3.0, 1.0, 1.0));
    }

    #[test]
    fn test_vec3_serde_shape() {
        let json = serde_json::to_string(&Vec3::new(1.0, 2.0, 3.0)).unwrap();
        assert_eq!(json, r#"{"x":1.0,"y":2.0,"z":3.0}"#);
    }
}
