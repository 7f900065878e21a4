//! Math type re-exports and FBX-specific math utilities.
//!
//! This module re-exports types from `glam` and provides the transform
//! conventions FBX uses: Euler rotation orders, TRS composition with
//! pre/post rotation, camera aperture/fov conversions, and the KTime
//! tick unit used by animation curves.

// Re-export glam types
pub use glam::{
    // Single precision vectors
    Vec2, Vec3, Vec4,
    // Double precision vectors
    DVec2, DVec3, DVec4,
    // Integer vectors
    IVec2, IVec3, IVec4,
    // Single precision matrices
    Mat3, Mat4,
    // Double precision matrices
    DMat3, DMat4,
    // Quaternions
    Quat, DQuat,
};

/// FBX time unit: 46186158000 ticks per second.
pub const TICKS_PER_SECOND: i64 = 46_186_158_000;

/// Unit conversion applied to camera film properties (raw values are inches).
pub const INCH_TO_MILLIMETER: f64 = 25.4;
pub const MILLIMETER_TO_INCH: f64 = 1.0 / 25.4;

/// Unit conversion applied to blend-shape weights (raw values are percent).
pub const PERCENT_TO_WEIGHT: f64 = 0.01;
pub const WEIGHT_TO_PERCENT: f64 = 100.0;

/// Convert seconds to FBX ticks.
#[inline]
pub fn to_ticks(seconds: f64) -> i64 {
    (seconds * TICKS_PER_SECOND as f64).round() as i64
}

/// Convert FBX ticks to seconds.
#[inline]
pub fn to_seconds(ticks: i64) -> f64 {
    ticks as f64 / TICKS_PER_SECOND as f64
}

/// Euler angle application order for model rotations.
///
/// The spheric variant is treated as XYZ, matching common FBX exporters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationOrder {
    #[default]
    Xyz,
    Xzy,
    Yzx,
    Yxz,
    Zxy,
    Zyx,
    SphericXyz,
}

impl RotationOrder {
    /// The integer code used by the `RotationOrder` model property.
    pub fn from_code(v: i32) -> Self {
        match v {
            1 => Self::Xzy,
            2 => Self::Yzx,
            3 => Self::Yxz,
            4 => Self::Zxy,
            5 => Self::Zyx,
            6 => Self::SphericXyz,
            _ => Self::Xyz,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Xyz => 0,
            Self::Xzy => 1,
            Self::Yzx => 2,
            Self::Yxz => 3,
            Self::Zxy => 4,
            Self::Zyx => 5,
            Self::SphericXyz => 6,
        }
    }
}

/// Rotation matrix for Euler angles in degrees, applied in the given order.
pub fn euler_rotation(order: RotationOrder, degrees: DVec3) -> DMat4 {
    let r = degrees * std::f64::consts::PI / 180.0;
    let rx = DMat4::from_rotation_x(r.x);
    let ry = DMat4::from_rotation_y(r.y);
    let rz = DMat4::from_rotation_z(r.z);
    // column-vector convention: the first applied axis is rightmost
    match order {
        RotationOrder::Xyz | RotationOrder::SphericXyz => rz * ry * rx,
        RotationOrder::Xzy => ry * rz * rx,
        RotationOrder::Yzx => rx * rz * ry,
        RotationOrder::Yxz => rz * rx * ry,
        RotationOrder::Zxy => ry * rx * rz,
        RotationOrder::Zyx => rx * ry * rz,
    }
}

/// Compose a local model transform from FBX TRS components.
///
/// Applied to a point right-to-left: scale, post-rotation, rotation,
/// pre-rotation, then translation.
pub fn compose_transform(
    position: DVec3,
    pre_rotation: DVec3,
    rotation: DVec3,
    post_rotation: DVec3,
    scale: DVec3,
    order: RotationOrder,
) -> DMat4 {
    DMat4::from_translation(position)
        * euler_rotation(RotationOrder::Xyz, pre_rotation)
        * euler_rotation(order, rotation)
        * euler_rotation(RotationOrder::Xyz, post_rotation)
        * DMat4::from_scale(scale)
}

/// Field of view in degrees from aperture and focal length (both in mm).
#[inline]
pub fn compute_fov(aperture: f64, focal_length: f64) -> f64 {
    2.0 * (aperture / (2.0 * focal_length)).atan().to_degrees()
}

/// Focal length in mm from field of view in degrees and aperture in mm.
#[inline]
pub fn compute_focal_length(fov: f64, aperture: f64) -> f64 {
    aperture / (2.0 * (fov.to_radians() / 2.0).tan())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: DVec3, b: DVec3) -> bool {
        (a - b).length() < 1e-9
    }

    #[test]
    fn test_ticks_round_trip() {
        assert_eq!(to_ticks(1.0), TICKS_PER_SECOND);
        assert!((to_seconds(TICKS_PER_SECOND / 2) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_rotation_order_codes() {
        for code in 0..7 {
            assert_eq!(RotationOrder::from_code(code).code(), code);
        }
        assert_eq!(RotationOrder::from_code(99), RotationOrder::Xyz);
    }

    #[test]
    fn test_euler_rotation_xyz() {
        // 90 degrees around Z maps +X to +Y
        let m = euler_rotation(RotationOrder::Xyz, DVec3::new(0.0, 0.0, 90.0));
        let v = m.transform_point3(DVec3::X);
        assert!(approx(v, DVec3::Y));
    }

    #[test]
    fn test_compose_transform_trs() {
        let m = compose_transform(
            DVec3::new(1.0, 2.0, 3.0),
            DVec3::ZERO,
            DVec3::new(0.0, 0.0, 90.0),
            DVec3::ZERO,
            DVec3::splat(2.0),
            RotationOrder::Xyz,
        );
        // scale applies before rotation, translation last
        let v = m.transform_point3(DVec3::X);
        assert!(approx(v, DVec3::new(1.0, 4.0, 3.0)));
    }

    #[test]
    fn test_fov_focal_round_trip() {
        let fov = compute_fov(36.0, 50.0);
        let focal = compute_focal_length(fov, 36.0);
        assert!((focal - 50.0).abs() < 1e-9);
    }
}
