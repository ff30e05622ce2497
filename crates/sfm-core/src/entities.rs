//! Scene entities seen by projection models.
//!
//! Cameras and images are flat [`ParameterBlock`]s keyed by their own field
//! enums; points and observations are fixed-size arrays.

use crate::block::ParameterBlock;
use crate::layout::{BlockField, LayoutError};
use crate::math::{angle_axis_to_quaternion, angle_axis_to_rotation_matrix, Vec3};
use serde::{Deserialize, Serialize};

/// Intrinsic fields of a camera. All fields are scalars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CameraField {
    ImageWidth,
    ImageHeight,
    FocalLength,
    Cx,
    Cy,
    K1,
    K2,
    K3,
    K4,
}

impl BlockField for CameraField {
    fn width(self) -> usize {
        1
    }

    fn name(self) -> &'static str {
        match self {
            CameraField::ImageWidth => "image_width",
            CameraField::ImageHeight => "image_height",
            CameraField::FocalLength => "f",
            CameraField::Cx => "cx",
            CameraField::Cy => "cy",
            CameraField::K1 => "k1",
            CameraField::K2 => "k2",
            CameraField::K3 => "k3",
            CameraField::K4 => "k4",
        }
    }
}

/// Pose fields of an image.
///
/// The rotation is stored three times (angle-axis, quaternion, matrix). The
/// encodings are kept consistent by whoever updates the pose, see
/// [`sync_pose_from_angle_axis`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ImageField {
    /// Angle-axis rotation world -> camera, 3 values.
    AngleAxis,
    /// Camera center in world coordinates, 3 values.
    Center,
    /// Unit quaternion `[w, x, y, z]`, 4 values.
    Quaternion,
    /// Translation `t = -R C`, 3 values.
    Translation,
    /// Row-major rotation matrix, 9 values.
    Rotation,
}

impl BlockField for ImageField {
    fn width(self) -> usize {
        match self {
            ImageField::AngleAxis | ImageField::Center | ImageField::Translation => 3,
            ImageField::Quaternion => 4,
            ImageField::Rotation => 9,
        }
    }

    fn name(self) -> &'static str {
        match self {
            ImageField::AngleAxis => "aa",
            ImageField::Center => "C",
            ImageField::Quaternion => "q",
            ImageField::Translation => "t",
            ImageField::Rotation => "R",
        }
    }
}

/// Intrinsics shared by every image taken with one physical camera.
pub type Camera = ParameterBlock<CameraField>;

/// Extrinsic pose of one shot.
pub type Image = ParameterBlock<ImageField>;

/// 3D point in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3D {
    pub xyz: [f64; 3],
}

impl Point3D {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { xyz: [x, y, z] }
    }
}

/// Measured pixel coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Observation {
    pub uv: [f64; 2],
}

impl Observation {
    pub fn new(u: f64, v: f64) -> Self {
        Self { uv: [u, v] }
    }
}

/// Rewrites quaternion, rotation matrix and translation from angle-axis and center.
///
/// Requires offsets for all five pose fields.
pub fn sync_pose_from_angle_axis(image: &mut Image) -> Result<(), LayoutError> {
    let aa = {
        let v = image.value(ImageField::AngleAxis)?;
        Vec3::new(v[0], v[1], v[2])
    };
    let center = {
        let v = image.value(ImageField::Center)?;
        Vec3::new(v[0], v[1], v[2])
    };

    let r = angle_axis_to_rotation_matrix(&aa);
    let t = -(r * center);

    image
        .value_mut(ImageField::Quaternion)?
        .copy_from_slice(&angle_axis_to_quaternion(&aa));
    image
        .value_mut(ImageField::Translation)?
        .copy_from_slice(t.as_slice());
    let rot = image.value_mut(ImageField::Rotation)?;
    for row in 0..3 {
        for col in 0..3 {
            rot[3 * row + col] = r[(row, col)];
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pose_block(aa: [f64; 3], c: [f64; 3]) -> Image {
        let mut values = vec![0.0; 22];
        values[..3].copy_from_slice(&aa);
        values[3..6].copy_from_slice(&c);
        let mut image = Image::from_values(values);
        for (field, offset) in [
            (ImageField::AngleAxis, 0),
            (ImageField::Center, 3),
            (ImageField::Quaternion, 6),
            (ImageField::Translation, 10),
            (ImageField::Rotation, 13),
        ] {
            image.set_offset(field, offset);
        }
        image
    }

    #[test]
    fn sync_pose_fills_redundant_encodings() {
        let mut image = pose_block([0.0, 0.0, std::f64::consts::FRAC_PI_2], [1.0, 0.0, 0.0]);
        sync_pose_from_angle_axis(&mut image).unwrap();

        let q = image.value(ImageField::Quaternion).unwrap();
        let half = std::f64::consts::FRAC_PI_4;
        assert!((q[0] - half.cos()).abs() < 1e-12);
        assert!((q[3] - half.sin()).abs() < 1e-12);

        // R maps x to y, so t = -R C = (0, -1, 0).
        let t = image.value(ImageField::Translation).unwrap();
        assert!(t[0].abs() < 1e-12);
        assert!((t[1] + 1.0).abs() < 1e-12);
        assert!(t[2].abs() < 1e-12);

        let r = image.value(ImageField::Rotation).unwrap();
        assert!((r[1] + 1.0).abs() < 1e-12);
        assert!((r[3] - 1.0).abs() < 1e-12);
        assert!((r[8] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn sync_pose_needs_all_offsets() {
        let mut image = Image::from_values(vec![0.0; 22]);
        image.set_offset(ImageField::AngleAxis, 0);
        assert_eq!(
            sync_pose_from_angle_axis(&mut image),
            Err(LayoutError::MissingField("C"))
        );
    }

    #[test]
    fn entities_roundtrip_through_json() {
        let mut camera = Camera::from_values(vec![640.0, 480.0, 1000.0]);
        camera.set_offset(CameraField::FocalLength, 2);
        let json = serde_json::to_string(&camera).unwrap();
        let back: Camera = serde_json::from_str(&json).unwrap();
        assert_eq!(back, camera);
        assert_eq!(back.value(CameraField::FocalLength).unwrap(), &[1000.0]);

        let obs = Observation::new(320.0, 240.0);
        let back: Observation = serde_json::from_str(&serde_json::to_string(&obs).unwrap()).unwrap();
        assert_eq!(back, obs);
    }
}
