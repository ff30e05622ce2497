//! Projection model contract shared by every camera model variant.
//!
//! A variant fixes three things at compile time:
//!
//! - the layout of the camera and image parameter blocks ([`BlockLayout`]),
//! - the repair steps that bring an arbitrary block into that layout,
//! - a residual generic over [`RealField`], so the same code runs with `f64`
//!   for diagnostics and with dual numbers for Jacobians.

use crate::error::DomainError;
use nalgebra::{DVectorView, RealField, SVector};
use sfm_core::{BlockField, BlockLayout, Camera, CameraField, Image, ImageField, LayoutError};
use std::fmt::Debug;

/// Residual dimension of every reprojection model.
pub const RESIDUAL_DIM: usize = 2;
/// Size of the 3D point parameter block.
pub const POINT_DIM: usize = 3;

pub trait ProjectionModel: Debug + Clone + Copy + Send + Sync + 'static {
    /// Short identifier used in logs.
    const NAME: &'static str;
    /// Length of the camera parameter block.
    const N_CAM_PARAMS: usize;
    /// Length of the image parameter block.
    const N_IMG_PARAMS: usize;
    /// Camera fields that are stored in the block but never optimized.
    const FIXED_CAMERA_FIELDS: &'static [CameraField];
    /// Image fields read by [`ProjectionModel::residual`].
    const POSE_FIELDS: &'static [ImageField];

    fn camera_layout() -> &'static BlockLayout<CameraField>;
    fn image_layout() -> &'static BlockLayout<ImageField>;

    /// Validates both layouts against the declared counts.
    ///
    /// Implementations cache the result so the check runs once per variant.
    fn layouts_checked() -> Result<(), LayoutError>;

    /// Brings `camera` into canonical order and resets its offsets.
    fn reorder_camera(camera: &mut Camera) -> Result<(), LayoutError>;
    /// Rebuilds `image` in canonical order and resets its offsets.
    fn reorder_image(image: &mut Image) -> Result<(), LayoutError>;

    /// `predicted(point, cam, img) - obs` using the canonical offsets.
    fn residual<T: RealField>(
        point: DVectorView<'_, T>,
        cam: DVectorView<'_, T>,
        img: DVectorView<'_, T>,
        obs: [f64; 2],
    ) -> Result<SVector<T, RESIDUAL_DIM>, DomainError>;

    /// Assigns the canonical camera offsets without moving values.
    fn init_camera_offsets(camera: &mut Camera) -> Result<(), LayoutError> {
        Self::layouts_checked()?;
        camera.apply_layout(Self::camera_layout())
    }

    /// Assigns the canonical image offsets without moving values.
    fn init_image_offsets(image: &mut Image) -> Result<(), LayoutError> {
        Self::layouts_checked()?;
        image.apply_layout(Self::image_layout())
    }
}

/// Shared validation used by [`ProjectionModel::layouts_checked`] implementations.
pub fn check_layouts<M: ProjectionModel>() -> Result<(), LayoutError> {
    let cam = M::camera_layout();
    let img = M::image_layout();
    cam.validate()?;
    img.validate()?;
    if cam.len() != M::N_CAM_PARAMS {
        return Err(LayoutError::WrongLength {
            expected: M::N_CAM_PARAMS,
            got: cam.len(),
        });
    }
    if img.len() != M::N_IMG_PARAMS {
        return Err(LayoutError::WrongLength {
            expected: M::N_IMG_PARAMS,
            got: img.len(),
        });
    }
    for field in M::FIXED_CAMERA_FIELDS {
        cam.spec(*field)
            .ok_or(LayoutError::MissingField(field.name()))?;
    }
    for field in M::POSE_FIELDS {
        img.spec(*field)
            .ok_or(LayoutError::MissingField(field.name()))?;
    }
    Ok(())
}
