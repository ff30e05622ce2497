//! Pinhole projection with a 4-coefficient radial distortion polynomial.
//!
//! Camera block (9 values): `[width, height, f, cx, cy, k1, k2, k3, k4]`.
//!
//! Image block (22 values):
//! `[aa(3), C(3), q(4), t(3), R(9)]` at offsets `0, 3, 6, 10, 13`.
//!
//! Forward model, with `R(aa)` the angle-axis rotation world -> camera:
//!
//! ```text
//! Xc = R(aa) (X - C)
//! x  = Xc.x / Xc.z,  y = Xc.y / Xc.z,  r2 = x^2 + y^2
//! d  = 1 + k1 r2 + k2 r2^2 + k3 r2^3 + k4 r2^4
//! u  = f d x + cx,   v = f d y + cy
//! ```

use crate::error::DomainError;
use crate::model::{check_layouts, ProjectionModel, RESIDUAL_DIM};
use log::debug;
use nalgebra::{DVectorView, RealField, SVector, Vector3};
use sfm_core::{
    angle_axis_rotate_point, BlockField, BlockLayout, Camera, CameraField, FieldSpec, Image,
    ImageField, LayoutError,
};
use std::sync::OnceLock;

const CAM_WIDTH: usize = 0;
const CAM_HEIGHT: usize = 1;
const CAM_F: usize = 2;
const CAM_CX: usize = 3;
const CAM_CY: usize = 4;
const CAM_K1: usize = 5;
const CAM_K2: usize = 6;
const CAM_K3: usize = 7;
const CAM_K4: usize = 8;

const IMG_AA: usize = 0;
const IMG_C: usize = 3;
const IMG_Q: usize = 6;
const IMG_T: usize = 10;
const IMG_R: usize = 13;

/// Points closer to the image plane than this are rejected.
const MIN_DEPTH: f64 = 1e-12;

static CAMERA_FIELDS: [FieldSpec<CameraField>; 9] = [
    FieldSpec::new(CameraField::ImageWidth, CAM_WIDTH),
    FieldSpec::new(CameraField::ImageHeight, CAM_HEIGHT),
    FieldSpec::new(CameraField::FocalLength, CAM_F),
    FieldSpec::new(CameraField::Cx, CAM_CX),
    FieldSpec::new(CameraField::Cy, CAM_CY),
    FieldSpec::new(CameraField::K1, CAM_K1),
    FieldSpec::new(CameraField::K2, CAM_K2),
    FieldSpec::new(CameraField::K3, CAM_K3),
    FieldSpec::new(CameraField::K4, CAM_K4),
];

static IMAGE_FIELDS: [FieldSpec<ImageField>; 5] = [
    FieldSpec::new(ImageField::AngleAxis, IMG_AA),
    FieldSpec::new(ImageField::Center, IMG_C),
    FieldSpec::new(ImageField::Quaternion, IMG_Q),
    FieldSpec::new(ImageField::Translation, IMG_T),
    FieldSpec::new(ImageField::Rotation, IMG_R),
];

static CAMERA_LAYOUT: BlockLayout<CameraField> =
    BlockLayout::new(&CAMERA_FIELDS, Radial4::N_CAM_PARAMS);
static IMAGE_LAYOUT: BlockLayout<ImageField> =
    BlockLayout::new(&IMAGE_FIELDS, Radial4::N_IMG_PARAMS);

/// Image size pair, exchanged into `CAM_WIDTH + i` when registered.
const SIZE_FIELDS: [CameraField; 2] = [CameraField::ImageWidth, CameraField::ImageHeight];

/// Optimizable intrinsics, exchanged in this order into `CAM_F + i`.
const CAMERA_EXCHANGES: [CameraField; 7] = [
    CameraField::FocalLength,
    CameraField::Cx,
    CameraField::Cy,
    CameraField::K1,
    CameraField::K2,
    CameraField::K3,
    CameraField::K4,
];

/// Radial distortion model with coefficients `k1..k4`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Radial4;

impl ProjectionModel for Radial4 {
    const NAME: &'static str = "radial4";
    const N_CAM_PARAMS: usize = 9;
    const N_IMG_PARAMS: usize = 22;
    const FIXED_CAMERA_FIELDS: &'static [CameraField] =
        &[CameraField::ImageWidth, CameraField::ImageHeight];
    const POSE_FIELDS: &'static [ImageField] = &[ImageField::AngleAxis, ImageField::Center];

    fn camera_layout() -> &'static BlockLayout<CameraField> {
        &CAMERA_LAYOUT
    }

    fn image_layout() -> &'static BlockLayout<ImageField> {
        &IMAGE_LAYOUT
    }

    fn layouts_checked() -> Result<(), LayoutError> {
        static CHECKED: OnceLock<Result<(), LayoutError>> = OnceLock::new();
        CHECKED.get_or_init(check_layouts::<Self>).clone()
    }

    /// Precondition: every optimizable intrinsic has a registered offset.
    ///
    /// The image size pair, when registered, is moved to the front first. A
    /// size field without an offset must already sit in its canonical slot:
    /// that slot has to be the one left free by the registered fields.
    fn reorder_camera(camera: &mut Camera) -> Result<(), LayoutError> {
        Self::layouts_checked()?;
        if camera.is_empty() {
            return Err(LayoutError::EmptyBlock);
        }
        if camera.len() != Self::N_CAM_PARAMS {
            return Err(LayoutError::WrongLength {
                expected: Self::N_CAM_PARAMS,
                got: camera.len(),
            });
        }
        // Resolve everything up front so a failure leaves the block untouched.
        camera.check_disjoint()?;
        for field in CAMERA_EXCHANGES {
            camera.value(field)?;
        }
        let mut taken = vec![false; Self::N_CAM_PARAMS];
        for (_, offset) in camera.offsets() {
            taken[offset] = true;
        }
        for (slot, field) in SIZE_FIELDS.into_iter().enumerate() {
            if camera.offset(field).is_none() && taken[CAM_WIDTH + slot] {
                return Err(LayoutError::SlotTaken {
                    field: field.name(),
                    offset: CAM_WIDTH + slot,
                });
            }
        }

        for (target, field) in SIZE_FIELDS.into_iter().enumerate() {
            if camera.offset(field).is_some() {
                camera.exchange(field, CAM_WIDTH + target)?;
            }
        }
        for (i, field) in CAMERA_EXCHANGES.into_iter().enumerate() {
            camera.exchange(field, CAM_F + i)?;
        }
        debug!("{}: camera parameters reordered", Self::NAME);
        camera.apply_layout(&CAMERA_LAYOUT)
    }

    fn reorder_image(image: &mut Image) -> Result<(), LayoutError> {
        Self::layouts_checked()?;
        if image.is_empty() {
            return Err(LayoutError::EmptyBlock);
        }
        let mut sorted = vec![0.0; Self::N_IMG_PARAMS];
        for spec in IMAGE_LAYOUT.fields() {
            let src = image.value(spec.field)?;
            sorted[spec.range()].copy_from_slice(src);
        }
        image.replace_values(sorted)?;
        debug!("{}: image parameters rebuilt", Self::NAME);
        image.apply_layout(&IMAGE_LAYOUT)
    }

    fn residual<T: RealField>(
        point: DVectorView<'_, T>,
        cam: DVectorView<'_, T>,
        img: DVectorView<'_, T>,
        obs: [f64; 2],
    ) -> Result<SVector<T, RESIDUAL_DIM>, DomainError> {
        debug_assert_eq!(point.len(), 3, "point must have 3 params");
        debug_assert_eq!(cam.len(), Self::N_CAM_PARAMS, "camera must have 9 params");
        debug_assert_eq!(img.len(), Self::N_IMG_PARAMS, "image must have 22 params");

        let f = cam[CAM_F].clone();
        let cx = cam[CAM_CX].clone();
        let cy = cam[CAM_CY].clone();
        let k1 = cam[CAM_K1].clone();
        let k2 = cam[CAM_K2].clone();
        let k3 = cam[CAM_K3].clone();
        let k4 = cam[CAM_K4].clone();

        let aa = Vector3::new(
            img[IMG_AA].clone(),
            img[IMG_AA + 1].clone(),
            img[IMG_AA + 2].clone(),
        );
        let center = Vector3::new(
            img[IMG_C].clone(),
            img[IMG_C + 1].clone(),
            img[IMG_C + 2].clone(),
        );
        let pw = Vector3::new(point[0].clone(), point[1].clone(), point[2].clone());

        let pc = angle_axis_rotate_point(&aa, &(pw - center));
        if pc.z.clone() <= T::from_f64(MIN_DEPTH).unwrap() {
            return Err(DomainError::BehindCamera);
        }
        let x = pc.x.clone() / pc.z.clone();
        let y = pc.y.clone() / pc.z.clone();

        let r2 = x.clone() * x.clone() + y.clone() * y.clone();
        let d = T::one() + r2.clone() * (k1 + r2.clone() * (k2 + r2.clone() * (k3 + r2 * k4)));

        let u = f.clone() * d.clone() * x + cx;
        let v = f * d * y + cy;

        let ru = u - T::from_f64(obs[0]).unwrap();
        let rv = v - T::from_f64(obs[1]).unwrap();
        if !(ru.is_finite() && rv.is_finite()) {
            return Err(DomainError::NonFinite);
        }
        Ok(SVector::<T, RESIDUAL_DIM>::new(ru, rv))
    }
}
