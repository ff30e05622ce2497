//! Non-owning binding of a projection model to one observation.

use crate::cost::AutoDiffCost;
use crate::error::{Binding, ProjectionError};
use crate::model::ProjectionModel;
use nalgebra::DVectorView;
use sfm_core::{Camera, Image, LayoutError, Observation, Point3D};
use std::marker::PhantomData;

/// Borrowed view of the camera, image, point and observation of one residual.
///
/// The binding never outlives the scene entities it points to. Many bindings
/// may share the same camera or image; evaluation only reads through them.
#[derive(Debug)]
pub struct Projection<'a, M: ProjectionModel> {
    camera: Option<&'a Camera>,
    image: Option<&'a Image>,
    point: Option<&'a Point3D>,
    obs: Option<&'a Observation>,
    _model: PhantomData<M>,
}

impl<M: ProjectionModel> Clone for Projection<'_, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M: ProjectionModel> Copy for Projection<'_, M> {}

impl<M: ProjectionModel> Default for Projection<'_, M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, M: ProjectionModel> Projection<'a, M> {
    /// Binding with nothing attached.
    pub fn new() -> Self {
        Self {
            camera: None,
            image: None,
            point: None,
            obs: None,
            _model: PhantomData,
        }
    }

    pub fn with_camera(camera: &'a Camera) -> Self {
        Self {
            camera: Some(camera),
            ..Self::new()
        }
    }

    pub fn with_image(image: &'a Image) -> Self {
        Self {
            image: Some(image),
            ..Self::new()
        }
    }

    pub fn with_camera_image(camera: &'a Camera, image: &'a Image) -> Self {
        Self {
            camera: Some(camera),
            image: Some(image),
            ..Self::new()
        }
    }

    /// Fully bound instance, ready for evaluation.
    pub fn bound(
        camera: &'a Camera,
        image: &'a Image,
        point: &'a Point3D,
        obs: &'a Observation,
    ) -> Self {
        Self {
            camera: Some(camera),
            image: Some(image),
            point: Some(point),
            obs: Some(obs),
            _model: PhantomData,
        }
    }

    /// Attaches `point`, keeping the other bindings.
    pub fn with_point(self, point: &'a Point3D) -> Self {
        Self {
            point: Some(point),
            ..self
        }
    }

    /// Attaches `obs`, keeping the other bindings.
    pub fn with_observation(self, obs: &'a Observation) -> Self {
        Self {
            obs: Some(obs),
            ..self
        }
    }

    pub fn camera(&self) -> Option<&'a Camera> {
        self.camera
    }

    pub fn image(&self) -> Option<&'a Image> {
        self.image
    }

    pub fn point(&self) -> Option<&'a Point3D> {
        self.point
    }

    pub fn observation(&self) -> Option<&'a Observation> {
        self.obs
    }

    /// Assigns the canonical camera offsets; values are assumed in order.
    pub fn init_camera_offsets(camera: &mut Camera) -> Result<(), LayoutError> {
        M::init_camera_offsets(camera)
    }

    /// Assigns the canonical image offsets; values are assumed in order.
    pub fn init_image_offsets(image: &mut Image) -> Result<(), LayoutError> {
        M::init_image_offsets(image)
    }

    /// Sorts the camera values into canonical order by pairwise exchanges.
    pub fn reorder_camera_params(camera: &mut Camera) -> Result<(), LayoutError> {
        M::reorder_camera(camera)
    }

    /// Rebuilds the image values in canonical order.
    pub fn reorder_image_params(image: &mut Image) -> Result<(), LayoutError> {
        M::reorder_image(image)
    }

    pub fn num_cam_params() -> usize {
        M::N_CAM_PARAMS
    }

    pub fn num_img_params() -> usize {
        M::N_IMG_PARAMS
    }

    #[allow(clippy::type_complexity)]
    fn bindings(
        &self,
    ) -> Result<(&'a Camera, &'a Image, &'a Point3D, &'a Observation), ProjectionError> {
        let camera = self.camera.ok_or(ProjectionError::Unbound(Binding::Camera))?;
        let image = self.image.ok_or(ProjectionError::Unbound(Binding::Image))?;
        let point = self.point.ok_or(ProjectionError::Unbound(Binding::Point))?;
        let obs = self.obs.ok_or(ProjectionError::Unbound(Binding::Observation))?;
        camera.check_layout(M::camera_layout())?;
        image.check_layout(M::image_layout())?;
        Ok((camera, image, point, obs))
    }

    /// Builds the optimizer adapter for this observation.
    ///
    /// The adapter owns its own copy of the model state, so it stays valid
    /// after the binding is dropped. The optimizer supplies the point, camera
    /// and image blocks on every evaluation.
    pub fn cost_function(&self) -> Result<AutoDiffCost<M>, ProjectionError> {
        let (_, _, _, obs) = self.bindings()?;
        Ok(AutoDiffCost::new(obs.uv))
    }

    /// Evaluates the residual with plain `f64` into `out`.
    ///
    /// `out` is written only when every binding is set, both blocks carry the
    /// canonical layout and the projection succeeds.
    pub fn compute_residual(&self, out: &mut [f64; 2]) -> Result<(), ProjectionError> {
        let (camera, image, point, obs) = self.bindings()?;
        let r = M::residual(
            DVectorView::from_slice(&point.xyz, point.xyz.len()),
            DVectorView::from_slice(camera.values(), camera.len()),
            DVectorView::from_slice(image.values(), image.len()),
            obs.uv,
        )?;
        out.copy_from_slice(r.as_slice());
        Ok(())
    }

    /// Convenience wrapper around [`Projection::compute_residual`].
    pub fn residual(&self) -> Result<[f64; 2], ProjectionError> {
        let mut out = [0.0; 2];
        self.compute_residual(&mut out)?;
        Ok(out)
    }
}
