//! Bundle adjustment over a scene of cameras, images and points.
//!
//! Every observation becomes one [`AutoDiffCost`] residual block over
//! `[pt/{point}, cam/{camera}, img/{image}]`. Only entities referenced by at
//! least one observation are added to the problem.

use crate::cost::AutoDiffCost;
use crate::model::{ProjectionModel, RESIDUAL_DIM};
use crate::projection::Projection;
use anyhow::{anyhow, ensure, Context, Result};
use log::debug;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use sfm_core::{sync_pose_from_angle_axis, Camera, CameraField, Image, Observation, Point3D};
use std::collections::{BTreeSet, HashMap};
use tiny_solver::loss_functions::{ArctanLoss, CauchyLoss, HuberLoss, Loss};
use tiny_solver::optimizer::{Optimizer, OptimizerOptions};
use tiny_solver::problem::Problem;
use tiny_solver::LevenbergMarquardtOptimizer;

/// One measured pixel linking a camera, an image and a point by index.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub camera: usize,
    pub image: usize,
    pub point: usize,
    pub obs: Observation,
}

/// Owning container for the entities of one reconstruction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub cameras: Vec<Camera>,
    pub images: Vec<Image>,
    pub points: Vec<Point3D>,
    pub observations: Vec<ObservationRecord>,
}

impl Scene {
    fn check_indices(&self) -> Result<()> {
        for (k, rec) in self.observations.iter().enumerate() {
            ensure!(
                rec.camera < self.cameras.len(),
                "observation {k} references camera {} of {}",
                rec.camera,
                self.cameras.len()
            );
            ensure!(
                rec.image < self.images.len(),
                "observation {k} references image {} of {}",
                rec.image,
                self.images.len()
            );
            ensure!(
                rec.point < self.points.len(),
                "observation {k} references point {} of {}",
                rec.point,
                self.points.len()
            );
        }
        Ok(())
    }

    fn projection<'a, M: ProjectionModel>(
        &'a self,
        rec: &'a ObservationRecord,
    ) -> Projection<'a, M> {
        Projection::bound(
            &self.cameras[rec.camera],
            &self.images[rec.image],
            &self.points[rec.point],
            &rec.obs,
        )
    }
}

/// Robust loss applied to every reprojection residual, scale in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum RobustLoss {
    #[default]
    None,
    Huber {
        scale: f64,
    },
    Cauchy {
        scale: f64,
    },
    Arctan {
        scale: f64,
    },
}

impl RobustLoss {
    fn scale(self) -> Option<f64> {
        match self {
            RobustLoss::None => None,
            RobustLoss::Huber { scale }
            | RobustLoss::Cauchy { scale }
            | RobustLoss::Arctan { scale } => Some(scale),
        }
    }

    /// Fresh tiny-solver loss for one residual block; `None` keeps it quadratic.
    fn residual_loss(self) -> Result<Option<Box<dyn Loss + Send>>> {
        if let Some(scale) = self.scale() {
            ensure!(
                scale > 0.0 && scale.is_finite(),
                "reprojection loss {self:?} needs a positive pixel scale"
            );
        }
        Ok(match self {
            RobustLoss::None => None,
            RobustLoss::Huber { scale } => Some(Box::new(HuberLoss::new(scale))),
            RobustLoss::Cauchy { scale } => Some(Box::new(CauchyLoss::new(scale))),
            RobustLoss::Arctan { scale } => Some(Box::new(ArctanLoss::new(scale))),
        })
    }
}

/// Solver and problem options for [`solve_bundle`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleSolveOptions {
    /// Maximum number of iterations for the optimizer.
    pub max_iters: usize,
    /// Verbosity level forwarded to tiny-solver.
    pub verbosity: usize,
    /// Absolute error decrease threshold for early termination.
    pub min_abs_decrease: Option<f64>,
    /// Relative error decrease threshold for early termination.
    pub min_rel_decrease: Option<f64>,
    /// Error threshold for early termination.
    pub min_error: Option<f64>,
    pub loss: RobustLoss,
    /// Keep every camera intrinsic at its initial value.
    pub fix_intrinsics: bool,
    /// Intrinsics held constant on top of the image size, e.g. high-order
    /// distortion terms the scene cannot constrain.
    pub fixed_camera_fields: Vec<CameraField>,
    /// Keep every point at its initial position.
    pub fix_points: bool,
    /// Images whose pose is held constant.
    pub fixed_images: Vec<usize>,
}

impl BundleSolveOptions {
    /// Solver settings; unset thresholds keep tiny-solver's defaults.
    fn optimizer_options(&self) -> OptimizerOptions {
        let defaults = OptimizerOptions::default();
        OptimizerOptions {
            max_iteration: self.max_iters,
            verbosity_level: self.verbosity,
            min_abs_error_decrease_threshold: self
                .min_abs_decrease
                .unwrap_or(defaults.min_abs_error_decrease_threshold),
            min_rel_error_decrease_threshold: self
                .min_rel_decrease
                .unwrap_or(defaults.min_rel_error_decrease_threshold),
            min_error_threshold: self.min_error.unwrap_or(defaults.min_error_threshold),
            ..defaults
        }
    }
}

impl Default for BundleSolveOptions {
    fn default() -> Self {
        Self {
            max_iters: 100,
            verbosity: 0,
            min_abs_decrease: Some(1e-5),
            min_rel_decrease: Some(1e-5),
            min_error: Some(1e-10),
            loss: RobustLoss::None,
            fix_intrinsics: false,
            fixed_camera_fields: Vec::new(),
            fix_points: false,
            fixed_images: Vec::new(),
        }
    }
}

/// Summary of one [`solve_bundle`] run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BundleReport {
    pub num_residuals: usize,
    pub initial_rms: f64,
    pub final_rms: f64,
}

pub fn camera_block(index: usize) -> String {
    format!("cam/{index}")
}

pub fn image_block(index: usize) -> String {
    format!("img/{index}")
}

pub fn point_block(index: usize) -> String {
    format!("pt/{index}")
}

/// Compiled tiny-solver problem and its initial values.
pub struct BundleProblem {
    pub problem: Problem,
    pub initial: HashMap<String, DVector<f64>>,
}

/// Builds the tiny-solver problem for `scene`.
///
/// Fails when an observation references a missing entity, a referenced block
/// does not carry the canonical layout of `M`, or the loss is misconfigured.
pub fn build_problem<M: ProjectionModel>(
    scene: &Scene,
    opts: &BundleSolveOptions,
) -> Result<BundleProblem> {
    M::layouts_checked().map_err(|e| anyhow!("{} layout is invalid: {e}", M::NAME))?;
    scene.check_indices()?;

    let mut problem = Problem::new();
    let mut initial = HashMap::new();
    let mut cameras = BTreeSet::new();
    let mut images = BTreeSet::new();
    let mut points = BTreeSet::new();

    for (k, rec) in scene.observations.iter().enumerate() {
        let factor: AutoDiffCost<M> = scene
            .projection::<M>(rec)
            .cost_function()
            .with_context(|| format!("observation {k}"))?;
        let names = [
            point_block(rec.point),
            camera_block(rec.camera),
            image_block(rec.image),
        ];
        let refs: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
        let loss = opts.loss.residual_loss()?;
        problem.add_residual_block(RESIDUAL_DIM, &refs, Box::new(factor), loss);

        cameras.insert(rec.camera);
        images.insert(rec.image);
        points.insert(rec.point);
    }

    for &i in &cameras {
        let name = camera_block(i);
        initial.insert(name.clone(), DVector::from_column_slice(scene.cameras[i].values()));
        for idx in fixed_camera_indices::<M>(opts) {
            problem.fix_variable(&name, idx);
        }
    }

    for &i in &images {
        let name = image_block(i);
        initial.insert(name.clone(), DVector::from_column_slice(scene.images[i].values()));
        for idx in fixed_image_indices::<M>(opts.fixed_images.contains(&i)) {
            problem.fix_variable(&name, idx);
        }
    }

    for &i in &points {
        let name = point_block(i);
        initial.insert(name.clone(), DVector::from_column_slice(&scene.points[i].xyz));
        if opts.fix_points {
            for idx in 0..scene.points[i].xyz.len() {
                problem.fix_variable(&name, idx);
            }
        }
    }

    debug!(
        "{}: {} residuals over {} cameras, {} images, {} points",
        M::NAME,
        scene.observations.len(),
        cameras.len(),
        images.len(),
        points.len()
    );
    Ok(BundleProblem { problem, initial })
}

/// Camera indices held constant: the image size plus the requested fields,
/// or everything.
fn fixed_camera_indices<M: ProjectionModel>(opts: &BundleSolveOptions) -> Vec<usize> {
    if opts.fix_intrinsics {
        return (0..M::N_CAM_PARAMS).collect();
    }
    let layout = M::camera_layout();
    let fixed: BTreeSet<usize> = M::FIXED_CAMERA_FIELDS
        .iter()
        .chain(&opts.fixed_camera_fields)
        .filter_map(|&field| layout.spec(field))
        .flat_map(|spec| spec.range())
        .collect();
    fixed.into_iter().collect()
}

/// Image indices held constant: whatever the residual does not read, or everything.
fn fixed_image_indices<M: ProjectionModel>(all: bool) -> Vec<usize> {
    if all {
        return (0..M::N_IMG_PARAMS).collect();
    }
    let layout = M::image_layout();
    let read: BTreeSet<usize> = M::POSE_FIELDS
        .iter()
        .filter_map(|&field| layout.spec(field))
        .flat_map(|spec| spec.range())
        .collect();
    (0..M::N_IMG_PARAMS).filter(|i| !read.contains(i)).collect()
}

/// Runs Levenberg-Marquardt on `scene` and writes the optimum back.
///
/// Optimized images get their quaternion, translation and rotation matrix
/// recomputed from the angle-axis and center.
pub fn solve_bundle<M: ProjectionModel>(
    scene: &mut Scene,
    opts: &BundleSolveOptions,
) -> Result<BundleReport> {
    let initial_rms = rms_error::<M>(scene)?;
    let BundleProblem { problem, initial } = build_problem::<M>(scene, opts)?;

    let optimizer = LevenbergMarquardtOptimizer::default();
    let solution = optimizer
        .optimize(&problem, &initial, Some(opts.optimizer_options()))
        .ok_or_else(|| anyhow!("tiny-solver failed to converge"))?;

    for (i, camera) in scene.cameras.iter_mut().enumerate() {
        if let Some(v) = solution.get(&camera_block(i)) {
            write_back(camera.values_mut(), v, &camera_block(i))?;
        }
    }
    for (i, image) in scene.images.iter_mut().enumerate() {
        if let Some(v) = solution.get(&image_block(i)) {
            write_back(image.values_mut(), v, &image_block(i))?;
            sync_pose_from_angle_axis(image).with_context(|| image_block(i))?;
        }
    }
    for (i, point) in scene.points.iter_mut().enumerate() {
        if let Some(v) = solution.get(&point_block(i)) {
            write_back(&mut point.xyz, v, &point_block(i))?;
        }
    }

    let final_rms = rms_error::<M>(scene)?;
    debug!(
        "{}: rms {:.6} -> {:.6} px",
        M::NAME,
        initial_rms,
        final_rms
    );
    Ok(BundleReport {
        num_residuals: scene.observations.len(),
        initial_rms,
        final_rms,
    })
}

fn write_back(dst: &mut [f64], src: &DVector<f64>, name: &str) -> Result<()> {
    ensure!(
        dst.len() == src.len(),
        "solution dimension mismatch for {name}: expected {}, got {}",
        dst.len(),
        src.len()
    );
    dst.copy_from_slice(src.as_slice());
    Ok(())
}

/// Per-observation residuals, evaluated without differentiation.
pub fn reprojection_errors<M: ProjectionModel>(scene: &Scene) -> Result<Vec<[f64; 2]>> {
    scene.check_indices()?;
    scene
        .observations
        .iter()
        .enumerate()
        .map(|(k, rec)| {
            scene
                .projection::<M>(rec)
                .residual()
                .with_context(|| format!("observation {k}"))
        })
        .collect()
}

/// Root mean squared pixel distance over all observations; `0` for none.
pub fn rms_error<M: ProjectionModel>(scene: &Scene) -> Result<f64> {
    let errors = reprojection_errors::<M>(scene)?;
    if errors.is_empty() {
        return Ok(0.0);
    }
    let sum: f64 = errors.iter().map(|r| r[0] * r[0] + r[1] * r[1]).sum();
    Ok((sum / errors.len() as f64).sqrt())
}
