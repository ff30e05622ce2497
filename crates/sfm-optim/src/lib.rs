//! Projection models, cost functions and bundle adjustment for `sfm-rs`.
//!
//! The crate is organized around the [`ProjectionModel`] contract:
//!
//! - [`model`]: the trait every camera model implements (layouts, repair,
//!   generic residual),
//! - [`radial4`]: the 4-coefficient radial distortion model,
//! - [`projection`]: a borrowed binding of one observation to its camera,
//!   image and point,
//! - [`cost`]: the autodiff cost-function adapter handed to optimizers,
//! - [`bundle`]: a tiny-solver Levenberg-Marquardt driver over a whole scene.
//!
//! # Example
//!
//! ```no_run
//! use sfm_core::{Camera, Image, Observation, Point3D};
//! use sfm_optim::{Projection, Radial4};
//!
//! let mut camera = Camera::from_values(vec![640.0, 480.0, 1000.0, 320.0, 240.0, 0.0, 0.0, 0.0, 0.0]);
//! let mut image = Image::from_values(vec![0.0; 22]);
//! Projection::<Radial4>::init_camera_offsets(&mut camera)?;
//! Projection::<Radial4>::init_image_offsets(&mut image)?;
//!
//! let point = Point3D::new(0.0, 0.0, 5.0);
//! let obs = Observation::new(321.0, 240.0);
//! let r = Projection::<Radial4>::bound(&camera, &image, &point, &obs).residual()?;
//! assert!((r[0] + 1.0).abs() < 1e-9);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod bundle;
pub mod cost;
pub mod error;
pub mod model;
pub mod projection;
pub mod radial4;

pub use bundle::{
    build_problem, reprojection_errors, rms_error, solve_bundle, BundleProblem, BundleReport,
    BundleSolveOptions, ObservationRecord, RobustLoss, Scene,
};
pub use cost::{AutoDiffCost, CostFunction, Evaluation};
pub use error::{Binding, DomainError, ProjectionError};
pub use model::{ProjectionModel, POINT_DIM, RESIDUAL_DIM};
pub use projection::Projection;
pub use radial4::Radial4;
